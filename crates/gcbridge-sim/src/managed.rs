//! An in-memory managed runtime: a class table with single inheritance,
//! objects addressed by fake heap addresses and word-sized fields.
use gcbridge_core::{
    ManagedRuntime,
    domains::{SIGNAL_ASSEMBLY, SIGNAL_CLASS, SIGNAL_FIELD, SIGNAL_NAMESPACE},
    registry::{
        BRIDGE_TYPES, HANDLE_FIELD, HANDLE_TYPE_FIELD, REFS_ADDED_FIELD, WEAK_HANDLE_FIELD,
    },
};
use gcbridge_utils::{ClassId, DomainId, FieldId, ManagedObject, sync::Mutex};
use std::collections::HashMap;

const OBJECT_BASE: usize = 0x10_0000;
const OBJECT_STRIDE: usize = 0x20;

#[derive(Debug, Clone)]
struct ClassInfo {
    assembly: String,
    namespace: String,
    name: String,
    parent: Option<ClassId>,
    fields: Vec<(String, FieldId)>,
}

#[derive(Debug, Default)]
struct ManagedState {
    classes: Vec<ClassInfo>,
    next_field: usize,
    objects: HashMap<ManagedObject, ClassId>,
    values: HashMap<(ManagedObject, FieldId), usize>,
    statics: HashMap<(DomainId, FieldId), usize>,
    static_writes: Vec<(DomainId, FieldId, usize)>,
}

#[derive(Debug, Default)]
pub struct SimManaged {
    state: Mutex<ManagedState>,
}

impl SimManaged {
    pub fn new() -> Self {
        Self::default()
    }

    /// A runtime that already defines every bridge base type and the domain
    /// signal class.
    pub fn with_bridge_types() -> Self {
        let rt = Self::new();
        let fields = [
            HANDLE_FIELD,
            HANDLE_TYPE_FIELD,
            REFS_ADDED_FIELD,
            WEAK_HANDLE_FIELD,
        ];
        for ty in BRIDGE_TYPES {
            rt.define_class(ty.assembly, ty.namespace, ty.name, None, &fields);
        }
        rt.define_class(
            SIGNAL_ASSEMBLY,
            SIGNAL_NAMESPACE,
            SIGNAL_CLASS,
            None,
            &[SIGNAL_FIELD],
        );
        rt
    }

    pub fn define_class(
        &self,
        assembly: &str,
        namespace: &str,
        name: &str,
        parent: Option<ClassId>,
        fields: &[&str],
    ) -> ClassId {
        let mut state = self.state.lock();
        let mut declared = Vec::with_capacity(fields.len());
        for field in fields {
            declared.push((field.to_string(), FieldId(state.next_field)));
            state.next_field += 1;
        }
        state.classes.push(ClassInfo {
            assembly: assembly.to_string(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            parent,
            fields: declared,
        });
        ClassId(state.classes.len() - 1)
    }

    /// Find a class by `Namespace.Name` regardless of assembly.
    pub fn class_named(&self, full_name: &str) -> Option<ClassId> {
        let state = self.state.lock();
        state
            .classes
            .iter()
            .position(|c| format!("{}.{}", c.namespace, c.name) == full_name)
            .map(ClassId)
    }

    pub fn alloc(&self, class: ClassId) -> ManagedObject {
        let mut state = self.state.lock();
        let obj = ManagedObject(OBJECT_BASE + state.objects.len() * OBJECT_STRIDE);
        state.objects.insert(obj, class);
        obj
    }

    /// Read a field by name, for assertions.
    pub fn field_value(&self, obj: ManagedObject, name: &str) -> Option<usize> {
        let class = self.class_of(obj);
        let field = self.find_field(class, name)?;
        Some(self.get_field(obj, field))
    }

    pub fn static_value(&self, domain: DomainId, field: FieldId) -> usize {
        self.state
            .lock()
            .statics
            .get(&(domain, field))
            .copied()
            .unwrap_or(0)
    }

    /// Every static field write, in order.
    pub fn static_writes(&self) -> Vec<(DomainId, FieldId, usize)> {
        self.state.lock().static_writes.clone()
    }
}

impl ManagedRuntime for SimManaged {
    fn find_class(
        &self,
        _domain: DomainId,
        assembly: &str,
        namespace: &str,
        name: &str,
    ) -> Option<ClassId> {
        let state = self.state.lock();
        state
            .classes
            .iter()
            .position(|c| c.assembly == assembly && c.namespace == namespace && c.name == name)
            .map(ClassId)
    }

    fn find_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        let state = self.state.lock();
        let mut current = Some(class);
        while let Some(c) = current {
            let info = state.classes.get(c.0)?;
            if let Some((_, id)) = info.fields.iter().find(|(n, _)| n == name) {
                return Some(*id);
            }
            current = info.parent;
        }
        None
    }

    fn class_of(&self, obj: ManagedObject) -> ClassId {
        let state = self.state.lock();
        match state.objects.get(&obj) {
            Some(class) => *class,
            None => {
                tracing::error!("class_of on unknown object {}", obj);
                ClassId(usize::MAX)
            }
        }
    }

    fn is_subclass_of(&self, class: ClassId, base: ClassId) -> bool {
        let state = self.state.lock();
        let mut current = state.classes.get(class.0).and_then(|c| c.parent);
        while let Some(c) = current {
            if c == base {
                return true;
            }
            current = state.classes.get(c.0).and_then(|c| c.parent);
        }
        false
    }

    fn class_name(&self, class: ClassId) -> String {
        let state = self.state.lock();
        state.classes.get(class.0).map_or_else(
            || format!("<unknown class {}>", class.0),
            |c| format!("{}.{}", c.namespace, c.name),
        )
    }

    fn get_field(&self, obj: ManagedObject, field: FieldId) -> usize {
        self.state
            .lock()
            .values
            .get(&(obj, field))
            .copied()
            .unwrap_or(0)
    }

    fn set_field(&self, obj: ManagedObject, field: FieldId, value: usize) {
        self.state.lock().values.insert((obj, field), value);
    }

    fn set_static_field(&self, domain: DomainId, field: FieldId, value: usize) {
        let mut state = self.state.lock();
        state.statics.insert((domain, field), value);
        state.static_writes.push((domain, field, value));
    }
}
