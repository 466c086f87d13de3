//! The bridge type registry.
//!
//! A small, fixed list of managed base types may own host peers. Each is
//! resolved once per owning domain together with the four instance fields the
//! bridge reads and writes. The registry is published as an immutable
//! snapshot: readers hold an `Arc` to the snapshot they started with, so a
//! domain teardown racing with a classification cannot pull descriptors out
//! from under it. Every publish bumps a generation counter.
use crate::{error::RegistryError, managed::ManagedRuntime};
use gcbridge_utils::{
    ClassId, DebugStr, DomainId, FieldId, ManagedObject,
    sync::{Arc, AtomicU64, Ordering, RwLock},
};
use std::fmt::{Debug, Formatter};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTypeName {
    pub assembly: &'static str,
    pub namespace: &'static str,
    pub name: &'static str,
}

impl BridgeTypeName {
    pub const fn new(assembly: &'static str, namespace: &'static str, name: &'static str) -> Self {
        Self {
            assembly,
            namespace,
            name,
        }
    }

    pub fn full_name(&self) -> String {
        format!("{}.{}", self.namespace, self.name)
    }
}

/// Managed base types whose instances may own a host peer.
pub const BRIDGE_TYPES: [BridgeTypeName; 4] = [
    BridgeTypeName::new("Mono.Android", "Java.Lang", "Object"),
    BridgeTypeName::new("Mono.Android", "Java.Lang", "Throwable"),
    BridgeTypeName::new("Java.Interop", "Java.Interop", "JavaObject"),
    BridgeTypeName::new("Java.Interop", "Java.Interop", "JavaException"),
];

pub const HANDLE_FIELD: &str = "handle";
pub const HANDLE_TYPE_FIELD: &str = "handle_type";
pub const REFS_ADDED_FIELD: &str = "refs_added";
pub const WEAK_HANDLE_FIELD: &str = "weak_handle";

/// A resolved bridge base type and the instance fields the bridge uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeTypeDescriptor {
    pub class: ClassId,
    /// Raw peer handle, `0` when there is no peer.
    pub handle: FieldId,
    /// [`RefKind`](crate::host::RefKind) of `handle`.
    pub handle_type: FieldId,
    /// Set while synthetic references issued by this object's peer exist.
    pub refs_added: FieldId,
    /// Global handle to the host weak-reference wrapper; emulated strategy only.
    pub weak_handle: FieldId,
}

/// Why a class has no registry index.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyMiss {
    /// Some registry slots are unresolved: either no domain has been
    /// initialized yet, or the owning domain has been torn down.
    #[error("bridge type registry is not ready")]
    NotYetReady,
    /// The registry is complete and the class derives from none of its types.
    #[error("class is not a bridge type")]
    NotABridge,
}

pub struct RegistrySnapshot {
    generation: u64,
    owner: Option<DomainId>,
    slots: Vec<Option<BridgeTypeDescriptor>>,
}

impl RegistrySnapshot {
    fn empty(generation: u64, len: usize) -> Self {
        Self {
            generation,
            owner: None,
            slots: vec![None; len],
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn owner(&self) -> Option<DomainId> {
        self.owner
    }

    pub fn is_ready(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    pub fn descriptor(&self, index: usize) -> Option<&BridgeTypeDescriptor> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn classify_index(
        &self,
        managed: &dyn ManagedRuntime,
        class: ClassId,
    ) -> Result<usize, ClassifyMiss> {
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(desc) = slot else {
                return Err(ClassifyMiss::NotYetReady);
            };
            if desc.class == class || managed.is_subclass_of(class, desc.class) {
                return Ok(i);
            }
        }
        Err(ClassifyMiss::NotABridge)
    }

    /// Descriptor governing `obj`, if its class is a bridge type.
    pub fn descriptor_for(
        &self,
        managed: &dyn ManagedRuntime,
        obj: ManagedObject,
    ) -> Option<&BridgeTypeDescriptor> {
        self.classify_index(managed, managed.class_of(obj))
            .ok()
            .and_then(|i| self.descriptor(i))
    }
}

impl Debug for RegistrySnapshot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrySnapshot")
            .field("generation", &self.generation)
            .field("owner", &self.owner)
            .field(
                "slots",
                &DebugStr(
                    self.slots
                        .iter()
                        .map(|s| match s {
                            Some(d) => d.class.to_string(),
                            None => "<unresolved>".to_string(),
                        })
                        .collect::<Vec<_>>()
                        .join(", "),
                ),
            )
            .finish()
    }
}

pub struct BridgeTypeRegistry {
    types: Vec<BridgeTypeName>,
    current: RwLock<Arc<RegistrySnapshot>>,
    generation: AtomicU64,
}

impl Default for BridgeTypeRegistry {
    fn default() -> Self {
        Self::new(BRIDGE_TYPES.to_vec())
    }
}

impl Debug for BridgeTypeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Debug::fmt(&*self.snapshot(), f)
    }
}

impl BridgeTypeRegistry {
    pub fn new(types: Vec<BridgeTypeName>) -> Self {
        let len = types.len();
        Self {
            types,
            current: RwLock::new(Arc::new(RegistrySnapshot::empty(0, len))),
            generation: AtomicU64::new(0),
        }
    }

    pub fn types(&self) -> &[BridgeTypeName] {
        &self.types
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.current.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }

    /// Resolve every bridge type and its fields in `domain` and publish the
    /// result. Nothing is published unless every type and field resolves.
    pub fn resolve(
        &self,
        managed: &dyn ManagedRuntime,
        domain: DomainId,
    ) -> Result<(), RegistryError> {
        let mut slots = Vec::with_capacity(self.types.len());
        for ty in &self.types {
            slots.push(Some(resolve_descriptor(managed, domain, ty)?));
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *self.current.write() = Arc::new(RegistrySnapshot {
            generation,
            owner: Some(domain),
            slots,
        });
        tracing::debug!(
            target: "gcbridge::gc",
            "resolved {} bridge types in {} (generation {})",
            self.types.len(),
            domain,
            generation
        );
        Ok(())
    }

    /// Drop the descriptors if `domain` owns them. Returns whether anything
    /// was dropped.
    pub fn teardown(&self, domain: DomainId) -> bool {
        let mut current = self.current.write();
        if current.owner != Some(domain) {
            return false;
        }
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        *current = Arc::new(RegistrySnapshot::empty(generation, self.types.len()));
        tracing::debug!(
            target: "gcbridge::gc",
            "dropped bridge types owned by {} (generation {})",
            domain,
            generation
        );
        true
    }

    pub fn classify_index(
        &self,
        managed: &dyn ManagedRuntime,
        class: ClassId,
    ) -> Result<usize, ClassifyMiss> {
        self.snapshot().classify_index(managed, class)
    }
}

fn resolve_descriptor(
    managed: &dyn ManagedRuntime,
    domain: DomainId,
    ty: &BridgeTypeName,
) -> Result<BridgeTypeDescriptor, RegistryError> {
    let class = managed
        .find_class(domain, ty.assembly, ty.namespace, ty.name)
        .ok_or_else(|| RegistryError::TypeNotFound {
            assembly: ty.assembly.to_string(),
            namespace: ty.namespace.to_string(),
            name: ty.name.to_string(),
        })?;

    let field = |name: &str| {
        managed
            .find_field(class, name)
            .ok_or_else(|| RegistryError::FieldNotFound {
                type_name: ty.full_name(),
                field: name.to_string(),
            })
    };

    Ok(BridgeTypeDescriptor {
        class,
        handle: field(HANDLE_FIELD)?,
        handle_type: field(HANDLE_TYPE_FIELD)?,
        refs_added: field(REFS_ADDED_FIELD)?,
        weak_handle: field(WEAK_HANDLE_FIELD)?,
    })
}
