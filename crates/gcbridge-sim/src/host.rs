//! A host heap backed by a `gc-arena` arena.
//!
//! Host objects live in the arena and reference each other through `Gc`
//! pointers. The handle table is the arena root: local and global handles
//! keep their target alive, weak global handles do not. Objects pinned with
//! [`SimHost::add_root`] stand in for references held by host code the bridge
//! knows nothing about.
use gc_arena::{Arena, Collect, Gc, GcWeak, Mutation, Rootable, lock::RefLock};
use gcbridge_core::{HostError, HostHeap, RefKind, SyntheticLinkMethods};
use gcbridge_utils::{
    HostClass, HostRef, MethodId,
    sync::get_current_thread_id,
};
use serde::Serialize;
use std::{
    cell::{Cell, RefCell},
    collections::HashSet,
    num::NonZeroUsize,
};

type ObjPtr<'gc> = Gc<'gc, RefLock<HostObject<'gc>>>;
type WeakObjPtr<'gc> = GcWeak<'gc, RefLock<HostObject<'gc>>>;

/// First raw handle value; keeps handles visibly distinct from object ids.
const HANDLE_BASE: usize = 0x1000;

pub const OBJECT_CLASS: HostClass = HostClass(0);
/// Class of the temporary proxies; supports synthetic linking.
pub const PROXY_CLASS: HostClass = HostClass(1);
pub const LIST_CLASS: HostClass = HostClass(2);
pub const WEAK_REFERENCE_CLASS: HostClass = HostClass(3);

#[derive(Collect)]
#[collect(no_drop)]
struct HostObject<'gc> {
    id: u64,
    class: HostClass,
    /// Real references, and list elements for list objects.
    refs: Vec<ObjPtr<'gc>>,
    /// References added through `addReference`.
    synthetic: Vec<ObjPtr<'gc>>,
    /// Referent of a weak-reference object.
    weak_target: Option<WeakObjPtr<'gc>>,
}

#[derive(Collect)]
#[collect(no_drop)]
enum Slot<'gc> {
    Local(ObjPtr<'gc>),
    Global(ObjPtr<'gc>),
    WeakGlobal(WeakObjPtr<'gc>),
}

impl<'gc> Slot<'gc> {
    fn kind(&self) -> RefKind {
        match self {
            Slot::Local(_) => RefKind::Local,
            Slot::Global(_) => RefKind::Global,
            Slot::WeakGlobal(_) => RefKind::WeakGlobal,
        }
    }

    fn target(&self, mc: &Mutation<'gc>) -> Option<ObjPtr<'gc>> {
        match self {
            Slot::Local(obj) | Slot::Global(obj) => Some(*obj),
            Slot::WeakGlobal(weak) => weak.upgrade(mc),
        }
    }
}

#[derive(Collect)]
#[collect(no_drop)]
struct HostRoot<'gc> {
    /// Handle table, indexed by `raw - HANDLE_BASE`. Deleted handles leave a
    /// hole so a stale handle is never reused.
    handles: Vec<Option<Slot<'gc>>>,
    /// Objects held by code outside the bridge.
    pinned: Vec<ObjPtr<'gc>>,
    /// Every object ever allocated, for liveness queries.
    all: Vec<(u64, WeakObjPtr<'gc>)>,
}

impl<'gc> HostRoot<'gc> {
    fn slot(&self, handle: HostRef) -> Option<&Slot<'gc>> {
        let index = handle.get().checked_sub(HANDLE_BASE)?;
        self.handles.get(index)?.as_ref()
    }

    fn resolve(&self, mc: &Mutation<'gc>, handle: HostRef) -> Option<ObjPtr<'gc>> {
        self.slot(handle)?.target(mc)
    }

    fn push(&mut self, slot: Slot<'gc>) -> HostRef {
        let index = self.handles.len();
        self.handles.push(Some(slot));
        HostRef::new(NonZeroUsize::MIN.saturating_add(HANDLE_BASE - 1 + index))
    }

    /// Allocate an object and return a local handle to it.
    fn spawn(
        &mut self,
        mc: &Mutation<'gc>,
        id: u64,
        class: HostClass,
        weak_target: Option<WeakObjPtr<'gc>>,
    ) -> HostRef {
        let obj = Gc::new(
            mc,
            RefLock::new(HostObject {
                id,
                class,
                refs: Vec::new(),
                synthetic: Vec::new(),
                weak_target,
            }),
        );
        self.all.push((id, Gc::downgrade(obj)));
        self.push(Slot::Local(obj))
    }

    fn take(&mut self, handle: HostRef, kind: RefKind) -> bool {
        let Some(index) = handle.get().checked_sub(HANDLE_BASE) else {
            return false;
        };
        match self.handles.get_mut(index) {
            Some(entry) if entry.as_ref().map(Slot::kind) == Some(kind) => {
                *entry = None;
                true
            }
            _ => false,
        }
    }
}

type HostArena = Arena<Rootable![HostRoot<'_>]>;

#[derive(Debug, Clone)]
struct SimClass {
    name: String,
    linkable: bool,
}

/// Call counters of a [`SimHost`].
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct SimHostStats {
    pub add_reference_calls: usize,
    pub clear_references_calls: usize,
    pub proxies_allocated: usize,
    pub collections: usize,
    pub attach_calls: usize,
    /// Deletes of unknown, stale or mismatched handles.
    pub invalid_handle_ops: usize,
}

pub struct SimHost {
    arena: RefCell<HostArena>,
    classes: RefCell<Vec<SimClass>>,
    next_object_id: Cell<u64>,
    stats: Cell<SimHostStats>,
    attached: RefCell<HashSet<u64>>,
    attach_failure: RefCell<Option<String>>,
}

impl Default for SimHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimHost {
    pub fn new() -> Self {
        let classes = vec![
            SimClass {
                name: "java/lang/Object".to_string(),
                linkable: false,
            },
            SimClass {
                name: "mono/android/GCUserPeer".to_string(),
                linkable: true,
            },
            SimClass {
                name: "java/util/ArrayList".to_string(),
                linkable: false,
            },
            SimClass {
                name: "java/lang/ref/WeakReference".to_string(),
                linkable: false,
            },
        ];
        Self {
            arena: RefCell::new(HostArena::new(|_| HostRoot {
                handles: Vec::new(),
                pinned: Vec::new(),
                all: Vec::new(),
            })),
            classes: RefCell::new(classes),
            next_object_id: Cell::new(1),
            stats: Cell::new(SimHostStats::default()),
            attached: RefCell::new(HashSet::new()),
            attach_failure: RefCell::new(None),
        }
    }

    fn bump(&self, f: impl FnOnce(&mut SimHostStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    pub fn stats(&self) -> SimHostStats {
        self.stats.get()
    }

    /// Register a host class. Instances of a `linkable` class accept
    /// synthetic references.
    pub fn define_class(&self, name: &str, linkable: bool) -> HostClass {
        let mut classes = self.classes.borrow_mut();
        classes.push(SimClass {
            name: name.to_string(),
            linkable,
        });
        HostClass(classes.len() - 1)
    }

    /// Make every later attach fail with `reason`, or succeed again with `None`.
    pub fn set_attach_failure(&self, reason: Option<&str>) {
        *self.attach_failure.borrow_mut() = reason.map(str::to_string);
    }

    pub fn is_thread_attached(&self, thread_id: u64) -> bool {
        self.attached.borrow().contains(&thread_id)
    }

    fn next_id(&self) -> u64 {
        let id = self.next_object_id.get();
        self.next_object_id.set(id + 1);
        id
    }

    /// Allocate an object of `class`. Returns a local handle.
    pub fn new_object(&self, class: HostClass) -> HostRef {
        let id = self.next_id();
        self.arena
            .borrow_mut()
            .mutate_root(|mc, root| root.spawn(mc, id, class, None))
    }

    /// Keep the object behind `handle` alive independently of any handle.
    pub fn add_root(&self, handle: HostRef) -> bool {
        self.arena.borrow_mut().mutate_root(|mc, root| {
            let Some(obj) = root.resolve(mc, handle) else {
                return false;
            };
            root.pinned.push(obj);
            true
        })
    }

    pub fn remove_root(&self, handle: HostRef) -> bool {
        self.arena.borrow_mut().mutate_root(|mc, root| {
            let Some(obj) = root.resolve(mc, handle) else {
                return false;
            };
            let before = root.pinned.len();
            root.pinned.retain(|p| !Gc::ptr_eq(*p, obj));
            before != root.pinned.len()
        })
    }

    /// Add a real host reference `from -> to`.
    pub fn add_real_reference(&self, from: HostRef, to: HostRef) -> Result<(), HostError> {
        self.arena.borrow().mutate(|mc, root| {
            let from_obj = root.resolve(mc, from).ok_or(HostError::InvalidHandle(from))?;
            let to_obj = root.resolve(mc, to).ok_or(HostError::InvalidHandle(to))?;
            from_obj.borrow_mut(mc).refs.push(to_obj);
            Ok(())
        })
    }

    /// Stable id of the object behind `handle`.
    pub fn object_id(&self, handle: HostRef) -> Option<u64> {
        self.arena
            .borrow()
            .mutate(|mc, root| root.resolve(mc, handle).map(|o| o.borrow().id))
    }

    pub fn is_object_alive(&self, id: u64) -> bool {
        self.arena.borrow().mutate(|mc, root| {
            root.all
                .iter()
                .find(|(oid, _)| *oid == id)
                .is_some_and(|(_, weak)| weak.upgrade(mc).is_some())
        })
    }

    pub fn live_objects(&self) -> usize {
        self.arena.borrow().mutate(|mc, root| {
            root.all
                .iter()
                .filter(|(_, weak)| weak.upgrade(mc).is_some())
                .count()
        })
    }

    /// Number of synthetic references currently held by the object behind
    /// `handle`.
    pub fn synthetic_ref_count(&self, handle: HostRef) -> usize {
        self.arena.borrow().mutate(|mc, root| {
            root.resolve(mc, handle)
                .map_or(0, |o| o.borrow().synthetic.len())
        })
    }

    /// Outstanding handles of `kind`.
    pub fn handle_count(&self, kind: RefKind) -> usize {
        self.arena.borrow().mutate(|_, root| {
            root.handles
                .iter()
                .flatten()
                .filter(|slot| slot.kind() == kind)
                .count()
        })
    }

    fn is_linkable(&self, class: HostClass) -> bool {
        self.classes
            .borrow()
            .get(class.0)
            .is_some_and(|c| c.linkable)
    }

    fn delete(&self, handle: HostRef, kind: RefKind) {
        let removed = self
            .arena
            .borrow_mut()
            .mutate_root(|_, root| root.take(handle, kind));
        if !removed {
            tracing::warn!("delete of invalid {} handle {}", kind, handle);
            self.bump(|s| s.invalid_handle_ops += 1);
        }
    }

    fn new_handle(&self, obj: HostRef, make: for<'gc> fn(ObjPtr<'gc>) -> Slot<'gc>) -> Option<HostRef> {
        self.arena.borrow_mut().mutate_root(|mc, root| {
            let target = root.resolve(mc, obj)?;
            Some(root.push(make(target)))
        })
    }

    fn link_methods(class: HostClass) -> SyntheticLinkMethods {
        SyntheticLinkMethods {
            add: MethodId(class.0 * 2),
            clear: MethodId(class.0 * 2 + 1),
        }
    }

    fn check_method(&self, target: HostRef, method: MethodId, clear: bool) -> Result<(), HostError> {
        let class = self
            .class_of(target)
            .ok_or(HostError::InvalidHandle(target))?;
        let methods = Self::link_methods(class);
        let expected = if clear { methods.clear } else { methods.add };
        if !self.is_linkable(class) || method != expected {
            return Err(HostError::Exception(format!(
                "java.lang.NoSuchMethodError: {} on {}",
                method.0,
                self.class_name(class)
            )));
        }
        Ok(())
    }
}

impl HostHeap for SimHost {
    fn attach_current_thread(&self) -> Result<(), HostError> {
        self.bump(|s| s.attach_calls += 1);
        if let Some(reason) = self.attach_failure.borrow().as_ref() {
            return Err(HostError::AttachFailed(reason.clone()));
        }
        self.attached.borrow_mut().insert(get_current_thread_id());
        Ok(())
    }

    fn new_global_ref(&self, obj: HostRef) -> Option<HostRef> {
        self.new_handle(obj, |o| Slot::Global(o))
    }

    fn delete_global_ref(&self, handle: HostRef) {
        self.delete(handle, RefKind::Global);
    }

    fn new_weak_global_ref(&self, obj: HostRef) -> Option<HostRef> {
        self.new_handle(obj, |o| Slot::WeakGlobal(Gc::downgrade(o)))
    }

    fn delete_weak_global_ref(&self, handle: HostRef) {
        self.delete(handle, RefKind::WeakGlobal);
    }

    fn delete_local_ref(&self, handle: HostRef) {
        self.delete(handle, RefKind::Local);
    }

    fn ref_kind(&self, handle: HostRef) -> RefKind {
        self.arena
            .borrow()
            .mutate(|_, root| root.slot(handle).map_or(RefKind::Invalid, Slot::kind))
    }

    fn class_of(&self, obj: HostRef) -> Option<HostClass> {
        self.arena
            .borrow()
            .mutate(|mc, root| root.resolve(mc, obj).map(|o| o.borrow().class))
    }

    fn class_name(&self, class: HostClass) -> String {
        self.classes
            .borrow()
            .get(class.0)
            .map_or_else(|| class.to_string(), |c| c.name.clone())
    }

    fn resolve_synthetic_linking(&self, class: HostClass) -> Option<SyntheticLinkMethods> {
        self.is_linkable(class).then(|| Self::link_methods(class))
    }

    fn invoke_add_reference(
        &self,
        target: HostRef,
        method: MethodId,
        other: HostRef,
    ) -> Result<(), HostError> {
        self.check_method(target, method, false)?;
        self.arena.borrow().mutate(|mc, root| {
            let from = root.resolve(mc, target).ok_or(HostError::InvalidHandle(target))?;
            let to = root.resolve(mc, other).ok_or(HostError::InvalidHandle(other))?;
            from.borrow_mut(mc).synthetic.push(to);
            Ok::<_, HostError>(())
        })?;
        self.bump(|s| s.add_reference_calls += 1);
        Ok(())
    }

    fn invoke_clear_references(&self, target: HostRef, method: MethodId) -> Result<(), HostError> {
        self.check_method(target, method, true)?;
        self.arena.borrow().mutate(|mc, root| {
            let obj = root.resolve(mc, target).ok_or(HostError::InvalidHandle(target))?;
            obj.borrow_mut(mc).synthetic.clear();
            Ok::<_, HostError>(())
        })?;
        self.bump(|s| s.clear_references_calls += 1);
        Ok(())
    }

    fn new_proxy(&self) -> Result<HostRef, HostError> {
        self.bump(|s| s.proxies_allocated += 1);
        Ok(self.new_object(PROXY_CLASS))
    }

    fn new_protecting_list(&self) -> Result<HostRef, HostError> {
        Ok(self.new_object(LIST_CLASS))
    }

    fn list_add(&self, list: HostRef, item: HostRef) -> Result<(), HostError> {
        self.add_real_reference(list, item)
    }

    fn list_get(&self, list: HostRef, index: usize) -> Option<HostRef> {
        self.arena.borrow_mut().mutate_root(|mc, root| {
            let item = root.resolve(mc, list)?.borrow().refs.get(index).copied()?;
            Some(root.push(Slot::Local(item)))
        })
    }

    fn new_weak_wrapper(&self, target: HostRef) -> Result<HostRef, HostError> {
        let id = self.next_id();
        self.arena
            .borrow_mut()
            .mutate_root(|mc, root| {
                let referent = root.resolve(mc, target)?;
                Some(root.spawn(mc, id, WEAK_REFERENCE_CLASS, Some(Gc::downgrade(referent))))
            })
            .ok_or(HostError::InvalidHandle(target))
    }

    fn weak_wrapper_target(&self, wrapper: HostRef) -> Option<HostRef> {
        self.arena.borrow_mut().mutate_root(|mc, root| {
            let weak = root.resolve(mc, wrapper)?.borrow().weak_target?;
            let target = weak.upgrade(mc)?;
            Some(root.push(Slot::Local(target)))
        })
    }

    fn collect(&self) {
        self.arena.borrow_mut().collect_all();
        self.bump(|s| s.collections += 1);
        tracing::debug!("host collection finished, {} objects live", self.live_objects());
    }
}
