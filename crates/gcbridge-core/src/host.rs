//! The host heap as seen by the bridge.
//!
//! [`HostHeap`] is the handle-based foreign-object interface of the host
//! runtime. Every handle it returns is owned by the caller and must be
//! released with the matching `delete_*` call unless it is stored somewhere
//! that takes over ownership (for example a peer handle field).
use crate::error::HostError;
use dashmap::DashMap;
use gcbridge_utils::{HostClass, HostRef, MethodId};
use std::fmt;

/// Reference-type tag stored in a bridge object's `handle_type` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RefKind {
    Invalid = 0,
    Local = 1,
    Global = 2,
    WeakGlobal = 3,
}

impl RefKind {
    /// Single-character code used in reference logs.
    pub fn code(self) -> char {
        match self {
            RefKind::Invalid => 'I',
            RefKind::Local => 'L',
            RefKind::Global => 'G',
            RefKind::WeakGlobal => 'W',
        }
    }

    pub fn from_raw(raw: usize) -> Self {
        match raw {
            1 => RefKind::Local,
            2 => RefKind::Global,
            3 => RefKind::WeakGlobal,
            _ => RefKind::Invalid,
        }
    }

    pub fn to_raw(self) -> usize {
        self as i32 as usize
    }
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The pair of host methods a class must expose to be linked into a
/// synthetic cycle during a bridge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyntheticLinkMethods {
    /// `void addReference(Object other)`
    pub add: MethodId,
    /// `void clearReferences()`
    pub clear: MethodId,
}

pub trait HostHeap {
    /// Attach the calling thread to the host runtime. Must be a no-op for a
    /// thread that is already attached.
    fn attach_current_thread(&self) -> Result<(), HostError>;

    fn new_global_ref(&self, obj: HostRef) -> Option<HostRef>;
    fn delete_global_ref(&self, handle: HostRef);
    fn new_weak_global_ref(&self, obj: HostRef) -> Option<HostRef>;
    fn delete_weak_global_ref(&self, handle: HostRef);
    fn delete_local_ref(&self, handle: HostRef);
    fn ref_kind(&self, handle: HostRef) -> RefKind;

    fn class_of(&self, obj: HostRef) -> Option<HostClass>;
    fn class_name(&self, class: HostClass) -> String;

    /// Look up the synthetic-linking capability of `class`, if it has one.
    fn resolve_synthetic_linking(&self, class: HostClass) -> Option<SyntheticLinkMethods>;
    fn invoke_add_reference(
        &self,
        target: HostRef,
        method: MethodId,
        other: HostRef,
    ) -> Result<(), HostError>;
    fn invoke_clear_references(&self, target: HostRef, method: MethodId) -> Result<(), HostError>;

    /// Allocate a temporary peer that stands in for an SCC without bridged
    /// objects. Returns a local handle.
    fn new_proxy(&self) -> Result<HostRef, HostError>;
    /// Allocate a list used to keep temporary peers reachable. Returns a local
    /// handle.
    fn new_protecting_list(&self) -> Result<HostRef, HostError>;
    fn list_add(&self, list: HostRef, item: HostRef) -> Result<(), HostError>;
    /// Returns a new local handle to the element at `index`.
    fn list_get(&self, list: HostRef, index: usize) -> Option<HostRef>;

    /// Wrap `target` in a host weak-reference object. Returns a local handle.
    fn new_weak_wrapper(&self, target: HostRef) -> Result<HostRef, HostError>;
    /// Dereference a weak-reference object. Returns a local handle, or `None`
    /// once the host collector has cleared it.
    fn weak_wrapper_target(&self, wrapper: HostRef) -> Option<HostRef>;

    /// Run a full, blocking host collection.
    fn collect(&self);
}

/// Per-class cache of [`SyntheticLinkMethods`] lookups.
///
/// Negative results are cached too, so a class that lacks the capability is
/// only reported once.
#[derive(Debug, Default)]
pub struct SyntheticLinkCache {
    entries: DashMap<HostClass, Option<SyntheticLinkMethods>>,
}

impl SyntheticLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, host: &dyn HostHeap, class: HostClass) -> Option<SyntheticLinkMethods> {
        if let Some(entry) = self.entries.get(&class) {
            return *entry;
        }

        let methods = host.resolve_synthetic_linking(class);
        if methods.is_none() {
            tracing::warn!(
                target: "gcbridge::gc",
                "host class `{}` does not support synthetic linking; its instances will not be coalesced",
                host.class_name(class)
            );
        }
        *self.entries.entry(class).or_insert(methods)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}
