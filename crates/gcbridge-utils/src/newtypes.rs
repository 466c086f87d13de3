use gc_arena::Collect;
use std::fmt::{self, Display, Formatter};
use std::num::NonZeroUsize;

/// Address of an object on the managed heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ManagedObject(pub usize);

impl Display for ManagedObject {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for ManagedObject {
    fn from(addr: usize) -> Self {
        ManagedObject(addr)
    }
}

impl ManagedObject {
    pub fn as_usize(self) -> usize {
        self.0
    }
}

/// Opaque identifier of a managed class.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(pub usize);

impl Display for ClassId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

/// Opaque identifier of a managed field, instance or static.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldId(pub usize);

impl Display for FieldId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "field#{}", self.0)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomainId(pub u32);

impl Display for DomainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "domain#{}", self.0)
    }
}

impl From<u32> for DomainId {
    fn from(id: u32) -> Self {
        DomainId(id)
    }
}

/// A non-null handle into the host heap.
///
/// Handle fields on managed objects store the raw value, with `0` meaning no
/// peer. Use [`HostRef::from_raw`] and [`HostRef::to_raw`] to cross that
/// boundary; `Option<HostRef>` has the same size as `usize`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct HostRef(NonZeroUsize);

impl HostRef {
    pub fn new(raw: NonZeroUsize) -> Self {
        HostRef(raw)
    }

    pub fn from_raw(raw: usize) -> Option<Self> {
        NonZeroUsize::new(raw).map(HostRef)
    }

    pub fn to_raw(handle: Option<Self>) -> usize {
        handle.map_or(0, |h| h.0.get())
    }

    pub fn get(self) -> usize {
        self.0.get()
    }
}

impl Display for HostRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0.get())
    }
}

/// Identifier of a class on the host heap.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Collect)]
#[collect(require_static)]
pub struct HostClass(pub usize);

impl Display for HostClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "host-class#{}", self.0)
    }
}

/// A resolved host method, valid for the class it was looked up on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MethodId(pub usize);
