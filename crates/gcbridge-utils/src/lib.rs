//! # gcbridge-utils
//!
//! Shared utilities for the gcbridge workspace: handle and identifier
//! newtypes, synchronization primitives and thread identity helpers.
use std::fmt::{Debug, Formatter};

pub mod newtypes;
pub mod sync;

pub use newtypes::{ClassId, DomainId, FieldId, HostClass, HostRef, ManagedObject, MethodId};

pub struct DebugStr(pub String);

impl Debug for DebugStr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
