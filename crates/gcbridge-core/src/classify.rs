use crate::{
    managed::ManagedRuntime,
    registry::{ClassifyMiss, RegistrySnapshot},
};
use gcbridge_utils::{ClassId, HostRef, ManagedObject};

/// How the managed cycle collector should treat instances of a class.
///
/// The values are part of the collector's callback ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum BridgeObjectKind {
    /// Not a bridge concern; scanned normally.
    Transparent = 0,
    /// Reserved; never returned.
    Opaque = 1,
    /// A bridge candidate that is itself scanned for references.
    TransparentBridge = 2,
    /// Reserved; never returned.
    OpaqueBridge = 3,
}

impl BridgeObjectKind {
    pub fn is_bridge(self) -> bool {
        matches!(
            self,
            BridgeObjectKind::TransparentBridge | BridgeObjectKind::OpaqueBridge
        )
    }
}

pub fn bridge_class_kind(
    enabled: bool,
    registry: &RegistrySnapshot,
    managed: &dyn ManagedRuntime,
    class: ClassId,
) -> BridgeObjectKind {
    if !enabled {
        return BridgeObjectKind::Transparent;
    }
    match registry.classify_index(managed, class) {
        Ok(_) => BridgeObjectKind::TransparentBridge,
        Err(ClassifyMiss::NotABridge) => BridgeObjectKind::Transparent,
        Err(ClassifyMiss::NotYetReady) => {
            tracing::debug!(
                target: "gcbridge::gc",
                "bridge types not resolved yet; treating `{}` as transparent",
                managed.class_name(class)
            );
            BridgeObjectKind::Transparent
        }
    }
}

/// Whether `obj` is a bridge object that currently has a peer.
pub fn is_bridge_object(
    registry: &RegistrySnapshot,
    managed: &dyn ManagedRuntime,
    obj: ManagedObject,
) -> bool {
    registry
        .descriptor_for(managed, obj)
        .is_some_and(|desc| HostRef::from_raw(managed.get_field(obj, desc.handle)).is_some())
}
