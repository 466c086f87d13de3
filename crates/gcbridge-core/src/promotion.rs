//! Strong/weak peer handle promotion.
//!
//! During a bridge pass every peer is demoted to a weak handle before the
//! host collection and promoted back afterwards; a peer that cannot be
//! promoted was collected by the host. The strategy is chosen once from
//! [`platform_supports_native_weak_refs`](crate::config::platform_supports_native_weak_refs).
//!
//! Every handle obtained from the host heap is either stored in the object or
//! released, and every create/release goes through [`ReferenceAccounting`].
use crate::{
    accounting::{ReferenceAccounting, ThreadTag},
    config::{BridgeConfig, WeakRefMode},
    host::{HostHeap, RefKind},
    managed::ManagedRuntime,
    registry::BridgeTypeDescriptor,
};
use enum_dispatch::enum_dispatch;
use gcbridge_utils::{
    HostRef, ManagedObject,
    sync::{current_thread_name, get_current_thread_id},
};

/// Origin label for handles created or released by a bridge pass.
pub const PROMOTE_ORIGIN: &str = "at [[gcbridge:promote_to_strong]]";
pub const DEMOTE_ORIGIN: &str = "at [[gcbridge:demote_to_weak]]";

/// Everything a strategy needs to touch one object.
pub struct PromotionContext<'a> {
    pub managed: &'a dyn ManagedRuntime,
    pub host: &'a dyn HostHeap,
    pub accounting: &'a ReferenceAccounting,
}

/// The peer fields of one bridge object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerState {
    pub handle: Option<HostRef>,
    pub handle_type: RefKind,
    pub weak_handle: Option<HostRef>,
}

impl PromotionContext<'_> {
    pub fn read_peer(&self, obj: ManagedObject, desc: &BridgeTypeDescriptor) -> PeerState {
        PeerState {
            handle: HostRef::from_raw(self.managed.get_field(obj, desc.handle)),
            handle_type: RefKind::from_raw(self.managed.get_field(obj, desc.handle_type)),
            weak_handle: HostRef::from_raw(self.managed.get_field(obj, desc.weak_handle)),
        }
    }

    fn write_handle(
        &self,
        obj: ManagedObject,
        desc: &BridgeTypeDescriptor,
        handle: Option<HostRef>,
        kind: RefKind,
    ) {
        self.managed
            .set_field(obj, desc.handle, HostRef::to_raw(handle));
        self.managed.set_field(obj, desc.handle_type, kind.to_raw());
    }

    fn write_weak_handle(
        &self,
        obj: ManagedObject,
        desc: &BridgeTypeDescriptor,
        handle: Option<HostRef>,
    ) {
        self.managed
            .set_field(obj, desc.weak_handle, HostRef::to_raw(handle));
    }
}

fn with_thread<R>(f: impl FnOnce(ThreadTag<'_>) -> R) -> R {
    let name = current_thread_name();
    f(ThreadTag {
        name: &name,
        id: get_current_thread_id(),
    })
}

#[enum_dispatch]
pub trait PromotionOps {
    /// Turn the object's weak peer handle back into a strong one. Returns
    /// whether the peer is still alive.
    fn promote_to_strong(
        &self,
        cx: &PromotionContext<'_>,
        obj: ManagedObject,
        desc: &BridgeTypeDescriptor,
    ) -> bool;

    /// Replace the object's strong peer handle by a weak one.
    fn demote_to_weak(&self, cx: &PromotionContext<'_>, obj: ManagedObject, desc: &BridgeTypeDescriptor);

    fn mode(&self) -> WeakRefMode;
}

/// Uses the host heap's own weak global references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeWeakStrategy;

impl PromotionOps for NativeWeakStrategy {
    fn promote_to_strong(
        &self,
        cx: &PromotionContext<'_>,
        obj: ManagedObject,
        desc: &BridgeTypeDescriptor,
    ) -> bool {
        let peer = cx.read_peer(obj, desc);
        if peer.handle_type != RefKind::WeakGlobal {
            return peer.handle.is_some();
        }
        let Some(weak) = peer.handle else {
            cx.write_handle(obj, desc, None, RefKind::Invalid);
            return false;
        };

        let strong = cx.host.new_global_ref(weak);
        with_thread(|thread| {
            if strong.is_some() {
                cx.accounting.record_promotion(
                    Some(weak),
                    RefKind::WeakGlobal,
                    strong,
                    RefKind::Global,
                    thread,
                    PROMOTE_ORIGIN,
                );
            }
            cx.accounting
                .record_release(Some(weak), RefKind::WeakGlobal, thread, PROMOTE_ORIGIN);
        });
        cx.host.delete_weak_global_ref(weak);

        match strong {
            Some(_) => cx.write_handle(obj, desc, strong, RefKind::Global),
            None => {
                tracing::trace!(
                    target: "gcbridge::gc",
                    "*try_take_global obj={} -> wref={} handle=0x0",
                    obj,
                    weak
                );
                cx.write_handle(obj, desc, None, RefKind::Invalid);
            }
        }
        strong.is_some()
    }

    fn demote_to_weak(&self, cx: &PromotionContext<'_>, obj: ManagedObject, desc: &BridgeTypeDescriptor) {
        let peer = cx.read_peer(obj, desc);
        if peer.handle_type != RefKind::Global {
            return;
        }
        let Some(strong) = peer.handle else {
            return;
        };

        let weak = cx.host.new_weak_global_ref(strong);
        with_thread(|thread| {
            if weak.is_some() {
                cx.accounting.record_promotion(
                    Some(strong),
                    RefKind::Global,
                    weak,
                    RefKind::WeakGlobal,
                    thread,
                    DEMOTE_ORIGIN,
                );
            }
            cx.accounting
                .record_release(Some(strong), RefKind::Global, thread, DEMOTE_ORIGIN);
        });
        cx.host.delete_global_ref(strong);

        let kind = if weak.is_some() {
            RefKind::WeakGlobal
        } else {
            RefKind::Invalid
        };
        cx.write_handle(obj, desc, weak, kind);
    }

    fn mode(&self) -> WeakRefMode {
        WeakRefMode::Native
    }
}

/// Emulates weak handles with a host weak-reference wrapper object held
/// through a strong handle in the object's `weak_handle` field.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmulatedWeakStrategy;

impl PromotionOps for EmulatedWeakStrategy {
    fn promote_to_strong(
        &self,
        cx: &PromotionContext<'_>,
        obj: ManagedObject,
        desc: &BridgeTypeDescriptor,
    ) -> bool {
        let peer = cx.read_peer(obj, desc);
        let Some(wrapper) = peer.weak_handle else {
            return peer.handle_type == RefKind::Global && peer.handle.is_some();
        };

        let strong = match cx.host.weak_wrapper_target(wrapper) {
            Some(local) => {
                let strong = cx.host.new_global_ref(local);
                cx.host.delete_local_ref(local);
                strong
            }
            None => None,
        };

        with_thread(|thread| {
            if strong.is_some() {
                cx.accounting.record_promotion(
                    Some(wrapper),
                    RefKind::WeakGlobal,
                    strong,
                    RefKind::Global,
                    thread,
                    PROMOTE_ORIGIN,
                );
            }
            cx.accounting
                .record_release(Some(wrapper), RefKind::WeakGlobal, thread, PROMOTE_ORIGIN);
        });
        cx.host.delete_global_ref(wrapper);

        cx.write_weak_handle(obj, desc, None);
        let kind = if strong.is_some() {
            RefKind::Global
        } else {
            RefKind::Invalid
        };
        cx.write_handle(obj, desc, strong, kind);
        strong.is_some()
    }

    fn demote_to_weak(&self, cx: &PromotionContext<'_>, obj: ManagedObject, desc: &BridgeTypeDescriptor) {
        let peer = cx.read_peer(obj, desc);
        if peer.handle_type != RefKind::Global {
            return;
        }
        let Some(strong) = peer.handle else {
            return;
        };

        let wrapper = match cx.host.new_weak_wrapper(strong) {
            Ok(local) => {
                let global = cx.host.new_global_ref(local);
                cx.host.delete_local_ref(local);
                global
            }
            Err(e) => {
                tracing::warn!(
                    target: "gcbridge::gc",
                    "could not wrap peer {} of {} in a weak reference: {}",
                    strong,
                    obj,
                    e
                );
                None
            }
        };
        // Without a wrapper the peer stays strongly held for this pass.
        let Some(wrapper) = wrapper else {
            return;
        };

        with_thread(|thread| {
            cx.accounting.record_promotion(
                Some(strong),
                RefKind::Global,
                Some(wrapper),
                RefKind::WeakGlobal,
                thread,
                DEMOTE_ORIGIN,
            );
            cx.accounting
                .record_release(Some(strong), RefKind::Global, thread, DEMOTE_ORIGIN);
        });
        cx.host.delete_global_ref(strong);

        cx.write_weak_handle(obj, desc, Some(wrapper));
        cx.write_handle(obj, desc, None, RefKind::WeakGlobal);
    }

    fn mode(&self) -> WeakRefMode {
        WeakRefMode::Emulated
    }
}

#[enum_dispatch(PromotionOps)]
#[derive(Debug, Clone, Copy)]
pub enum PromotionStrategy {
    NativeWeak(NativeWeakStrategy),
    EmulatedWeak(EmulatedWeakStrategy),
}

impl PromotionStrategy {
    pub fn for_mode(mode: WeakRefMode) -> Self {
        match mode {
            WeakRefMode::Native => NativeWeakStrategy.into(),
            WeakRefMode::Emulated => EmulatedWeakStrategy.into(),
        }
    }

    pub fn from_config(config: &BridgeConfig) -> Self {
        let mode = config.weak_ref_mode_selected();
        tracing::debug!(target: "gcbridge::gc", "weak reference strategy: {:?}", mode);
        Self::for_mode(mode)
    }
}

impl Default for PromotionStrategy {
    fn default() -> Self {
        NativeWeakStrategy.into()
    }
}
