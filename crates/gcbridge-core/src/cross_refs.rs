//! The cross-reference pass.
//!
//! The managed collector hands over the strongly connected components it
//! found among bridge objects and the edges between them. [`PassContext::prepare`]
//! mirrors that graph on the host heap with synthetic references and demotes
//! every peer to a weak handle; after the host collection,
//! [`PassContext::cleanup`] promotes them back, marks the components whose
//! peers survived and removes the synthetic references again.
use crate::{
    accounting::ReferenceAccounting,
    host::{HostHeap, SyntheticLinkCache},
    managed::ManagedRuntime,
    metrics::PassStats,
    promotion::{PromotionContext, PromotionOps, PromotionStrategy},
    registry::{BridgeTypeDescriptor, RegistrySnapshot},
};
use gcbridge_utils::{HostRef, ManagedObject};

/// A cycle (or singleton) of bridge objects, as found by the managed
/// collector. Components without objects stand for cycles that only run
/// through non-bridge managed objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StronglyConnectedComponent {
    pub objects: Vec<ManagedObject>,
    pub is_alive: bool,
}

impl StronglyConnectedComponent {
    pub fn new(objects: Vec<ManagedObject>) -> Self {
        Self {
            objects,
            is_alive: false,
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }
}

/// A reference from any object of component `src` to any object of `dst`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrossComponentEdge {
    pub src: usize,
    pub dst: usize,
}

impl CrossComponentEdge {
    pub fn new(src: usize, dst: usize) -> Self {
        Self { src, dst }
    }
}

/// The host object standing for a component in synthetic edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endpoint {
    /// A bridge object and its strong peer handle.
    Bridged(ManagedObject, HostRef),
    /// A local handle to a temporary proxy; released after use.
    Proxy(HostRef),
}

impl Endpoint {
    fn peer(self) -> HostRef {
        match self {
            Endpoint::Bridged(_, peer) | Endpoint::Proxy(peer) => peer,
        }
    }
}

/// Temporary proxies of one prepare phase.
///
/// Proxies are kept reachable through a host list until every edge is wired.
/// `slots[i]` is the list index of component `i`'s proxy.
struct ProxyTable {
    list: Option<HostRef>,
    len: usize,
    slots: Vec<Option<usize>>,
}

/// Everything one pass touches.
pub struct PassContext<'a> {
    pub managed: &'a dyn ManagedRuntime,
    pub host: &'a dyn HostHeap,
    pub accounting: &'a ReferenceAccounting,
    pub registry: &'a RegistrySnapshot,
    pub strategy: &'a PromotionStrategy,
    pub links: &'a SyntheticLinkCache,
}

impl PassContext<'_> {
    fn promotion(&self) -> PromotionContext<'_> {
        PromotionContext {
            managed: self.managed,
            host: self.host,
            accounting: self.accounting,
        }
    }

    fn descriptor(&self, obj: ManagedObject) -> Option<&BridgeTypeDescriptor> {
        let desc = self.registry.descriptor_for(self.managed, obj);
        if desc.is_none() {
            tracing::warn!(
                target: "gcbridge::gc",
                "object {} of class `{}` in a bridge pass is not a bridge object",
                obj,
                self.managed.class_name(self.managed.class_of(obj))
            );
        }
        desc
    }

    fn peer_of(&self, obj: ManagedObject) -> Option<(HostRef, &BridgeTypeDescriptor)> {
        let desc = self.descriptor(obj)?;
        let peer = HostRef::from_raw(self.managed.get_field(obj, desc.handle))?;
        Some((peer, desc))
    }

    /// Log every component and edge of the pass.
    pub fn dump(&self, sccs: &[StronglyConnectedComponent], edges: &[CrossComponentEdge]) {
        if !tracing::enabled!(target: "gcbridge::gc", tracing::Level::TRACE) {
            return;
        }
        tracing::trace!(
            target: "gcbridge::gc",
            "cross references callback invoked with {} sccs and {} xrefs",
            sccs.len(),
            edges.len()
        );
        for (i, scc) in sccs.iter().enumerate() {
            tracing::trace!(
                target: "gcbridge::gc",
                "group {} with {} objects",
                i,
                scc.object_count()
            );
            for &obj in &scc.objects {
                let peer = self
                    .peer_of(obj)
                    .map_or_else(|| "0x0".to_string(), |(p, _)| p.to_string());
                tracing::trace!(
                    target: "gcbridge::gc",
                    "\tobj {} [{}] handle {}",
                    obj,
                    self.managed.class_name(self.managed.class_of(obj)),
                    peer
                );
            }
        }
        for (i, edge) in edges.iter().enumerate() {
            tracing::trace!(target: "gcbridge::gc", "xref [{}] {} -> {}", i, edge.src, edge.dst);
        }
    }

    /// Issue `from -> to` on the host heap. Bridge objects that issue a
    /// reference are flagged so cleanup removes it again.
    fn add_reference(&self, from: Endpoint, to: HostRef, stats: &mut PassStats) -> bool {
        let peer = from.peer();
        let methods = self
            .host
            .class_of(peer)
            .and_then(|class| self.links.resolve(self.host, class));
        let Some(methods) = methods else {
            stats.missing_capability += 1;
            return false;
        };

        if let Err(e) = self.host.invoke_add_reference(peer, methods.add, to) {
            tracing::warn!(
                target: "gcbridge::gc",
                "adding synthetic reference {} -> {} failed: {}",
                peer,
                to,
                e
            );
            return false;
        }

        if let Endpoint::Bridged(obj, _) = from {
            if let Some(desc) = self.descriptor(obj) {
                self.managed.set_field(obj, desc.refs_added, 1);
            }
        }
        stats.synthetic_refs_added += 1;
        true
    }

    fn endpoint(
        &self,
        sccs: &[StronglyConnectedComponent],
        proxies: &ProxyTable,
        index: usize,
    ) -> Option<Endpoint> {
        let scc = sccs.get(index)?;
        if scc.objects.is_empty() {
            let list = proxies.list?;
            let slot = (*proxies.slots.get(index)?)?;
            return self.host.list_get(list, slot).map(Endpoint::Proxy);
        }
        scc.objects
            .iter()
            .find_map(|&obj| self.peer_of(obj).map(|(peer, _)| Endpoint::Bridged(obj, peer)))
    }

    fn release(&self, endpoint: Endpoint) {
        if let Endpoint::Proxy(local) = endpoint {
            self.host.delete_local_ref(local);
        }
    }

    fn create_proxy(&self, proxies: &mut ProxyTable, index: usize, stats: &mut PassStats) {
        let list = match proxies.list {
            Some(list) => list,
            None => match self.host.new_protecting_list() {
                Ok(list) => *proxies.list.insert(list),
                Err(e) => {
                    tracing::warn!(target: "gcbridge::gc", "could not allocate proxy list: {}", e);
                    return;
                }
            },
        };

        let proxy = match self.host.new_proxy() {
            Ok(proxy) => proxy,
            Err(e) => {
                tracing::warn!(target: "gcbridge::gc", "could not allocate proxy for group {}: {}", index, e);
                return;
            }
        };
        match self.host.list_add(list, proxy) {
            Ok(()) => {
                proxies.slots[index] = Some(proxies.len);
                proxies.len += 1;
                stats.proxies_created += 1;
            }
            Err(e) => {
                tracing::warn!(target: "gcbridge::gc", "could not protect proxy for group {}: {}", index, e)
            }
        }
        self.host.delete_local_ref(proxy);
    }

    /// Link the host peers the way the managed collector sees them, then
    /// demote every peer to a weak handle.
    pub fn prepare(
        &self,
        sccs: &[StronglyConnectedComponent],
        edges: &[CrossComponentEdge],
        stats: &mut PassStats,
    ) {
        let mut proxies = ProxyTable {
            list: None,
            len: 0,
            slots: vec![None; sccs.len()],
        };

        for (i, scc) in sccs.iter().enumerate() {
            match scc.object_count() {
                0 => self.create_proxy(&mut proxies, i, stats),
                1 => {}
                n => {
                    for j in 0..n {
                        let from = scc.objects[j];
                        let to = scc.objects[(j + 1) % n];
                        let (Some((from_peer, _)), Some((to_peer, _))) =
                            (self.peer_of(from), self.peer_of(to))
                        else {
                            continue;
                        };
                        self.add_reference(Endpoint::Bridged(from, from_peer), to_peer, stats);
                    }
                }
            }
        }

        for edge in edges {
            let Some(src) = self.endpoint(sccs, &proxies, edge.src) else {
                tracing::debug!(target: "gcbridge::gc", "xref {} -> {}: source has no host object", edge.src, edge.dst);
                continue;
            };
            match self.endpoint(sccs, &proxies, edge.dst) {
                Some(dst) => {
                    self.add_reference(src, dst.peer(), stats);
                    self.release(dst);
                }
                None => {
                    tracing::debug!(target: "gcbridge::gc", "xref {} -> {}: target has no host object", edge.src, edge.dst)
                }
            }
            self.release(src);
        }

        // The synthetic edges keep the proxies alive from here on, if anything does.
        if let Some(list) = proxies.list {
            self.host.delete_local_ref(list);
        }

        let promotion = self.promotion();
        for scc in sccs {
            for &obj in &scc.objects {
                if let Some(desc) = self.descriptor(obj) {
                    self.strategy.demote_to_weak(&promotion, obj, desc);
                }
            }
        }
    }

    /// Promote every peer back, record which components survived and remove
    /// the synthetic references issued during [`prepare`](Self::prepare).
    pub fn cleanup(&self, sccs: &mut [StronglyConnectedComponent], stats: &mut PassStats) {
        let promotion = self.promotion();
        let mut tested = 0;
        let mut alive = 0;

        for (i, scc) in sccs.iter_mut().enumerate() {
            let mut any_dead = false;
            for &obj in &scc.objects {
                let Some(desc) = self.descriptor(obj) else {
                    continue;
                };
                tested += 1;
                let survived = self.strategy.promote_to_strong(&promotion, obj, desc);
                if survived {
                    alive += 1;
                    scc.is_alive = true;
                } else {
                    any_dead = true;
                }

                if self.managed.get_field(obj, desc.refs_added) == 0 {
                    continue;
                }
                if survived {
                    self.clear_references(obj, desc, stats);
                }
                self.managed.set_field(obj, desc.refs_added, 0);
            }

            if scc.is_alive && any_dead {
                tracing::warn!(
                    target: "gcbridge::gc",
                    "inconsistent liveness in group {}: some peers survived, some did not",
                    i
                );
            }
            if scc.is_alive {
                stats.sccs_alive += 1;
            }
        }

        stats.objects_tested += tested;
        stats.objects_alive += alive;
        tracing::info!(
            target: "gcbridge::gc",
            "GC cleanup summary: {} objects tested - resurrecting {}.",
            tested,
            alive
        );
    }

    fn clear_references(&self, obj: ManagedObject, desc: &BridgeTypeDescriptor, stats: &mut PassStats) {
        let Some(peer) = HostRef::from_raw(self.managed.get_field(obj, desc.handle)) else {
            return;
        };
        let methods = self
            .host
            .class_of(peer)
            .and_then(|class| self.links.resolve(self.host, class));
        let Some(methods) = methods else {
            stats.missing_capability += 1;
            return;
        };
        match self.host.invoke_clear_references(peer, methods.clear) {
            Ok(()) => stats.synthetic_refs_cleared += 1,
            Err(e) => tracing::warn!(
                target: "gcbridge::gc",
                "clearing synthetic references of {} failed: {}",
                peer,
                e
            ),
        }
    }
}
