use crate::{
    accounting::ReferenceAccounting,
    classify::{self, BridgeObjectKind},
    config::BridgeConfig,
    cross_refs::{CrossComponentEdge, PassContext, StronglyConnectedComponent},
    domains::DomainRegistry,
    error::BridgeError,
    host::{HostHeap, SyntheticLinkCache},
    managed::ManagedRuntime,
    metrics::{BridgeMetrics, PassStats, micros},
    promotion::{PromotionOps, PromotionStrategy},
    registry::BridgeTypeRegistry,
};
use gcbridge_utils::{
    ClassId, DomainId, ManagedObject,
    sync::{AtomicBool, Mutex, Ordering},
};
use std::time::Instant;

/// The three entry points the managed cycle collector calls during its
/// bridge processing phase.
pub trait BridgeCallbacks {
    fn bridge_class_kind(&self, class: ClassId) -> BridgeObjectKind;
    fn is_bridge_object(&self, obj: ManagedObject) -> bool;
    fn cross_references(
        &self,
        sccs: &mut [StronglyConnectedComponent],
        edges: &[CrossComponentEdge],
    );
}

/// All bridge state of a process.
pub struct BridgeRuntime<M, H> {
    config: BridgeConfig,
    enabled: AtomicBool,
    managed: M,
    host: H,
    registry: BridgeTypeRegistry,
    domains: DomainRegistry,
    accounting: ReferenceAccounting,
    strategy: PromotionStrategy,
    links: SyntheticLinkCache,
    metrics: BridgeMetrics,
    /// Held for the duration of a pass; passes never overlap.
    pass_lock: Mutex<()>,
}

/// Raises the "bridge processing" signal of every live domain and lowers it
/// again on drop.
struct BridgeProcessingGuard<'a> {
    domains: &'a DomainRegistry,
    managed: &'a dyn ManagedRuntime,
}

impl<'a> BridgeProcessingGuard<'a> {
    fn raise(domains: &'a DomainRegistry, managed: &'a dyn ManagedRuntime) -> Self {
        domains.set_signal(managed, true);
        Self { domains, managed }
    }
}

impl Drop for BridgeProcessingGuard<'_> {
    fn drop(&mut self) {
        self.domains.set_signal(self.managed, false);
    }
}

impl<M: ManagedRuntime, H: HostHeap> BridgeRuntime<M, H> {
    pub fn new(config: BridgeConfig, managed: M, host: H) -> Self {
        let accounting = ReferenceAccounting::from_config(&config);
        Self::with_accounting(config, managed, host, accounting)
    }

    pub fn with_accounting(
        config: BridgeConfig,
        managed: M,
        host: H,
        accounting: ReferenceAccounting,
    ) -> Self {
        let strategy = PromotionStrategy::from_config(&config);
        if !config.enabled {
            tracing::info!(target: "gcbridge::gc", "GC bridge disabled");
        }
        Self {
            enabled: AtomicBool::new(config.enabled),
            config,
            managed,
            host,
            registry: BridgeTypeRegistry::default(),
            domains: DomainRegistry::new(),
            accounting,
            strategy,
            links: SyntheticLinkCache::new(),
            metrics: BridgeMetrics::new(),
            pass_lock: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn managed(&self) -> &M {
        &self.managed
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn registry(&self) -> &BridgeTypeRegistry {
        &self.registry
    }

    pub fn domains(&self) -> &DomainRegistry {
        &self.domains
    }

    pub fn accounting(&self) -> &ReferenceAccounting {
        &self.accounting
    }

    pub fn strategy(&self) -> &PromotionStrategy {
        &self.strategy
    }

    pub fn links(&self) -> &SyntheticLinkCache {
        &self.links
    }

    pub fn metrics(&self) -> &BridgeMetrics {
        &self.metrics
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }

    /// Resolve the bridge types on first use and register `domain`.
    pub fn try_domain_created(&self, domain: DomainId) -> Result<(), BridgeError> {
        if !self.registry.is_ready() {
            self.registry.resolve(&self.managed, domain)?;
        }
        self.domains.register(&self.managed, domain)?;
        Ok(())
    }

    /// [`try_domain_created`](Self::try_domain_created), aborting the process
    /// on failure.
    pub fn domain_created(&self, domain: DomainId) {
        if let Err(e) = self.try_domain_created(domain) {
            tracing::error!(target: "gcbridge::gc", "fatal: cannot initialize {}: {}", domain, e);
            std::process::abort();
        }
    }

    pub fn domain_unloaded(&self, domain: DomainId) -> Result<(), BridgeError> {
        if !self.domains.unregister(domain) {
            return Err(BridgeError::UnknownDomain(domain));
        }
        // Descriptors stay valid while any domain is live; hand them over to
        // a surviving domain when their owner goes away.
        if self.registry.teardown(domain) {
            if let Some(next) = self.domains.first() {
                self.registry.resolve(&self.managed, next)?;
            }
        }
        Ok(())
    }

    /// Run one cross-reference pass. Returns `None` when the bridge is
    /// disabled or the host runtime is unavailable.
    pub fn run_pass(
        &self,
        sccs: &mut [StronglyConnectedComponent],
        edges: &[CrossComponentEdge],
    ) -> Option<PassStats> {
        if !self.is_enabled() {
            return None;
        }
        let _pass = self.pass_lock.lock();

        if let Err(e) = self.host.attach_current_thread() {
            tracing::error!(target: "gcbridge::gc", "skipping bridge pass: {}", e);
            return None;
        }

        let registry = self.registry.snapshot();
        let cx = PassContext {
            managed: &self.managed,
            host: &self.host,
            accounting: &self.accounting,
            registry: &registry,
            strategy: &self.strategy,
            links: &self.links,
        };
        let mut stats = PassStats {
            sccs: sccs.len(),
            edges: edges.len(),
            ..Default::default()
        };

        let _signal = BridgeProcessingGuard::raise(&self.domains, &self.managed);
        cx.dump(sccs, edges);

        // Phase 1: mirror the managed graph on the host heap
        let start = Instant::now();
        cx.prepare(sccs, edges, &mut stats);
        let prepare = start.elapsed();

        // Phase 2: host collection
        let start = Instant::now();
        self.host.collect();
        let host_gc = start.elapsed();

        // Phase 3: observe survivors and undo the synthetic edges
        let start = Instant::now();
        cx.cleanup(sccs, &mut stats);
        let cleanup = start.elapsed();

        stats.prepare_us = micros(prepare);
        stats.host_gc_us = micros(host_gc);
        stats.cleanup_us = micros(cleanup);
        self.metrics.record_phase_times(prepare, host_gc, cleanup);
        self.metrics.record_pass(&stats);
        tracing::debug!(
            target: "gcbridge::timing",
            "bridge pass ({:?}): prepare {:?}, host gc {:?}, cleanup {:?}",
            self.strategy.mode(),
            prepare,
            host_gc,
            cleanup
        );
        if self.accounting.over_gref_threshold() {
            tracing::warn!(
                target: "gcbridge::gref",
                "{} global references outstanding after bridge pass",
                self.accounting.gref_count()
            );
        }

        Some(stats)
    }
}

impl<M: ManagedRuntime, H: HostHeap> BridgeCallbacks for BridgeRuntime<M, H> {
    fn bridge_class_kind(&self, class: ClassId) -> BridgeObjectKind {
        classify::bridge_class_kind(
            self.is_enabled(),
            &self.registry.snapshot(),
            &self.managed,
            class,
        )
    }

    fn is_bridge_object(&self, obj: ManagedObject) -> bool {
        classify::is_bridge_object(&self.registry.snapshot(), &self.managed, obj)
    }

    fn cross_references(
        &self,
        sccs: &mut [StronglyConnectedComponent],
        edges: &[CrossComponentEdge],
    ) {
        self.run_pass(sccs, edges);
    }
}
