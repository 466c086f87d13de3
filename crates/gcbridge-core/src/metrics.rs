use gcbridge_utils::sync::{AtomicU64, Ordering};
use serde::Serialize;
use std::time::Duration;

/// Whole microseconds in `d`, saturating at `u64::MAX`.
pub fn micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Outcome of one cross-reference pass.
#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassStats {
    pub sccs: usize,
    pub edges: usize,
    /// Bridged objects promoted during cleanup.
    pub objects_tested: usize,
    /// Objects whose peer survived the host collection.
    pub objects_alive: usize,
    pub sccs_alive: usize,
    pub synthetic_refs_added: usize,
    pub synthetic_refs_cleared: usize,
    pub proxies_created: usize,
    /// Edges or clears skipped because a peer class lacks synthetic linking.
    pub missing_capability: usize,
    pub prepare_us: u64,
    pub host_gc_us: u64,
    pub cleanup_us: u64,
}

impl PassStats {
    pub fn total_us(&self) -> u64 {
        self.prepare_us + self.host_gc_us + self.cleanup_us
    }
}

impl std::fmt::Display for PassStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Bridge pass:")?;
        writeln!(f, "  SCCs:               {:>8} ({} alive)", self.sccs, self.sccs_alive)?;
        writeln!(f, "  Cross edges:        {:>8}", self.edges)?;
        writeln!(
            f,
            "  Objects:            {:>8} tested, {} alive",
            self.objects_tested, self.objects_alive
        )?;
        writeln!(
            f,
            "  Synthetic refs:     {:>8} added, {} cleared",
            self.synthetic_refs_added, self.synthetic_refs_cleared
        )?;
        writeln!(f, "  Proxies:            {:>8}", self.proxies_created)?;
        writeln!(f, "  Missing capability: {:>8}", self.missing_capability)?;
        writeln!(
            f,
            "  Time (us):          {:>8} prepare, {} host gc, {} cleanup",
            self.prepare_us, self.host_gc_us, self.cleanup_us
        )?;
        Ok(())
    }
}

/// Totals across all passes.
///
/// Counters are independent, so `Ordering::Relaxed` throughout.
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    pub passes: AtomicU64,
    pub prepare_total_us: AtomicU64,
    pub host_gc_total_us: AtomicU64,
    pub cleanup_total_us: AtomicU64,
    pub objects_tested: AtomicU64,
    pub objects_alive: AtomicU64,
    pub synthetic_refs_added: AtomicU64,
    pub proxies_created: AtomicU64,
    pub missing_capability: AtomicU64,
}

#[derive(Debug, Serialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeMetricsSnapshot {
    pub passes: u64,
    pub prepare_total_us: u64,
    pub host_gc_total_us: u64,
    pub cleanup_total_us: u64,
    pub objects_tested: u64,
    pub objects_alive: u64,
    pub synthetic_refs_added: u64,
    pub proxies_created: u64,
    pub missing_capability: u64,
}

impl BridgeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_phase_times(&self, prepare: Duration, host_gc: Duration, cleanup: Duration) {
        self.prepare_total_us
            .fetch_add(micros(prepare), Ordering::Relaxed);
        self.host_gc_total_us
            .fetch_add(micros(host_gc), Ordering::Relaxed);
        self.cleanup_total_us
            .fetch_add(micros(cleanup), Ordering::Relaxed);
    }

    pub fn record_pass(&self, stats: &PassStats) {
        self.passes.fetch_add(1, Ordering::Relaxed);
        self.objects_tested
            .fetch_add(stats.objects_tested as u64, Ordering::Relaxed);
        self.objects_alive
            .fetch_add(stats.objects_alive as u64, Ordering::Relaxed);
        self.synthetic_refs_added
            .fetch_add(stats.synthetic_refs_added as u64, Ordering::Relaxed);
        self.proxies_created
            .fetch_add(stats.proxies_created as u64, Ordering::Relaxed);
        self.missing_capability
            .fetch_add(stats.missing_capability as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeMetricsSnapshot {
        BridgeMetricsSnapshot {
            passes: self.passes.load(Ordering::Relaxed),
            prepare_total_us: self.prepare_total_us.load(Ordering::Relaxed),
            host_gc_total_us: self.host_gc_total_us.load(Ordering::Relaxed),
            cleanup_total_us: self.cleanup_total_us.load(Ordering::Relaxed),
            objects_tested: self.objects_tested.load(Ordering::Relaxed),
            objects_alive: self.objects_alive.load(Ordering::Relaxed),
            synthetic_refs_added: self.synthetic_refs_added.load(Ordering::Relaxed),
            proxies_created: self.proxies_created.load(Ordering::Relaxed),
            missing_capability: self.missing_capability.load(Ordering::Relaxed),
        }
    }
}
