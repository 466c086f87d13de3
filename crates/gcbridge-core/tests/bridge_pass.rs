//! End-to-end bridge passes over the simulated heaps.
use gcbridge_core::{
    BridgeCallbacks, BridgeConfig, BridgeError, BridgeObjectKind, CrossComponentEdge, HostHeap,
    ManagedRuntime, PromotionStrategy, RefKind, StronglyConnectedComponent, WeakRefMode,
    cross_refs::PassContext, metrics::PassStats,
};
use gcbridge_sim::{
    SimWorld,
    host::{OBJECT_CLASS, PROXY_CLASS},
};
use gcbridge_utils::{DomainId, ManagedObject};

fn world(mode: WeakRefMode) -> SimWorld {
    SimWorld::new(BridgeConfig::new().weak_ref_mode(mode)).unwrap()
}

const MODES: [WeakRefMode; 2] = [WeakRefMode::Native, WeakRefMode::Emulated];

/// No stale or mismatched deletes and no leaked local handles.
fn assert_handles_balanced(world: &SimWorld) {
    let host = world.host();
    assert_eq!(host.stats().invalid_handle_ops, 0);
    assert_eq!(host.handle_count(RefKind::Local), 0);
    let accounting = world.bridge.accounting();
    assert_eq!(
        accounting.gref_count() as usize,
        host.handle_count(RefKind::Global)
    );
}

fn ring(world: &SimWorld, size: usize) -> Vec<ManagedObject> {
    (0..size).map(|_| world.new_bridged().0).collect()
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_unreferenced_cycle_is_collected() {
    for mode in MODES {
        let world = world(mode);
        let (a, _) = world.new_bridged();
        let (b, _) = world.new_bridged();
        let ids = [world.peer_id(a).unwrap(), world.peer_id(b).unwrap()];
        let mut sccs = vec![StronglyConnectedComponent::new(vec![a, b])];

        let stats = world.run_pass(&mut sccs, &[]).unwrap();

        assert!(!sccs[0].is_alive, "{:?}", mode);
        assert_eq!(world.peer(a), None);
        assert_eq!(world.peer(b), None);
        assert_eq!(world.handle_type(a), RefKind::Invalid);
        assert!(!world.host().is_object_alive(ids[0]));
        assert!(!world.host().is_object_alive(ids[1]));
        assert_eq!(stats.objects_tested, 2);
        assert_eq!(stats.objects_alive, 0);
        assert_eq!(stats.synthetic_refs_added, 2);
        // Dead peers cannot be cleared, but the flag still is.
        assert_eq!(world.host().stats().clear_references_calls, 0);
        assert!(!world.refs_added(a) && !world.refs_added(b));

        let accounting = world.bridge.accounting();
        assert_eq!(accounting.gref_count(), 0);
        assert_eq!(accounting.weak_gref_count(), 0);
        assert_handles_balanced(&world);
    }
}

#[test]
fn test_host_rooted_cycle_survives() {
    for mode in MODES {
        let world = world(mode);
        let (a, peer_a) = world.new_bridged();
        let (b, _) = world.new_bridged();
        world.host().add_root(peer_a);
        let mut sccs = vec![StronglyConnectedComponent::new(vec![a, b])];

        let stats = world.run_pass(&mut sccs, &[]).unwrap();

        assert!(sccs[0].is_alive, "{:?}", mode);
        let peer_a = world.peer(a).unwrap();
        let peer_b = world.peer(b).unwrap();
        assert_eq!(world.handle_type(a), RefKind::Global);
        assert_eq!(world.handle_type(b), RefKind::Global);
        assert_eq!(world.weak_handle(a), None);
        assert_eq!(stats.objects_alive, 2);
        assert_eq!(stats.synthetic_refs_cleared, 2);
        assert_eq!(world.host().synthetic_ref_count(peer_a), 0);
        assert_eq!(world.host().synthetic_ref_count(peer_b), 0);

        let accounting = world.bridge.accounting();
        assert_eq!(accounting.gref_count(), 2);
        assert_eq!(accounting.weak_gref_count(), 0);
        assert_handles_balanced(&world);
    }
}

#[test]
fn test_peer_kept_only_by_synthetic_edge_is_collected_next_pass() {
    let world = world(WeakRefMode::Native);
    let (a, peer_a) = world.new_bridged();
    let (b, _) = world.new_bridged();
    world.host().add_root(peer_a);
    let mut sccs = vec![StronglyConnectedComponent::new(vec![a, b])];
    world.run_pass(&mut sccs, &[]).unwrap();
    assert!(world.peer(b).is_some());

    // Next collection: b is now on its own and nothing on the host holds it.
    let mut sccs = vec![StronglyConnectedComponent::new(vec![b])];
    world.run_pass(&mut sccs, &[]).unwrap();
    assert!(!sccs[0].is_alive);
    assert_eq!(world.peer(b), None);
    assert!(world.peer(a).is_some());
}

#[test]
fn test_empty_component_edge_uses_proxy() {
    for mode in MODES {
        let world = world(mode);
        let (single, peer) = world.new_bridged();
        world.host().add_root(peer);
        let mut sccs = vec![
            StronglyConnectedComponent::new(vec![]),
            StronglyConnectedComponent::new(vec![single]),
        ];
        let edges = [CrossComponentEdge::new(0, 1)];

        let stats = world.run_pass(&mut sccs, &edges).unwrap();

        assert_eq!(stats.proxies_created, 1);
        assert_eq!(world.host().stats().proxies_allocated, 1);
        assert_eq!(world.host().stats().add_reference_calls, 1);
        assert!(sccs[1].is_alive);
        assert!(!sccs[0].is_alive);
        assert_eq!(sccs[0].object_count(), 0);
        // The proxy issued the reference; the bridge object did not.
        assert!(!world.refs_added(single));
        assert_handles_balanced(&world);
    }
}

#[test]
fn test_proxy_as_edge_target_links_source_peer() {
    let world = world(WeakRefMode::Native);
    let (single, _) = world.new_bridged();
    let mut sccs = vec![
        StronglyConnectedComponent::new(vec![single]),
        StronglyConnectedComponent::new(vec![]),
    ];
    let edges = [CrossComponentEdge::new(0, 1)];

    let stats = world.run_pass(&mut sccs, &edges).unwrap();

    assert_eq!(stats.synthetic_refs_added, 1);
    assert!(!sccs[0].is_alive);
    assert_eq!(world.peer(single), None);
    assert!(!world.refs_added(single));
    assert_handles_balanced(&world);
}

#[test]
fn test_cross_edge_keeps_target_component_alive() {
    let world = world(WeakRefMode::Native);
    let (src, src_peer) = world.new_bridged();
    let (dst, _) = world.new_bridged();
    world.host().add_root(src_peer);
    let mut sccs = vec![
        StronglyConnectedComponent::new(vec![src]),
        StronglyConnectedComponent::new(vec![dst]),
    ];

    world
        .run_pass(&mut sccs, &[CrossComponentEdge::new(0, 1)])
        .unwrap();

    assert!(sccs[0].is_alive);
    assert!(sccs[1].is_alive);
    assert_eq!(world.host().stats().clear_references_calls, 1);
    assert_handles_balanced(&world);
}

// ============================================================================
// Synthetic linking
// ============================================================================

#[test]
fn test_singleton_is_never_self_linked() {
    let world = world(WeakRefMode::Native);
    let objects = ring(&world, 3);
    let mut sccs: Vec<_> = objects
        .iter()
        .map(|&o| StronglyConnectedComponent::new(vec![o]))
        .collect();

    let stats = world.run_pass(&mut sccs, &[]).unwrap();

    assert_eq!(world.host().stats().add_reference_calls, 0);
    assert_eq!(stats.synthetic_refs_added, 0);
    assert_eq!(stats.objects_tested, 3);
}

#[test]
fn test_ring_adds_and_clears_exactly_n() {
    for n in [2, 3, 7] {
        let world = world(WeakRefMode::Native);
        let objects = ring(&world, n);
        world.host().add_root(world.peer(objects[n - 1]).unwrap());
        let mut sccs = vec![StronglyConnectedComponent::new(objects.clone())];

        let stats = world.run_pass(&mut sccs, &[]).unwrap();

        assert!(sccs[0].is_alive);
        assert_eq!(world.host().stats().add_reference_calls, n);
        assert_eq!(world.host().stats().clear_references_calls, n);
        assert_eq!(stats.synthetic_refs_added, n);
        assert_eq!(stats.synthetic_refs_cleared, n);
        for &obj in &objects {
            assert!(world.peer(obj).is_some());
            assert!(!world.refs_added(obj));
        }
    }
}

#[test]
fn test_cleanup_twice_does_not_clear_twice() {
    let world = world(WeakRefMode::Native);
    let objects = ring(&world, 3);
    world.host().add_root(world.peer(objects[0]).unwrap());
    let mut sccs = vec![StronglyConnectedComponent::new(objects)];

    let registry = world.bridge.registry().snapshot();
    let cx = PassContext {
        managed: world.managed(),
        host: world.host(),
        accounting: world.bridge.accounting(),
        registry: &registry,
        strategy: world.bridge.strategy(),
        links: world.bridge.links(),
    };
    let mut stats = PassStats::default();
    cx.prepare(&sccs, &[], &mut stats);
    world.host().collect();
    cx.cleanup(&mut sccs, &mut stats);
    cx.cleanup(&mut sccs, &mut stats);

    assert_eq!(world.host().stats().clear_references_calls, 3);
    assert_eq!(stats.synthetic_refs_cleared, 3);
    assert_eq!(world.bridge.accounting().gref_count(), 3);
    assert_handles_balanced(&world);
}

#[test]
fn test_missing_capability_skips_edges_but_finishes_pass() {
    let world = world(WeakRefMode::Native);
    let (a, peer_a) = world.new_bridged_as(world.managed_class, OBJECT_CLASS);
    let (b, _) = world.new_bridged_as(world.managed_class, OBJECT_CLASS);
    world.host().add_root(peer_a);
    let mut sccs = vec![StronglyConnectedComponent::new(vec![a, b])];

    let stats = world.run_pass(&mut sccs, &[]).unwrap();

    assert_eq!(stats.missing_capability, 2);
    assert_eq!(stats.synthetic_refs_added, 0);
    assert_eq!(stats.objects_tested, 2);
    // Without the synthetic ring only the rooted peer survives.
    assert!(world.peer(a).is_some());
    assert_eq!(world.peer(b), None);
    assert!(sccs[0].is_alive);
    // The lookup is cached per class.
    assert_eq!(world.bridge.links().len(), 1);
    assert_handles_balanced(&world);
}

#[test]
fn test_proxy_class_supports_linking() {
    let world = world(WeakRefMode::Native);
    assert!(world.host().resolve_synthetic_linking(PROXY_CLASS).is_some());
}

// ============================================================================
// Orchestration
// ============================================================================

#[test]
fn test_disabled_bridge_is_inert() {
    let world = SimWorld::new(BridgeConfig::new().enabled(false)).unwrap();
    let (a, _) = world.new_bridged();
    let mut sccs = vec![StronglyConnectedComponent::new(vec![a])];

    assert!(world.run_pass(&mut sccs, &[]).is_none());
    assert_eq!(world.handle_type(a), RefKind::Global);
    assert_eq!(world.host().stats().collections, 0);
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed_class),
        BridgeObjectKind::Transparent
    );

    world.bridge.set_enabled(true);
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed_class),
        BridgeObjectKind::TransparentBridge
    );
}

#[test]
fn test_signal_raised_for_the_pass_only() {
    let world = world(WeakRefMode::Native);
    let managed = world.managed();
    let jnienv = managed.class_named("Android.Runtime.JNIEnv").unwrap();
    let signal = managed.find_field(jnienv, "BridgeProcessing").unwrap();
    let mut sccs = vec![StronglyConnectedComponent::new(vec![world.new_bridged().0])];

    world.run_pass(&mut sccs, &[]).unwrap();

    assert_eq!(
        managed.static_writes(),
        vec![(world.domain, signal, 1), (world.domain, signal, 0)]
    );
    assert_eq!(managed.static_value(world.domain, signal), 0);
}

#[test]
fn test_attach_failure_skips_pass() {
    let world = world(WeakRefMode::Native);
    let (a, _) = world.new_bridged();
    world.host().set_attach_failure(Some("vm gone"));
    let mut sccs = vec![StronglyConnectedComponent::new(vec![a])];

    assert!(world.run_pass(&mut sccs, &[]).is_none());
    assert!(world.managed().static_writes().is_empty());
    assert_eq!(world.handle_type(a), RefKind::Global);
}

#[test]
fn test_pass_metrics_accumulate() {
    let world = world(WeakRefMode::Native);
    for _ in 0..3 {
        let mut sccs = vec![StronglyConnectedComponent::new(ring(&world, 2))];
        world.run_pass(&mut sccs, &[]).unwrap();
    }
    let snapshot = world.bridge.metrics().snapshot();
    assert_eq!(snapshot.passes, 3);
    assert_eq!(snapshot.objects_tested, 6);
    assert_eq!(snapshot.synthetic_refs_added, 6);
    assert_eq!(world.host().stats().collections, 3);
}

#[test]
fn test_classification_follows_domain_lifecycle() {
    let world = world(WeakRefMode::Native);
    let (obj, _) = world.new_bridged();
    let plain = world.new_plain();

    assert!(world.bridge.is_bridge_object(obj));
    assert!(!world.bridge.is_bridge_object(plain));
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed().class_of(plain)),
        BridgeObjectKind::Transparent
    );

    world.bridge.domain_unloaded(world.domain).unwrap();
    assert!(!world.bridge.registry().is_ready());
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed_class),
        BridgeObjectKind::Transparent
    );
    assert_eq!(
        world.bridge.domain_unloaded(world.domain),
        Err(BridgeError::UnknownDomain(world.domain))
    );

    // A new domain resolves the registry again.
    world.bridge.try_domain_created(DomainId(2)).unwrap();
    assert_eq!(world.bridge.registry().generation(), 3);
    assert!(world.bridge.is_bridge_object(obj));
}

#[test]
fn test_overlapping_domains_keep_bridge_types() {
    let world = world(WeakRefMode::Native);
    let (obj, peer) = world.new_bridged();
    world.host().add_root(peer);
    world.bridge.try_domain_created(DomainId(2)).unwrap();
    assert_eq!(world.bridge.domains().len(), 2);

    world.bridge.domain_unloaded(world.domain).unwrap();
    let registry = world.bridge.registry();
    assert!(registry.is_ready());
    assert_eq!(registry.snapshot().owner(), Some(DomainId(2)));
    assert_eq!(registry.generation(), 3);
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed_class),
        BridgeObjectKind::TransparentBridge
    );
    assert!(world.bridge.is_bridge_object(obj));

    let mut sccs = vec![StronglyConnectedComponent::new(vec![obj])];
    let stats = world.run_pass(&mut sccs, &[]).unwrap();
    assert!(sccs[0].is_alive);
    assert_eq!(stats.objects_tested, 1);
    assert_eq!(world.handle_type(obj), RefKind::Global);
    assert_handles_balanced(&world);

    // The last domain going away drops the descriptors.
    world.bridge.domain_unloaded(DomainId(2)).unwrap();
    assert!(!world.bridge.registry().is_ready());
    assert_eq!(
        world.bridge.bridge_class_kind(world.managed_class),
        BridgeObjectKind::Transparent
    );
}

#[test]
fn test_strategy_follows_config() {
    let world = world(WeakRefMode::Emulated);
    assert!(matches!(
        world.bridge.strategy(),
        PromotionStrategy::EmulatedWeak(_)
    ));
}
