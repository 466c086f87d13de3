//! Peer handle promotion against the simulated host heap.
use gcbridge_core::{
    BridgeConfig, HostHeap, PromotionOps, PromotionStrategy, RefKind, StronglyConnectedComponent,
    WeakRefMode, promotion::PromotionContext,
};
use gcbridge_sim::SimWorld;
use gcbridge_utils::ManagedObject;
use std::{fs, path::PathBuf};

fn world(mode: WeakRefMode) -> SimWorld {
    SimWorld::new(BridgeConfig::new().weak_ref_mode(mode)).unwrap()
}

fn context(world: &SimWorld) -> PromotionContext<'_> {
    PromotionContext {
        managed: world.managed(),
        host: world.host(),
        accounting: world.bridge.accounting(),
    }
}

fn demote_then_promote(world: &SimWorld, obj: ManagedObject) -> bool {
    let registry = world.bridge.registry().snapshot();
    let desc = *registry.descriptor_for(world.managed(), obj).unwrap();
    let strategy = world.bridge.strategy();
    let cx = context(world);
    strategy.demote_to_weak(&cx, obj, &desc);
    strategy.promote_to_strong(&cx, obj, &desc)
}

#[test]
fn test_round_trip_preserves_liveness() {
    for mode in [WeakRefMode::Native, WeakRefMode::Emulated] {
        let world = world(mode);
        let (obj, peer) = world.new_bridged();
        let id = world.host().object_id(peer).unwrap();

        assert!(demote_then_promote(&world, obj), "{:?}", mode);
        let peer = world.peer(obj).unwrap();
        assert_eq!(world.host().object_id(peer), Some(id));
        assert_eq!(world.handle_type(obj), RefKind::Global);
        assert_eq!(world.host().ref_kind(peer), RefKind::Global);
        assert_eq!(world.weak_handle(obj), None);

        let accounting = world.bridge.accounting();
        assert_eq!(accounting.gref_count(), 1);
        assert_eq!(accounting.weak_gref_count(), 0);
        assert_eq!(world.host().stats().invalid_handle_ops, 0);
        assert_eq!(world.host().handle_count(RefKind::Local), 0);
    }
}

#[test]
fn test_round_trip_of_peerless_object_stays_dead() {
    for mode in [WeakRefMode::Native, WeakRefMode::Emulated] {
        let world = world(mode);
        let obj = world.managed().alloc(world.managed_class);

        assert!(!demote_then_promote(&world, obj));
        assert_eq!(world.peer(obj), None);
        assert_eq!(world.bridge.accounting().gref_count(), 0);
    }
}

#[test]
fn test_native_demotion_writes_weak_handle() {
    let world = world(WeakRefMode::Native);
    let (obj, strong) = world.new_bridged();
    let registry = world.bridge.registry().snapshot();
    let desc = *registry.descriptor_for(world.managed(), obj).unwrap();

    world
        .bridge
        .strategy()
        .demote_to_weak(&context(&world), obj, &desc);

    let weak = world.peer(obj).unwrap();
    assert_ne!(weak, strong);
    assert_eq!(world.handle_type(obj), RefKind::WeakGlobal);
    assert_eq!(world.host().ref_kind(weak), RefKind::WeakGlobal);
    assert_eq!(world.host().ref_kind(strong), RefKind::Invalid);
    assert_eq!(world.bridge.accounting().gref_count(), 0);
    assert_eq!(world.bridge.accounting().weak_gref_count(), 1);
}

#[test]
fn test_emulated_demotion_uses_wrapper() {
    let world = world(WeakRefMode::Emulated);
    let (obj, _) = world.new_bridged();
    let registry = world.bridge.registry().snapshot();
    let desc = *registry.descriptor_for(world.managed(), obj).unwrap();

    PromotionStrategy::for_mode(WeakRefMode::Emulated).demote_to_weak(
        &context(&world),
        obj,
        &desc,
    );

    assert_eq!(world.peer(obj), None);
    assert_eq!(world.handle_type(obj), RefKind::WeakGlobal);
    let wrapper = world.weak_handle(obj).unwrap();
    assert_eq!(world.host().ref_kind(wrapper), RefKind::Global);
    assert_eq!(world.bridge.accounting().weak_gref_count(), 1);

    // The wrapper does not keep the peer alive.
    world.host().collect();
    let cx = context(&world);
    assert!(
        !PromotionStrategy::for_mode(WeakRefMode::Emulated).promote_to_strong(&cx, obj, &desc)
    );
    assert_eq!(world.weak_handle(obj), None);
    assert_eq!(world.handle_type(obj), RefKind::Invalid);
    assert_eq!(world.host().ref_kind(wrapper), RefKind::Invalid);
    assert_eq!(world.bridge.accounting().weak_gref_count(), 0);
}

#[test]
fn test_gref_log_records_pass() {
    let path = std::env::temp_dir().join(format!("gcbridge-grefs-{}.txt", std::process::id()));
    let world = SimWorld::new(BridgeConfig::new().gref_log(PathBuf::from(&path))).unwrap();
    let (a, peer) = world.new_bridged();
    world.host().add_root(peer);
    let mut sccs = vec![StronglyConnectedComponent::new(vec![a])];
    world.run_pass(&mut sccs, &[]).unwrap();

    let log = fs::read_to_string(&path).unwrap();
    let _ = fs::remove_file(&path);
    let lines: Vec<_> = log.lines().collect();

    assert!(lines[0].starts_with("+g+ grefc 1 gwrefc 0 obj-handle "));
    assert_eq!(lines[1], "at [[gcbridge-sim:bind_peer]]");
    assert!(lines[2].starts_with("+w+ grefc 1 gwrefc 1 "));
    assert_eq!(lines[3], "at [[gcbridge:demote_to_weak]]");
    assert!(lines[4].starts_with("-g- grefc 0 gwrefc 1 handle "));
    assert!(lines[4].ends_with(&format!(
        "from thread '{}'({})",
        gcbridge_utils::sync::current_thread_name(),
        gcbridge_utils::sync::get_current_thread_id()
    )));
    assert!(lines[6].starts_with("+g+ grefc 1 gwrefc 1 "));
    assert_eq!(lines[7], "at [[gcbridge:promote_to_strong]]");
    assert!(lines[8].starts_with("-w- grefc 1 gwrefc 0 "));
    assert_eq!(lines.len(), 10);
}
