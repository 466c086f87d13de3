//! A bridge wired to a simulated managed runtime and host heap, plus the
//! canned scenarios the CLI runs.
use crate::{SimHost, SimManaged};
use gcbridge_core::{
    BridgeConfig, BridgeError, BridgeRuntime, CrossComponentEdge, HostHeap, ManagedRuntime,
    PassStats, PromotionOps, RefKind, StronglyConnectedComponent, ThreadTag, WeakRefMode,
    registry::{HANDLE_FIELD, HANDLE_TYPE_FIELD, REFS_ADDED_FIELD, WEAK_HANDLE_FIELD},
};
use gcbridge_utils::{
    ClassId, DomainId, HostClass, HostRef, ManagedObject,
    sync::{current_thread_name, get_current_thread_id},
};
use serde::Serialize;
use std::fmt;

/// Origin label for peers created by the simulator.
const PEER_ORIGIN: &str = "at [[gcbridge-sim:bind_peer]]";

pub struct SimWorld {
    pub bridge: BridgeRuntime<SimManaged, SimHost>,
    pub domain: DomainId,
    /// Managed subclass of `Java.Lang.Object` used for test objects.
    pub managed_class: ClassId,
    /// Host class of the peers; supports synthetic linking.
    pub peer_class: HostClass,
}

impl SimWorld {
    pub fn new(config: BridgeConfig) -> Result<Self, BridgeError> {
        Self::with_runtime(BridgeRuntime::new(
            config,
            SimManaged::with_bridge_types(),
            SimHost::new(),
        ))
    }

    pub fn with_runtime(bridge: BridgeRuntime<SimManaged, SimHost>) -> Result<Self, BridgeError> {
        let domain = DomainId(1);
        bridge.try_domain_created(domain)?;

        let managed = bridge.managed();
        let base = managed.class_named("Java.Lang.Object").ok_or_else(|| {
            BridgeError::Registry(gcbridge_core::RegistryError::TypeNotFound {
                assembly: "Mono.Android".to_string(),
                namespace: "Java.Lang".to_string(),
                name: "Object".to_string(),
            })
        })?;
        let managed_class = managed.define_class("App", "App", "Node", Some(base), &[]);
        let peer_class = bridge.host().define_class("app/Node", true);

        Ok(Self {
            bridge,
            domain,
            managed_class,
            peer_class,
        })
    }

    pub fn managed(&self) -> &SimManaged {
        self.bridge.managed()
    }

    pub fn host(&self) -> &SimHost {
        self.bridge.host()
    }

    fn field(&self, obj: ManagedObject, name: &str) -> usize {
        self.managed().field_value(obj, name).unwrap_or(0)
    }

    fn set(&self, obj: ManagedObject, name: &str, value: usize) {
        let managed = self.managed();
        if let Some(field) = managed.find_field(managed.class_of(obj), name) {
            managed.set_field(obj, field, value);
        }
    }

    /// Allocate a managed object of `class` with a fresh host peer of
    /// `peer_class` held through a global handle.
    pub fn new_bridged_as(&self, class: ClassId, peer_class: HostClass) -> (ManagedObject, HostRef) {
        let obj = self.managed().alloc(class);
        let host = self.host();
        let local = host.new_object(peer_class);
        let global = host.new_global_ref(local);
        let name = current_thread_name();
        let thread = ThreadTag {
            name: &name,
            id: get_current_thread_id(),
        };
        self.bridge.accounting().record_promotion(
            Some(local),
            RefKind::Local,
            global,
            RefKind::Global,
            thread,
            PEER_ORIGIN,
        );
        host.delete_local_ref(local);

        self.set(obj, HANDLE_FIELD, HostRef::to_raw(global));
        self.set(obj, HANDLE_TYPE_FIELD, RefKind::Global.to_raw());
        // The local handle was just created, so the global one exists.
        (obj, global.unwrap_or(local))
    }

    pub fn new_bridged(&self) -> (ManagedObject, HostRef) {
        self.new_bridged_as(self.managed_class, self.peer_class)
    }

    /// Allocate a managed object that is not a bridge type.
    pub fn new_plain(&self) -> ManagedObject {
        let managed = self.managed();
        let class = managed
            .class_named("System.Object")
            .unwrap_or_else(|| managed.define_class("mscorlib", "System", "Object", None, &[]));
        managed.alloc(class)
    }

    pub fn peer(&self, obj: ManagedObject) -> Option<HostRef> {
        HostRef::from_raw(self.field(obj, HANDLE_FIELD))
    }

    pub fn handle_type(&self, obj: ManagedObject) -> RefKind {
        RefKind::from_raw(self.field(obj, HANDLE_TYPE_FIELD))
    }

    pub fn weak_handle(&self, obj: ManagedObject) -> Option<HostRef> {
        HostRef::from_raw(self.field(obj, WEAK_HANDLE_FIELD))
    }

    pub fn refs_added(&self, obj: ManagedObject) -> bool {
        self.field(obj, REFS_ADDED_FIELD) != 0
    }

    /// Object id of the peer, usable after the handle is gone.
    pub fn peer_id(&self, obj: ManagedObject) -> Option<u64> {
        self.peer(obj).and_then(|p| self.host().object_id(p))
    }

    /// Run the pass the managed collector would run.
    pub fn run_pass(
        &self,
        sccs: &mut [StronglyConnectedComponent],
        edges: &[CrossComponentEdge],
    ) -> Option<PassStats> {
        self.bridge.run_pass(sccs, edges)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scenario {
    /// A two-object cycle with no host-side holder.
    A,
    /// The same cycle with the first peer pinned by the host.
    B,
    /// An object-less component pointing at a pinned singleton.
    C,
    /// A ring of `n` bridge objects, optionally with the first peer pinned.
    Ring { size: usize, pinned: bool },
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scenario::A => write!(f, "a"),
            Scenario::B => write!(f, "b"),
            Scenario::C => write!(f, "c"),
            Scenario::Ring { size, pinned } => {
                write!(f, "ring-{}{}", size, if *pinned { "-pinned" } else { "" })
            }
        }
    }
}

#[derive(Debug, Serialize, Clone, PartialEq, Eq)]
pub struct ScenarioReport {
    pub scenario: String,
    pub weak_ref_mode: WeakRefMode,
    pub sccs_alive: Vec<bool>,
    /// Whether each bridge object still has a peer after the pass.
    pub peers_alive: Vec<bool>,
    pub stats: PassStats,
    pub gref_count: i64,
    pub weak_gref_count: i64,
    pub host_live_objects: usize,
}

impl fmt::Display for ScenarioReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Scenario {} ({:?} weak references)",
            self.scenario, self.weak_ref_mode
        )?;
        writeln!(f, "  SCCs alive:   {:?}", self.sccs_alive)?;
        writeln!(f, "  Peers alive:  {:?}", self.peers_alive)?;
        writeln!(
            f,
            "  Handles:      {} global, {} weak global, {} live host objects",
            self.gref_count, self.weak_gref_count, self.host_live_objects
        )?;
        write!(f, "{}", self.stats)
    }
}

/// Build the scenario's object graph, run one pass and report the outcome.
pub fn run_scenario(
    scenario: Scenario,
    config: BridgeConfig,
) -> Result<ScenarioReport, BridgeError> {
    let world = SimWorld::new(config)?;

    let (mut sccs, edges, objects) = match scenario {
        Scenario::A | Scenario::B => {
            let (a, peer_a) = world.new_bridged();
            let (b, _) = world.new_bridged();
            if scenario == Scenario::B {
                world.host().add_root(peer_a);
            }
            (
                vec![StronglyConnectedComponent::new(vec![a, b])],
                vec![],
                vec![a, b],
            )
        }
        Scenario::C => {
            let (single, peer) = world.new_bridged();
            world.host().add_root(peer);
            (
                vec![
                    StronglyConnectedComponent::new(vec![]),
                    StronglyConnectedComponent::new(vec![single]),
                ],
                vec![CrossComponentEdge::new(0, 1)],
                vec![single],
            )
        }
        Scenario::Ring { size, pinned } => {
            let bridged: Vec<_> = (0..size).map(|_| world.new_bridged()).collect();
            if pinned {
                if let Some((_, peer)) = bridged.first() {
                    world.host().add_root(*peer);
                }
            }
            let objects: Vec<_> = bridged.into_iter().map(|(obj, _)| obj).collect();
            (
                vec![StronglyConnectedComponent::new(objects.clone())],
                vec![],
                objects,
            )
        }
    };

    let stats = world.run_pass(&mut sccs, &edges).unwrap_or_default();
    let accounting = world.bridge.accounting();

    Ok(ScenarioReport {
        scenario: scenario.to_string(),
        weak_ref_mode: world.bridge.strategy().mode(),
        sccs_alive: sccs.iter().map(|s| s.is_alive).collect(),
        peers_alive: objects.iter().map(|&o| world.peer(o).is_some()).collect(),
        stats,
        gref_count: accounting.gref_count(),
        weak_gref_count: accounting.weak_gref_count(),
        host_live_objects: world.host().live_objects(),
    })
}
