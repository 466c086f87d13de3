//! # gcbridge-core
//!
//! Makes a tracing managed collector and a separate, handle-based host heap
//! cooperate on object graphs that span both heaps.
//!
//! When the managed collector finds a cycle of bridge objects it reports it
//! as a strongly connected component. During a pass the bridge links the
//! host peers of each component into a cycle of synthetic references, wires
//! the cross-component edges, demotes every peer handle to weak, forces a
//! host collection and promotes the handles back: peers that survived keep
//! their component alive. The synthetic references are removed before the
//! pass returns.
//!
//! The main entry point is [`BridgeRuntime`], which implements
//! [`BridgeCallbacks`]; [`abi`] exposes it through the collector's C callback
//! table.
pub mod abi;
pub mod accounting;
pub mod bridge;
pub mod classify;
pub mod config;
pub mod cross_refs;
pub mod domains;
pub mod error;
pub mod host;
pub mod managed;
pub mod metrics;
pub mod promotion;
pub mod registry;

pub use accounting::{ReferenceAccounting, RefLog, ThreadTag};
pub use bridge::{BridgeCallbacks, BridgeRuntime};
pub use classify::BridgeObjectKind;
pub use config::{BridgeConfig, RuntimeIdentity, WeakRefMode, platform_supports_native_weak_refs};
pub use cross_refs::{CrossComponentEdge, StronglyConnectedComponent};
pub use error::{BridgeError, HostError, RegistryError};
pub use host::{HostHeap, RefKind, SyntheticLinkMethods};
pub use managed::ManagedRuntime;
pub use metrics::{BridgeMetrics, PassStats};
pub use promotion::{PromotionOps, PromotionStrategy};
pub use registry::{BridgeTypeDescriptor, BridgeTypeRegistry, ClassifyMiss};
