//! # gcbridge-sim
//!
//! Simulated collaborators for the GC bridge: a host heap whose collector is
//! a `gc-arena` arena, an in-memory managed runtime, and canned scenarios
//! that run a complete bridge pass over them.
pub mod host;
pub mod managed;
pub mod world;

pub use host::{SimHost, SimHostStats};
pub use managed::SimManaged;
pub use world::{Scenario, ScenarioReport, SimWorld, run_scenario};
