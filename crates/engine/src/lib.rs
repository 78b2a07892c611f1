//! `engine` crate — topology compilation, the per-node orchestrator,
//! recurring scheduler, trigger resolver, and the worker harness.

pub mod activity;
pub mod builder;
pub mod cache;
pub mod error;
pub mod expressions;
pub mod orchestrator;
pub mod scheduler;
pub mod services;
pub mod spawn;
pub mod sweeper;
pub mod topology;
pub mod triggers;
pub mod worker;

pub use cache::GraphCache;
pub use error::EngineError;
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use scheduler::Scheduler;
pub use services::EngineServices;
pub use sweeper::Sweeper;
pub use topology::{build_topology, Topology};
pub use worker::Worker;

#[cfg(test)]
mod orchestrator_tests;
#[cfg(test)]
mod test_fixtures;
