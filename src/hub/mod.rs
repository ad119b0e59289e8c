//! The hub: per-leg/bridge state plus the orchestrator that drives them.

pub mod orchestrator;
pub mod state;

pub use orchestrator::Hub;
