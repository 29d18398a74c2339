//! Scripted collaborators, an in-memory store, and fixtures shared by the
//! Ahrian test suites.

pub mod fixtures;
mod scripted;
mod store;

pub use scripted::{ScriptedAgent, ScriptedOrchestrator, ScriptedPlanner, ScriptedSynthesizer};
pub use store::MemoryStore;
