pub mod engine;
pub mod pacing;
pub mod prompt;
pub mod registry;

pub use engine::{Engine, EngineBuilder};
pub use pacing::PacingPolicy;
pub use prompt::clarified_prompt;
pub use registry::ExecutorRegistry;
