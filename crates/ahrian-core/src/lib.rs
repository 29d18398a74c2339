pub mod config;
pub mod error;
pub mod event;
pub mod sources;
pub mod traits;
pub mod types;

pub use config::AppConfig;
pub use error::{AhrianError, ErrorCode, Result};
pub use event::{ChunkSink, EventBus};
pub use sources::merge_sources;
pub use types::*;
