pub mod config;
pub mod env;
pub mod events;
pub mod types;
pub mod version;

pub use config::EngineConfig;
pub use types::*;
pub use version::{Distribution, ToolVersion};
