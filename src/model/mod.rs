pub mod config;
pub mod intel;
pub mod nvd;
pub mod reply;

pub use config::{Config, ModelConfig, SourceConfig};
pub use intel::*;
pub use reply::ModelReply;
