//! Pipeline configuration: model, YAML parsing, semantic validation.

pub mod parser;
pub mod types;
pub mod validator;

pub use parser::{load_config, parse_config, parse_config_str};
pub use types::{ChunkSize, PipelineConfig, StageSelection, StateBackendKind};
pub use validator::validate_config;
