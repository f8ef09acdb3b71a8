//! Engine assembly.
//!
//! - `handle`: the [`Engine`] that owns all components
//! - `pipeline`: id assignment, decoding and publishing
//! - `runtime`: the executor thread

pub mod handle;
pub mod pipeline;
pub mod runtime;

use std::fmt;

pub use handle::Engine;
pub use pipeline::{Pipeline, PipelineStats, decode_task};
pub use runtime::Runtime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// A source id that is not in the configuration.
    UnknownSource(String),
    /// A task could not be spawned (task pool exhausted).
    Spawn(String),
    /// A source kind without a registered dialect.
    NoDialect(String),
    Config(String),
    Runtime(String),
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownSource(id) => write!(f, "unknown source: {}", id),
            EngineError::Spawn(msg) => write!(f, "failed to spawn task {}", msg),
            EngineError::NoDialect(kind) => write!(f, "no dialect registered for kind '{}'", kind),
            EngineError::Config(msg) => write!(f, "invalid configuration: {}", msg),
            EngineError::Runtime(msg) => write!(f, "runtime error: {}", msg),
        }
    }
}

impl std::error::Error for EngineError {}
