//! Types and configuration shared by the collector, decoder, bus and analytics.
//!
//! - `types`: message envelope, layers, levels and correlation identifiers
//! - `detail`: dialect-specific message payloads
//! - `config`: TOML configuration loading and validation

pub mod config;
pub mod detail;
pub mod types;

use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ConfigLoadError, EngineConfig};
pub use detail::MessageDetail;
pub use types::{
    Channel, CorrelationKey, CorrelationKind, CorrelationValue, DecodedLine, DecodedMessage, Direction, FieldValue, Layer,
    Level, ParseStatus, RawLineEvent,
};

/// Engines that can be alive at once in one process. Bounds the static
/// task pools of the per-engine decode and KPI tasks; a shut down engine
/// frees its slots.
pub const MAX_ENGINES: usize = 8;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
