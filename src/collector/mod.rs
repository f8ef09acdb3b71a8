//! Source collectors.
//!
//! One collector task per named source reads raw bytes from its transport,
//! reassembles whole lines and pushes them, stamped with arrival time and
//! source identity, onto the bounded raw line channel read by the decoder.
//!
//! - `source`: the `LineSource` contract plus process and file transports
//! - `simulated`: seeded synthetic source behind the same contract
//! - `line_buffer`: partial write reassembly
//! - `health`: per-source status registry
//! - `task`: reconnect/backoff loop and the collector task

pub mod health;
pub mod line_buffer;
pub mod simulated;
pub mod source;
pub mod task;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::common::types::RawLineEvent;

pub use health::{HealthRegistry, HealthStatus, SourceHealth};
pub use line_buffer::LineBuffer;
pub use simulated::SimulatedSource;
pub use source::{FileTailSource, LineSource, ProcessSource, ReadOutcome, SourceError, build_source};
pub use task::{BackoffPolicy, SourceCollector, StopSignal, collector_task};

/// Maximum number of concurrently collected sources.
pub const MAX_SOURCES: usize = 16;

/// Depth of the collector → decoder channel. Collectors wait for room
/// when it is full; lines are never dropped here.
pub const RAW_LINE_CHANNEL_SIZE: usize = 1024;
/// Bounded channel carrying raw lines from all collectors to the decoder.
///
/// Shared between an engine's collectors and its decode task through an
/// `Arc`, so it is freed with the engine.
pub type RawLineChannel = embassy_sync::channel::Channel<CriticalSectionRawMutex, RawLineEvent, RAW_LINE_CHANNEL_SIZE>;
