//! Log decoding, correlation and fan-out engine for RAN, core network and
//! IMS stacks.
//!
//! Raw diagnostic lines flow through four stages:
//!
//! 1. `collector`: one task per source tails a process, file or simulated
//!    stream and reassembles whole lines
//! 2. `decoder`: the dialect registered for the source kind turns each line
//!    into a typed message, or an `Unparseable` one that keeps the text
//! 3. `bus`: decoded messages are indexed by correlation identifier and
//!    fanned out to filtered, bounded subscriptions
//! 4. `analytics`: a subscriber that maintains rolling KPIs
//!
//! [`engine::Engine`] wires the stages together on an embassy executor
//! thread.

pub mod analytics;
pub mod bus;
pub mod collector;
pub mod common;
pub mod decoder;
pub mod engine;

pub use engine::{Engine, EngineError};
