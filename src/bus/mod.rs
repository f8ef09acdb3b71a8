//! Correlation and fan-out bus.
//!
//! The bus is the single serialization point between decoding and every
//! consumer. `publish` takes the bus lock, appends the message to the queue
//! of each matching subscription and to the correlation index, and returns.
//! It never waits for a consumer: a full subscription queue drops its
//! oldest entry instead.
//!
//! - `fanout`: the bus itself and its statistics
//! - `subscription`: per-subscriber bounded queues and handles
//! - `filter`: closure and declarative subscription filters
//! - `correlation`: bounded LRU index of message flows per identifier

pub mod correlation;
pub mod fanout;
pub mod filter;
pub mod subscription;

use std::fmt;

pub(crate) use crate::common::lock;

pub use correlation::CorrelationIndex;
pub use fanout::{BusStats, FanoutBus};
pub use filter::{Filter, FilterSpec};
pub use subscription::{Delivery, Subscription, SubscriptionState, Unsubscribe};

/// Caller-visible bus misuse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// The bus was closed; publishing and subscribing are rejected.
    Closed,
    /// A declarative filter expression could not be parsed.
    InvalidFilter(String),
    /// A subscription queue must hold at least one message.
    CapacityZero,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BusError::Closed => write!(f, "bus is closed"),
            BusError::InvalidFilter(msg) => write!(f, "invalid filter: {}", msg),
            BusError::CapacityZero => write!(f, "subscription capacity must be positive"),
        }
    }
}

impl std::error::Error for BusError {}
