//! Message decoder registry and the built-in line dialects.
//!
//! A dialect turns one raw line of a source kind into a [`DecodedLine`] or
//! explains why it could not. Dialects are pure: they hold no mutable state
//! and may run concurrently for different sources.
//!
//! - `registry`: kind → dialect lookup, panic containment
//! - `tokenizer`: shared prefix, `key=value` and value typing helpers
//! - `ran`: `[LAYER] [LEVEL] [TIME] Name: key=value ...` RAN stack lines
//! - `core_network`: core network function logs, coarse classification
//! - `sip`: SIP/IMS request and response lines

pub mod core_network;
pub mod ran;
pub mod registry;
pub mod sip;
pub mod tokenizer;

use std::fmt;

use crate::common::types::{DecodedLine, RawLineEvent};

pub use core_network::CoreNetworkDialect;
pub use ran::RanDialect;
pub use registry::DecoderRegistry;
pub use sip::SipDialect;

/// Why a line could not be decoded. Always returned as a value, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unparseable {
    /// Blank line.
    Empty,
    /// The dialect's fixed-structure prefix was not found.
    MissingPrefix,
    UnknownLevel(String),
    MissingMessageName,
    /// No dialect is registered for the line's source kind.
    NoDialect(String),
    /// Free-text line that matched none of the dialect's classifiers.
    Unclassified,
    DecoderPanicked,
    Custom(String),
}

impl fmt::Display for Unparseable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unparseable::Empty => write!(f, "empty line"),
            Unparseable::MissingPrefix => write!(f, "missing line prefix"),
            Unparseable::UnknownLevel(tag) => write!(f, "unknown level tag: {}", tag),
            Unparseable::MissingMessageName => write!(f, "missing message name"),
            Unparseable::NoDialect(kind) => write!(f, "no dialect registered for source kind: {}", kind),
            Unparseable::Unclassified => write!(f, "line matched no known pattern"),
            Unparseable::DecoderPanicked => write!(f, "decoder panicked"),
            Unparseable::Custom(reason) => write!(f, "{}", reason),
        }
    }
}

impl std::error::Error for Unparseable {}

/// A line grammar for one source kind.
///
/// Implementations must be deterministic functions of the line: the same
/// input always yields the same output.
pub trait Dialect: Send + Sync {
    fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable>;
}

impl<F> Dialect for F
where
    F: Fn(&RawLineEvent) -> Result<DecodedLine, Unparseable> + Send + Sync,
{
    fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable> {
        self(line)
    }
}
