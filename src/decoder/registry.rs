//! Source kind → dialect registry.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::common::types::{DecodedLine, DecodedMessage, RawLineEvent};

use super::{CoreNetworkDialect, Dialect, RanDialect, SipDialect, Unparseable};

/// Dialect names registered by [`DecoderRegistry::with_builtin_dialects`].
pub const RAN_KIND: &str = "ran";
pub const CORE_KIND: &str = "core";
pub const SIP_KIND: &str = "sip";

/// Maps each source kind to the dialect that decodes its lines.
///
/// Built once before collection starts and then shared read-only, so
/// decoding never takes a lock.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    dialects: HashMap<String, Arc<dyn Dialect>>,
}

impl DecoderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the `ran`, `core` and `sip` dialects.
    pub fn with_builtin_dialects() -> Self {
        let mut registry = Self::new();
        registry.register_dialect(RAN_KIND, RanDialect);
        registry.register_dialect(CORE_KIND, CoreNetworkDialect);
        registry.register_dialect(SIP_KIND, SipDialect);
        registry
    }

    /// Associate a source kind with a dialect.
    ///
    /// Returns the dialect previously registered under the same kind, if any.
    pub fn register_dialect<D>(&mut self, kind: impl Into<String>, dialect: D) -> Option<Arc<dyn Dialect>>
    where
        D: Dialect + 'static,
    {
        let kind = kind.into();
        log::debug!("Registering dialect for source kind '{}'", kind);
        self.dialects.insert(kind, Arc::new(dialect))
    }

    pub fn has_dialect(&self, kind: &str) -> bool {
        self.dialects.contains_key(kind)
    }

    /// Registered source kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.dialects.keys().map(|k| k.as_str()).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Decode one raw line with the dialect of its source kind.
    ///
    /// Never panics: a dialect that panics is reported as
    /// [`Unparseable::DecoderPanicked`].
    pub fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable> {
        let dialect = self
            .dialects
            .get(&line.source_kind)
            .ok_or_else(|| Unparseable::NoDialect(line.source_kind.clone()))?;

        match panic::catch_unwind(AssertUnwindSafe(|| dialect.decode(line))) {
            Ok(result) => result,
            Err(_) => {
                log::warn!("Dialect '{}' panicked on line from {}", line.source_kind, line.source_id);
                Err(Unparseable::DecoderPanicked)
            }
        }
    }

    /// Decode and stamp a line into a message with the given sequence id.
    ///
    /// Lines that fail to decode become `Unparseable` messages that keep
    /// the original text in `raw`.
    pub fn decode_message(&self, id: u64, line: &RawLineEvent) -> DecodedMessage {
        match self.decode(line) {
            Ok(decoded) => DecodedMessage::from_decoded(id, line, decoded),
            Err(reason) => {
                log::debug!("Unparseable line from {}: {} ({})", line.source_id, line.text, reason);
                DecodedMessage::unparseable(id, line, reason)
            }
        }
    }
}
