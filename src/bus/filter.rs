//! Subscription filters.
//!
//! A filter is either "everything", an arbitrary predicate closure, or a
//! parsed [`FilterSpec`] expression:
//!
//! ```text
//! layer=PHY,MAC level>=WARN rnti=0x4601 source=gnb type=RRCSetupRequest
//! ```
//!
//! Clauses are separated by whitespace and must all match. Comma separated
//! values inside one clause are alternatives.

use std::fmt;
use std::sync::Arc;

use crate::common::types::{Channel, CorrelationKind, CorrelationValue, DecodedMessage, Direction, Layer, Level};

use super::BusError;

type Predicate = Arc<dyn Fn(&DecodedMessage) -> bool + Send + Sync>;

/// Decides which published messages reach a subscription.
#[derive(Clone, Default)]
pub enum Filter {
    #[default]
    All,
    Predicate(Predicate),
    Spec(FilterSpec),
}

impl Filter {
    pub fn all() -> Self {
        Filter::All
    }

    /// Filter with a closure.
    ///
    /// The closure runs inside [`FanoutBus::publish`] while the bus lock is
    /// held. It must not call back into the bus (`subscribe`, `stats`,
    /// `correlated_flow`, ...) or it deadlocks, and it should return quickly.
    ///
    /// [`FanoutBus::publish`]: super::FanoutBus::publish
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&DecodedMessage) -> bool + Send + Sync + 'static,
    {
        Filter::Predicate(Arc::new(f))
    }

    /// Parse a declarative filter expression.
    pub fn parse(expression: &str) -> Result<Self, BusError> {
        FilterSpec::parse(expression).map(Filter::Spec)
    }

    pub fn matches(&self, message: &DecodedMessage) -> bool {
        match self {
            Filter::All => true,
            Filter::Predicate(f) => f(message),
            Filter::Spec(spec) => spec.matches(message),
        }
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::All => write!(f, "Filter::All"),
            Filter::Predicate(_) => write!(f, "Filter::Predicate(..)"),
            Filter::Spec(spec) => write!(f, "Filter::Spec({:?})", spec),
        }
    }
}

impl From<FilterSpec> for Filter {
    fn from(spec: FilterSpec) -> Self {
        Filter::Spec(spec)
    }
}

/// Level bound of a filter clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LevelBound {
    AtLeast(Level),
    AtMost(Level),
    Exactly(Level),
}

impl LevelBound {
    fn accepts(&self, level: Level) -> bool {
        match *self {
            LevelBound::AtLeast(min) => level >= min,
            LevelBound::AtMost(max) => level <= max,
            LevelBound::Exactly(exact) => level == exact,
        }
    }
}

/// Parsed declarative filter. Empty fields do not constrain.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FilterSpec {
    layers: Vec<Layer>,
    levels: Vec<LevelBound>,
    message_types: Vec<String>,
    sources: Vec<String>,
    channels: Vec<Channel>,
    directions: Vec<Direction>,
    keys: Vec<(CorrelationKind, Vec<String>)>,
    parsed_only: bool,
}

impl FilterSpec {
    /// Parse a filter expression. An empty expression or `*` matches everything.
    ///
    /// # Returns
    ///
    /// `Err(BusError::InvalidFilter)` naming the offending clause for unknown
    /// names, unknown layer/level/channel values or malformed identifiers.
    pub fn parse(expression: &str) -> Result<Self, BusError> {
        let mut spec = FilterSpec::default();

        for clause in expression.split_whitespace() {
            if clause == "*" {
                continue;
            }
            if clause == "parsed" {
                spec.parsed_only = true;
                continue;
            }

            let (name, op, values) = split_clause(clause)
                .ok_or_else(|| BusError::InvalidFilter(format!("expected name=value, got '{}'", clause)))?;
            let name = name.to_ascii_lowercase();

            if name == "level" {
                for value in values {
                    let level = Level::from_tag(value)
                        .ok_or_else(|| BusError::InvalidFilter(format!("unknown level '{}'", value)))?;
                    spec.levels.push(match op {
                        ">=" => LevelBound::AtLeast(level),
                        "<=" => LevelBound::AtMost(level),
                        _ => LevelBound::Exactly(level),
                    });
                }
                continue;
            }
            if op != "=" {
                return Err(BusError::InvalidFilter(format!("'{}' only supports '='", name)));
            }

            match name.as_str() {
                "layer" => {
                    for value in values {
                        let layer = Layer::from_tag(value)
                            .ok_or_else(|| BusError::InvalidFilter(format!("unknown layer '{}'", value)))?;
                        spec.layers.push(layer);
                    }
                }
                "type" | "message_type" => spec.message_types.extend(values.iter().map(|v| v.to_string())),
                "source" => spec.sources.extend(values.iter().map(|v| v.to_string())),
                "channel" => {
                    for value in values {
                        let channel = Channel::from_name(value)
                            .ok_or_else(|| BusError::InvalidFilter(format!("unknown channel '{}'", value)))?;
                        spec.channels.push(channel);
                    }
                }
                "dir" | "direction" => {
                    for value in values {
                        let direction = Direction::from_tag(value)
                            .ok_or_else(|| BusError::InvalidFilter(format!("unknown direction '{}'", value)))?;
                        spec.directions.push(direction);
                    }
                }
                other => {
                    let kind = CorrelationKind::from_field_name(other)
                        .ok_or_else(|| BusError::InvalidFilter(format!("unknown filter name '{}'", other)))?;
                    let mut normalized = Vec::with_capacity(values.len());
                    for value in values {
                        let value = CorrelationValue::normalize(kind, value)
                            .ok_or_else(|| BusError::InvalidFilter(format!("invalid {} value '{}'", kind, value)))?;
                        normalized.push(value.text);
                    }
                    spec.keys.push((kind, normalized));
                }
            }
        }

        Ok(spec)
    }

    pub fn matches(&self, message: &DecodedMessage) -> bool {
        if self.parsed_only && !message.is_parsed() {
            return false;
        }
        if !self.layers.is_empty() && !self.layers.contains(&message.layer) {
            return false;
        }
        if !self.levels.iter().all(|bound| bound.accepts(message.level)) {
            return false;
        }
        if !self.message_types.is_empty() && !self.message_types.iter().any(|t| *t == message.message_type) {
            return false;
        }
        if !self.sources.is_empty() && !self.sources.iter().any(|s| *s == message.source_id) {
            return false;
        }
        if !self.channels.is_empty() && !message.channel.is_some_and(|c| self.channels.contains(&c)) {
            return false;
        }
        if !self.directions.is_empty() && !message.direction.is_some_and(|d| self.directions.contains(&d)) {
            return false;
        }
        self.keys.iter().all(|(kind, values)| {
            message
                .correlation(*kind)
                .is_some_and(|value| values.iter().any(|v| *v == value.text))
        })
    }
}

/// Split `name>=a,b` into (`name`, `>=`, [`a`, `b`]).
fn split_clause(clause: &str) -> Option<(&str, &str, Vec<&str>)> {
    let (name, op, rest) = if let Some((name, rest)) = clause.split_once(">=") {
        (name, ">=", rest)
    } else if let Some((name, rest)) = clause.split_once("<=") {
        (name, "<=", rest)
    } else {
        let (name, rest) = clause.split_once('=')?;
        (name, "=", rest)
    };

    let values: Vec<&str> = rest.split(',').map(str::trim).filter(|v| !v.is_empty()).collect();
    if name.is_empty() || values.is_empty() {
        return None;
    }
    Some((name, op, values))
}
