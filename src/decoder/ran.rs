//! RAN stack dialect.
//!
//! Line shape:
//!
//! ```text
//! [2025-10-23T18:00:01Z] [LAYER] [LEVEL] [TIME] Name: key=value key2=value2 ...
//! ```
//!
//! - The leading RFC 3339 timestamp is optional.
//! - `TIME` is either `sfn.slot` (`931.6`) or a wall clock `HH:MM:SS[.frac]`
//!   that is combined with the arrival date. It may be absent.
//! - The message name is either `Name:` or the free words before the first
//!   `key=value` token. `Tx`/`DL` and `Rx`/`UL` words set the direction.

use chrono::{DateTime, NaiveTime, Utc};

use crate::common::detail::{MessageDetail, RanDetail};
use crate::common::types::{Channel, DecodedLine, Direction, FieldValue, Layer, Level, RawLineEvent};

use super::tokenizer::{absorb_pair, split_leading_timestamp, split_pair, split_tokens, take_bracket_tag};
use super::{Dialect, Unparseable};

pub struct RanDialect;

impl Dialect for RanDialect {
    fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable> {
        parse_ran_line(&line.text, line.received_at)
    }
}

/// Time tag of a RAN line.
#[derive(Debug, Clone, Copy, PartialEq)]
enum TimeTag {
    SlotTiming { sfn: u32, slot: u32 },
    WallClock(NaiveTime),
}

/// Parse one RAN stack line.
///
/// # Parameters
///
/// * `text` - The raw line
/// * `received_at` - Arrival time, used for the date of wall clock time tags
///
/// # Returns
///
/// The decoded line, or the reason it does not follow the RAN grammar.
pub fn parse_ran_line(text: &str, received_at: DateTime<Utc>) -> Result<DecodedLine, Unparseable> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Unparseable::Empty);
    }

    let (explicit_timestamp, rest) = split_leading_timestamp(text);

    let (layer_tag, rest) = take_bracket_tag(rest).ok_or(Unparseable::MissingPrefix)?;
    let (level_tag, rest) = take_bracket_tag(rest).ok_or(Unparseable::MissingPrefix)?;
    let level = Level::from_tag(level_tag).ok_or_else(|| Unparseable::UnknownLevel(level_tag.to_string()))?;
    let layer = Layer::from_tag(layer_tag).unwrap_or(Layer::Other);

    let (time_tag, body) = match take_bracket_tag(rest) {
        Some((tag, remainder)) => match parse_time_tag(tag) {
            Some(time) => (Some(time), remainder),
            None => (None, rest),
        },
        None => (None, rest),
    };

    let (name, pair_text) = split_message_name(body);

    let mut direction = None;
    let mut name_words = Vec::new();
    for word in name.split_whitespace() {
        match direction_word(word) {
            Some(d) => direction = Some(d),
            None => name_words.push(word.trim_end_matches(':')),
        }
    }
    name_words.retain(|w| !w.is_empty());
    if name_words.is_empty() {
        return Err(Unparseable::MissingMessageName);
    }

    let channel = name_words.iter().find_map(|w| Channel::from_name(w));
    let message_type = match (layer, channel.and_then(|c| c.carried_message())) {
        (Layer::Phy, Some(carried)) => carried.to_string(),
        _ => name_words.join(" "),
    };

    let mut decoded = DecodedLine::new(
        layer,
        level,
        message_type,
        MessageDetail::Ran(RanDetail {
            layer_tag: layer_tag.to_string(),
            sfn: None,
            slot: None,
        }),
    );
    decoded.channel = channel;

    for token in split_tokens(pair_text) {
        if let Some((key, value)) = split_pair(token) {
            absorb_pair(key, value, &mut decoded.correlation_keys, &mut decoded.fields);
        }
    }

    if let Some(FieldValue::Text(dir)) = decoded.fields.get("dir") {
        direction = direction.or_else(|| Direction::from_tag(dir));
    }
    decoded.direction = direction.or_else(|| channel.and_then(|c| c.direction()));

    decoded.timestamp = explicit_timestamp;
    match time_tag {
        Some(TimeTag::SlotTiming { sfn, slot }) => {
            decoded.fields.insert("sfn".to_string(), FieldValue::Integer(i64::from(sfn)));
            decoded.fields.insert("slot".to_string(), FieldValue::Integer(i64::from(slot)));
            if let MessageDetail::Ran(detail) = &mut decoded.detail {
                detail.sfn = Some(sfn);
                detail.slot = Some(slot);
            }
        }
        Some(TimeTag::WallClock(time)) => {
            if decoded.timestamp.is_none() {
                decoded.timestamp = Some(received_at.date_naive().and_time(time).and_utc());
            }
        }
        None => {}
    }

    Ok(decoded)
}

fn parse_time_tag(tag: &str) -> Option<TimeTag> {
    if tag.is_empty() || !tag.chars().all(|c| c.is_ascii_digit() || c == '.' || c == ':') {
        return None;
    }

    if tag.contains(':') {
        return NaiveTime::parse_from_str(tag, "%H:%M:%S%.f").ok().map(TimeTag::WallClock);
    }

    let (sfn, slot) = tag.split_once('.')?;
    Some(TimeTag::SlotTiming {
        sfn: sfn.parse().ok()?,
        slot: slot.parse().ok()?,
    })
}

/// Split the body into the message name part and the `key=value` part.
///
/// `PDSCH: rnti=1` splits at the colon. Without a colon ahead of the first
/// pair, the name is every word before the first `key=value` token.
fn split_message_name(body: &str) -> (&str, &str) {
    let body = body.trim();
    let first_pair = split_tokens(body)
        .into_iter()
        .find(|t| split_pair(t).is_some())
        .and_then(|t| body.find(t))
        .unwrap_or(body.len());

    match body[..first_pair].find(':') {
        Some(colon) => (&body[..colon], &body[colon + 1..]),
        None => (&body[..first_pair], &body[first_pair..]),
    }
}

fn direction_word(word: &str) -> Option<Direction> {
    match word.trim_end_matches(':').to_ascii_uppercase().as_str() {
        "TX" | "DL" => Some(Direction::Dl),
        "RX" | "UL" => Some(Direction::Ul),
        _ => None,
    }
}
