//! Shared tokenization helpers for line dialects.
//!
//! Handles the building blocks every dialect needs: bracketed prefix tags,
//! `key=value` pairs, `KEY[value]` identifiers and value typing (integers,
//! hexadecimal, unit-suffixed quantities and bracketed ranges).

use chrono::{DateTime, Utc};

use crate::common::types::{CorrelationKeys, CorrelationKind, CorrelationValue, FieldValue, Fields};

/// Take a leading `[tag]` off the text.
///
/// Returns the trimmed tag content and the remainder after the closing bracket.
pub fn take_bracket_tag(text: &str) -> Option<(&str, &str)> {
    let trimmed = text.trim_start();
    let inner = trimmed.strip_prefix('[')?;
    let end = inner.find(']')?;
    Some((inner[..end].trim(), &inner[end + 1..]))
}

/// Split off a leading RFC 3339 timestamp, if the line starts with one.
pub fn split_leading_timestamp(text: &str) -> (Option<DateTime<Utc>>, &str) {
    let trimmed = text.trim_start();
    let end = trimmed.find(char::is_whitespace).unwrap_or(trimmed.len());
    let candidate = &trimmed[..end];

    // Cheap shape check before handing the token to chrono.
    let looks_like_date = candidate.len() >= 20 && candidate.as_bytes().get(4) == Some(&b'-') && candidate.contains('T');
    if !looks_like_date {
        return (None, trimmed);
    }

    match DateTime::parse_from_rfc3339(candidate) {
        Ok(dt) => (Some(dt.with_timezone(&Utc)), &trimmed[end..]),
        Err(_) => (None, trimmed),
    }
}

/// Split text into whitespace separated tokens, keeping bracketed groups
/// such as `prb=[0, 87)` together.
pub fn split_tokens(text: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let mut depth = 0i32;
    let mut start: Option<usize> = None;

    for (idx, ch) in text.char_indices() {
        match ch {
            '[' | '(' | '{' => depth += 1,
            ']' | ')' | '}' => depth = (depth - 1).max(0),
            _ => {}
        }
        if ch.is_whitespace() && depth == 0 {
            if let Some(s) = start.take() {
                tokens.push(&text[s..idx]);
            }
        } else if start.is_none() {
            start = Some(idx);
        }
    }
    if let Some(s) = start {
        tokens.push(&text[s..]);
    }

    tokens
}

/// Split a token into a `key=value` pair.
pub fn split_pair(token: &str) -> Option<(&str, &str)> {
    let (key, value) = token.split_once('=')?;
    let key = key.trim();
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.') {
        return None;
    }
    Some((key, value.trim_end_matches([',', ';'])))
}

/// Type a raw value.
///
/// ```text
/// 309       -> Integer
/// -3.5      -> Float
/// 0x4601    -> Hex
/// 135.5us   -> Quantity
/// [0,87)    -> Range
/// QPSK      -> Text
/// ```
pub fn parse_value(raw: &str) -> FieldValue {
    let raw = raw.trim();

    if let Some(range) = parse_range(raw) {
        return range;
    }

    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        if let Ok(value) = u64::from_str_radix(hex, 16) {
            return FieldValue::Hex {
                value,
                text: format!("{:#x}", value),
            };
        }
    }

    if let Ok(value) = raw.parse::<i64>() {
        return FieldValue::Integer(value);
    }

    if starts_numeric(raw) {
        if let Ok(value) = raw.parse::<f64>() {
            return FieldValue::Float(value);
        }
        if let Some(quantity) = parse_quantity(raw) {
            return quantity;
        }
    }

    FieldValue::Text(raw.to_string())
}

fn starts_numeric(raw: &str) -> bool {
    let body = raw.strip_prefix(['-', '+']).unwrap_or(raw);
    body.chars().next().is_some_and(|c| c.is_ascii_digit() || c == '.')
}

/// Parse `[a,b)`, `[a,b]`, `(a,b]` style integer ranges.
fn parse_range(raw: &str) -> Option<FieldValue> {
    let start_inclusive = match raw.chars().next()? {
        '[' => true,
        '(' => false,
        _ => return None,
    };
    let end_inclusive = match raw.chars().last()? {
        ']' => true,
        ')' => false,
        _ => return None,
    };
    let inner = &raw[1..raw.len() - 1];
    let (start, end) = inner.split_once(',')?;

    Some(FieldValue::Range {
        start: start.trim().parse().ok()?,
        end: end.trim().parse().ok()?,
        start_inclusive,
        end_inclusive,
    })
}

/// Parse a number followed directly by a unit (`135.5us`, `-90dBm`, `12%`).
fn parse_quantity(raw: &str) -> Option<FieldValue> {
    let split = raw
        .char_indices()
        .find(|&(idx, c)| !(c.is_ascii_digit() || c == '.' || ((c == '-' || c == '+') && idx == 0)))
        .map(|(idx, _)| idx)?;
    let (number, unit) = raw.split_at(split);
    if unit.is_empty() || !unit.chars().all(|c| c.is_ascii_alphabetic() || c == '%' || c == '/') {
        return None;
    }

    Some(FieldValue::Quantity {
        value: number.parse().ok()?,
        unit: unit.to_string(),
    })
}

/// Find every `KEY[value]` occurrence in the text.
///
/// Bracketed content without a key in front (`[imsi-001010000000001]`) is
/// returned with an empty key.
pub fn bracket_fields(text: &str) -> Vec<(&str, &str)> {
    let mut result = Vec::new();
    let mut search_from = 0;

    while let Some(rel_open) = text[search_from..].find('[') {
        let open = search_from + rel_open;
        let Some(rel_close) = text[open..].find(']') else {
            break;
        };
        let close = open + rel_close;

        let key_start = text[..open]
            .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
            .map(|p| p + 1)
            .unwrap_or(0);
        result.push((&text[key_start..open], text[open + 1..close].trim()));

        search_from = close + 1;
    }

    result
}

/// Record one decoded pair: every pair becomes a field, and pairs whose key
/// names a correlation identifier also become a correlation key.
pub fn absorb_pair(key: &str, raw: &str, correlation_keys: &mut CorrelationKeys, fields: &mut Fields) {
    if let Some(kind) = CorrelationKind::from_field_name(key) {
        if let Some(value) = CorrelationValue::normalize(kind, raw) {
            correlation_keys.entry(kind).or_insert(value);
        }
    }
    fields.insert(key.to_ascii_lowercase(), parse_value(raw));
}
