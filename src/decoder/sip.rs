//! SIP/IMS dialect.
//!
//! Recognizes request lines by method and `SIP/2.0 <code>` status lines,
//! and picks the Call-ID, CSeq, From and To headers from the same line when
//! the stack logs a one-line summary:
//!
//! ```text
//! INVITE sip:bob@ims.example.com SIP/2.0 Call-ID: a84b4c76e66710 CSeq: 314159 INVITE From: <sip:alice@ims.example.com>;tag=1928
//! SIP/2.0 486 Busy Here Call-ID: a84b4c76e66710 CSeq: 314159 INVITE
//! ```

use crate::common::detail::{MessageDetail, SipDetail, SipMethod};
use crate::common::types::{CorrelationKind, CorrelationValue, DecodedLine, FieldValue, Layer, Level, RawLineEvent};

use super::tokenizer::split_leading_timestamp;
use super::{Dialect, Unparseable};

pub struct SipDialect;

impl Dialect for SipDialect {
    fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable> {
        parse_sip_line(&line.text)
    }
}

/// Parse one SIP log line.
pub fn parse_sip_line(text: &str) -> Result<DecodedLine, Unparseable> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Unparseable::Empty);
    }

    let (timestamp, body) = split_leading_timestamp(text);
    let words: Vec<&str> = body.split_whitespace().collect();

    let call_id = header_value(&words, "call-id:").map(str::to_string);
    let cseq_position = words.iter().position(|w| w.eq_ignore_ascii_case("cseq:"));
    let cseq: Option<u32> = cseq_position.and_then(|p| words.get(p + 1)).and_then(|w| w.parse().ok());
    let cseq_method = cseq_position.and_then(|p| words.get(p + 2)).and_then(|w| SipMethod::from_token(w));
    let from = header_value(&words, "from:").map(strip_uri);
    let to = header_value(&words, "to:").map(strip_uri);

    let status_code = words
        .windows(2)
        .find(|pair| pair[0] == "SIP/2.0" && pair[1].len() == 3)
        .and_then(|pair| pair[1].parse::<u16>().ok())
        .filter(|code| (100..700).contains(code));

    // Header values (the CSeq method in particular) must not be taken for the request method.
    let request_method = match status_code {
        Some(_) => None,
        None => words
            .iter()
            .take(cseq_position.unwrap_or(words.len()))
            .find_map(|w| SipMethod::from_token(w.trim_end_matches(':'))),
    };

    let (message_type, level, method) = match (status_code, request_method) {
        (Some(code), _) => {
            let level = match code {
                400..=499 => Level::Warn,
                500..=699 => Level::Error,
                _ => Level::Info,
            };
            let prefix = cseq_method.map(|m| m.as_str()).unwrap_or("SIP");
            (format!("{}-{}", prefix, code), level, cseq_method)
        }
        (None, Some(method)) => (method.as_str().to_string(), Level::Info, Some(method)),
        (None, None) => return Err(Unparseable::Unclassified),
    };

    let mut decoded = DecodedLine::new(
        Layer::Sip,
        level,
        message_type,
        MessageDetail::Sip(SipDetail {
            method,
            status_code,
            call_id: call_id.clone(),
            cseq,
            from: from.clone(),
            to: to.clone(),
        }),
    );
    decoded.timestamp = timestamp;

    if let Some(call_id) = call_id.as_deref().and_then(|c| CorrelationValue::normalize(CorrelationKind::CallId, c)) {
        decoded.correlation_keys.insert(CorrelationKind::CallId, call_id);
    }
    if let Some(endpoint) = from.as_deref().and_then(|f| CorrelationValue::normalize(CorrelationKind::Endpoint, f)) {
        decoded.correlation_keys.insert(CorrelationKind::Endpoint, endpoint);
    }
    if let Some(code) = status_code {
        decoded.fields.insert("status_code".to_string(), FieldValue::Integer(i64::from(code)));
    }
    if let Some(cseq) = cseq {
        decoded.fields.insert("cseq".to_string(), FieldValue::Integer(i64::from(cseq)));
    }
    if let Some(to) = to {
        decoded.fields.insert("to".to_string(), FieldValue::Text(to));
    }

    Ok(decoded)
}

/// Value of a `Name: value` header among the line's words.
fn header_value<'a>(words: &[&'a str], name: &str) -> Option<&'a str> {
    let position = words.iter().position(|w| w.eq_ignore_ascii_case(name))?;
    words.get(position + 1).copied()
}

/// `<sip:alice@example.com>;tag=1928` → `sip:alice@example.com`
fn strip_uri(value: &str) -> String {
    let value = value.split(';').next().unwrap_or(value);
    value.trim_matches(|c| c == '<' || c == '>' || c == '"').to_string()
}
