//! Core network dialect.
//!
//! Core network functions print mostly free text, so classification is
//! coarse: the procedure is recognized by substring and identifiers are
//! pulled from `KEY[value]` and `key=value` tokens. The optional prefix is
//! the usual network-function log header:
//!
//! ```text
//! 10/23 18:00:01.123: [amf] INFO: [imsi-001010000000001] Registration complete (../src/amf/gmm-sm.c:123)
//! ```

use chrono::{DateTime, Datelike, NaiveDateTime, Utc};

use crate::common::detail::{CoreDetail, CoreProcedure, MessageDetail};
use crate::common::types::{CorrelationKind, CorrelationValue, DecodedLine, Layer, Level, RawLineEvent};

use super::tokenizer::{absorb_pair, bracket_fields, split_pair, split_tokens, take_bracket_tag};
use super::{Dialect, Unparseable};

pub struct CoreNetworkDialect;

impl Dialect for CoreNetworkDialect {
    fn decode(&self, line: &RawLineEvent) -> Result<DecodedLine, Unparseable> {
        parse_core_line(&line.text, line.received_at)
    }
}

/// Substring classifiers, most specific first. Needles are matched against
/// the lowercased line with spaces, dashes and underscores removed.
const CLASSIFIERS: &[(&str, CoreProcedure, Layer)] = &[
    ("initialuemessage", CoreProcedure::InitialUeMessage, Layer::Ngap),
    ("uecontextrelease", CoreProcedure::UeContextRelease, Layer::Ngap),
    ("ngsetup", CoreProcedure::NgSetup, Layer::Ngap),
    ("deregistration", CoreProcedure::Deregistration, Layer::Nas),
    ("registration", CoreProcedure::Registration, Layer::Nas),
    ("authentication", CoreProcedure::Authentication, Layer::Nas),
    ("securitymode", CoreProcedure::SecurityMode, Layer::Nas),
    ("pdusession", CoreProcedure::PduSession, Layer::Nas),
    ("servicerequest", CoreProcedure::ServiceRequest, Layer::Nas),
    ("pfcp", CoreProcedure::PfcpSession, Layer::Pfcp),
    ("s1setup", CoreProcedure::S1ap, Layer::S1ap),
    ("s1ap", CoreProcedure::S1ap, Layer::S1ap),
    ("gtp", CoreProcedure::GtpTunnel, Layer::Gtp),
    ("sctp", CoreProcedure::SctpAssociation, Layer::Sctp),
    ("sbi", CoreProcedure::Sbi, Layer::Http),
    ("http", CoreProcedure::Sbi, Layer::Http),
];

/// Message step words appended to the procedure name, most specific first.
const STEPS: &[(&str, &str)] = &[
    ("complete", "Complete"),
    ("accept", "Accept"),
    ("reject", "Reject"),
    ("failure", "Failure"),
    ("response", "Response"),
    ("command", "Command"),
    ("request", "Request"),
];

/// Parse one core network log line.
///
/// Lines carrying neither the log header nor a recognizable procedure are
/// reported as [`Unparseable::Unclassified`].
pub fn parse_core_line(text: &str, received_at: DateTime<Utc>) -> Result<DecodedLine, Unparseable> {
    let text = text.trim();
    if text.is_empty() {
        return Err(Unparseable::Empty);
    }

    let (timestamp, rest) = split_header_timestamp(text, received_at.year());
    let (network_function, rest) = match take_bracket_tag(rest) {
        Some((nf, remainder)) if is_network_function_tag(nf) => (Some(nf.to_ascii_lowercase()), remainder),
        _ => (None, rest),
    };
    let (level, body) = split_level(rest);
    let has_header = timestamp.is_some() || network_function.is_some() || level.is_some();

    let haystack: String = body
        .chars()
        .filter(|c| !matches!(c, ' ' | '-' | '_'))
        .map(|c| c.to_ascii_lowercase())
        .collect();

    let classified = CLASSIFIERS.iter().find(|(needle, _, _)| haystack.contains(needle));

    let (layer, message_type, procedure) = match classified {
        Some((needle, procedure, layer)) => {
            let after = haystack.find(needle).map(|pos| &haystack[pos + needle.len()..]).unwrap_or("");
            let step = STEPS.iter().find(|(word, _)| after.contains(word)).map(|(_, step)| *step).unwrap_or("");
            (*layer, format!("{}{}", procedure.as_str(), step), Some(*procedure))
        }
        None if has_header => (Layer::Other, "Log".to_string(), None),
        None => return Err(Unparseable::Unclassified),
    };

    let mut decoded = DecodedLine::new(
        layer,
        level.unwrap_or(Level::Info),
        message_type,
        MessageDetail::CoreNetwork(CoreDetail {
            network_function,
            procedure,
        }),
    );
    decoded.timestamp = timestamp;

    for (key, value) in bracket_fields(body) {
        if key.is_empty() {
            if let Some(imsi) = CorrelationValue::normalize(CorrelationKind::Imsi, value) {
                decoded.correlation_keys.entry(CorrelationKind::Imsi).or_insert(imsi);
            }
        } else {
            absorb_pair(key, value, &mut decoded.correlation_keys, &mut decoded.fields);
        }
    }
    for token in split_tokens(body) {
        if let Some((key, value)) = split_pair(token) {
            absorb_pair(key, value, &mut decoded.correlation_keys, &mut decoded.fields);
        }
    }

    Ok(decoded)
}

/// Split off a `MM/DD HH:MM:SS.mmm:` header. The year comes from the arrival time.
///
/// The header carries no zone and is read as UTC. Network functions logging
/// in local time are therefore shifted by the host's UTC offset relative to
/// arrival-stamped messages; run them with `TZ=UTC` when mixing dialects in
/// a time-based KPI window.
fn split_header_timestamp(text: &str, year: i32) -> (Option<DateTime<Utc>>, &str) {
    let bytes = text.as_bytes();
    if bytes.len() < 16 || bytes[2] != b'/' || bytes[5] != b' ' {
        return (None, text);
    }
    let Some(end) = text.get(14..).and_then(|tail| tail.find(": ")).map(|p| p + 14) else {
        return (None, text);
    };

    let stamp = format!("{} {}", year, &text[..end]);
    match NaiveDateTime::parse_from_str(&stamp, "%Y %m/%d %H:%M:%S%.f") {
        Ok(naive) => (Some(naive.and_utc()), &text[end + 2..]),
        Err(_) => (None, text),
    }
}

fn is_network_function_tag(tag: &str) -> bool {
    !tag.is_empty() && tag.len() <= 8 && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Split off a `LEVEL:` word.
fn split_level(text: &str) -> (Option<Level>, &str) {
    let trimmed = text.trim_start();
    match trimmed.split_once(": ") {
        Some((word, rest)) if !word.contains(' ') => match Level::from_tag(word) {
            Some(level) => (Some(level), rest),
            None => (None, trimmed),
        },
        _ => (None, trimmed),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Timelike};

    fn arrival() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 23, 18, 0, 0).unwrap()
    }

    #[test]
    fn test_open5gs_style_line() {
        let line = "10/23 18:00:01.123: [amf] INFO: [imsi-001010000000001] Registration complete (../src/amf/gmm-sm.c:123)";
        let decoded = parse_core_line(line, arrival()).unwrap();

        assert_eq!(decoded.layer, Layer::Nas);
        assert_eq!(decoded.level, Level::Info);
        assert_eq!(decoded.message_type, "RegistrationComplete");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::Imsi].text, "001010000000001");
        let ts = decoded.timestamp.unwrap();
        assert_eq!(ts.year(), 2025);
        assert_eq!(ts.second(), 1);
        match decoded.detail {
            MessageDetail::CoreNetwork(detail) => {
                assert_eq!(detail.network_function.as_deref(), Some("amf"));
                assert_eq!(detail.procedure, Some(CoreProcedure::Registration));
            }
            other => panic!("Expected core detail, got {:?}", other),
        }
    }

    #[test]
    fn test_ngap_identifiers() {
        let line = "[amf] DEBUG: InitialUEMessage RAN_UE_NGAP_ID[1] AMF_UE_NGAP_ID[2] TAC[1]";
        let decoded = parse_core_line(line, arrival()).unwrap();
        assert_eq!(decoded.layer, Layer::Ngap);
        assert_eq!(decoded.level, Level::Debug);
        assert_eq!(decoded.message_type, "InitialUEMessage");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::RanUeNgapId].text, "1");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::AmfUeNgapId].text, "2");
        assert!(decoded.fields.contains_key("tac"));
    }

    #[test]
    fn test_pfcp_and_teid() {
        let line = "[smf] WARNING: PFCP session establishment failure SEID[0x1f] teid=0x00000001";
        let decoded = parse_core_line(line, arrival()).unwrap();
        assert_eq!(decoded.layer, Layer::Pfcp);
        assert_eq!(decoded.level, Level::Warn);
        assert_eq!(decoded.message_type, "PFCPSessionFailure");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::Seid].text, "0x1f");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::Teid].text, "0x1");
    }

    #[test]
    fn test_deregistration_is_not_registration() {
        let decoded = parse_core_line("UE Deregistration request received", arrival()).unwrap();
        assert_eq!(decoded.message_type, "DeregistrationRequest");
        assert!(decoded.timestamp.is_none());
    }

    #[test]
    fn test_header_without_procedure_is_generic_log() {
        let decoded = parse_core_line("[upf] INFO: UPF initialized", arrival()).unwrap();
        assert_eq!(decoded.layer, Layer::Other);
        assert_eq!(decoded.message_type, "Log");
    }

    #[test]
    fn test_header_time_is_read_as_utc() {
        let decoded = parse_core_line("10/23 18:00:01.500: [smf] INFO: PDU Session establishment accept", arrival()).unwrap();
        let timestamp = decoded.timestamp.unwrap();
        assert_eq!(timestamp, Utc.with_ymd_and_hms(2025, 10, 23, 18, 0, 1).unwrap() + chrono::Duration::milliseconds(500));
        assert_eq!(decoded.message_type, "PDUSessionAccept");
    }

    #[test]
    fn test_multibyte_text_near_header() {
        let decoded = parse_core_line("10/23 1234567é: Registration request", arrival()).unwrap();
        assert_eq!(decoded.message_type, "RegistrationRequest");
        assert!(decoded.timestamp.is_none());

        let decoded = parse_core_line("10/23 18:00:01.123: [amf] INFO: [imsi-001010000000001] Registration reject (cause: «illegal UE»)", arrival()).unwrap();
        assert_eq!(decoded.message_type, "RegistrationReject");
        assert_eq!(decoded.correlation_keys[&CorrelationKind::Imsi].text, "001010000000001");
    }

    #[test]
    fn test_unclassified_free_text() {
        assert_eq!(parse_core_line("hello world", arrival()), Err(Unparseable::Unclassified));
        assert_eq!(parse_core_line("", arrival()), Err(Unparseable::Empty));
    }
}
