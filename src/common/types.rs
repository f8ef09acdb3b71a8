//! Core data model shared by every stage of the pipeline.
//!
//! A raw line enters as a [`RawLineEvent`], a dialect turns it into a
//! [`DecodedLine`], and the pipeline stamps it into an immutable
//! [`DecodedMessage`] that is shared behind an `Arc` by the bus, the
//! correlation index and the KPI window.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use super::detail::MessageDetail;

/// Protocol stack tier a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Layer {
    Phy,
    Mac,
    Rlc,
    Pdcp,
    Rrc,
    Nas,
    Ngap,
    S1ap,
    Gtp,
    Sctp,
    Sip,
    Http,
    Pfcp,
    Other,
}

impl Layer {
    pub const ALL: [Layer; 14] = [
        Layer::Phy,
        Layer::Mac,
        Layer::Rlc,
        Layer::Pdcp,
        Layer::Rrc,
        Layer::Nas,
        Layer::Ngap,
        Layer::S1ap,
        Layer::Gtp,
        Layer::Sctp,
        Layer::Sip,
        Layer::Http,
        Layer::Pfcp,
        Layer::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::Phy => "PHY",
            Layer::Mac => "MAC",
            Layer::Rlc => "RLC",
            Layer::Pdcp => "PDCP",
            Layer::Rrc => "RRC",
            Layer::Nas => "NAS",
            Layer::Ngap => "NGAP",
            Layer::S1ap => "S1AP",
            Layer::Gtp => "GTP",
            Layer::Sctp => "SCTP",
            Layer::Sip => "SIP",
            Layer::Http => "HTTP",
            Layer::Pfcp => "PFCP",
            Layer::Other => "OTHER",
        }
    }

    /// Parse a layer tag as printed by network-function loggers.
    ///
    /// Tags may be space padded (`[PHY     ]`) and use vendor aliases
    /// (`GTPU`, `NR_PHY`, `5GMM`). Returns `None` for tags outside the
    /// known set so callers can decide whether that is `Other` or an error.
    pub fn from_tag(tag: &str) -> Option<Layer> {
        let normalized = tag.trim().to_ascii_uppercase();
        let normalized = normalized.strip_prefix("NR_").unwrap_or(&normalized);
        let layer = match normalized {
            "PHY" | "L1" => Layer::Phy,
            "MAC" => Layer::Mac,
            "RLC" => Layer::Rlc,
            "PDCP" | "SDAP" => Layer::Pdcp,
            "RRC" => Layer::Rrc,
            "NAS" | "5GMM" | "5GSM" | "EMM" | "ESM" => Layer::Nas,
            "NGAP" => Layer::Ngap,
            "S1AP" => Layer::S1ap,
            "GTP" | "GTPU" | "GTP-U" | "GTPC" | "GTP-C" => Layer::Gtp,
            "SCTP" => Layer::Sctp,
            "SIP" => Layer::Sip,
            "HTTP" | "SBI" => Layer::Http,
            "PFCP" => Layer::Pfcp,
            "OTHER" => Layer::Other,
            _ => return None,
        };
        Some(layer)
    }

    /// Radio access layers, where channel and direction tags are meaningful.
    pub fn is_ran(&self) -> bool {
        matches!(self, Layer::Phy | Layer::Mac | Layer::Rlc | Layer::Pdcp | Layer::Rrc)
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Message severity. Ordered so that `level >= Level::Warn` reads naturally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum Level {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl Level {
    /// Parse single-letter (`[I]`) and word (`WARNING`) severity tags.
    pub fn from_tag(tag: &str) -> Option<Level> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "D" | "DEBUG" | "T" | "TRACE" | "V" | "VERBOSE" => Some(Level::Debug),
            "I" | "INFO" | "N" | "NOTICE" => Some(Level::Info),
            "W" | "WARN" | "WARNING" => Some(Level::Warn),
            "E" | "ERR" | "ERROR" | "F" | "FATAL" | "C" | "CRIT" | "CRITICAL" => Some(Level::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Debug => write!(f, "DEBUG"),
            Level::Info => write!(f, "INFO"),
            Level::Warn => write!(f, "WARN"),
            Level::Error => write!(f, "ERROR"),
        }
    }
}

/// Link direction, seen from the network side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Ul,
    Dl,
    Both,
}

impl Direction {
    pub fn from_tag(tag: &str) -> Option<Direction> {
        match tag.trim().to_ascii_uppercase().as_str() {
            "UL" | "UPLINK" => Some(Direction::Ul),
            "DL" | "DOWNLINK" => Some(Direction::Dl),
            "BOTH" | "UL/DL" | "DL/UL" => Some(Direction::Both),
            _ => None,
        }
    }
}

/// Physical and logical channel tags that RAN stacks print.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Channel {
    Pdsch,
    Pusch,
    Pdcch,
    Pucch,
    Prach,
    Pbch,
    Ssb,
    Srs,
    Bcch,
    Pcch,
    Ccch,
    Dcch,
    Dtch,
}

impl Channel {
    pub fn from_name(name: &str) -> Option<Channel> {
        let channel = match name.trim().to_ascii_uppercase().as_str() {
            "PDSCH" => Channel::Pdsch,
            "PUSCH" => Channel::Pusch,
            "PDCCH" => Channel::Pdcch,
            "PUCCH" => Channel::Pucch,
            "PRACH" => Channel::Prach,
            "PBCH" => Channel::Pbch,
            "SSB" => Channel::Ssb,
            "SRS" => Channel::Srs,
            "BCCH" => Channel::Bcch,
            "PCCH" => Channel::Pcch,
            "CCCH" | "CCCH1" => Channel::Ccch,
            "DCCH" => Channel::Dcch,
            "DTCH" => Channel::Dtch,
            _ => return None,
        };
        Some(channel)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Pdsch => "PDSCH",
            Channel::Pusch => "PUSCH",
            Channel::Pdcch => "PDCCH",
            Channel::Pucch => "PUCCH",
            Channel::Prach => "PRACH",
            Channel::Pbch => "PBCH",
            Channel::Ssb => "SSB",
            Channel::Srs => "SRS",
            Channel::Bcch => "BCCH",
            Channel::Pcch => "PCCH",
            Channel::Ccch => "CCCH",
            Channel::Dcch => "DCCH",
            Channel::Dtch => "DTCH",
        }
    }

    /// Direction implied by the channel itself, if any.
    pub fn direction(&self) -> Option<Direction> {
        match self {
            Channel::Pdsch | Channel::Pdcch | Channel::Pbch | Channel::Ssb | Channel::Bcch | Channel::Pcch => Some(Direction::Dl),
            Channel::Pusch | Channel::Pucch | Channel::Prach | Channel::Srs => Some(Direction::Ul),
            Channel::Ccch | Channel::Dcch | Channel::Dtch => None,
        }
    }

    /// Semantic message carried by a physical channel (PDSCH carries DL-SCH, ...).
    pub fn carried_message(&self) -> Option<&'static str> {
        match self {
            Channel::Pdsch => Some("DL-SCH"),
            Channel::Pusch => Some("UL-SCH"),
            Channel::Prach => Some("RACH"),
            Channel::Pbch | Channel::Ssb => Some("BCH"),
            Channel::Pdcch => Some("DCI"),
            Channel::Pucch => Some("UCI"),
            _ => None,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A decoded information element.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
    /// Hexadecimal literal, kept with its canonical `0x..` spelling.
    Hex { value: u64, text: String },
    /// Number with a unit suffix, e.g. `135.5us` or `12Mbps`.
    Quantity { value: f64, unit: String },
    /// Bracketed range such as `[0,87)`.
    Range { start: i64, end: i64, start_inclusive: bool, end_inclusive: bool },
    Text(String),
}

impl FieldValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Integer(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Hex { value, .. } => Some(*value as f64),
            FieldValue::Quantity { value, .. } => Some(*value),
            FieldValue::Range { .. } | FieldValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(v) => Some(*v),
            FieldValue::Hex { value, .. } => i64::try_from(*value).ok(),
            _ => None,
        }
    }
}

/// Identifier families that tie messages of one procedure together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationKind {
    Rnti,
    Imsi,
    STmsi,
    CellId,
    UeId,
    RanUeNgapId,
    AmfUeNgapId,
    SessionId,
    Teid,
    Seid,
    CallId,
    Endpoint,
}

impl CorrelationKind {
    /// Map a field name used in log lines to a correlation kind.
    pub fn from_field_name(name: &str) -> Option<CorrelationKind> {
        let kind = match name.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "rnti" | "c-rnti" | "crnti" | "tc-rnti" | "ra-rnti" => CorrelationKind::Rnti,
            "imsi" | "supi" => CorrelationKind::Imsi,
            "s-tmsi" | "stmsi" | "5g-s-tmsi" | "tmsi" | "5g-tmsi" => CorrelationKind::STmsi,
            "pci" | "cell" | "cell-id" | "cellid" | "nci" | "eci" => CorrelationKind::CellId,
            "ue" | "ue-id" | "ueid" | "ue-index" | "du-ue-index" | "cu-ue-index" => CorrelationKind::UeId,
            "ran-ue-ngap-id" | "ran-ue-id" => CorrelationKind::RanUeNgapId,
            "amf-ue-ngap-id" | "amf-ue-id" => CorrelationKind::AmfUeNgapId,
            "psi" | "pdu-session" | "pdu-session-id" | "session" | "session-id" => CorrelationKind::SessionId,
            "teid" | "dl-teid" | "ul-teid" => CorrelationKind::Teid,
            "seid" | "cp-seid" | "up-seid" => CorrelationKind::Seid,
            "call-id" | "callid" => CorrelationKind::CallId,
            "endpoint" | "peer" | "from" | "to" => CorrelationKind::Endpoint,
            _ => return None,
        };
        Some(kind)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationKind::Rnti => "rnti",
            CorrelationKind::Imsi => "imsi",
            CorrelationKind::STmsi => "s_tmsi",
            CorrelationKind::CellId => "cell_id",
            CorrelationKind::UeId => "ue_id",
            CorrelationKind::RanUeNgapId => "ran_ue_ngap_id",
            CorrelationKind::AmfUeNgapId => "amf_ue_ngap_id",
            CorrelationKind::SessionId => "session_id",
            CorrelationKind::Teid => "teid",
            CorrelationKind::Seid => "seid",
            CorrelationKind::CallId => "call_id",
            CorrelationKind::Endpoint => "endpoint",
        }
    }

    /// Identifiers conventionally printed in hexadecimal.
    fn canonical_hex(&self) -> bool {
        matches!(
            self,
            CorrelationKind::Rnti | CorrelationKind::STmsi | CorrelationKind::Teid | CorrelationKind::Seid
        )
    }

    fn is_numeric(&self) -> bool {
        !matches!(self, CorrelationKind::CallId | CorrelationKind::Endpoint)
    }
}

impl fmt::Display for CorrelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical numeric + string form of an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct CorrelationValue {
    pub text: String,
    pub numeric: Option<u64>,
}

impl CorrelationValue {
    /// Normalize a raw identifier spelling.
    ///
    /// `0x4601`, `0X4601` and `17921` all become `{ text: "0x4601", numeric: 17921 }`
    /// for hex-conventional kinds; decimal kinds keep a decimal text form.
    /// Returns `None` when a numeric kind does not hold a number.
    pub fn normalize(kind: CorrelationKind, raw: &str) -> Option<CorrelationValue> {
        let raw = raw.trim().trim_matches(|c| c == '"' || c == '\'' || c == ',' || c == ';');
        if raw.is_empty() {
            return None;
        }
        if !kind.is_numeric() {
            return Some(CorrelationValue { text: raw.to_string(), numeric: None });
        }
        if kind == CorrelationKind::Imsi {
            let digits = raw
                .trim_start_matches("imsi-")
                .trim_start_matches("IMSI-")
                .trim_start_matches("supi-");
            if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
                return None;
            }
            return Some(CorrelationValue { text: digits.to_string(), numeric: digits.parse().ok() });
        }

        let numeric = parse_identifier_number(raw)?;
        let text = if kind.canonical_hex() { format!("{:#x}", numeric) } else { numeric.to_string() };
        Some(CorrelationValue { text, numeric: Some(numeric) })
    }
}

impl fmt::Display for CorrelationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_identifier_number(raw: &str) -> Option<u64> {
    if let Some(hex) = raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else {
        raw.parse().ok()
    }
}

/// One (kind, canonical value) pair, the key of the correlation index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CorrelationKey {
    pub kind: CorrelationKind,
    pub value: String,
}

impl CorrelationKey {
    pub fn new(kind: CorrelationKind, value: &CorrelationValue) -> Self {
        Self { kind, value: value.text.clone() }
    }

    /// Parse `rnti=0x4601` style text, normalizing the value.
    pub fn parse(text: &str) -> Option<CorrelationKey> {
        let (name, raw) = text.split_once('=')?;
        let kind = CorrelationKind::from_field_name(name)?;
        let value = CorrelationValue::normalize(kind, raw)?;
        Some(CorrelationKey::new(kind, &value))
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.kind, self.value)
    }
}

pub type CorrelationKeys = BTreeMap<CorrelationKind, CorrelationValue>;
pub type Fields = BTreeMap<String, FieldValue>;

/// A line as read from a source, before decoding.
#[derive(Debug, Clone, PartialEq)]
pub struct RawLineEvent {
    pub source_id: String,
    /// Dialect name used to pick a decoder.
    pub source_kind: String,
    pub received_at: DateTime<Utc>,
    pub text: String,
}

/// Whether a message went through its dialect successfully.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ParseStatus {
    Parsed,
    Unparseable { reason: String },
}

/// Dialect output: everything a decoded message carries except the
/// identity and audit fields the pipeline stamps on afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedLine {
    /// Timestamp found in the line; arrival time is used when absent.
    pub timestamp: Option<DateTime<Utc>>,
    pub layer: Layer,
    pub level: Level,
    pub channel: Option<Channel>,
    pub direction: Option<Direction>,
    pub message_type: String,
    pub correlation_keys: CorrelationKeys,
    pub fields: Fields,
    pub detail: MessageDetail,
}

impl DecodedLine {
    pub fn new(layer: Layer, level: Level, message_type: impl Into<String>, detail: MessageDetail) -> Self {
        Self {
            timestamp: None,
            layer,
            level,
            channel: None,
            direction: None,
            message_type: message_type.into(),
            correlation_keys: CorrelationKeys::new(),
            fields: Fields::new(),
            detail,
        }
    }
}

/// A fully decoded, immutable message. Shared as `Arc<DecodedMessage>`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedMessage {
    pub id: u64,
    pub source_id: String,
    pub timestamp: DateTime<Utc>,
    pub layer: Layer,
    pub level: Level,
    pub channel: Option<Channel>,
    pub direction: Option<Direction>,
    pub message_type: String,
    pub correlation_keys: CorrelationKeys,
    pub fields: Fields,
    pub raw: String,
    pub parse_status: ParseStatus,
    pub detail: MessageDetail,
}

impl DecodedMessage {
    /// Stamp a dialect result with its sequence id and audit data.
    pub fn from_decoded(id: u64, line: &RawLineEvent, decoded: DecodedLine) -> Self {
        Self {
            id,
            source_id: line.source_id.clone(),
            timestamp: decoded.timestamp.unwrap_or(line.received_at),
            layer: decoded.layer,
            level: decoded.level,
            channel: decoded.channel,
            direction: decoded.direction,
            message_type: decoded.message_type,
            correlation_keys: decoded.correlation_keys,
            fields: decoded.fields,
            raw: line.text.clone(),
            parse_status: ParseStatus::Parsed,
            detail: decoded.detail,
        }
    }

    /// Build the forensic record of a line no dialect could decode.
    pub fn unparseable(id: u64, line: &RawLineEvent, reason: impl fmt::Display) -> Self {
        Self {
            id,
            source_id: line.source_id.clone(),
            timestamp: line.received_at,
            layer: Layer::Other,
            level: Level::Info,
            channel: None,
            direction: None,
            message_type: "Unparseable".to_string(),
            correlation_keys: CorrelationKeys::new(),
            fields: Fields::new(),
            raw: line.text.clone(),
            parse_status: ParseStatus::Unparseable { reason: reason.to_string() },
            detail: MessageDetail::Unparsed,
        }
    }

    pub fn is_parsed(&self) -> bool {
        self.parse_status == ParseStatus::Parsed
    }

    pub fn correlation(&self, kind: CorrelationKind) -> Option<&CorrelationValue> {
        self.correlation_keys.get(&kind)
    }

    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// All correlation keys of this message, in kind order.
    pub fn keys(&self) -> impl Iterator<Item = CorrelationKey> + '_ {
        self.correlation_keys.iter().map(|(kind, value)| CorrelationKey::new(*kind, value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layer_tags_tolerate_padding_and_aliases() {
        assert_eq!(Layer::from_tag("PHY     "), Some(Layer::Phy));
        assert_eq!(Layer::from_tag("gtpu"), Some(Layer::Gtp));
        assert_eq!(Layer::from_tag("NR_RRC"), Some(Layer::Rrc));
        assert_eq!(Layer::from_tag("5GMM"), Some(Layer::Nas));
        assert_eq!(Layer::from_tag("FOO"), None);
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(Level::from_tag("I"), Some(Level::Info));
        assert_eq!(Level::from_tag("WARNING"), Some(Level::Warn));
        assert_eq!(Level::from_tag("fatal"), Some(Level::Error));
        assert_eq!(Level::from_tag("?"), None);
        assert!(Level::Error > Level::Warn);
        assert!(Level::Debug < Level::Info);
    }

    #[test]
    fn test_rnti_normalization_is_spelling_independent() {
        let a = CorrelationValue::normalize(CorrelationKind::Rnti, "0x4601").unwrap();
        let b = CorrelationValue::normalize(CorrelationKind::Rnti, "0X4601").unwrap();
        let c = CorrelationValue::normalize(CorrelationKind::Rnti, "17921").unwrap();
        assert_eq!(a, b);
        assert_eq!(a, c);
        assert_eq!(a.text, "0x4601");
        assert_eq!(a.numeric, Some(0x4601));
    }

    #[test]
    fn test_decimal_kinds_keep_decimal_text() {
        let pci = CorrelationValue::normalize(CorrelationKind::CellId, "0x1f").unwrap();
        assert_eq!(pci.text, "31");
        assert_eq!(pci.numeric, Some(31));
    }

    #[test]
    fn test_imsi_prefix_is_stripped() {
        let imsi = CorrelationValue::normalize(CorrelationKind::Imsi, "imsi-001010000000001").unwrap();
        assert_eq!(imsi.text, "001010000000001");
        assert_eq!(imsi.numeric, Some(1010000000001));
        assert!(CorrelationValue::normalize(CorrelationKind::Imsi, "imsi-abc").is_none());
    }

    #[test]
    fn test_correlation_key_parse() {
        let key = CorrelationKey::parse("rnti=17921").unwrap();
        assert_eq!(key.kind, CorrelationKind::Rnti);
        assert_eq!(key.value, "0x4601");
        assert_eq!(key.to_string(), "rnti=0x4601");
        assert!(CorrelationKey::parse("bogus=1").is_none());
        assert!(CorrelationKey::parse("rnti=zz").is_none());
    }

    #[test]
    fn test_channel_semantics() {
        let pdsch = Channel::from_name("pdsch").unwrap();
        assert_eq!(pdsch.direction(), Some(Direction::Dl));
        assert_eq!(pdsch.carried_message(), Some("DL-SCH"));
        assert_eq!(Channel::from_name("PRACH").unwrap().direction(), Some(Direction::Ul));
        assert!(Channel::from_name("XYZ").is_none());
    }
}
