//! Dialect-specific payloads carried next to the common message envelope.

use serde::Serialize;
use std::fmt;

/// Per-dialect part of a decoded message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "dialect", rename_all = "snake_case")]
pub enum MessageDetail {
    Ran(RanDetail),
    CoreNetwork(CoreDetail),
    Sip(SipDetail),
    /// Produced by a dialect registered at runtime.
    Custom { name: String },
    /// Placeholder for forensic records of unparseable lines.
    Unparsed,
}

/// RAN stack timing and the layer tag exactly as printed.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RanDetail {
    pub layer_tag: String,
    /// System frame number, when the time tag is `sfn.slot`.
    pub sfn: Option<u32>,
    pub slot: Option<u32>,
}

/// Coarse classification of a core-network log line.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct CoreDetail {
    /// Network function that printed the line (`amf`, `smf`, `upf`, ...).
    pub network_function: Option<String>,
    pub procedure: Option<CoreProcedure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoreProcedure {
    Registration,
    Deregistration,
    Authentication,
    SecurityMode,
    PduSession,
    ServiceRequest,
    NgSetup,
    InitialUeMessage,
    UeContextRelease,
    PfcpSession,
    GtpTunnel,
    SctpAssociation,
    Sbi,
    S1ap,
}

impl CoreProcedure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CoreProcedure::Registration => "Registration",
            CoreProcedure::Deregistration => "Deregistration",
            CoreProcedure::Authentication => "Authentication",
            CoreProcedure::SecurityMode => "SecurityMode",
            CoreProcedure::PduSession => "PDUSession",
            CoreProcedure::ServiceRequest => "ServiceRequest",
            CoreProcedure::NgSetup => "NGSetup",
            CoreProcedure::InitialUeMessage => "InitialUEMessage",
            CoreProcedure::UeContextRelease => "UEContextRelease",
            CoreProcedure::PfcpSession => "PFCPSession",
            CoreProcedure::GtpTunnel => "GTPTunnel",
            CoreProcedure::SctpAssociation => "SCTPAssociation",
            CoreProcedure::Sbi => "SBI",
            CoreProcedure::S1ap => "S1AP",
        }
    }
}

impl fmt::Display for CoreProcedure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SIP request or response summary.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct SipDetail {
    pub method: Option<SipMethod>,
    pub status_code: Option<u16>,
    pub call_id: Option<String>,
    pub cseq: Option<u32>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SipMethod {
    Invite,
    Register,
    Bye,
    Ack,
    Cancel,
    Options,
    Prack,
    Update,
    Subscribe,
    Notify,
    Message,
    Info,
    Refer,
    Publish,
}

impl SipMethod {
    pub const ALL: [SipMethod; 14] = [
        SipMethod::Invite,
        SipMethod::Register,
        SipMethod::Bye,
        SipMethod::Ack,
        SipMethod::Cancel,
        SipMethod::Options,
        SipMethod::Prack,
        SipMethod::Update,
        SipMethod::Subscribe,
        SipMethod::Notify,
        SipMethod::Message,
        SipMethod::Info,
        SipMethod::Refer,
        SipMethod::Publish,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SipMethod::Invite => "INVITE",
            SipMethod::Register => "REGISTER",
            SipMethod::Bye => "BYE",
            SipMethod::Ack => "ACK",
            SipMethod::Cancel => "CANCEL",
            SipMethod::Options => "OPTIONS",
            SipMethod::Prack => "PRACK",
            SipMethod::Update => "UPDATE",
            SipMethod::Subscribe => "SUBSCRIBE",
            SipMethod::Notify => "NOTIFY",
            SipMethod::Message => "MESSAGE",
            SipMethod::Info => "INFO",
            SipMethod::Refer => "REFER",
            SipMethod::Publish => "PUBLISH",
        }
    }

    /// Exact, case-sensitive method token match.
    pub fn from_token(token: &str) -> Option<SipMethod> {
        SipMethod::ALL.into_iter().find(|m| m.as_str() == token)
    }
}

impl fmt::Display for SipMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
