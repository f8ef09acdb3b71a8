//! Synthetic source for demos and tests.
//!
//! Produces lines of the dialect named by the source kind at a configured
//! rate, using a seeded RNG so runs are reproducible. Chunks are cut at
//! random byte offsets to exercise line reassembly, and a process loss with
//! a number of failed reconnects can be scripted to exercise health
//! handling. A simulated source only ever feeds its own source id; it is
//! never blended into a live source.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use std::time::Instant;

use crate::common::config::SimulatedConfig;

use super::source::{LineSource, ReadOutcome, SourceError};

/// Lines generated per poll at most, so a long pause does not produce one huge burst.
const MAX_LINES_PER_POLL: u64 = 256;

const UE_RNTIS: [u16; 8] = [0x4601, 0x4602, 0x4603, 0x4604, 0x4605, 0x4606, 0x4607, 0x4608];
const MODULATIONS: [&str; 4] = ["QPSK", "16QAM", "64QAM", "256QAM"];

pub struct SimulatedSource {
    kind: String,
    config: SimulatedConfig,
    rng: StdRng,
    connected: bool,
    /// When the current connection started; drives the rate.
    connected_at: Option<Instant>,
    lines_this_connection: u64,
    lines_total: u64,
    failure_fired: bool,
    failed_reconnects: u32,
    /// Bytes cut off the end of the previous chunk.
    carry: Vec<u8>,
    sfn: u32,
    slot: u32,
}

impl SimulatedSource {
    pub fn new(kind: &str, config: &SimulatedConfig) -> Self {
        let seed = config.seed.unwrap_or(0x5EED);
        Self {
            kind: kind.to_string(),
            config: config.clone(),
            rng: StdRng::seed_from_u64(seed),
            connected: false,
            connected_at: None,
            lines_this_connection: 0,
            lines_total: 0,
            failure_fired: false,
            failed_reconnects: 0,
            carry: Vec::new(),
            sfn: 0,
            slot: 0,
        }
    }

    /// Total lines produced so far, across reconnects.
    pub fn lines_total(&self) -> u64 {
        self.lines_total
    }

    fn lines_due(&self) -> u64 {
        let Some(connected_at) = self.connected_at else {
            return 0;
        };
        let elapsed = connected_at.elapsed().as_secs_f64();
        let expected = (elapsed * f64::from(self.config.lines_per_second)) as u64;
        expected.saturating_sub(self.lines_this_connection).min(MAX_LINES_PER_POLL)
    }

    fn lines_allowed(&self, due: u64) -> u64 {
        let mut allowed = due;
        if let Some(total) = self.config.total_lines {
            allowed = allowed.min(total.saturating_sub(self.lines_total));
        }
        if let (Some(fail_after), false) = (self.config.fail_after_lines, self.failure_fired) {
            allowed = allowed.min(fail_after.saturating_sub(self.lines_total));
        }
        allowed
    }

    fn gaussian(&mut self, mean: f64, std_dev: f64) -> f64 {
        let z: f64 = self.rng.sample(StandardNormal);
        mean + std_dev * z
    }

    fn next_line(&mut self) -> String {
        self.slot += 1;
        if self.slot >= 20 {
            self.slot = 0;
            self.sfn = (self.sfn + 1) % 1024;
        }

        match self.kind.as_str() {
            "core" => self.core_line(),
            "sip" => self.sip_line(),
            _ => self.ran_line(),
        }
    }

    fn ran_line(&mut self) -> String {
        let rnti = UE_RNTIS[self.rng.gen_range(0..UE_RNTIS.len())];
        let (sfn, slot) = (self.sfn, self.slot);
        let roll = self.rng.gen_range(0..100);

        match roll {
            0..=39 => {
                let prb_end = self.rng.gen_range(8..=106);
                let modulation = MODULATIONS[self.rng.gen_range(0..MODULATIONS.len())];
                let tbs = self.rng.gen_range(100..=8000);
                let t = self.gaussian(135.0, 20.0).max(5.0);
                format!(
                    "[PHY] [I] [{}.{}] PDSCH: rnti={:#06x} h_id={} k1=4 prb=[0,{}) symb=[1,14) mod={} rv=0 tbs={} t={:.1}us",
                    sfn,
                    slot,
                    rnti,
                    self.rng.gen_range(0..16),
                    prb_end,
                    modulation,
                    tbs,
                    t
                )
            }
            40..=64 => {
                let snr = self.gaussian(18.0, 4.0);
                let tbs = self.rng.gen_range(100..=4000);
                let t = self.gaussian(160.0, 25.0).max(5.0);
                format!(
                    "[PHY] [I] [{}.{}] PUSCH: rnti={:#06x} prb=[0,{}) mod=QPSK tbs={} snr={:.1}dB t={:.1}us",
                    sfn,
                    slot,
                    rnti,
                    self.rng.gen_range(4..=52),
                    tbs,
                    snr,
                    t
                )
            }
            65..=84 => {
                let dl = self.gaussian(45.0, 15.0).max(0.0);
                let ul = self.gaussian(8.0, 3.0).max(0.0);
                format!(
                    "[MAC] [I] [{}.{}] Metrics: rnti={:#06x} ue={} dl_brate={:.1}Mbps ul_brate={:.1}Mbps",
                    sfn,
                    slot,
                    rnti,
                    rnti - 0x4601,
                    dl,
                    ul
                )
            }
            85..=92 => {
                let message = ["RRCSetupRequest", "RRCSetup", "RRCSetupComplete", "RRCReconfiguration"]
                    [self.rng.gen_range(0..4)];
                let dir = if message == "RRCSetupRequest" || message == "RRCSetupComplete" { "UL" } else { "DL" };
                format!("[RRC] [I] [{}.{}] {} {}: rnti={:#06x} pci=1", sfn, slot, dir, message, rnti)
            }
            93..=97 => format!("[MAC] [W] [{}.{}] HARQ-Retx: rnti={:#06x} rv=2 retx=3", sfn, slot, rnti),
            _ => format!("[PHY] [E] [{}.{}] CRC-KO: rnti={:#06x} snr={:.1}dB", sfn, slot, rnti, self.gaussian(-2.0, 2.0)),
        }
    }

    fn core_line(&mut self) -> String {
        let ue = self.rng.gen_range(1..=8);
        let imsi = format!("imsi-00101000000000{}", ue);
        let now = chrono::Utc::now().format("%m/%d %H:%M:%S%.3f");
        match self.rng.gen_range(0..6) {
            0 => format!("{}: [amf] INFO: InitialUEMessage RAN_UE_NGAP_ID[{}] AMF_UE_NGAP_ID[{}]", now, ue, ue + 100),
            1 => format!("{}: [amf] INFO: [{}] Registration request", now, imsi),
            2 => format!("{}: [amf] INFO: [{}] Authentication response", now, imsi),
            3 => format!("{}: [amf] INFO: [{}] Registration complete", now, imsi),
            4 => format!("{}: [smf] INFO: [{}] PDU Session establishment accept PSI[1] TEID[{:#x}]", now, imsi, ue * 16),
            _ => format!("{}: [smf] WARNING: PFCP session report SEID[{:#x}] latency={}ms", now, ue, self.rng.gen_range(1..40)),
        }
    }

    fn sip_line(&mut self) -> String {
        let call = self.rng.gen_range(1000..1016);
        let cseq = self.rng.gen_range(1..5);
        match self.rng.gen_range(0..5) {
            0 => format!(
                "INVITE sip:bob@ims.example.com SIP/2.0 Call-ID: call-{} CSeq: {} INVITE From: <sip:alice@ims.example.com>;tag={}",
                call, cseq, call
            ),
            1 => format!("SIP/2.0 180 Ringing Call-ID: call-{} CSeq: {} INVITE", call, cseq),
            2 => format!("SIP/2.0 200 OK Call-ID: call-{} CSeq: {} INVITE", call, cseq),
            3 => format!("BYE sip:alice@ims.example.com SIP/2.0 Call-ID: call-{} CSeq: {} BYE", call, cseq + 1),
            _ => format!("SIP/2.0 486 Busy Here Call-ID: call-{} CSeq: {} INVITE", call, cseq),
        }
    }
}

impl LineSource for SimulatedSource {
    fn connect(&mut self) -> Result<(), SourceError> {
        if self.failure_fired && self.failed_reconnects < self.config.reconnect_failures {
            self.failed_reconnects += 1;
            return Err(SourceError::Simulated(format!(
                "reconnect {} of {} refused",
                self.failed_reconnects, self.config.reconnect_failures
            )));
        }

        self.connected = true;
        self.connected_at = Some(Instant::now());
        self.lines_this_connection = 0;
        self.carry.clear();
        Ok(())
    }

    fn poll_chunk(&mut self) -> ReadOutcome {
        if !self.connected {
            return ReadOutcome::Lost("not connected".to_string());
        }

        let allowed = self.lines_allowed(self.lines_due());
        let mut chunk = std::mem::take(&mut self.carry);
        for _ in 0..allowed {
            chunk.extend_from_slice(self.next_line().as_bytes());
            chunk.push(b'\n');
        }
        self.lines_this_connection += allowed;
        self.lines_total += allowed;

        if !chunk.is_empty() {
            // Hold back a random tail so the consumer sees partial writes.
            let cut = self.rng.gen_range(0..=chunk.len());
            self.carry = chunk.split_off(cut);
            if !chunk.is_empty() {
                return ReadOutcome::Data(chunk);
            }
        }

        let pending_carry = !self.carry.is_empty();
        if let (Some(fail_after), false) = (self.config.fail_after_lines, self.failure_fired) {
            if self.lines_total >= fail_after && !pending_carry {
                self.failure_fired = true;
                return ReadOutcome::Lost(format!("simulated process exit after {} lines", self.lines_total));
            }
        }
        if let Some(total) = self.config.total_lines {
            if self.lines_total >= total && !pending_carry {
                return ReadOutcome::Finished;
            }
        }
        if pending_carry && allowed == 0 {
            return ReadOutcome::Data(std::mem::take(&mut self.carry));
        }

        ReadOutcome::Idle
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.connected_at = None;
    }

    fn describe(&self) -> String {
        format!("simulated {} source at {} lines/s", self.kind, self.config.lines_per_second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::line_buffer::LineBuffer;
    use crate::decoder::DecoderRegistry;
    use crate::common::types::RawLineEvent;

    fn config(total: Option<u64>, fail_after: Option<u64>, reconnect_failures: u32) -> SimulatedConfig {
        SimulatedConfig {
            lines_per_second: 100_000,
            total_lines: total,
            seed: Some(42),
            fail_after_lines: fail_after,
            reconnect_failures,
        }
    }

    /// Poll until a non-data outcome, collecting whole lines.
    fn collect(source: &mut SimulatedSource) -> (Vec<String>, ReadOutcome) {
        let mut buffer = LineBuffer::new(4096);
        let mut lines = Vec::new();
        loop {
            match source.poll_chunk() {
                ReadOutcome::Data(bytes) => lines.extend(buffer.push(&bytes)),
                ReadOutcome::Idle => std::thread::sleep(std::time::Duration::from_millis(1)),
                other => {
                    lines.extend(buffer.finish());
                    return (lines, other);
                }
            }
        }
    }

    #[test]
    fn test_finite_run_produces_exact_line_count() {
        let mut source = SimulatedSource::new("ran", &config(Some(500), None, 0));
        source.connect().unwrap();
        let (lines, outcome) = collect(&mut source);
        assert_eq!(outcome, ReadOutcome::Finished);
        assert_eq!(lines.len(), 500);
    }

    #[test]
    fn test_generated_lines_decode() {
        let registry = DecoderRegistry::with_builtin_dialects();
        for kind in ["ran", "core", "sip"] {
            let mut source = SimulatedSource::new(kind, &config(Some(200), None, 0));
            source.connect().unwrap();
            let (lines, _) = collect(&mut source);
            for text in lines {
                let raw = RawLineEvent {
                    source_id: "sim".to_string(),
                    source_kind: kind.to_string(),
                    received_at: chrono::Utc::now(),
                    text: text.clone(),
                };
                assert!(registry.decode(&raw).is_ok(), "{} line failed to decode: {}", kind, text);
            }
        }
    }

    #[test]
    fn test_scripted_loss_and_refused_reconnects() {
        let mut source = SimulatedSource::new("ran", &config(None, Some(50), 2));
        source.connect().unwrap();
        let (lines, outcome) = collect(&mut source);
        assert_eq!(lines.len(), 50);
        assert!(matches!(outcome, ReadOutcome::Lost(_)));

        source.disconnect();
        assert!(matches!(source.connect(), Err(SourceError::Simulated(_))));
        assert!(matches!(source.connect(), Err(SourceError::Simulated(_))));
        assert!(source.connect().is_ok());
        assert_eq!(source.lines_total(), 50);
    }

    #[test]
    fn test_same_seed_same_lines() {
        let mut a = SimulatedSource::new("sip", &config(Some(50), None, 0));
        let mut b = SimulatedSource::new("sip", &config(Some(50), None, 0));
        a.connect().unwrap();
        b.connect().unwrap();
        assert_eq!(collect(&mut a).0, collect(&mut b).0);
    }
}
