//! Collector task: connect, pump lines, reconnect with backoff.

use chrono::Utc;
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use std::sync::Arc;

use crate::common::config::CollectorConfig;
use crate::common::types::RawLineEvent;

use super::health::{HealthRegistry, HealthStatus};
use super::line_buffer::LineBuffer;
use super::source::{LineSource, ReadOutcome};
use super::{MAX_SOURCES, RawLineChannel};

/// Raised to stop one collector.
pub type StopSignal = Signal<CriticalSectionRawMutex, ()>;

/// Exponential reconnect backoff with a ceiling and a retry limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
    /// Consecutive failures after which the source is marked Unhealthy.
    pub max_retries: u32,
}

impl BackoffPolicy {
    pub fn from_config(config: &CollectorConfig) -> Self {
        Self {
            initial: Duration::from_millis(config.initial_backoff_ms),
            max: Duration::from_millis(config.max_backoff_ms),
            max_retries: config.max_retries,
        }
    }

    /// Delay before retry number `attempt` (0-based): `initial * 2^attempt`, capped at `max`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let ticks = self.initial.as_ticks().saturating_mul(factor);
        Duration::from_ticks(ticks.min(self.max.as_ticks()))
    }
}

/// How one connected session ended.
enum SessionEnd {
    Finished,
    Stopped,
    Lost(String),
}

/// Everything one collector needs; consumed by [`SourceCollector::run`].
pub struct SourceCollector {
    source_id: String,
    source_kind: String,
    source: Box<dyn LineSource>,
    line_buffer: LineBuffer,
    backoff: BackoffPolicy,
    poll_interval: Duration,
    health: HealthRegistry,
}

impl SourceCollector {
    pub fn new(
        source_id: &str,
        source_kind: &str,
        source: Box<dyn LineSource>,
        config: &CollectorConfig,
        health: HealthRegistry,
    ) -> Self {
        Self {
            source_id: source_id.to_string(),
            source_kind: source_kind.to_string(),
            source,
            line_buffer: LineBuffer::new(config.max_line_length),
            backoff: BackoffPolicy::from_config(config),
            poll_interval: config.poll_interval(),
            health,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Collect until the source finishes, `stop` is raised or the retry
    /// limit is exceeded. Returns the final health status.
    ///
    /// Connect failures and lost connections both count as consecutive
    /// failures; a successful connect resets the count.
    pub async fn run(mut self, lines: &RawLineChannel, stop: &StopSignal) -> HealthStatus {
        log::info!("Collector '{}' started on {}", self.source_id, self.source.describe());

        loop {
            if stop.signaled() {
                return self.finish(HealthStatus::Stopped);
            }

            let reason = match self.source.connect() {
                Ok(()) => {
                    self.health.set_status(&self.source_id, HealthStatus::Healthy, None);
                    let end = self.pump(lines, stop).await;
                    self.source.disconnect();
                    if !self.flush(lines, stop).await {
                        return self.finish(HealthStatus::Stopped);
                    }
                    match end {
                        SessionEnd::Finished => {
                            log::info!("Source '{}' finished", self.source_id);
                            return self.finish(HealthStatus::Stopped);
                        }
                        SessionEnd::Stopped => return self.finish(HealthStatus::Stopped),
                        SessionEnd::Lost(reason) => reason,
                    }
                }
                Err(e) => e.to_string(),
            };

            let failures = self.health.record_failure(&self.source_id, &reason);
            if failures >= self.backoff.max_retries {
                self.health.set_status(
                    &self.source_id,
                    HealthStatus::Unhealthy,
                    Some(format!("{} consecutive failures, last: {}", failures, reason)),
                );
                return HealthStatus::Unhealthy;
            }

            self.health
                .set_status(&self.source_id, HealthStatus::Reconnecting, Some(reason.clone()));
            self.health.record_reconnect_attempt(&self.source_id);
            let delay = self.backoff.delay(failures.saturating_sub(1));
            log::warn!(
                "Source '{}': retry {}/{} in {} ms ({})",
                self.source_id,
                failures,
                self.backoff.max_retries,
                delay.as_millis(),
                reason
            );

            if let Either::Second(_) = select(Timer::after(delay), stop.wait()).await {
                return self.finish(HealthStatus::Stopped);
            }
        }
    }

    async fn pump(&mut self, lines: &RawLineChannel, stop: &StopSignal) -> SessionEnd {
        loop {
            if stop.signaled() {
                return SessionEnd::Stopped;
            }

            match self.source.poll_chunk() {
                ReadOutcome::Data(bytes) => {
                    let complete = self.line_buffer.push(&bytes);
                    if !self.emit(complete, lines, stop).await {
                        return SessionEnd::Stopped;
                    }
                }
                ReadOutcome::Idle => {
                    if let Either::Second(_) = select(Timer::after(self.poll_interval), stop.wait()).await {
                        return SessionEnd::Stopped;
                    }
                }
                ReadOutcome::Finished => return SessionEnd::Finished,
                ReadOutcome::Lost(reason) => return SessionEnd::Lost(reason),
            }
        }
    }

    /// Send lines in order, waiting for channel room. Returns `false` if stopped while waiting.
    async fn emit(&mut self, complete: Vec<String>, lines: &RawLineChannel, stop: &StopSignal) -> bool {
        let count = complete.len() as u64;
        for text in complete {
            let event = RawLineEvent {
                source_id: self.source_id.clone(),
                source_kind: self.source_kind.clone(),
                received_at: Utc::now(),
                text,
            };
            if let Either::Second(_) = select(lines.send(event), stop.wait()).await {
                return false;
            }
        }
        self.health.add_lines(&self.source_id, count);
        true
    }

    /// Emit the partial line left by a closed connection, waiting for
    /// channel room like any other line. Returns `false` if stopped while waiting.
    async fn flush(&mut self, lines: &RawLineChannel, stop: &StopSignal) -> bool {
        match self.line_buffer.finish() {
            Some(text) => self.emit(vec![text], lines, stop).await,
            None => true,
        }
    }

    fn finish(&mut self, status: HealthStatus) -> HealthStatus {
        self.source.disconnect();
        self.health.set_status(&self.source_id, status, None);
        status
    }
}

/// Runs one source collector on the executor.
///
/// # Parameters
///
/// * `collector` - The configured collector
/// * `lines` - Raw line channel towards the decoder
/// * `stop` - Raised by the engine to stop this source
#[embassy_executor::task(pool_size = MAX_SOURCES)]
pub async fn collector_task(collector: SourceCollector, lines: Arc<RawLineChannel>, stop: Arc<StopSignal>) {
    let source_id = collector.source_id().to_string();
    let status = collector.run(&lines, &stop).await;
    log::info!("Collector '{}' exited: {}", source_id, status);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{RAW_LINE_CHANNEL_SIZE, RawLineChannel};
    use crate::collector::source::SourceError;
    use embassy_futures::join::join;
    use std::collections::VecDeque;

    /// Connect results and poll outcomes played back in order.
    struct ScriptedSource {
        connects: VecDeque<Result<(), SourceError>>,
        polls: VecDeque<ReadOutcome>,
    }

    impl ScriptedSource {
        fn new(connects: Vec<Result<(), SourceError>>, polls: Vec<ReadOutcome>) -> Self {
            Self {
                connects: connects.into(),
                polls: polls.into(),
            }
        }
    }

    impl LineSource for ScriptedSource {
        fn connect(&mut self) -> Result<(), SourceError> {
            self.connects
                .pop_front()
                .unwrap_or_else(|| Err(SourceError::Spawn("script exhausted".to_string())))
        }

        fn poll_chunk(&mut self) -> ReadOutcome {
            self.polls.pop_front().unwrap_or(ReadOutcome::Finished)
        }

        fn disconnect(&mut self) {}

        fn describe(&self) -> String {
            "scripted".to_string()
        }
    }

    fn config(max_retries: u32) -> CollectorConfig {
        CollectorConfig {
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
            max_retries,
            poll_interval_ms: 1,
            max_line_length: 1024,
        }
    }

    fn received(channel: &RawLineChannel) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(event) = channel.try_receive() {
            lines.push(event.text);
        }
        lines
    }

    fn path(health: &HealthRegistry, id: &str) -> Vec<HealthStatus> {
        health.get(id).unwrap().transitions.iter().map(|t| t.to).collect()
    }

    fn lost() -> ReadOutcome {
        ReadOutcome::Lost("process exited".to_string())
    }

    fn data(bytes: &[u8]) -> ReadOutcome {
        ReadOutcome::Data(bytes.to_vec())
    }

    #[test]
    fn test_backoff_doubles_up_to_ceiling() {
        let policy = BackoffPolicy::from_config(&CollectorConfig::default());
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
        assert_eq!(policy.delay(6), Duration::from_millis(5000));
        assert_eq!(policy.delay(80), Duration::from_millis(5000));
    }

    #[test]
    fn test_lost_process_recovers() {
        let health = HealthRegistry::new();
        health.register("gnb", "ran");
        let source = ScriptedSource::new(
            vec![Ok(()), Err(SourceError::Spawn("busy".to_string())), Ok(())],
            vec![data(b"[PHY] [I] [1.0] PDSCH: rnti=1\n[MAC] [I] [1.0] BS"), lost(), data(b"[MAC] [I] [2.0] BSR: ue=1\n")],
        );
        let collector = SourceCollector::new("gnb", "ran", Box::new(source), &config(5), health.clone());
        let channel = RawLineChannel::new();
        let stop = StopSignal::new();

        let status = embassy_futures::block_on(collector.run(&channel, &stop));

        assert_eq!(status, HealthStatus::Stopped);
        assert_eq!(
            path(&health, "gnb"),
            vec![
                HealthStatus::Healthy,
                HealthStatus::Reconnecting,
                HealthStatus::Healthy,
                HealthStatus::Stopped
            ]
        );
        // The partial line of the lost session is flushed; nothing is invented during the gap.
        assert_eq!(
            received(&channel),
            vec!["[PHY] [I] [1.0] PDSCH: rnti=1", "[MAC] [I] [1.0] BS", "[MAC] [I] [2.0] BSR: ue=1"]
        );
        let report = health.get("gnb").unwrap();
        assert_eq!(report.lines_emitted, 3);
        assert_eq!(report.reconnect_attempts, 2);
    }

    #[test]
    fn test_retry_ceiling_marks_unhealthy() {
        let health = HealthRegistry::new();
        health.register("core", "core");
        let refused = || Err(SourceError::Spawn("refused".to_string()));
        let source = ScriptedSource::new(vec![Ok(()), refused(), refused()], vec![data(b"one\n"), lost()]);
        let collector = SourceCollector::new("core", "core", Box::new(source), &config(3), health.clone());
        let channel = RawLineChannel::new();
        let stop = StopSignal::new();

        let status = embassy_futures::block_on(collector.run(&channel, &stop));

        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(
            path(&health, "core"),
            vec![HealthStatus::Healthy, HealthStatus::Reconnecting, HealthStatus::Unhealthy]
        );
        assert_eq!(received(&channel), vec!["one"]);
        assert_eq!(health.get("core").unwrap().consecutive_failures, 3);
    }

    #[test]
    fn test_stop_before_start() {
        let health = HealthRegistry::new();
        health.register("sip", "sip");
        let source = ScriptedSource::new(vec![Ok(())], vec![ReadOutcome::Idle; 1000]);
        let collector = SourceCollector::new("sip", "sip", Box::new(source), &config(3), health.clone());
        let channel = RawLineChannel::new();
        let stop = StopSignal::new();
        stop.signal(());

        let status = embassy_futures::block_on(collector.run(&channel, &stop));
        assert_eq!(status, HealthStatus::Stopped);
        assert!(received(&channel).is_empty());
    }

    #[test]
    fn test_partial_line_waits_for_room_in_full_channel() {
        let health = HealthRegistry::new();
        health.register("gnb", "ran");
        let source = ScriptedSource::new(vec![Ok(())], vec![data(b"a\nPARTIAL"), lost()]);
        let collector = SourceCollector::new("gnb", "ran", Box::new(source), &config(1), health.clone());
        let channel = RawLineChannel::new();
        for i in 0..RAW_LINE_CHANNEL_SIZE - 1 {
            channel.try_send(RawLineEvent {
                source_id: "gnb".to_string(),
                source_kind: "ran".to_string(),
                received_at: Utc::now(),
                text: format!("queued {}", i),
            })
            .unwrap();
        }
        let stop = StopSignal::new();

        let consumer = async {
            let mut texts = Vec::new();
            for _ in 0..RAW_LINE_CHANNEL_SIZE + 1 {
                texts.push(channel.receive().await.text);
            }
            texts
        };
        let (status, texts) = embassy_futures::block_on(join(collector.run(&channel, &stop), consumer));

        assert_eq!(status, HealthStatus::Unhealthy);
        assert_eq!(texts.len(), RAW_LINE_CHANNEL_SIZE + 1);
        assert_eq!(texts[0], "queued 0");
        assert_eq!(&texts[RAW_LINE_CHANNEL_SIZE - 1..], ["a", "PARTIAL"]);
        assert!(received(&channel).is_empty());
        assert_eq!(health.get("gnb").unwrap().lines_emitted, 2);
    }
}
