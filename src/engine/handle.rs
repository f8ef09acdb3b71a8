//! The engine: wiring of collectors, decoder, bus and analytics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::analytics::{KpiAggregator, KpiSnapshot, kpi_task};
use crate::bus::{BusError, BusStats, FanoutBus, Filter, Subscription, Unsubscribe};
use crate::collector::{
    HealthRegistry, HealthStatus, RawLineChannel, SourceCollector, SourceHealth, StopSignal, build_source,
    collector_task,
};
use crate::common::config::{EngineConfig, SourceConfig, validate_config};
use crate::common::lock;
use crate::common::types::{CorrelationKey, DecodedMessage};
use crate::decoder::DecoderRegistry;

use super::pipeline::{Pipeline, PipelineStats, decode_task};
use super::runtime::Runtime;
use super::EngineError;

/// Grace period used when an engine is dropped without an explicit shutdown.
const DROP_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Owns every component and exposes the consumer-facing operations.
///
/// All parts are created here and handed to the tasks that use them; there
/// is no global lookup.
pub struct Engine {
    config: EngineConfig,
    registry: DecoderRegistry,
    bus: FanoutBus,
    health: HealthRegistry,
    pipeline: Arc<Pipeline>,
    kpi: KpiAggregator,
    runtime: &'static Runtime,
    raw_lines: Arc<RawLineChannel>,
    collectors: Mutex<HashMap<String, Arc<StopSignal>>>,
    decode_stop: Arc<StopSignal>,
    decode_done: Arc<AtomicBool>,
    shut_down: AtomicBool,
}

impl Engine {
    /// Build the engine on the process-wide [`Runtime::shared`] executor.
    pub fn new(config: EngineConfig, registry: DecoderRegistry) -> Result<Self, EngineError> {
        Self::with_runtime(config, registry, Runtime::shared()?)
    }

    /// Build the engine and start its decode and KPI tasks on `runtime`. No
    /// source is collected until [`Engine::start_collection`].
    ///
    /// # Returns
    ///
    /// `Err(EngineError::Config)` for an invalid configuration,
    /// `Err(EngineError::NoDialect)` if a configured source kind has no
    /// registered dialect, `Err(EngineError::Spawn)` if [`MAX_ENGINES`]
    /// engines are already alive.
    ///
    /// [`MAX_ENGINES`]: crate::common::MAX_ENGINES
    pub fn with_runtime(
        config: EngineConfig,
        registry: DecoderRegistry,
        runtime: &'static Runtime,
    ) -> Result<Self, EngineError> {
        validate_config(&config).map_err(EngineError::Config)?;
        if let Some(source) = config.sources.iter().find(|s| !registry.has_dialect(&s.kind)) {
            return Err(EngineError::NoDialect(source.kind.clone()));
        }

        let bus = FanoutBus::new(&config.bus).map_err(|e| EngineError::Config(e.to_string()))?;
        let pipeline = Arc::new(Pipeline::new(registry.clone(), bus.clone(), config.bus.unparseable_history));
        let kpi = KpiAggregator::new(&config.analytics);
        let raw_lines = Arc::new(RawLineChannel::new());
        let decode_stop = Arc::new(StopSignal::new());
        let decode_done = Arc::new(AtomicBool::new(false));

        let (kpi_subscription, _) = bus.subscribe(Filter::All).map_err(|e| EngineError::Runtime(e.to_string()))?;
        runtime.spawn("kpi", kpi_task(kpi.clone(), kpi_subscription))?;
        if let Err(e) = runtime.spawn(
            "decode",
            decode_task(pipeline.clone(), raw_lines.clone(), decode_stop.clone(), decode_done.clone()),
        ) {
            bus.close();
            return Err(e);
        }

        log::info!(
            "Engine ready: {} configured sources, dialects {:?}",
            config.sources.len(),
            registry.kinds()
        );

        Ok(Self {
            config,
            registry,
            bus,
            health: HealthRegistry::new(),
            pipeline,
            kpi,
            runtime,
            raw_lines,
            collectors: Mutex::new(HashMap::new()),
            decode_stop,
            decode_done,
            shut_down: AtomicBool::new(false),
        })
    }

    /// Begin collecting each named source concurrently.
    ///
    /// Every id is checked before any collector starts. Sources that are
    /// already running are left alone; a source that ended (Stopped or
    /// Unhealthy) is started again.
    pub fn start_collection<'a>(&self, source_ids: impl IntoIterator<Item = &'a str>) -> Result<(), EngineError> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(EngineError::Runtime("engine is shut down".to_string()));
        }

        let mut sources = Vec::new();
        for id in source_ids {
            let source = self
                .config
                .source(id)
                .ok_or_else(|| EngineError::UnknownSource(id.to_string()))?;
            if !self.registry.has_dialect(&source.kind) {
                return Err(EngineError::NoDialect(source.kind.clone()));
            }
            sources.push(source);
        }

        let mut collectors = lock(&self.collectors);
        for source in sources {
            if self.health.is_running(&source.id) {
                log::debug!("Source '{}' is already being collected", source.id);
                continue;
            }
            self.start_source(source, &mut collectors, |collector, stop| {
                self.runtime
                    .spawn(&source.id, collector_task(collector, self.raw_lines.clone(), stop))
            })?;
        }
        Ok(())
    }

    /// Register one source and hand its collector to `spawn`. A source whose
    /// collector could not be spawned is marked Unhealthy.
    fn start_source(
        &self,
        source: &SourceConfig,
        collectors: &mut HashMap<String, Arc<StopSignal>>,
        spawn: impl FnOnce(SourceCollector, Arc<StopSignal>) -> Result<(), EngineError>,
    ) -> Result<(), EngineError> {
        self.health.register(&source.id, &source.kind);
        let collector = SourceCollector::new(
            &source.id,
            &source.kind,
            build_source(source),
            &self.config.collector,
            self.health.clone(),
        );
        let stop = Arc::new(StopSignal::new());
        if let Err(e) = spawn(collector, stop.clone()) {
            self.health
                .set_status(&source.id, HealthStatus::Unhealthy, Some(e.to_string()));
            return Err(e);
        }
        collectors.insert(source.id.clone(), stop);
        Ok(())
    }

    /// Ask one source's collector to stop. Stopping a source that is not
    /// running is a no-op.
    pub fn stop_collection(&self, source_id: &str) -> Result<(), EngineError> {
        if self.config.source(source_id).is_none() {
            return Err(EngineError::UnknownSource(source_id.to_string()));
        }
        if let Some(stop) = lock(&self.collectors).get(source_id) {
            stop.signal(());
        }
        Ok(())
    }

    pub fn subscribe(&self, filter: Filter) -> Result<(Subscription, Unsubscribe), BusError> {
        self.bus.subscribe(filter)
    }

    /// Subscribe with a declarative filter such as `layer=PHY level>=WARN`.
    pub fn subscribe_spec(&self, expression: &str) -> Result<(Subscription, Unsubscribe), BusError> {
        self.bus.subscribe_spec(expression)
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        self.kpi.snapshot()
    }

    pub fn correlated_flow(&self, key: &CorrelationKey) -> Vec<Arc<DecodedMessage>> {
        self.bus.correlated_flow(key)
    }

    /// Health of every source started so far, ordered by id.
    pub fn health(&self) -> Vec<SourceHealth> {
        self.health.snapshot()
    }

    /// `true` once every started source is Stopped or Unhealthy.
    pub fn all_sources_finished(&self) -> bool {
        self.health.all_finished()
    }

    pub fn recent_unparseable(&self) -> Vec<Arc<DecodedMessage>> {
        self.pipeline.recent_unparseable()
    }

    pub fn bus_stats(&self) -> BusStats {
        self.bus.stats()
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop all collectors, decode what they already read and close the bus.
    ///
    /// Subscribers receive every message published before the close,
    /// followed by end-of-stream. Steps that do not finish within `timeout`
    /// are abandoned with a warning. Calling this again is a no-op.
    pub fn shutdown(&self, timeout: Duration) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let deadline = Instant::now() + timeout;

        let source_ids: Vec<String> = {
            let collectors = lock(&self.collectors);
            for stop in collectors.values() {
                stop.signal(());
            }
            collectors.keys().cloned().collect()
        };
        if !wait_until(deadline, || source_ids.iter().all(|id| !self.health.is_running(id))) {
            log::warn!("Shutdown: collectors still running after {:?}", timeout);
        }

        self.decode_stop.signal(());
        if wait_until(deadline, || self.decode_done.load(Ordering::Acquire)) {
            let mut drained = 0usize;
            while let Ok(line) = self.raw_lines.try_receive() {
                self.pipeline.process(line);
                drained += 1;
            }
            if drained > 0 {
                log::debug!("Shutdown: decoded {} queued lines", drained);
            }
        } else {
            log::warn!("Shutdown: decode task did not stop, queued lines abandoned");
        }

        self.bus.close();
        if !wait_until(deadline, || self.kpi.is_finished()) {
            log::warn!("Shutdown: KPI aggregator still running after {:?}", timeout);
        }
        log::info!("Engine shut down ({:?})", self.pipeline.stats());
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown(DROP_SHUTDOWN_TIMEOUT);
    }
}

fn wait_until(deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
    loop {
        if done() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(SHUTDOWN_POLL_INTERVAL);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Delivery;
    use crate::common::MAX_ENGINES;
    use crate::common::config::{CollectorConfig, SimulatedConfig, SourceConfig, TransportConfig};
    use crate::common::types::{CorrelationKind, Layer};

    fn simulated(id: &str, kind: &str, sim: SimulatedConfig) -> SourceConfig {
        SourceConfig {
            id: id.to_string(),
            kind: kind.to_string(),
            transport: TransportConfig::Simulated(sim),
        }
    }

    fn finite(lines: u64) -> SimulatedConfig {
        SimulatedConfig {
            lines_per_second: 20_000,
            total_lines: Some(lines),
            seed: Some(3),
            ..SimulatedConfig::default()
        }
    }

    fn config(sources: Vec<SourceConfig>) -> EngineConfig {
        EngineConfig {
            collector: CollectorConfig {
                initial_backoff_ms: 1,
                max_backoff_ms: 5,
                poll_interval_ms: 1,
                ..CollectorConfig::default()
            },
            sources,
            ..EngineConfig::default()
        }
    }

    fn wait_for(engine: &Engine, mut done: impl FnMut(&Engine) -> bool) {
        assert!(wait_until(Instant::now() + Duration::from_secs(10), || done(engine)));
    }

    #[test]
    fn test_end_to_end_collection() {
        let engine = Engine::new(
            config(vec![simulated("gnb", "ran", finite(300)), simulated("ims", "sip", finite(100))]),
            DecoderRegistry::with_builtin_dialects(),
        )
        .unwrap();
        let (phy, _) = engine.subscribe_spec("layer=PHY source=gnb").unwrap();

        engine.start_collection(["gnb", "ims"]).unwrap();
        wait_for(&engine, |e| e.all_sources_finished());
        engine.shutdown(Duration::from_secs(5));

        let health = engine.health();
        assert!(health.iter().all(|h| h.status == HealthStatus::Stopped));
        assert_eq!(health.iter().map(|h| h.lines_emitted).sum::<u64>(), 400);

        let stats = engine.pipeline_stats();
        assert_eq!(stats.decoded + stats.unparseable, 400);

        let deliveries = phy.drain(usize::MAX);
        assert_eq!(deliveries.last(), Some(&Delivery::EndOfStream));
        let messages: Vec<_> = deliveries.iter().filter_map(|d| d.message()).collect();
        assert!(!messages.is_empty());
        assert!(messages.iter().all(|m| m.layer == Layer::Phy && m.source_id == "gnb"));
        assert!(messages.windows(2).all(|w| w[0].id < w[1].id));

        let rnti = messages[0].correlation(CorrelationKind::Rnti).unwrap();
        let key = CorrelationKey::new(CorrelationKind::Rnti, rnti);
        assert!(engine.correlated_flow(&key).iter().any(|m| m.id == messages[0].id));
        assert!(engine.snapshot().total > 0);
    }

    #[test]
    fn test_unhealthy_source_and_restart() {
        let flaky = SimulatedConfig {
            lines_per_second: 20_000,
            seed: Some(9),
            fail_after_lines: Some(20),
            reconnect_failures: 10,
            ..SimulatedConfig::default()
        };
        let engine = Engine::new(config(vec![simulated("core", "core", flaky)]), DecoderRegistry::with_builtin_dialects())
            .unwrap();

        engine.start_collection(["core"]).unwrap();
        wait_for(&engine, |e| e.all_sources_finished());
        let report = &engine.health()[0];
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.lines_emitted, 20);

        // An explicit start retries a failed source.
        engine.start_collection(["core"]).unwrap();
        assert_ne!(engine.health()[0].status, HealthStatus::Unhealthy);
        engine.stop_collection("core").unwrap();
        wait_for(&engine, |e| e.all_sources_finished());
        engine.shutdown(Duration::from_secs(5));
    }

    #[test]
    fn test_caller_errors() {
        let engine = Engine::new(config(vec![simulated("gnb", "ran", finite(1))]), DecoderRegistry::with_builtin_dialects())
            .unwrap();
        assert_eq!(
            engine.start_collection(["gnb", "enb"]),
            Err(EngineError::UnknownSource("enb".to_string()))
        );
        assert!(engine.health().is_empty());
        assert_eq!(engine.stop_collection("enb"), Err(EngineError::UnknownSource("enb".to_string())));
        assert!(matches!(engine.subscribe_spec("level>=LOUD"), Err(BusError::InvalidFilter(_))));

        engine.shutdown(Duration::from_secs(1));
        assert!(matches!(engine.subscribe(Filter::All), Err(BusError::Closed)));
        assert!(engine.start_collection(["gnb"]).is_err());

        assert!(matches!(
            Engine::new(config(vec![simulated("x", "lte", finite(1))]), DecoderRegistry::with_builtin_dialects()),
            Err(EngineError::NoDialect(kind)) if kind == "lte"
        ));
    }

    #[test]
    fn test_engines_are_created_and_shut_down_repeatedly() {
        for round in 0..MAX_ENGINES + 3 {
            let engine = Engine::new(
                config(vec![simulated("gnb", "ran", finite(20))]),
                DecoderRegistry::with_builtin_dialects(),
            )
            .unwrap_or_else(|e| panic!("engine {} not created: {}", round, e));
            engine.start_collection(["gnb"]).unwrap();
            wait_for(&engine, |e| e.all_sources_finished());
            engine.shutdown(Duration::from_secs(5));
            assert!(engine.kpi.is_finished());
            assert_eq!(engine.pipeline_stats().decoded + engine.pipeline_stats().unparseable, 20);
        }
    }

    #[test]
    fn test_failed_spawn_marks_source_unhealthy() {
        let engine = Engine::new(config(vec![simulated("gnb", "ran", finite(5))]), DecoderRegistry::with_builtin_dialects())
            .unwrap();
        let source = engine.config().source("gnb").unwrap().clone();

        let result = engine.start_source(&source, &mut lock(&engine.collectors), |_, _| {
            Err(EngineError::Spawn("gnb: Busy".to_string()))
        });

        assert_eq!(result, Err(EngineError::Spawn("gnb: Busy".to_string())));
        let report = &engine.health()[0];
        assert_eq!(report.status, HealthStatus::Unhealthy);
        let reason = report.transitions.back().and_then(|t| t.reason.clone()).unwrap_or_default();
        assert!(reason.contains("Busy"));
        assert!(engine.all_sources_finished());
        assert!(lock(&engine.collectors).is_empty());

        // The source can still be started for real afterwards.
        engine.start_collection(["gnb"]).unwrap();
        wait_for(&engine, |e| e.all_sources_finished());
        assert_eq!(engine.health()[0].status, HealthStatus::Stopped);
        engine.shutdown(Duration::from_secs(5));
    }
}
