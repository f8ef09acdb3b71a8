use anyhow::{Context, bail};
use env_logger::Builder;
use log::{LevelFilter, info, warn};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use ran_log_engine::Engine;
use ran_log_engine::common::EngineConfig;
use ran_log_engine::decoder::DecoderRegistry;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn main() -> anyhow::Result<()> {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("ran_log_engine"), LevelFilter::Debug)
        .parse_default_env()
        .init();

    let Some(config_path) = std::env::args().nth(1).map(PathBuf::from) else {
        bail!("Usage: ran-log-engine <config.toml>");
    };

    let config = EngineConfig::load(&config_path)
        .with_context(|| format!("Failed to load configuration from {}", config_path.display()))?;
    let source_ids: Vec<String> = config.sources.iter().map(|s| s.id.clone()).collect();
    if source_ids.is_empty() {
        bail!("{} configures no sources", config_path.display());
    }

    info!("Starting up with {} sources", source_ids.len());
    let engine = Engine::new(config, DecoderRegistry::with_builtin_dialects()).context("Failed to start engine")?;
    engine
        .start_collection(source_ids.iter().map(String::as_str))
        .context("Failed to start collection")?;

    loop {
        thread::sleep(REPORT_INTERVAL);
        report(&engine);
        if engine.all_sources_finished() {
            info!("All sources stopped or unhealthy");
            break;
        }
    }

    engine.shutdown(SHUTDOWN_TIMEOUT);
    report(&engine);
    Ok(())
}

/// Log KPIs and per-source health.
fn report(engine: &Engine) {
    match serde_json::to_string(&engine.snapshot()) {
        Ok(json) => info!("KPI {}", json),
        Err(e) => warn!("KPI snapshot not serializable: {}", e),
    }
    for health in engine.health() {
        info!(
            "Source '{}' ({}): {} lines={} reconnects={}{}",
            health.source_id,
            health.kind,
            health.status,
            health.lines_emitted,
            health.reconnect_attempts,
            health.last_error.map(|e| format!(" last_error={}", e)).unwrap_or_default()
        );
    }
    let bus = engine.bus_stats();
    let pipeline = engine.pipeline_stats();
    info!(
        "Bus published={} dropped={} keys={} | decoded={} unparseable={}",
        bus.published, bus.dropped, bus.tracked_keys, pipeline.decoded, pipeline.unparseable
    );
}
