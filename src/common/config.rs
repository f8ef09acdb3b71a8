//! Engine configuration loading and validation.
//!
//! The configuration is a TOML file with one section per component and a
//! `[[sources]]` array naming every log source the engine may collect from:
//!
//! ```toml
//! [bus]
//! subscription_capacity = 200
//!
//! [collector]
//! initial_backoff_ms = 100
//! max_retries = 5
//!
//! [analytics]
//! window = { count = 1000 }
//!
//! [[sources]]
//! id = "gnb"
//! kind = "ran"
//! transport = { type = "process", command = "tail", args = ["-F", "/var/log/gnb.log"] }
//! ```

use anyhow::Context;
use embassy_time::Duration;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration loading failures.
#[derive(Debug)]
pub enum ConfigLoadError {
    FileReadError(String),
    ParseError(String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigLoadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigLoadError::FileReadError(msg) => write!(f, "Failed to read file: {}", msg),
            ConfigLoadError::ParseError(msg) => write!(f, "Failed to parse TOML: {}", msg),
            ConfigLoadError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
        }
    }
}

impl std::error::Error for ConfigLoadError {}

/// Root of the configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub bus: BusConfig,
    pub collector: CollectorConfig,
    pub analytics: AnalyticsConfig,
    pub sources: Vec<SourceConfig>,
}

/// Fan-out bus and correlation index limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Delivery queue depth of each subscription before drop-oldest kicks in.
    pub subscription_capacity: usize,
    /// Distinct correlation keys tracked before least-recently-used eviction.
    pub correlation_key_limit: usize,
    /// Messages kept per correlation key.
    pub correlation_flow_limit: usize,
    /// Recent unparseable lines kept for forensic display.
    pub unparseable_history: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            subscription_capacity: 200,
            correlation_key_limit: 4096,
            correlation_flow_limit: 256,
            unparseable_history: 500,
        }
    }
}

/// Reconnect and reading behavior shared by all collectors.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Consecutive failed reconnects before a source is marked Unhealthy.
    pub max_retries: u32,
    /// Idle wait between reads when a source has no new data.
    pub poll_interval_ms: u64,
    /// Longest line emitted; longer partial writes are split.
    pub max_line_length: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 5000,
            max_retries: 5,
            poll_interval_ms: 20,
            max_line_length: 64 * 1024,
        }
    }
}

impl CollectorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// KPI window configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub window: WindowConfig,
    /// Field names whose values feed the throughput average.
    pub throughput_fields: Vec<String>,
    /// Field names whose values feed the latency average.
    pub latency_fields: Vec<String>,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window: WindowConfig::Count { count: 1000 },
            throughput_fields: ["throughput", "tput", "brate", "dl_brate", "ul_brate", "bitrate"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            latency_fields: ["latency", "delay", "t", "rtt"].iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Bound of the rolling KPI window, by message count or by time span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WindowConfig {
    Count { count: usize },
    Duration { seconds: u64 },
}

/// One named source and how to reach it.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    /// Dialect used to decode the source's lines (`ran`, `core`, `sip`, ...).
    pub kind: String,
    pub transport: TransportConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum TransportConfig {
    /// Spawn a process and read its standard output.
    Process {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
    /// Follow a log file, optionally replaying it from the beginning.
    File {
        path: PathBuf,
        #[serde(default)]
        from_start: bool,
    },
    /// Synthetic traffic for demos and tests; never mixed with live sources.
    Simulated(SimulatedConfig),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatedConfig {
    pub lines_per_second: u32,
    /// Lines produced before the simulated process exits.
    pub total_lines: Option<u64>,
    pub seed: Option<u64>,
    /// Simulate losing the process after this many lines.
    pub fail_after_lines: Option<u64>,
    /// Reconnect attempts that fail after a simulated loss.
    pub reconnect_failures: u32,
}

impl Default for SimulatedConfig {
    fn default() -> Self {
        Self {
            lines_per_second: 50,
            total_lines: None,
            seed: None,
            fail_after_lines: None,
            reconnect_failures: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Arguments
    /// * `config_path` - Path to the config.toml file
    ///
    /// # Returns
    /// * `Ok(EngineConfig)` if the file was read, parsed and validated
    /// * `Err(ConfigLoadError)` describing the failing step otherwise
    pub fn load(config_path: &Path) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read file: {}", config_path.display()))
            .map_err(|e| ConfigLoadError::FileReadError(e.to_string()))?;

        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigLoadError> {
        let config: EngineConfig = toml::from_str(content)
            .context("Invalid TOML format")
            .map_err(|e| ConfigLoadError::ParseError(format!("{:#}", e)))?;

        validate_config(&config).map_err(ConfigLoadError::ValidationError)?;

        Ok(config)
    }

    pub fn source(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.iter().find(|s| s.id == id)
    }
}

/// Validate configuration values that serde cannot check.
///
/// # Returns
///
/// `Ok(())` if validation passes, `Err(String)` with error description otherwise.
pub fn validate_config(config: &EngineConfig) -> Result<(), String> {
    const MAX_SOURCES: usize = crate::collector::MAX_SOURCES;

    let bus = &config.bus;
    if bus.subscription_capacity == 0 {
        return Err("bus.subscription_capacity must be positive".to_string());
    }
    if bus.correlation_key_limit == 0 {
        return Err("bus.correlation_key_limit must be positive".to_string());
    }
    if bus.correlation_flow_limit == 0 {
        return Err("bus.correlation_flow_limit must be positive".to_string());
    }

    let collector = &config.collector;
    if collector.initial_backoff_ms == 0 {
        return Err("collector.initial_backoff_ms must be positive".to_string());
    }
    if collector.max_backoff_ms < collector.initial_backoff_ms {
        return Err(format!(
            "collector.max_backoff_ms {} is below initial_backoff_ms {}",
            collector.max_backoff_ms, collector.initial_backoff_ms
        ));
    }
    if collector.poll_interval_ms == 0 {
        return Err("collector.poll_interval_ms must be positive".to_string());
    }
    if collector.max_line_length == 0 {
        return Err("collector.max_line_length must be positive".to_string());
    }

    match config.analytics.window {
        WindowConfig::Count { count: 0 } => return Err("analytics.window.count must be positive".to_string()),
        WindowConfig::Duration { seconds: 0 } => return Err("analytics.window.seconds must be positive".to_string()),
        _ => {}
    }

    if config.sources.len() > MAX_SOURCES {
        return Err(format!(
            "Source count {} exceeds maximum of {}",
            config.sources.len(),
            MAX_SOURCES
        ));
    }

    let mut ids = HashSet::new();
    for source in &config.sources {
        if source.id.trim().is_empty() {
            return Err("Source id must not be empty".to_string());
        }
        if !ids.insert(source.id.as_str()) {
            return Err(format!("Duplicate source id found: {}", source.id));
        }
        if source.kind.trim().is_empty() {
            return Err(format!("Source {} has an empty kind", source.id));
        }
        match &source.transport {
            TransportConfig::Process { command, .. } if command.trim().is_empty() => {
                return Err(format!("Source {} has an empty command", source.id));
            }
            TransportConfig::File { path, .. } if path.as_os_str().is_empty() => {
                return Err(format!("Source {} has an empty path", source.id));
            }
            TransportConfig::Simulated(sim) if sim.lines_per_second == 0 => {
                return Err(format!("Source {} lines_per_second must be positive", source.id));
            }
            _ => {}
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_apply_to_missing_sections() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config.bus.subscription_capacity, 200);
        assert_eq!(config.collector.max_retries, 5);
        assert_eq!(config.analytics.window, WindowConfig::Count { count: 1000 });
        assert!(config.sources.is_empty());
    }

    #[test]
    fn test_parse_sources_and_windows() {
        let text = r#"
            [bus]
            subscription_capacity = 16

            [analytics]
            window = { seconds = 30 }

            [[sources]]
            id = "gnb"
            kind = "ran"
            transport = { type = "process", command = "tail", args = ["-F", "/tmp/gnb.log"] }

            [[sources]]
            id = "amf"
            kind = "core"
            transport = { type = "file", path = "/tmp/amf.log", from_start = true }

            [[sources]]
            id = "sim"
            kind = "ran"
            transport = { type = "simulated", lines_per_second = 500, seed = 7 }
        "#;
        let config = EngineConfig::from_toml_str(text).unwrap();
        assert_eq!(config.bus.subscription_capacity, 16);
        assert_eq!(config.bus.correlation_key_limit, 4096);
        assert_eq!(config.analytics.window, WindowConfig::Duration { seconds: 30 });
        assert_eq!(config.sources.len(), 3);

        match &config.source("gnb").unwrap().transport {
            TransportConfig::Process { command, args } => {
                assert_eq!(command, "tail");
                assert_eq!(args.len(), 2);
            }
            other => panic!("Expected process transport, got {:?}", other),
        }
        match &config.source("sim").unwrap().transport {
            TransportConfig::Simulated(sim) => {
                assert_eq!(sim.lines_per_second, 500);
                assert_eq!(sim.seed, Some(7));
                assert_eq!(sim.reconnect_failures, 0);
            }
            other => panic!("Expected simulated transport, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_source_ids_rejected() {
        let text = r#"
            [[sources]]
            id = "gnb"
            kind = "ran"
            transport = { type = "simulated" }

            [[sources]]
            id = "gnb"
            kind = "ran"
            transport = { type = "simulated" }
        "#;
        match EngineConfig::from_toml_str(text) {
            Err(ConfigLoadError::ValidationError(msg)) => assert!(msg.contains("Duplicate")),
            other => panic!("Expected validation error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_invalid_limits_rejected() {
        assert!(EngineConfig::from_toml_str("[bus]\nsubscription_capacity = 0").is_err());
        assert!(EngineConfig::from_toml_str("[collector]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100").is_err());
        assert!(EngineConfig::from_toml_str("[analytics]\nwindow = { count = 0 }").is_err());
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        match EngineConfig::from_toml_str("[bus\n") {
            Err(ConfigLoadError::ParseError(_)) => {}
            other => panic!("Expected parse error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_missing_file_is_read_error() {
        match EngineConfig::load(Path::new("/nonexistent/ran-log-engine.toml")) {
            Err(ConfigLoadError::FileReadError(_)) => {}
            other => panic!("Expected read error, got {:?}", other.map(|_| ())),
        }
    }
}
