//! Per-source health tracking.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::common::lock;

/// Transitions remembered per source.
const TRANSITION_HISTORY: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthStatus {
    /// Registered, first connection not yet established.
    Starting,
    Healthy,
    /// Connection lost, retrying with backoff.
    Reconnecting,
    /// Gave up after the retry limit.
    Unhealthy,
    /// Finished normally or stopped on request.
    Stopped,
}

impl HealthStatus {
    /// `true` once the source's collector has exited.
    pub fn is_terminal(self) -> bool {
        matches!(self, HealthStatus::Unhealthy | HealthStatus::Stopped)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            HealthStatus::Starting => "starting",
            HealthStatus::Healthy => "healthy",
            HealthStatus::Reconnecting => "reconnecting",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthTransition {
    pub at: DateTime<Utc>,
    pub from: HealthStatus,
    pub to: HealthStatus,
    pub reason: Option<String>,
}

/// Health view of one source.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceHealth {
    pub source_id: String,
    pub kind: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub reconnect_attempts: u64,
    pub lines_emitted: u64,
    pub last_error: Option<String>,
    pub last_change: DateTime<Utc>,
    pub transitions: VecDeque<HealthTransition>,
}

/// Shared registry of source health, written by collectors and read by the engine.
///
/// Cloning is cheap; clones share the same registry.
#[derive(Clone, Default)]
pub struct HealthRegistry {
    sources: Arc<Mutex<HashMap<String, SourceHealth>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a source in `Starting` state. Re-registering resets it.
    pub fn register(&self, source_id: &str, kind: &str) {
        let health = SourceHealth {
            source_id: source_id.to_string(),
            kind: kind.to_string(),
            status: HealthStatus::Starting,
            consecutive_failures: 0,
            reconnect_attempts: 0,
            lines_emitted: 0,
            last_error: None,
            last_change: Utc::now(),
            transitions: VecDeque::with_capacity(TRANSITION_HISTORY),
        };
        lock(&self.sources).insert(source_id.to_string(), health);
    }

    /// Move a source to `status`. Only actual changes are logged and recorded.
    pub fn set_status(&self, source_id: &str, status: HealthStatus, reason: Option<String>) {
        let mut sources = lock(&self.sources);
        let Some(health) = sources.get_mut(source_id) else {
            log::warn!("Health update for unregistered source '{}'", source_id);
            return;
        };

        if status == HealthStatus::Healthy {
            health.consecutive_failures = 0;
        }
        if health.status == status {
            return;
        }

        match (status, &reason) {
            (HealthStatus::Unhealthy, Some(reason)) => {
                log::error!("Source '{}': {} -> {} ({})", source_id, health.status, status, reason)
            }
            (HealthStatus::Reconnecting, Some(reason)) => {
                log::warn!("Source '{}': {} -> {} ({})", source_id, health.status, status, reason)
            }
            _ => log::info!("Source '{}': {} -> {}", source_id, health.status, status),
        }

        if health.transitions.len() >= TRANSITION_HISTORY {
            health.transitions.pop_front();
        }
        let now = Utc::now();
        health.transitions.push_back(HealthTransition {
            at: now,
            from: health.status,
            to: status,
            reason,
        });
        health.status = status;
        health.last_change = now;
    }

    /// Count a failed connect or a lost connection. Returns the consecutive failure count.
    pub fn record_failure(&self, source_id: &str, error: &str) -> u32 {
        let mut sources = lock(&self.sources);
        match sources.get_mut(source_id) {
            Some(health) => {
                health.consecutive_failures += 1;
                health.last_error = Some(error.to_string());
                health.consecutive_failures
            }
            None => 0,
        }
    }

    pub fn record_reconnect_attempt(&self, source_id: &str) {
        if let Some(health) = lock(&self.sources).get_mut(source_id) {
            health.reconnect_attempts += 1;
        }
    }

    pub fn add_lines(&self, source_id: &str, count: u64) {
        if let Some(health) = lock(&self.sources).get_mut(source_id) {
            health.lines_emitted += count;
        }
    }

    /// All sources, ordered by id.
    pub fn snapshot(&self) -> Vec<SourceHealth> {
        let mut all: Vec<SourceHealth> = lock(&self.sources).values().cloned().collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }

    pub fn get(&self, source_id: &str) -> Option<SourceHealth> {
        lock(&self.sources).get(source_id).cloned()
    }

    pub fn status(&self, source_id: &str) -> Option<HealthStatus> {
        lock(&self.sources).get(source_id).map(|h| h.status)
    }

    /// `true` if a collector for the source is running.
    pub fn is_running(&self, source_id: &str) -> bool {
        self.status(source_id).is_some_and(|s| !s.is_terminal())
    }

    /// `true` when at least one source was registered and every collector has exited.
    pub fn all_finished(&self) -> bool {
        let sources = lock(&self.sources);
        !sources.is_empty() && sources.values().all(|h| h.status.is_terminal())
    }
}
