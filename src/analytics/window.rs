//! Rolling KPI window with incrementally maintained aggregates.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crate::common::config::{AnalyticsConfig, WindowConfig};
use crate::common::types::{DecodedMessage, FieldValue, Layer, Level};

/// Aggregates over the current window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub total: u64,
    pub by_layer: BTreeMap<Layer, u64>,
    pub by_type: BTreeMap<String, u64>,
    pub error_count: u64,
    /// `error_count / total`, 0 for an empty window.
    pub error_rate: f64,
    /// Mean throughput in Mbps over messages carrying a throughput field.
    pub avg_throughput: Option<f64>,
    /// Mean latency in microseconds over messages carrying a latency field.
    pub avg_latency: Option<f64>,
}

/// One windowed message and the metrics extracted from it on entry.
struct WindowEntry {
    message: Arc<DecodedMessage>,
    throughput: Option<f64>,
    latency: Option<f64>,
}

/// Sum and sample count of one averaged metric.
#[derive(Debug, Default, Clone, Copy)]
struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn add(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.sum += v;
            self.count += 1;
        }
    }

    fn remove(&mut self, value: Option<f64>) {
        if let Some(v) = value {
            self.count = self.count.saturating_sub(1);
            // Reset at zero so float error cannot accumulate across window turnovers.
            self.sum = if self.count == 0 { 0.0 } else { self.sum - v };
        }
    }

    fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Bounded window of recent messages.
///
/// Every counter is updated when a message enters and again when it is
/// evicted, so [`KpiWindow::snapshot`] never walks the window.
pub struct KpiWindow {
    bound: WindowConfig,
    throughput_fields: Vec<String>,
    latency_fields: Vec<String>,
    entries: VecDeque<WindowEntry>,
    /// Newest timestamp seen; reference point of a time-based window.
    newest: Option<DateTime<Utc>>,
    by_layer: BTreeMap<Layer, u64>,
    by_type: BTreeMap<String, u64>,
    error_count: u64,
    throughput: RunningMean,
    latency: RunningMean,
    evicted: u64,
}

impl KpiWindow {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            bound: config.window,
            throughput_fields: config.throughput_fields.iter().map(|f| f.to_ascii_lowercase()).collect(),
            latency_fields: config.latency_fields.iter().map(|f| f.to_ascii_lowercase()).collect(),
            entries: VecDeque::new(),
            newest: None,
            by_layer: BTreeMap::new(),
            by_type: BTreeMap::new(),
            error_count: 0,
            throughput: RunningMean::default(),
            latency: RunningMean::default(),
            evicted: 0,
        }
    }

    /// Count-bounded window with the default metric fields.
    pub fn with_count(count: usize) -> Self {
        Self::new(&AnalyticsConfig {
            window: WindowConfig::Count { count },
            ..AnalyticsConfig::default()
        })
    }

    /// Add a message and evict what falls out of the window.
    pub fn push(&mut self, message: Arc<DecodedMessage>) {
        let throughput = first_metric(&message, &self.throughput_fields, throughput_mbps);
        let latency = first_metric(&message, &self.latency_fields, latency_us);

        *self.by_layer.entry(message.layer).or_insert(0) += 1;
        *self.by_type.entry(message.message_type.clone()).or_insert(0) += 1;
        if message.level == Level::Error {
            self.error_count += 1;
        }
        self.throughput.add(throughput);
        self.latency.add(latency);
        self.newest = Some(self.newest.map_or(message.timestamp, |n| n.max(message.timestamp)));

        self.entries.push_back(WindowEntry {
            message,
            throughput,
            latency,
        });
        self.evict();
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        let total = self.entries.len() as u64;
        KpiSnapshot {
            total,
            by_layer: self.by_layer.clone(),
            by_type: self.by_type.clone(),
            error_count: self.error_count,
            error_rate: if total == 0 { 0.0 } else { self.error_count as f64 / total as f64 },
            avg_throughput: self.throughput.mean(),
            avg_latency: self.latency.mean(),
        }
    }

    /// Messages currently in the window, oldest first.
    pub fn messages(&self) -> impl Iterator<Item = &Arc<DecodedMessage>> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Messages evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn evict(&mut self) {
        match self.bound {
            WindowConfig::Count { count } => {
                while self.entries.len() > count {
                    self.pop_oldest();
                }
            }
            WindowConfig::Duration { seconds } => {
                let Some(newest) = self.newest else {
                    return;
                };
                let span = TimeDelta::seconds(i64::try_from(seconds).unwrap_or(i64::MAX / 1000));
                let cutoff = newest - span;
                while self.entries.front().is_some_and(|e| e.message.timestamp < cutoff) {
                    self.pop_oldest();
                }
            }
        }
    }

    fn pop_oldest(&mut self) {
        let Some(entry) = self.entries.pop_front() else {
            return;
        };
        let message = &entry.message;

        decrement(&mut self.by_layer, &message.layer);
        decrement(&mut self.by_type, &message.message_type);
        if message.level == Level::Error {
            self.error_count = self.error_count.saturating_sub(1);
        }
        self.throughput.remove(entry.throughput);
        self.latency.remove(entry.latency);
        self.evicted += 1;

        if self.entries.is_empty() {
            self.newest = None;
        }
    }
}

fn decrement<K: Ord + Clone>(counts: &mut BTreeMap<K, u64>, key: &K) {
    if let Some(count) = counts.get_mut(key) {
        *count -= 1;
        if *count == 0 {
            counts.remove(key);
        }
    }
}

/// Value of the first configured field the message carries, converted by `normalize`.
fn first_metric(message: &DecodedMessage, names: &[String], normalize: fn(&FieldValue) -> Option<f64>) -> Option<f64> {
    names.iter().find_map(|name| message.fields.get(name).and_then(normalize))
}

/// Throughput in Mbps. Unitless values are taken as Mbps.
fn throughput_mbps(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Quantity { value, unit } => {
            let scale = match unit.to_ascii_lowercase().as_str() {
                "bps" | "b/s" => 1e-6,
                "kbps" | "kb/s" => 1e-3,
                "mbps" | "mb/s" => 1.0,
                "gbps" | "gb/s" => 1e3,
                _ => return None,
            };
            Some(value * scale)
        }
        other => other.as_f64(),
    }
}

/// Latency in microseconds. Unitless values are taken as microseconds.
fn latency_us(value: &FieldValue) -> Option<f64> {
    match value {
        FieldValue::Quantity { value, unit } => {
            let scale = match unit.to_ascii_lowercase().as_str() {
                "ns" => 1e-3,
                "us" | "µs" => 1.0,
                "ms" => 1e3,
                "s" => 1e6,
                _ => return None,
            };
            Some(value * scale)
        }
        other => other.as_f64(),
    }
}
