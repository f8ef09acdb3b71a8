//! Bounded least-recently-used index from correlation key to message flow.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use crate::common::types::{CorrelationKey, DecodedMessage};

struct FlowEntry {
    messages: VecDeque<Arc<DecodedMessage>>,
    last_touch: u64,
}

/// Maps each correlation key to the messages that carried it, in publish
/// order.
///
/// Holds at most `key_limit` keys and `flow_limit` messages per key. When a
/// new key would exceed the key limit, the least recently published or
/// queried key is evicted.
pub struct CorrelationIndex {
    key_limit: usize,
    flow_limit: usize,
    entries: HashMap<CorrelationKey, FlowEntry>,
    /// Touch tick → key, oldest first.
    recency: BTreeMap<u64, CorrelationKey>,
    tick: u64,
    evicted: u64,
}

impl CorrelationIndex {
    pub fn new(key_limit: usize, flow_limit: usize) -> Self {
        Self {
            key_limit: key_limit.max(1),
            flow_limit: flow_limit.max(1),
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            tick: 0,
            evicted: 0,
        }
    }

    /// Append a message to the flow of each of its correlation keys.
    pub fn record(&mut self, message: &Arc<DecodedMessage>) {
        for key in message.keys() {
            self.touch_or_insert(&key);
            if let Some(entry) = self.entries.get_mut(&key) {
                if entry.messages.len() >= self.flow_limit {
                    entry.messages.pop_front();
                }
                entry.messages.push_back(Arc::clone(message));
            }
        }
    }

    /// Messages that carried `key`, oldest first. Counts as a use of the key.
    pub fn flow(&mut self, key: &CorrelationKey) -> Vec<Arc<DecodedMessage>> {
        if !self.entries.contains_key(key) {
            return Vec::new();
        }
        self.touch(key);
        self.entries
            .get(key)
            .map(|entry| entry.messages.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, key: &CorrelationKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of keys currently tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys evicted since creation.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn touch(&mut self, key: &CorrelationKey) {
        let tick = self.next_tick();
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_touch);
            entry.last_touch = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn touch_or_insert(&mut self, key: &CorrelationKey) {
        if self.entries.contains_key(key) {
            self.touch(key);
            return;
        }

        while self.entries.len() >= self.key_limit {
            let Some((_, oldest)) = self.recency.pop_first() else {
                break;
            };
            self.entries.remove(&oldest);
            self.evicted += 1;
            log::debug!("Correlation key {} evicted", oldest);
        }

        let tick = self.next_tick();
        self.entries.insert(
            key.clone(),
            FlowEntry {
                messages: VecDeque::new(),
                last_touch: tick,
            },
        );
        self.recency.insert(tick, key.clone());
    }
}
