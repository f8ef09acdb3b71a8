//! Decode stage between the raw line channel and the bus.

use embassy_futures::select::{Either, select};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus::FanoutBus;
use crate::collector::{RawLineChannel, StopSignal};
use crate::common::{MAX_ENGINES, lock};
use crate::common::types::{DecodedMessage, RawLineEvent};
use crate::decoder::DecoderRegistry;

/// Counters of the decode stage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub decoded: u64,
    pub unparseable: u64,
    /// Decoded messages the bus refused because it was closed.
    pub rejected: u64,
}

/// Assigns message ids, decodes lines and publishes the parsed ones.
///
/// Lines that fail to decode are not published. They are counted and the
/// most recent ones are kept, original text included, for inspection.
pub struct Pipeline {
    registry: DecoderRegistry,
    bus: FanoutBus,
    next_id: AtomicU64,
    decoded: AtomicU64,
    unparseable: AtomicU64,
    rejected: AtomicU64,
    recent_unparseable: Mutex<VecDeque<Arc<DecodedMessage>>>,
    unparseable_history: usize,
}

impl Pipeline {
    pub fn new(registry: DecoderRegistry, bus: FanoutBus, unparseable_history: usize) -> Self {
        Self {
            registry,
            bus,
            next_id: AtomicU64::new(1),
            decoded: AtomicU64::new(0),
            unparseable: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            recent_unparseable: Mutex::new(VecDeque::with_capacity(unparseable_history)),
            unparseable_history,
        }
    }

    /// Decode one line and publish it if it parsed.
    ///
    /// # Returns
    ///
    /// The published message, or `None` for an unparseable line or a closed bus.
    pub fn process(&self, line: RawLineEvent) -> Option<Arc<DecodedMessage>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let message = Arc::new(self.registry.decode_message(id, &line));

        if !message.is_parsed() {
            self.unparseable.fetch_add(1, Ordering::Relaxed);
            if self.unparseable_history > 0 {
                let mut recent = lock(&self.recent_unparseable);
                if recent.len() >= self.unparseable_history {
                    recent.pop_front();
                }
                recent.push_back(message);
            }
            return None;
        }

        self.decoded.fetch_add(1, Ordering::Relaxed);
        match self.bus.publish(Arc::clone(&message)) {
            Ok(()) => Some(message),
            Err(e) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                log::warn!("Message {} from '{}' not published: {}", id, message.source_id, e);
                None
            }
        }
    }

    /// Most recent unparseable messages, oldest first.
    pub fn recent_unparseable(&self) -> Vec<Arc<DecodedMessage>> {
        lock(&self.recent_unparseable).iter().cloned().collect()
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            decoded: self.decoded.load(Ordering::Relaxed),
            unparseable: self.unparseable.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
        }
    }
}

/// Feeds raw lines from all collectors through the pipeline, in arrival order.
///
/// Exits when `stop` is raised and sets `done`; lines still queued are left
/// in the channel for the caller to drain.
#[embassy_executor::task(pool_size = MAX_ENGINES)]
pub async fn decode_task(pipeline: Arc<Pipeline>, lines: Arc<RawLineChannel>, stop: Arc<StopSignal>, done: Arc<AtomicBool>) {
    log::debug!("Decode task started");
    loop {
        match select(lines.receive(), stop.wait()).await {
            Either::First(line) => {
                pipeline.process(line);
            }
            Either::Second(_) => break,
        }
    }
    done.store(true, Ordering::Release);
    log::debug!("Decode task stopped");
}
