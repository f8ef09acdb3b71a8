//! Aggregator task feeding the KPI window from a bus subscription.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::bus::{Delivery, Subscription};
use crate::common::config::AnalyticsConfig;
use crate::common::{MAX_ENGINES, lock};

use super::window::{KpiSnapshot, KpiWindow};

/// Messages taken from the subscription per wakeup.
pub const KPI_BATCH_SIZE: usize = 64;

/// Shared handle to the KPI window.
///
/// Cloning is cheap; clones share the same window.
#[derive(Clone)]
pub struct KpiAggregator {
    window: Arc<Mutex<KpiWindow>>,
    finished: Arc<AtomicBool>,
}

impl KpiAggregator {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            window: Arc::new(Mutex::new(KpiWindow::new(config))),
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Fold a batch into the window. Returns `false` once end-of-stream was seen.
    pub fn ingest(&self, batch: Vec<Delivery>) -> bool {
        let mut window = lock(&self.window);
        for delivery in batch {
            match delivery {
                Delivery::Message(message) => window.push(message),
                Delivery::EndOfStream => return false,
            }
        }
        true
    }

    pub fn snapshot(&self) -> KpiSnapshot {
        lock(&self.window).snapshot()
    }

    /// `true` once [`KpiAggregator::run`] has seen end-of-stream.
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    /// Consume `subscription` until the bus closes.
    pub async fn run(&self, subscription: Subscription) {
        loop {
            let batch = subscription.next_batch(KPI_BATCH_SIZE).await;
            if !self.ingest(batch) {
                break;
            }
        }
        self.finished.store(true, Ordering::Release);
        log::debug!("KPI aggregator stopped after end of stream");
    }
}

/// Runs the KPI aggregator on the executor.
#[embassy_executor::task(pool_size = MAX_ENGINES)]
pub async fn kpi_task(aggregator: KpiAggregator, subscription: Subscription) {
    aggregator.run(subscription).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{FanoutBus, Filter};
    use crate::common::config::{BusConfig, WindowConfig};
    use crate::common::detail::MessageDetail;
    use crate::common::types::{DecodedLine, DecodedMessage, Layer, Level, RawLineEvent};
    use chrono::Utc;

    fn message(id: u64) -> Arc<DecodedMessage> {
        let raw = RawLineEvent {
            source_id: "gnb".to_string(),
            source_kind: "ran".to_string(),
            received_at: Utc::now(),
            text: format!("line {}", id),
        };
        let line = DecodedLine::new(Layer::Phy, Level::Info, "DL-SCH", MessageDetail::Unparsed);
        Arc::new(DecodedMessage::from_decoded(id, &raw, line))
    }

    #[test]
    fn test_aggregator_follows_bus_until_close() {
        let bus = FanoutBus::new(&BusConfig::default()).unwrap();
        let aggregator = KpiAggregator::new(&AnalyticsConfig {
            window: WindowConfig::Count { count: 5 },
            ..AnalyticsConfig::default()
        });
        let (subscription, _) = bus.subscribe(Filter::All).unwrap();

        for id in 1..=7 {
            bus.publish(message(id)).unwrap();
        }
        bus.close();
        assert!(!aggregator.is_finished());
        embassy_futures::block_on(aggregator.run(subscription));
        assert!(aggregator.is_finished());

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.total, 5);
        assert_eq!(snapshot.by_type["DL-SCH"], 5);
    }

    #[test]
    fn test_ingest_stops_at_end_of_stream() {
        let aggregator = KpiAggregator::new(&AnalyticsConfig::default());
        let batch = vec![Delivery::Message(message(1)), Delivery::EndOfStream, Delivery::Message(message(2))];
        assert!(!aggregator.ingest(batch));
        assert_eq!(aggregator.snapshot().total, 1);
    }
}
