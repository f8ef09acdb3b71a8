//! The fan-out bus.

use serde::Serialize;
use std::sync::{Arc, Mutex};

use crate::common::config::BusConfig;
use crate::common::types::{CorrelationKey, DecodedMessage};

use super::correlation::CorrelationIndex;
use super::filter::{Filter, FilterSpec};
use super::subscription::{Subscription, SubscriptionShared, Unsubscribe};
use super::{BusError, lock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BusState {
    Open,
    Closed,
}

/// Counters exposed for monitoring.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BusStats {
    pub published: u64,
    /// Publish calls rejected because the bus was closed.
    pub rejected: u64,
    pub active_subscriptions: usize,
    /// Messages dropped across all active subscriptions.
    pub dropped: u64,
    pub tracked_keys: usize,
    pub evicted_keys: u64,
}

pub(crate) struct BusInner {
    state: BusState,
    next_subscription_id: u64,
    subscriptions: Vec<Arc<SubscriptionShared>>,
    correlation: CorrelationIndex,
    published: u64,
    rejected: u64,
}

impl BusInner {
    pub(crate) fn remove_subscription(&mut self, id: u64) {
        self.subscriptions.retain(|s| s.id != id);
    }
}

/// Distributes decoded messages to filtered subscriptions and keeps the
/// correlation index.
///
/// Cloning is cheap; clones share the same bus.
#[derive(Clone)]
pub struct FanoutBus {
    inner: Arc<Mutex<BusInner>>,
    subscription_capacity: usize,
}

impl FanoutBus {
    /// Create an open bus.
    ///
    /// # Returns
    ///
    /// `Err(BusError::CapacityZero)` if the default subscription capacity is zero.
    pub fn new(config: &BusConfig) -> Result<Self, BusError> {
        if config.subscription_capacity == 0 {
            return Err(BusError::CapacityZero);
        }

        Ok(Self {
            inner: Arc::new(Mutex::new(BusInner {
                state: BusState::Open,
                next_subscription_id: 1,
                subscriptions: Vec::new(),
                correlation: CorrelationIndex::new(config.correlation_key_limit, config.correlation_flow_limit),
                published: 0,
                rejected: 0,
            })),
            subscription_capacity: config.subscription_capacity,
        })
    }

    /// Subscribe with the bus's default queue capacity.
    pub fn subscribe(&self, filter: Filter) -> Result<(Subscription, Unsubscribe), BusError> {
        self.subscribe_with_capacity(filter, self.subscription_capacity)
    }

    /// Subscribe with a declarative filter expression.
    pub fn subscribe_spec(&self, expression: &str) -> Result<(Subscription, Unsubscribe), BusError> {
        let spec = FilterSpec::parse(expression)?;
        self.subscribe(Filter::Spec(spec))
    }

    /// Subscribe with an explicit queue capacity.
    pub fn subscribe_with_capacity(
        &self,
        filter: Filter,
        capacity: usize,
    ) -> Result<(Subscription, Unsubscribe), BusError> {
        if capacity == 0 {
            return Err(BusError::CapacityZero);
        }

        let mut inner = lock(&self.inner);
        if inner.state == BusState::Closed {
            return Err(BusError::Closed);
        }

        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        let shared = Arc::new(SubscriptionShared::new(id, filter, capacity));
        inner.subscriptions.push(shared.clone());
        log::debug!("Subscription {} created ({:?}, capacity {})", id, shared.filter, capacity);

        let subscription = Subscription::new(shared, Arc::downgrade(&self.inner));
        let unsubscribe = subscription.unsubscribe_handle();
        Ok((subscription, unsubscribe))
    }

    /// Deliver one message to every matching subscription.
    ///
    /// Does not wait for consumers; work is proportional to the number of
    /// active subscriptions and the message's correlation keys. Filters are
    /// evaluated under the bus lock.
    pub fn publish(&self, message: Arc<DecodedMessage>) -> Result<(), BusError> {
        let mut inner = lock(&self.inner);
        if inner.state == BusState::Closed {
            inner.rejected += 1;
            return Err(BusError::Closed);
        }

        for subscription in &inner.subscriptions {
            if subscription.filter.matches(&message) {
                subscription.push(Arc::clone(&message));
            }
        }
        inner.correlation.record(&message);
        inner.published += 1;
        Ok(())
    }

    /// Messages that shared `key`, in publish order.
    pub fn correlated_flow(&self, key: &CorrelationKey) -> Vec<Arc<DecodedMessage>> {
        lock(&self.inner).correlation.flow(key)
    }

    /// End every subscription's stream and reject further publishing.
    ///
    /// Messages already queued stay readable ahead of the end-of-stream
    /// marker. Closing twice is a no-op.
    pub fn close(&self) {
        let mut inner = lock(&self.inner);
        if inner.state == BusState::Closed {
            return;
        }
        for subscription in inner.subscriptions.drain(..) {
            subscription.end_of_stream();
        }
        inner.state = BusState::Closed;
        log::info!("Bus closed after {} published messages", inner.published);
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.inner).state == BusState::Closed
    }

    pub fn stats(&self) -> BusStats {
        let inner = lock(&self.inner);
        BusStats {
            published: inner.published,
            rejected: inner.rejected,
            active_subscriptions: inner.subscriptions.len(),
            dropped: inner.subscriptions.iter().map(|s| s.dropped()).sum(),
            tracked_keys: inner.correlation.len(),
            evicted_keys: inner.correlation.evicted(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::subscription::{Delivery, SubscriptionState};
    use crate::common::detail::MessageDetail;
    use crate::common::types::{CorrelationKind, CorrelationValue, DecodedLine, Layer, Level, RawLineEvent};
    use chrono::Utc;
    use std::time::{Duration, Instant};

    fn bus(capacity: usize) -> FanoutBus {
        FanoutBus::new(&BusConfig {
            subscription_capacity: capacity,
            ..BusConfig::default()
        })
        .unwrap()
    }

    fn message(id: u64, layer: Layer) -> Arc<DecodedMessage> {
        let raw = RawLineEvent {
            source_id: "gnb".to_string(),
            source_kind: "ran".to_string(),
            received_at: Utc::now(),
            text: format!("line {}", id),
        };
        let mut line = DecodedLine::new(layer, Level::Info, "Test", MessageDetail::Unparsed);
        if let Some(value) = CorrelationValue::normalize(CorrelationKind::Rnti, "0x4601") {
            line.correlation_keys.insert(CorrelationKind::Rnti, value);
        }
        Arc::new(DecodedMessage::from_decoded(id, &raw, line))
    }

    fn message_ids(subscription: &Subscription) -> Vec<u64> {
        subscription
            .drain(usize::MAX)
            .iter()
            .filter_map(|d| d.message().map(|m| m.id))
            .collect()
    }

    #[test]
    fn test_layer_filters_split_the_stream() {
        let bus = bus(200);
        let (phy, _) = bus.subscribe_spec("layer=PHY").unwrap();
        let (mac, _) = bus.subscribe(Filter::predicate(|m| m.layer == Layer::Mac)).unwrap();

        let layers = [
            Layer::Phy,
            Layer::Mac,
            Layer::Mac,
            Layer::Phy,
            Layer::Mac,
            Layer::Phy,
            Layer::Mac,
            Layer::Mac,
            Layer::Phy,
            Layer::Mac,
        ];
        for (i, layer) in layers.iter().enumerate() {
            bus.publish(message(i as u64 + 1, *layer)).unwrap();
        }

        let phy_ids = message_ids(&phy);
        let mac_ids = message_ids(&mac);
        assert_eq!(phy_ids, vec![1, 4, 6, 9]);
        assert_eq!(mac_ids, vec![2, 3, 5, 7, 8, 10]);
        assert!(phy_ids.iter().all(|id| !mac_ids.contains(id)));
    }

    #[test]
    fn test_predicate_runs_inside_publish() {
        let bus = bus(200);
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let recorder = seen.clone();
        let (_subscription, _) = bus
            .subscribe(Filter::predicate(move |m| {
                lock(&recorder).push(m.id);
                true
            }))
            .unwrap();

        bus.publish(message(1, Layer::Phy)).unwrap();
        assert_eq!(*lock(&seen), vec![1]);
        bus.publish(message(2, Layer::Mac)).unwrap();
        assert_eq!(*lock(&seen), vec![1, 2]);
    }

    #[test]
    fn test_tiny_queue_loses_oldest_only() {
        let bus = bus(200);
        let (tiny, _) = bus.subscribe_with_capacity(Filter::All, 3).unwrap();
        let (roomy, _) = bus.subscribe(Filter::All).unwrap();
        for id in 1..=8 {
            bus.publish(message(id, Layer::Phy)).unwrap();
        }

        assert_eq!(tiny.dropped(), 5);
        assert_eq!(message_ids(&tiny), vec![6, 7, 8]);
        assert_eq!(roomy.dropped(), 0);
        assert_eq!(message_ids(&roomy), (1..=8).collect::<Vec<_>>());
    }

    #[test]
    fn test_slow_subscriber_does_not_hold_back_fast_one() {
        let bus = bus(4);
        let (_slow, _) = bus.subscribe(Filter::All).unwrap();
        let (fast, _) = bus.subscribe(Filter::All).unwrap();

        let start = Instant::now();
        for id in 1..=1000 {
            bus.publish(message(id, Layer::Mac)).unwrap();
            // The fast consumer keeps up; the slow one never reads.
            assert_eq!(fast.try_next().and_then(|d| d.message().map(|m| m.id)), Some(id));
        }
        assert!(start.elapsed() < Duration::from_secs(5));
        assert_eq!(bus.stats().dropped, 996);
    }

    #[test]
    fn test_close_delivers_end_of_stream_and_rejects_publish() {
        let bus = bus(2);
        let (subscription, _) = bus.subscribe(Filter::All).unwrap();
        bus.publish(message(1, Layer::Phy)).unwrap();
        bus.publish(message(2, Layer::Phy)).unwrap();
        bus.close();

        assert_eq!(subscription.state(), SubscriptionState::Closed);
        let batch = subscription.drain(10);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[2], Delivery::EndOfStream);
        assert_eq!(embassy_futures::block_on(subscription.next()), Delivery::EndOfStream);

        assert_eq!(bus.publish(message(3, Layer::Phy)), Err(BusError::Closed));
        assert!(matches!(bus.subscribe(Filter::All), Err(BusError::Closed)));
        assert_eq!(bus.stats().rejected, 1);
    }

    #[test]
    fn test_unsubscribe_is_immediate() {
        let bus = bus(10);
        let (subscription, unsubscribe) = bus.subscribe(Filter::All).unwrap();
        bus.publish(message(1, Layer::Phy)).unwrap();
        unsubscribe.unsubscribe();
        bus.publish(message(2, Layer::Phy)).unwrap();

        assert_eq!(bus.stats().active_subscriptions, 0);
        assert_eq!(subscription.try_next(), Some(Delivery::EndOfStream));
    }

    #[test]
    fn test_dropping_subscription_detaches_it() {
        let bus = bus(10);
        {
            let _subscription = bus.subscribe(Filter::All).unwrap();
            assert_eq!(bus.stats().active_subscriptions, 1);
        }
        assert_eq!(bus.stats().active_subscriptions, 0);
    }

    #[test]
    fn test_invalid_filter_and_zero_capacity() {
        let bus = bus(10);
        assert!(matches!(bus.subscribe_spec("layer=NOPE"), Err(BusError::InvalidFilter(_))));
        assert!(matches!(bus.subscribe_with_capacity(Filter::All, 0), Err(BusError::CapacityZero)));
        assert!(matches!(
            FanoutBus::new(&BusConfig {
                subscription_capacity: 0,
                ..BusConfig::default()
            }),
            Err(BusError::CapacityZero)
        ));
    }

    #[test]
    fn test_correlated_flow() {
        let bus = bus(10);
        for id in 1..=3 {
            bus.publish(message(id, Layer::Rrc)).unwrap();
        }
        let key = CorrelationKey::parse("rnti=0x4601").unwrap();
        let flow: Vec<u64> = bus.correlated_flow(&key).iter().map(|m| m.id).collect();
        assert_eq!(flow, vec![1, 2, 3]);
        assert_eq!(bus.stats().tracked_keys, 1);
    }
}
