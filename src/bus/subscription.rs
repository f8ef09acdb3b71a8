//! Per-subscriber bounded delivery queues.
//!
//! Each subscription owns its own queue. The bus pushes into it under the
//! subscription's lock only; the consumer pops at its own pace. When the
//! queue is full the oldest queued message is dropped and counted, so a slow
//! consumer loses its own backlog without slowing anyone else down.

use embassy_sync::waitqueue::AtomicWaker;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::poll_fn;
use std::sync::{Arc, Mutex, Weak};
use std::task::Poll;

use crate::common::types::DecodedMessage;

use super::fanout::BusInner;
use super::filter::Filter;
use super::lock;

/// One item taken off a subscription queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Message(Arc<DecodedMessage>),
    /// The bus was closed; nothing follows.
    EndOfStream,
}

impl Delivery {
    pub fn message(&self) -> Option<&Arc<DecodedMessage>> {
        match self {
            Delivery::Message(message) => Some(message),
            Delivery::EndOfStream => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SubscriptionState {
    Active,
    Closed,
}

struct QueueState {
    queue: VecDeque<Delivery>,
    state: SubscriptionState,
    /// End of stream has been handed to the consumer.
    finished: bool,
    dropped: u64,
}

/// The part of a subscription shared between the bus and the consumer.
pub(crate) struct SubscriptionShared {
    pub(crate) id: u64,
    pub(crate) filter: Filter,
    capacity: usize,
    queue: Mutex<QueueState>,
    waker: AtomicWaker,
}

impl SubscriptionShared {
    pub(crate) fn new(id: u64, filter: Filter, capacity: usize) -> Self {
        Self {
            id,
            filter,
            capacity,
            queue: Mutex::new(QueueState {
                queue: VecDeque::with_capacity(capacity.min(1024)),
                state: SubscriptionState::Active,
                finished: false,
                dropped: 0,
            }),
            waker: AtomicWaker::new(),
        }
    }

    /// Enqueue a message, dropping the oldest one if the queue is full.
    pub(crate) fn push(&self, message: Arc<DecodedMessage>) {
        {
            let mut state = lock(&self.queue);
            if state.state == SubscriptionState::Closed {
                return;
            }
            if state.queue.len() >= self.capacity {
                state.queue.pop_front();
                state.dropped += 1;
                if state.dropped == 1 || state.dropped % 1000 == 0 {
                    log::warn!(
                        "Subscription {} queue full ({} messages), dropped {} oldest so far",
                        self.id,
                        self.capacity,
                        state.dropped
                    );
                }
            }
            state.queue.push_back(Delivery::Message(message));
        }
        self.waker.wake();
    }

    /// Append the end-of-stream marker past capacity and close the queue.
    pub(crate) fn end_of_stream(&self) {
        {
            let mut state = lock(&self.queue);
            if state.state == SubscriptionState::Closed {
                return;
            }
            state.queue.push_back(Delivery::EndOfStream);
            state.state = SubscriptionState::Closed;
        }
        self.waker.wake();
    }

    /// Discard everything queued and stop accepting messages.
    pub(crate) fn cancel(&self) {
        {
            let mut state = lock(&self.queue);
            state.queue.clear();
            state.state = SubscriptionState::Closed;
            state.finished = true;
        }
        self.waker.wake();
    }

    pub(crate) fn dropped(&self) -> u64 {
        lock(&self.queue).dropped
    }
}

/// Consumer handle of a subscription.
///
/// Dropping the handle unsubscribes.
pub struct Subscription {
    shared: Arc<SubscriptionShared>,
    bus: Weak<Mutex<BusInner>>,
}

impl Subscription {
    pub(crate) fn new(shared: Arc<SubscriptionShared>, bus: Weak<Mutex<BusInner>>) -> Self {
        Self { shared, bus }
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn state(&self) -> SubscriptionState {
        lock(&self.shared.queue).state
    }

    /// Messages dropped from this subscription's queue because it was full.
    pub fn dropped(&self) -> u64 {
        self.shared.dropped()
    }

    /// Number of queued deliveries.
    pub fn len(&self) -> usize {
        lock(&self.shared.queue).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Take the next delivery without waiting.
    ///
    /// Returns `None` while the queue is empty. After the end of stream was
    /// delivered or the subscription was cancelled, keeps returning
    /// `Some(Delivery::EndOfStream)`.
    pub fn try_next(&self) -> Option<Delivery> {
        let mut state = lock(&self.shared.queue);
        Self::pop(&mut state)
    }

    fn pop(state: &mut QueueState) -> Option<Delivery> {
        if state.finished {
            return Some(Delivery::EndOfStream);
        }
        let delivery = state.queue.pop_front()?;
        if delivery == Delivery::EndOfStream {
            state.finished = true;
        }
        Some(delivery)
    }

    /// Wait for the next delivery.
    pub async fn next(&self) -> Delivery {
        poll_fn(|cx| {
            if let Some(delivery) = self.try_next() {
                return Poll::Ready(delivery);
            }
            self.shared.waker.register(cx.waker());
            // A push may have landed between the check and the registration.
            match self.try_next() {
                Some(delivery) => Poll::Ready(delivery),
                None => Poll::Pending,
            }
        })
        .await
    }

    /// Take up to `max` queued deliveries without waiting.
    pub fn drain(&self, max: usize) -> Vec<Delivery> {
        let mut state = lock(&self.shared.queue);
        let mut batch = Vec::with_capacity(max.min(state.queue.len() + 1));
        while batch.len() < max {
            match Self::pop(&mut state) {
                Some(Delivery::EndOfStream) => {
                    batch.push(Delivery::EndOfStream);
                    break;
                }
                Some(delivery) => batch.push(delivery),
                None => break,
            }
        }
        batch
    }

    /// Wait until at least one delivery is available, then take up to `max`.
    pub async fn next_batch(&self, max: usize) -> Vec<Delivery> {
        let first = self.next().await;
        if first == Delivery::EndOfStream || max <= 1 {
            return vec![first];
        }
        let mut batch = vec![first];
        batch.extend(self.drain(max - 1));
        batch
    }

    /// A detached handle that cancels this subscription.
    pub fn unsubscribe_handle(&self) -> Unsubscribe {
        Unsubscribe {
            shared: Arc::downgrade(&self.shared),
            bus: self.bus.clone(),
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        detach(&self.bus, &self.shared);
    }
}

/// Cancels a subscription. Effective immediately: queued messages are
/// discarded and no further messages are delivered.
#[derive(Clone)]
pub struct Unsubscribe {
    shared: Weak<SubscriptionShared>,
    bus: Weak<Mutex<BusInner>>,
}

impl Unsubscribe {
    pub fn unsubscribe(self) {
        if let Some(shared) = self.shared.upgrade() {
            detach(&self.bus, &shared);
        }
    }
}

fn detach(bus: &Weak<Mutex<BusInner>>, shared: &Arc<SubscriptionShared>) {
    if let Some(bus) = bus.upgrade() {
        lock(&bus).remove_subscription(shared.id);
    }
    shared.cancel();
}
