//! # Broadcast bus with one queue per subscriber.
//!
//! [`BroadcastBus`] fans every published [`Event`] out to all current subscribers.
//!
//! ## Architecture
//! ```text
//! Publishers (many):                                   Subscribers (many):
//!   P1 ──┐                                 ┌──► [queue S1] ──► Subscription::recv()
//!   P2 ──┼──► order lock ──► snapshot ──► offer ──► [queue S2] ──► Subscription::recv()
//!   PN ──┘   (sync, never held across await)   └──► [queue SN] ──► Subscription::recv()
//!
//! publish (Block bus):
//!   loop {
//!     lock order, snapshot
//!     ├─ some target queue full ──► unlock, wait_for_space(queue), retry
//!     └─ otherwise             ──► offer to every target, unlock, return
//!   }
//! ```
//!
//! ## Rules
//! - **Global order**: every queue is filled under one ordering lock, so all subscribers
//!   observe the same order.
//! - **No replay**: a subscription only sees events published after it was created.
//! - **Snapshot delivery**: the subscriber set is copied under its mutex inside the ordering
//!   lock; subscribing or unsubscribing concurrently never disturbs a delivery.
//! - **Backpressure**: governed per queue by [`OverflowPolicy`]; only `Block` makes
//!   `publish` wait, and it waits outside the ordering lock, so other publishers and
//!   [`try_publish`](BroadcastBus::try_publish) keep going. A waiting publish whose full
//!   target unsubscribes re-snapshots and delivers to the rest.
//! - **Non-waiting publish**: `try_publish` treats a full `Block` queue like `DropNewest`.
//! - **Removal**: `unsubscribe(id)` or dropping the [`Subscription`] closes its queue.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;

use super::event::Event;
use super::queue::{DeliveryQueue, OverflowPolicy, PushOutcome};
use crate::config::Config;

/// Identifier of a subscription, unique per bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

struct BusInner {
    subscribers: Mutex<HashMap<SubscriptionId, Arc<DeliveryQueue>>>,
    order: Mutex<()>,
    next_id: AtomicU64,
    closed: AtomicBool,
    overflow: OverflowPolicy,
    capacity: usize,
}

impl BusInner {
    fn subscribers(&self) -> MutexGuard<'_, HashMap<SubscriptionId, Arc<DeliveryQueue>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn order(&self) -> MutexGuard<'_, ()> {
        self.order.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies the current subscriber set; callers hold the ordering lock.
    fn snapshot(&self) -> Vec<(SubscriptionId, Arc<DeliveryQueue>)> {
        self.subscribers()
            .iter()
            .map(|(id, q)| (*id, Arc::clone(q)))
            .collect()
    }

    fn remove(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers().remove(&id);
        match removed {
            Some(queue) => {
                queue.close();
                true
            }
            None => false,
        }
    }
}

/// Multi-subscriber event broadcaster.
///
/// ### Properties
/// - **Cloneable**: clones share the same subscriber set.
/// - **Infallible**: `publish`/`subscribe` never fail; a closed bus simply delivers nothing.
#[derive(Clone)]
pub struct BroadcastBus {
    inner: Arc<BusInner>,
}

impl BroadcastBus {
    /// Creates a bus whose subscriber queues follow `overflow`.
    ///
    /// `capacity` applies to the bounded policies and is clamped to a minimum of 1.
    #[must_use]
    pub fn new(overflow: OverflowPolicy, capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                order: Mutex::new(()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
                overflow,
                capacity: capacity.max(1),
            }),
        }
    }

    /// Creates a bus with unbounded subscriber queues.
    #[must_use]
    pub fn unbounded() -> Self {
        Self::new(OverflowPolicy::Unbounded, 1)
    }

    /// Creates a bus from `cfg.bus_overflow` and `cfg.bus_capacity`.
    #[must_use]
    pub fn from_config(cfg: &Config) -> Self {
        Self::new(cfg.bus_overflow, cfg.bus_capacity)
    }

    /// Registers a new subscriber with its own empty queue.
    ///
    /// Subscribing to a closed bus returns an already closed subscription.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let queue = Arc::new(DeliveryQueue::new(self.inner.overflow, self.inner.capacity));

        {
            let mut subs = self.inner.subscribers();
            if self.inner.closed.load(Ordering::Acquire) {
                queue.close();
            } else {
                subs.insert(id, Arc::clone(&queue));
            }
        }

        tracing::trace!(subscription = %id, "subscribed");
        Subscription {
            id,
            queue,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `event` to every subscriber registered when the delivery happens.
    ///
    /// On a `Block` bus this waits until every target queue has room.
    /// Returns how many queues accepted the event (drop-oldest counts as accepted).
    pub async fn publish(&self, event: Event) -> usize {
        let ev = Arc::new(event);
        loop {
            let full = {
                let _order = self.inner.order();
                let targets = self.inner.snapshot();
                let full = match self.inner.overflow {
                    OverflowPolicy::Block => targets.iter().find(|(_, q)| q.is_full()).cloned(),
                    _ => None,
                };
                match full {
                    Some(full) => full,
                    None => return deliver(&ev, &targets),
                }
            };
            let (id, queue) = full;
            tracing::trace!(subscription = %id, seq = ev.seq, "queue full; waiting for space");
            queue.wait_for_space().await;
        }
    }

    /// Delivers `event` without ever waiting.
    ///
    /// Identical to [`publish`](Self::publish) except that a full `Block` queue discards
    /// the event like `DropNewest`. Use this where the caller must not be held up by a
    /// slow subscriber.
    pub fn try_publish(&self, event: Event) -> usize {
        let ev = Arc::new(event);
        let _order = self.inner.order();
        let targets = self.inner.snapshot();
        deliver(&ev, &targets)
    }

    /// Removes a subscriber and closes its queue.
    ///
    /// Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.inner.remove(id);
        if removed {
            tracing::trace!(subscription = %id, "unsubscribed");
        }
        removed
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers().len()
    }

    /// Closes every queue and rejects future subscriptions.
    ///
    /// Subscribers can still drain what was already delivered.
    pub fn close(&self) {
        let drained: Vec<Arc<DeliveryQueue>> = {
            let mut subs = self.inner.subscribers();
            self.inner.closed.store(true, Ordering::Release);
            subs.drain().map(|(_, q)| q).collect()
        };
        for queue in drained {
            queue.close();
        }
    }

    /// The overflow policy applied to subscriber queues.
    pub fn overflow(&self) -> OverflowPolicy {
        self.inner.overflow
    }
}

/// Offers `ev` to each target; the caller holds the ordering lock.
fn deliver(ev: &Arc<Event>, targets: &[(SubscriptionId, Arc<DeliveryQueue>)]) -> usize {
    let mut delivered = 0;
    for (id, queue) in targets {
        match queue.offer(Arc::clone(ev)) {
            PushOutcome::Queued => delivered += 1,
            PushOutcome::DroppedOldest => {
                delivered += 1;
                tracing::debug!(subscription = %id, seq = ev.seq, "queue full; dropped oldest event");
            }
            PushOutcome::DroppedNewest => {
                tracing::debug!(subscription = %id, seq = ev.seq, "queue full; dropped event");
            }
            PushOutcome::Closed => {}
        }
    }
    delivered
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::unbounded()
    }
}

/// Receiving side of one subscriber.
///
/// Dropping a subscription unsubscribes it.
pub struct Subscription {
    id: SubscriptionId,
    queue: Arc<DeliveryQueue>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Identifier accepted by [`BroadcastBus::unsubscribe`].
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Waits for the next event; `None` once unsubscribed (or the bus closed) and drained.
    pub async fn recv(&mut self) -> Option<Arc<Event>> {
        self.queue.pop().await
    }

    /// Returns the next buffered event without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<Event>> {
        self.queue.try_pop()
    }

    /// Number of events buffered for this subscriber.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Events discarded for this subscriber by a drop policy.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// True once the queue no longer accepts events.
    pub fn is_closed(&self) -> bool {
        self.queue.is_closed()
    }

    /// Converts the subscription into a stream of events.
    pub fn into_stream(self) -> impl Stream<Item = Arc<Event>> + Send + 'static {
        futures::stream::unfold(self, |mut sub| async move {
            let ev = sub.recv().await?;
            Some((ev, sub))
        })
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("pending", &self.pending())
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
        self.queue.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use futures::StreamExt;
    use std::time::Duration;

    fn label(ev: &Event) -> &'static str {
        ev.kind.as_label()
    }

    #[tokio::test]
    async fn subscribers_see_publish_order() {
        let bus = BroadcastBus::unbounded();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();

        bus.publish(Event::new(EventKind::Custom("e1"))).await;
        bus.publish(Event::new(EventKind::Custom("e2"))).await;

        for sub in [&mut s1, &mut s2] {
            assert_eq!(label(&sub.recv().await.unwrap()), "e1");
            assert_eq!(label(&sub.recv().await.unwrap()), "e2");
        }
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let bus = BroadcastBus::unbounded();
        let mut early = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("before"))).await;

        let mut late = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("after"))).await;

        assert_eq!(label(&early.recv().await.unwrap()), "before");
        assert_eq!(label(&late.recv().await.unwrap()), "after");
        assert!(late.try_recv().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_publishers_yield_one_global_order() {
        let bus = BroadcastBus::unbounded();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();

        let mut publishers = Vec::new();
        for p in 0..4u32 {
            let bus = bus.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..50u32 {
                    bus.publish(Event::custom("n", p * 1000 + i)).await;
                }
            }));
        }
        for p in publishers {
            p.await.unwrap();
        }

        let mut seen1 = Vec::new();
        let mut seen2 = Vec::new();
        while let Some(ev) = s1.try_recv() {
            seen1.push(ev.seq);
        }
        while let Some(ev) = s2.try_recv() {
            seen2.push(ev.seq);
        }
        assert_eq!(seen1.len(), 200);
        assert_eq!(seen1, seen2);
    }

    #[tokio::test]
    async fn shared_event_instance() {
        let bus = BroadcastBus::unbounded();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();
        assert_eq!(bus.publish(Event::custom("x", 7u8)).await, 2);
        let (a, b) = (s1.recv().await.unwrap(), s2.recv().await.unwrap());
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn unsubscribe_isolates_others() {
        let bus = BroadcastBus::unbounded();
        let mut keep = bus.subscribe();
        let gone = bus.subscribe();

        assert!(bus.unsubscribe(gone.id()));
        assert!(!bus.unsubscribe(gone.id()));
        assert!(gone.is_closed());
        assert_eq!(bus.subscriber_count(), 1);

        assert_eq!(bus.publish(Event::new(EventKind::Custom("e"))).await, 1);
        assert_eq!(label(&keep.recv().await.unwrap()), "e");
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let bus = BroadcastBus::unbounded();
        {
            let _sub = bus.subscribe();
            assert_eq!(bus.subscriber_count(), 1);
        }
        assert_eq!(bus.subscriber_count(), 0);
        assert_eq!(bus.publish(Event::new(EventKind::Custom("e"))).await, 0);
    }

    #[tokio::test]
    async fn drop_newest_counts_per_subscriber() {
        let bus = BroadcastBus::new(OverflowPolicy::DropNewest, 1);
        let mut slow = bus.subscribe();
        let mut fast = bus.subscribe();

        bus.publish(Event::new(EventKind::Custom("a"))).await;
        assert_eq!(label(&fast.recv().await.unwrap()), "a");
        bus.publish(Event::new(EventKind::Custom("b"))).await;

        assert_eq!(slow.dropped(), 1);
        assert_eq!(fast.dropped(), 0);
        assert_eq!(label(&slow.recv().await.unwrap()), "a");
        assert_eq!(label(&fast.recv().await.unwrap()), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn block_policy_waits_only_for_full_queue() {
        let bus = BroadcastBus::new(OverflowPolicy::Block, 1);
        let mut sub = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("a"))).await;

        let publisher = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::new(EventKind::Custom("b"))).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!publisher.is_finished());

        assert_eq!(label(&sub.recv().await.unwrap()), "a");
        assert_eq!(publisher.await.unwrap(), 1);
        assert_eq!(label(&sub.recv().await.unwrap()), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn try_publish_never_waits_on_full_block_queue() {
        let bus = BroadcastBus::new(OverflowPolicy::Block, 1);
        let idle = bus.subscribe();
        let mut active = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("a"))).await;
        assert_eq!(label(&active.recv().await.unwrap()), "a");

        assert_eq!(bus.try_publish(Event::new(EventKind::Custom("b"))), 1);
        assert_eq!(idle.dropped(), 1);
        assert_eq!(idle.pending(), 1);
        assert_eq!(label(&active.try_recv().unwrap()), "b");
    }

    #[tokio::test(start_paused = true)]
    async fn parked_block_publish_does_not_hold_up_try_publish() {
        let bus = BroadcastBus::new(OverflowPolicy::Block, 1);
        let mut sub = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("a"))).await;

        let parked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::new(EventKind::Custom("b"))).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!parked.is_finished());

        assert_eq!(bus.try_publish(Event::new(EventKind::Custom("skipped"))), 0);
        assert_eq!(sub.dropped(), 1);

        assert_eq!(label(&sub.recv().await.unwrap()), "a");
        assert_eq!(parked.await.unwrap(), 1);
        assert_eq!(label(&sub.recv().await.unwrap()), "b");
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn parked_block_publish_resumes_when_full_target_unsubscribes() {
        let bus = BroadcastBus::new(OverflowPolicy::Block, 1);
        let mut keep = bus.subscribe();
        let stuck = bus.subscribe();
        assert_eq!(bus.publish(Event::new(EventKind::Custom("a"))).await, 2);
        assert_eq!(label(&keep.recv().await.unwrap()), "a");

        let parked = {
            let bus = bus.clone();
            tokio::spawn(async move { bus.publish(Event::new(EventKind::Custom("b"))).await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!parked.is_finished());

        drop(stuck);
        assert_eq!(parked.await.unwrap(), 1);
        assert_eq!(label(&keep.recv().await.unwrap()), "b");
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn subscriber_churn_does_not_disturb_long_lived_subscribers() {
        let bus = BroadcastBus::unbounded();
        let mut s1 = bus.subscribe();
        let mut s2 = bus.subscribe();
        let stop = Arc::new(AtomicBool::new(false));

        let mut churners = Vec::new();
        for c in 0..3u32 {
            let bus = bus.clone();
            let stop = Arc::clone(&stop);
            churners.push(tokio::spawn(async move {
                let mut rounds = 0u32;
                while !stop.load(Ordering::Acquire) {
                    let sub = bus.subscribe();
                    tokio::task::yield_now().await;
                    if (rounds + c) % 2 == 0 {
                        drop(sub);
                    } else {
                        bus.unsubscribe(sub.id());
                    }
                    rounds += 1;
                }
                rounds
            }));
        }

        let mut publishers = Vec::new();
        for p in 0..2u32 {
            let bus = bus.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..250u32 {
                    bus.publish(Event::custom("n", p * 1000 + i)).await;
                    if i % 16 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            }));
        }
        for p in publishers {
            p.await.unwrap();
        }
        stop.store(true, Ordering::Release);
        for c in churners {
            c.await.unwrap();
        }

        let mut seen1 = Vec::new();
        let mut seen2 = Vec::new();
        while let Some(ev) = s1.try_recv() {
            seen1.push(ev.seq);
        }
        while let Some(ev) = s2.try_recv() {
            seen2.push(ev.seq);
        }
        assert_eq!(seen1.len(), 500);
        assert_eq!(seen1, seen2);
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn close_ends_streams() {
        let bus = BroadcastBus::unbounded();
        let sub = bus.subscribe();
        bus.publish(Event::new(EventKind::Custom("last"))).await;
        bus.close();

        let labels: Vec<&'static str> = sub.into_stream().map(|ev| ev.kind.as_label()).collect().await;
        assert_eq!(labels, vec!["last"]);
        assert!(bus.subscribe().is_closed());
        assert_eq!(bus.subscriber_count(), 0);
    }
}
