//! # Per-subscriber delivery queue.
//!
//! Every subscription owns one [`DeliveryQueue`]; the bus pushes into it and the
//! subscriber pops from it. Queues are independent: a slow subscriber only fills its own.
//!
//! ## Overflow behavior
//! ```text
//! offer(ev) on a full queue:
//!   Unbounded   → never full
//!   DropOldest  → pop_front(), push_back(ev), dropped += 1
//!   DropNewest  → ev discarded, dropped += 1
//!   Block       → ev discarded, dropped += 1 (waiting publishers call wait_for_space first)
//! ```
//!
//! ## Why not a channel
//! The bus needs two things `tokio::sync::mpsc`/`broadcast` do not give together:
//! `DropOldest` evicts from the receiver's end of the buffer, and every queue of a publish
//! is filled in one non-awaiting step under the bus ordering lock. Waiting for room
//! (`wait_for_space`) is therefore split from inserting (`offer`), so the ordering lock is
//! never held across an `.await`.
//!
//! ## Rules
//! - Per-queue FIFO.
//! - A closed queue rejects offers; buffered events can still be drained.
//! - `items` has exactly one consumer and uses `notify_one`, which stores a permit.
//! - `space` may have several waiting publishers; it uses `notify_waiters` on registered
//!   (`enable`d) waiters, so a pop between the fullness check and the await is not lost.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

use super::event::Event;

/// Backpressure policy applied when a subscriber queue is full.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Queues grow without bound (default).
    #[default]
    Unbounded,
    /// Discard the oldest buffered event to make room.
    DropOldest,
    /// Discard the event being published.
    DropNewest,
    /// Publisher waits until the subscriber frees a slot.
    Block,
}

impl OverflowPolicy {
    /// True for the policies that use a queue capacity.
    #[inline]
    pub fn is_bounded(&self) -> bool {
        !matches!(self, OverflowPolicy::Unbounded)
    }
}

/// Result of a single offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PushOutcome {
    Queued,
    DroppedOldest,
    DroppedNewest,
    Closed,
}

struct QueueState {
    buf: VecDeque<Arc<Event>>,
    closed: bool,
}

/// Ordered event queue of one subscriber.
pub(crate) struct DeliveryQueue {
    state: Mutex<QueueState>,
    items: Notify,
    space: Notify,
    policy: OverflowPolicy,
    capacity: usize,
    dropped: AtomicU64,
}

impl DeliveryQueue {
    /// Creates an empty queue; `capacity` is clamped to a minimum of 1.
    pub(crate) fn new(policy: OverflowPolicy, capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                buf: VecDeque::new(),
                closed: false,
            }),
            items: Notify::new(),
            space: Notify::new(),
            policy,
            capacity: capacity.max(1),
            dropped: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Appends `ev` according to the overflow policy, never waiting.
    ///
    /// A full [`OverflowPolicy::Block`] queue rejects `ev` like `DropNewest`; callers that
    /// want to wait use [`wait_for_space`](Self::wait_for_space) first.
    pub(crate) fn offer(&self, ev: Arc<Event>) -> PushOutcome {
        let mut st = self.lock();
        if st.closed {
            return PushOutcome::Closed;
        }
        if !self.policy.is_bounded() || st.buf.len() < self.capacity {
            st.buf.push_back(ev);
            drop(st);
            self.items.notify_one();
            return PushOutcome::Queued;
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                st.buf.pop_front();
                st.buf.push_back(ev);
                drop(st);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                self.items.notify_one();
                PushOutcome::DroppedOldest
            }
            OverflowPolicy::DropNewest | OverflowPolicy::Block | OverflowPolicy::Unbounded => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                PushOutcome::DroppedNewest
            }
        }
    }

    /// True while a bounded queue holds `capacity` events and is still open.
    pub(crate) fn is_full(&self) -> bool {
        let st = self.lock();
        self.policy.is_bounded() && !st.closed && st.buf.len() >= self.capacity
    }

    /// Waits until the queue has a free slot or is closed.
    pub(crate) async fn wait_for_space(&self) {
        loop {
            let notified = self.space.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if !self.is_full() {
                return;
            }
            notified.await;
        }
    }

    /// Pops the next event, waiting while the queue is empty and open.
    ///
    /// Returns `None` once the queue is closed and drained.
    pub(crate) async fn pop(&self) -> Option<Arc<Event>> {
        loop {
            {
                let mut st = self.lock();
                if let Some(ev) = st.buf.pop_front() {
                    drop(st);
                    self.space.notify_waiters();
                    return Some(ev);
                }
                if st.closed {
                    return None;
                }
            }
            self.items.notified().await;
        }
    }

    /// Pops the next event without waiting.
    pub(crate) fn try_pop(&self) -> Option<Arc<Event>> {
        let ev = self.lock().buf.pop_front();
        if ev.is_some() {
            self.space.notify_waiters();
        }
        ev
    }

    /// Rejects further pushes and wakes both sides.
    pub(crate) fn close(&self) {
        self.lock().closed = true;
        self.items.notify_one();
        self.space.notify_waiters();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().buf.len()
    }

    /// Events discarded by the drop policies so far.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
