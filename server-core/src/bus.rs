//! The typed event bus. Delivery is synchronous and in registration order;
//! a subscriber that panics is isolated, logged and never halts the fan-out.
//! Subscribers that need to do long work must hand off to their own task.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::BusError;
use crate::events::{Event, EventKind};

/// Default cap on subscribers per kind; hitting it is almost always a leak.
pub const DEFAULT_MAX_SUBSCRIBERS: usize = 100;

type Callback = Arc<dyn Fn(&Event) + Send + Sync>;

struct Entry {
    id: u64,
    callback: Callback,
}

struct Inner {
    subscribers: HashMap<EventKind, Vec<Entry>>,
    waiters: HashMap<EventKind, Vec<(u64, oneshot::Sender<Event>)>>,
    next_id: u64,
    max_per_kind: usize,
}

/// Handle returned by [`EventBus::subscribe`]; pass it back to
/// [`EventBus::unsubscribe`] to end the subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionHandle {
    kind: EventKind,
    id: u64,
}

impl SubscriptionHandle {
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Subject to subscribers fan-out keyed by [`EventKind`].
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Mutex<Inner>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_max_subscribers(DEFAULT_MAX_SUBSCRIBERS)
    }

    pub fn with_max_subscribers(max_per_kind: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                subscribers: HashMap::new(),
                waiters: HashMap::new(),
                next_id: 1,
                max_per_kind,
            })),
        }
    }

    /// Registers a callback for one event kind. Callbacks run synchronously on
    /// the emitting task, in registration order.
    pub fn subscribe<F>(&self, kind: EventKind, callback: F) -> Result<SubscriptionHandle, BusError>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        let limit = inner.max_per_kind;
        let id = inner.next_id;
        let list = inner.subscribers.entry(kind).or_default();
        if list.len() >= limit {
            return Err(BusError::TooManySubscribers {
                kind: kind.as_str(),
                limit,
            });
        }
        list.push(Entry {
            id,
            callback: Arc::new(callback),
        });
        inner.next_id += 1;
        Ok(SubscriptionHandle { kind, id })
    }

    /// Removes a subscription. Unknown handles are ignored, which makes the
    /// call idempotent.
    pub fn unsubscribe(&self, handle: SubscriptionHandle) {
        let mut inner = self.inner.lock().expect("bus lock poisoned");
        if let Some(list) = inner.subscribers.get_mut(&handle.kind) {
            list.retain(|entry| entry.id != handle.id);
        }
    }

    /// How many subscribers a kind currently has.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        let inner = self.inner.lock().expect("bus lock poisoned");
        inner.subscribers.get(&kind).map_or(0, Vec::len)
    }

    /// Delivers one event to all subscribers of its kind, then completes any
    /// single-shot waiters. A panicking subscriber is caught and logged.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        let (callbacks, waiters) = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            let callbacks: Vec<Callback> = inner
                .subscribers
                .get(&kind)
                .map(|list| list.iter().map(|e| e.callback.clone()).collect())
                .unwrap_or_default();
            let waiters = inner.waiters.remove(&kind).unwrap_or_default();
            (callbacks, waiters)
        };

        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback(event)));
            if outcome.is_err() {
                tracing::error!(kind = kind.as_str(), "Subscriber panicked during delivery.");
            }
        }
        for (_, waiter) in waiters {
            // A waiter whose future was dropped is simply gone.
            let _ = waiter.send(event.clone());
        }
    }

    /// Waits for the next event of a kind. With a timeout the wait fails with
    /// [`BusError::WaitTimeout`]; cancellation (dropping the future) removes
    /// the waiter on the next emission of that kind.
    pub async fn wait_for(
        &self,
        kind: EventKind,
        timeout: Option<Duration>,
    ) -> Result<Event, BusError> {
        let receiver = {
            let mut inner = self.inner.lock().expect("bus lock poisoned");
            let id = inner.next_id;
            inner.next_id += 1;
            let (sender, receiver) = oneshot::channel();
            inner.waiters.entry(kind).or_default().push((id, sender));
            receiver
        };

        let result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, receiver).await {
                Ok(inner) => inner,
                Err(_) => {
                    return Err(BusError::WaitTimeout {
                        kind: kind.as_str(),
                    });
                }
            },
            None => receiver.await,
        };
        result.map_err(|_| BusError::WaitTimeout {
            kind: kind.as_str(),
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
