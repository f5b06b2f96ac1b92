//! Shared live observations with a keep-warm grace window
//!
//! One upstream producer task feeds a `watch` channel; any number of
//! subscribers read it. The producer starts on the first subscribe and is
//! torn down only after the last subscriber has been gone for a grace
//! window, so rapid unsubscribe/resubscribe cycles (a recomposing UI, a
//! reconnecting embedder) reuse the warm subscription instead of
//! re-triggering upstream work.
//!
//! Once torn down, the channel is discarded with the producer: a later
//! subscriber gets a fresh channel starting from the initial value, and a
//! late result from the old producer cannot reach anyone.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::{Stream, wrappers::WatchStream};

/// A live value shared between subscribers, produced on demand
///
/// `producer` is invoked with the channel's sender whenever the observation
/// goes from cold to warm; the task it returns is aborted when the
/// observation goes cold again. Subscribing requires a Tokio runtime.
pub(crate) struct SharedWatch<T: Clone + Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

struct Inner<T: Clone + Send + Sync + 'static> {
    initial: T,
    grace: Duration,
    /// Live subscriber count; producer lifetime follows it
    subscribers: AtomicUsize,
    /// Bumped on every subscribe and last-unsubscribe; stale teardown
    /// timers compare against it and step aside
    epoch: AtomicU64,
    active: Mutex<Option<Active<T>>>,
    producer: Box<dyn Fn(watch::Sender<T>) -> JoinHandle<()> + Send + Sync>,
}

struct Active<T> {
    tx: watch::Sender<T>,
    task: JoinHandle<()>,
}

impl<T: Clone + Send + Sync + 'static> SharedWatch<T> {
    pub(crate) fn new(
        initial: T,
        grace: Duration,
        producer: impl Fn(watch::Sender<T>) -> JoinHandle<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                initial,
                grace,
                subscribers: AtomicUsize::new(0),
                epoch: AtomicU64::new(0),
                active: Mutex::new(None),
                producer: Box::new(producer),
            }),
        }
    }

    /// Subscribe, starting the producer if the observation is cold
    ///
    /// The returned stream yields the current value immediately, then every
    /// subsequent change. Dropping it counts as unsubscribing.
    pub(crate) fn subscribe(&self) -> SharedStream<T> {
        let mut active = self
            .inner
            .active
            .lock()
            .expect("shared observation state poisoned");

        self.inner.subscribers.fetch_add(1, Ordering::SeqCst);
        self.inner.epoch.fetch_add(1, Ordering::SeqCst);

        let rx = match active.as_ref() {
            Some(live) if !live.task.is_finished() => live.tx.subscribe(),
            _ => {
                let (tx, rx) = watch::channel(self.inner.initial.clone());
                let task = (self.inner.producer)(tx.clone());
                *active = Some(Active { tx, task });
                rx
            }
        };

        SharedStream {
            stream: WatchStream::new(rx),
            _guard: Guard {
                inner: Arc::clone(&self.inner),
            },
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Inner<T> {
    /// Abort the producer if nobody resubscribed since `epoch`
    fn teardown_if_idle(&self, epoch: u64) {
        let mut active = self.active.lock().expect("shared observation state poisoned");
        if self.subscribers.load(Ordering::SeqCst) == 0
            && self.epoch.load(Ordering::SeqCst) == epoch
            && let Some(live) = active.take()
        {
            live.task.abort();
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Drop for Inner<T> {
    fn drop(&mut self) {
        if let Ok(active) = self.active.get_mut()
            && let Some(live) = active.take()
        {
            live.task.abort();
        }
    }
}

/// Stream handle for one subscriber of a [`SharedWatch`]
pub struct SharedStream<T: Clone + Send + Sync + 'static> {
    stream: WatchStream<T>,
    _guard: Guard<T>,
}

impl<T: Clone + Send + Sync + 'static> Stream for SharedStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().stream).poll_next(cx)
    }
}

/// Decrements the subscriber count and schedules teardown on last drop
struct Guard<T: Clone + Send + Sync + 'static> {
    inner: Arc<Inner<T>>,
}

impl<T: Clone + Send + Sync + 'static> Drop for Guard<T> {
    fn drop(&mut self) {
        let remaining = self.inner.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        if remaining > 0 {
            return;
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let inner = Arc::clone(&self.inner);

        if inner.grace.is_zero() {
            inner.teardown_if_idle(epoch);
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    tokio::time::sleep(inner.grace).await;
                    inner.teardown_if_idle(epoch);
                });
            }
            // No runtime left to keep the producer warm on
            Err(_) => inner.teardown_if_idle(epoch),
        }
    }
}
