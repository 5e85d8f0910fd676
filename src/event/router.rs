//! Typed publish/subscribe hub
//!
//! One topic per event type. Each topic owns an unbounded queue and a
//! dispatcher task, so `publish` never waits on handlers and delivery per
//! type is FIFO. Handler errors and panics are caught and logged; the
//! remaining handlers still receive the event.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::task::{Context, Poll};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

/// A listener for events of type `E`
///
/// Closures `Fn(&E) -> anyhow::Result<()>` implement this trait.
pub trait EventHandler<E>: Send + Sync + 'static {
    fn handle(&self, event: &E) -> anyhow::Result<()>;
}

impl<E, F> EventHandler<E> for F
where
    F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
{
    fn handle(&self, event: &E) -> anyhow::Result<()> {
        self(event)
    }
}

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Events accepted by `publish`
    pub published: u64,
    /// Successful handler invocations
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked
    pub handler_failures: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
}

type HandlerList<E> = RwLock<Vec<(SubscriptionId, Arc<dyn EventHandler<E>>)>>;

struct Topic<E> {
    handlers: Arc<HandlerList<E>>,
    /// `None` when no runtime was available; events are then delivered inline
    tx: Option<mpsc::UnboundedSender<E>>,
}

/// Typed, multi-subscriber event hub
pub struct EventRouter {
    topics: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    next_id: AtomicU64,
    counters: Arc<Counters>,
    runtime: Option<Handle>,
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl EventRouter {
    /// Create a router bound to the current tokio runtime, if any
    pub fn new() -> Self {
        Self {
            topics: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            counters: Arc::new(Counters::default()),
            runtime: Handle::try_current().ok(),
        }
    }

    /// Create a router whose dispatchers run on the given runtime
    pub fn with_runtime(handle: Handle) -> Self {
        Self {
            runtime: Some(handle),
            ..Self::new()
        }
    }

    /// Publish an event to every subscriber of `E`
    ///
    /// Never blocks on handlers. Events of a type with no subscribers are
    /// dropped.
    pub fn publish<E: Send + 'static>(&self, event: E) {
        let Some(topic) = self.topic::<E>() else {
            tracing::trace!(
                event_type = std::any::type_name::<E>(),
                "No subscribers, event dropped"
            );
            return;
        };
        self.counters.published.fetch_add(1, Ordering::Relaxed);

        match &topic.tx {
            Some(tx) => {
                if let Err(mpsc::error::SendError(event)) = tx.send(event) {
                    // Dispatcher gone (runtime shut down): deliver inline
                    deliver(&topic.handlers, &self.counters, &event);
                }
            }
            None => deliver(&topic.handlers, &self.counters, &event),
        }
    }

    /// Register a handler for events of type `E`
    pub fn subscribe<E, H>(&self, handler: H) -> SubscriptionId
    where
        E: Send + 'static,
        H: EventHandler<E>,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let topic = self.topic_or_create::<E>();
        write_lock(&topic.handlers).push((id, Arc::new(handler)));

        tracing::debug!(
            event_type = std::any::type_name::<E>(),
            subscription = id.0,
            "Subscription added"
        );
        id
    }

    /// Remove a handler; returns false if it was not registered
    pub fn unsubscribe<E: Send + 'static>(&self, id: SubscriptionId) -> bool {
        let Some(topic) = self.topic::<E>() else {
            return false;
        };
        let mut handlers = write_lock(&topic.handlers);
        let before = handlers.len();
        handlers.retain(|(sid, _)| *sid != id);
        before != handlers.len()
    }

    /// Subscribe with an async stream instead of a callback
    ///
    /// The subscription is removed when the stream is dropped.
    pub fn subscribe_stream<E>(self: &Arc<Self>) -> EventStream<E>
    where
        E: Clone + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel::<E>();
        let id = self.subscribe::<E, _>(move |event: &E| {
            // A closed receiver means the stream is being dropped
            let _ = tx.send(event.clone());
            Ok(())
        });
        EventStream {
            inner: UnboundedReceiverStream::new(rx),
            router: Arc::downgrade(self),
            id,
        }
    }

    /// Number of handlers registered for `E`
    pub fn subscriber_count<E: Send + 'static>(&self) -> usize {
        self.topic::<E>()
            .map(|t| read_lock(&t.handlers).len())
            .unwrap_or(0)
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            published: self.counters.published.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            handler_failures: self.counters.handler_failures.load(Ordering::Relaxed),
        }
    }

    fn topic<E: Send + 'static>(&self) -> Option<Arc<Topic<E>>> {
        read_lock(&self.topics)
            .get(&TypeId::of::<E>())
            .and_then(|t| t.downcast_ref::<Arc<Topic<E>>>())
            .cloned()
    }

    fn topic_or_create<E: Send + 'static>(&self) -> Arc<Topic<E>> {
        if let Some(topic) = self.topic::<E>() {
            return topic;
        }

        let mut topics = write_lock(&self.topics);
        // Another subscriber may have created it between the two locks
        if let Some(topic) = topics
            .get(&TypeId::of::<E>())
            .and_then(|t| t.downcast_ref::<Arc<Topic<E>>>())
        {
            return topic.clone();
        }

        let handlers: Arc<HandlerList<E>> = Arc::new(RwLock::new(Vec::new()));
        let runtime = self.runtime.clone().or_else(|| Handle::try_current().ok());
        let tx = match runtime {
            Some(handle) => {
                let (tx, rx) = mpsc::unbounded_channel::<E>();
                handle.spawn(dispatch_loop(rx, handlers.clone(), self.counters.clone()));
                Some(tx)
            }
            None => {
                tracing::warn!(
                    event_type = std::any::type_name::<E>(),
                    "No tokio runtime, events will be delivered inline"
                );
                None
            }
        };

        let topic = Arc::new(Topic { handlers, tx });
        topics.insert(TypeId::of::<E>(), Box::new(topic.clone()));
        topic
    }
}

async fn dispatch_loop<E: Send + 'static>(
    mut rx: mpsc::UnboundedReceiver<E>,
    handlers: Arc<HandlerList<E>>,
    counters: Arc<Counters>,
) {
    while let Some(event) = rx.recv().await {
        deliver(&handlers, &counters, &event);
    }
    tracing::trace!(event_type = std::any::type_name::<E>(), "Dispatcher stopped");
}

fn deliver<E: Send + 'static>(handlers: &HandlerList<E>, counters: &Counters, event: &E) {
    // Snapshot so handlers may subscribe/unsubscribe without deadlocking
    let snapshot: Vec<_> = read_lock(handlers).iter().cloned().collect();

    for (id, handler) in snapshot {
        let outcome =
            std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| handler.handle(event)));
        match outcome {
            Ok(Ok(())) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
            }
            Ok(Err(e)) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = std::any::type_name::<E>(),
                    subscription = id.0,
                    error = %e,
                    "Event handler failed"
                );
            }
            Err(panic) => {
                counters.handler_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    event_type = std::any::type_name::<E>(),
                    subscription = id.0,
                    panic = panic_message(&panic),
                    "Event handler panicked"
                );
            }
        }
    }
}

fn panic_message(payload: &Box<dyn Any + Send>) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

fn read_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_lock<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// Async stream of events of type `E`; unsubscribes on drop
pub struct EventStream<E: Send + 'static> {
    inner: UnboundedReceiverStream<E>,
    router: Weak<EventRouter>,
    id: SubscriptionId,
}

impl<E: Send + 'static> EventStream<E> {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }
}

impl<E: Send + 'static> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<E>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<E: Send + 'static> Drop for EventStream<E> {
    fn drop(&mut self) {
        if let Some(router) = self.router.upgrade() {
            router.unsubscribe::<E>(self.id);
        }
    }
}
