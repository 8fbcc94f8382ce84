//! Observable trace of provide/request events.
//!
//! An [`EventDistributor`] both retains every event it has ever seen and
//! fans new ones out to live subscribers. Replay-on-subscribe means a late
//! observer never misses anything that happened before it registered.

use std::sync::Arc;

use parking_lot::Mutex;

/// What kind of thing happened to a key during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A key's provider is about to run (or its cached value is about to be
    /// returned).
    Request,
    /// A key's value has been produced.
    Provide,
}

impl EventKind {
    fn as_str(&self) -> &'static str {
        match self {
            EventKind::Request => "request",
            EventKind::Provide => "provide",
        }
    }
}

/// A single point in a resolution's history.
#[derive(Debug, Clone)]
pub struct ProvideEvent {
    /// Path from the resolution root to the key this event concerns.
    pub trace: Vec<String>,
    pub kind: EventKind,
    /// Free-form annotation, e.g. "cache hit" or an error summary.
    pub data: Option<String>,
}

impl ProvideEvent {
    pub fn request(trace: Vec<String>) -> Self {
        ProvideEvent { trace, kind: EventKind::Request, data: None }
    }

    pub fn provide(trace: Vec<String>) -> Self {
        ProvideEvent { trace, kind: EventKind::Provide, data: None }
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = Some(data.into());
        self
    }

    pub fn key(&self) -> Option<&str> {
        self.trace.last().map(|s| s.as_str())
    }
}

impl std::fmt::Display for ProvideEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.kind.as_str(), self.trace.join(" => "))
    }
}

type Callback = Arc<dyn Fn(&ProvideEvent) + Send + Sync>;

/// Retains every event ever emitted and fans each one out, in registration
/// order, to every subscribed callback. A subscriber registered after the
/// fact is immediately replayed the full history before any future event.
#[derive(Default)]
pub struct EventDistributor {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    history: Vec<ProvideEvent>,
    subscribers: Vec<(u64, Callback)>,
    next_id: u64,
}

/// Handle returned by [`EventDistributor::register`]; pass it back to
/// [`EventDistributor::unregister`] to stop receiving events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

impl EventDistributor {
    pub fn new() -> Self {
        EventDistributor { inner: Mutex::new(Inner::default()) }
    }

    /// Registers `cb`; it is immediately replayed the full event history
    /// (in emission order) before observing anything new.
    pub fn register(&self, cb: impl Fn(&ProvideEvent) + Send + Sync + 'static) -> SubscriptionId {
        let cb: Callback = Arc::new(cb);
        let mut inner = self.inner.lock();
        for event in &inner.history {
            cb(event);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.push((id, cb));
        SubscriptionId(id)
    }

    /// Idempotent: unregistering an unknown or already-removed id is a no-op.
    pub fn unregister(&self, id: SubscriptionId) {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|(sid, _)| *sid != id.0);
    }

    /// Synchronous, ordered emission: retained in history, then every
    /// subscriber is invoked in registration order.
    pub fn emit(&self, event: ProvideEvent) {
        let mut inner = self.inner.lock();
        inner.history.push(event.clone());
        for (_, cb) in &inner.subscribers {
            cb(&event);
        }
    }

    pub fn history(&self) -> Vec<ProvideEvent> {
        self.inner.lock().history.clone()
    }
}

impl std::fmt::Debug for EventDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "EventDistributor(history_len={})", self.inner.lock().history.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn late_subscriber_replays_full_history() {
        let dist = EventDistributor::new();
        dist.emit(ProvideEvent::request(vec!["a".into()]));
        dist.emit(ProvideEvent::provide(vec!["a".into()]));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        dist.register(move |e| seen2.lock().push(e.to_string()));

        assert_eq!(seen.lock().len(), 2);
    }

    #[test]
    fn unregister_is_idempotent() {
        let dist = EventDistributor::new();
        let id = dist.register(|_| {});
        dist.unregister(id);
        dist.unregister(id);
        dist.unregister(SubscriptionId(9999));
    }

    #[test]
    fn emission_order_is_preserved_per_subscriber() {
        let dist = EventDistributor::new();
        let count = Arc::new(AtomicUsize::new(0));
        let order = Arc::new(Mutex::new(Vec::new()));
        let order2 = order.clone();
        let count2 = count.clone();
        dist.register(move |e| {
            order2.lock().push(e.key().map(|s| s.to_string()));
            count2.fetch_add(1, Ordering::SeqCst);
        });
        dist.emit(ProvideEvent::request(vec!["x".into()]));
        dist.emit(ProvideEvent::request(vec!["y".into()]));
        assert_eq!(*order.lock(), vec![Some("x".to_string()), Some("y".to_string())]);
    }

    #[test]
    fn registration_order_determines_callback_order() {
        let dist = EventDistributor::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let l1 = log.clone();
        let l2 = log.clone();
        dist.register(move |_| l1.lock().push(1));
        dist.register(move |_| l2.lock().push(2));
        dist.emit(ProvideEvent::request(vec!["a".into()]));
        assert_eq!(*log.lock(), vec![1, 2]);
    }
}
