//! Reactive sources: stores (value holders) and notifiers (change signals).
//!
//! Every source fans out to its subscribers synchronously, in registration
//! order, with no equality suppression: `set(x); set(x)` fires two callbacks.
//! Fan-out snapshots the subscriber list first, so a subscriber added during
//! a fan-out sees that event or the next one, never both and never neither,
//! and cancelling mid-fan-out is safe (tombstone flag checked per invoke).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::CoreError;

/// Visibility of a reactive source.
///
/// `Session` sources route reads, writes and fan-out through the ambient
/// session id; `Global` sources are shared across every connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Global,
    Session,
}

/// Cancellation token returned by every subscribe/watch call.
///
/// `cancel` is idempotent.  After it returns, the callback will not be
/// invoked again; a callback already executing is allowed to complete.
/// Dropping the token without cancelling leaves the subscription alive --
/// the callback is owned by the source's list, the token is the only way
/// to remove it.
pub struct WatchGuard {
    cancelled: Arc<AtomicBool>,
    teardown: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl WatchGuard {
    pub(crate) fn bare(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            teardown: Mutex::new(None),
        }
    }

    pub(crate) fn with_teardown(
        cancelled: Arc<AtomicBool>,
        teardown: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            cancelled,
            teardown: Mutex::new(Some(Box::new(teardown))),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let hook = self.teardown.lock().expect("teardown lock").take();
        if let Some(hook) = hook {
            hook();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchGuard")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

/// A dependency edge for derived computations: the scope of the source plus
/// a value-less change signal.  Computations re-read current values inside
/// their compute function, so the edge itself carries no payload.
pub trait Reactive: Send + Sync {
    fn scope(&self) -> Scope;

    /// Register a change listener.  Fails with `NoSessionContext` when the
    /// source is session-scoped and no ambient session id is bound.
    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError>;
}

/// Result scope of a computation over `deps`: `Session` if any input is
/// session-scoped, else `Global`.
pub fn scope_union(deps: &[Arc<dyn Reactive>]) -> Scope {
    if deps.iter().any(|d| d.scope() == Scope::Session) {
        Scope::Session
    } else {
        Scope::Global
    }
}

// ---------------------------------------------------------------------------
// Subscriber list
// ---------------------------------------------------------------------------

struct Entry<T> {
    callback: Arc<dyn Fn(&T) + Send + Sync>,
    cancelled: Arc<AtomicBool>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            callback: Arc::clone(&self.callback),
            cancelled: Arc::clone(&self.cancelled),
        }
    }
}

/// Registration-order subscriber list shared by stores and notifiers.
///
/// Cancelled entries are tombstoned by their guard and pruned on the next
/// emit; the list itself is never locked while callbacks run.
pub(crate) struct Subscribers<T> {
    entries: Mutex<Vec<Entry<T>>>,
}

impl<T> Subscribers<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn add(&self, callback: Arc<dyn Fn(&T) + Send + Sync>) -> WatchGuard {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.entries.lock().expect("subscriber lock").push(Entry {
            callback,
            cancelled: Arc::clone(&cancelled),
        });
        WatchGuard::bare(cancelled)
    }

    pub(crate) fn emit(&self, value: &T) {
        let snapshot: Vec<Entry<T>> = {
            let mut entries = self.entries.lock().expect("subscriber lock");
            entries.retain(|e| !e.cancelled.load(Ordering::SeqCst));
            entries.clone()
        };
        for entry in &snapshot {
            if !entry.cancelled.load(Ordering::SeqCst) {
                (entry.callback)(value);
            }
        }
    }

    /// Number of live (non-cancelled) subscribers.
    pub(crate) fn live_count(&self) -> usize {
        let mut entries = self.entries.lock().expect("subscriber lock");
        entries.retain(|e| !e.cancelled.load(Ordering::SeqCst));
        entries.len()
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

struct StoreInner<T> {
    value: Mutex<T>,
    subscribers: Subscribers<T>,
}

/// A shared value with synchronous change fan-out.
///
/// Cloning a `Store` creates another handle to the same state.  A new
/// subscriber receives the current value immediately.
pub struct Store<T> {
    inner: Arc<StoreInner<T>>,
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Store<T> {
    pub fn new(initial: T) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                value: Mutex::new(initial),
                subscribers: Subscribers::new(),
            }),
        }
    }

    pub fn get(&self) -> T {
        self.inner.value.lock().expect("store lock").clone()
    }

    /// Replace the value and fan out to all subscribers before returning.
    pub fn set(&self, value: T) {
        {
            let mut slot = self.inner.value.lock().expect("store lock");
            *slot = value.clone();
        }
        self.inner.subscribers.emit(&value);
    }

    /// Mutate the value in place, then fan out the new value.
    pub fn mutate(&self, f: impl FnOnce(&mut T)) {
        let next = {
            let mut slot = self.inner.value.lock().expect("store lock");
            f(&mut slot);
            slot.clone()
        };
        self.inner.subscribers.emit(&next);
    }

    /// Subscribe to value changes.  The callback fires immediately with the
    /// current value, then once per `set`/`mutate`.
    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> WatchGuard {
        let callback: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(callback);
        let guard = self.inner.subscribers.add(Arc::clone(&callback));
        let current = self.get();
        callback(&current);
        guard
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.live_count()
    }
}

impl<T: Clone + Send + Sync + 'static> Reactive for Store<T> {
    fn scope(&self) -> Scope {
        Scope::Global
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError> {
        // Change edge only: no initial tick, the value is re-read by the
        // computation itself.
        let adapted: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(move |_| listener());
        Ok(self.inner.subscribers.add(adapted))
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

struct NotifierInner {
    scope: Scope,
    subscribers: Subscribers<()>,
}

/// A value-less change signal.  Subscribers get no initial event.
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

impl Clone for Notifier {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier {
    pub fn new() -> Self {
        Self::with_scope(Scope::Global)
    }

    pub(crate) fn with_scope(scope: Scope) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                scope,
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Fan out one tick to all current subscribers before returning.
    pub fn notify(&self) {
        self.inner.subscribers.emit(&());
    }

    pub fn subscribe(&self, callback: impl Fn() + Send + Sync + 'static) -> WatchGuard {
        self.inner
            .subscribers
            .add(Arc::new(move |(): &()| callback()))
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.live_count()
    }

    /// Fuse several sources into one notifier: any input firing triggers one
    /// tick.  The result is session-scoped if any input is.
    ///
    /// Input watches are acquired eagerly, so session-scoped inputs require
    /// an ambient session id at the call site.
    pub fn any_of(deps: &[Arc<dyn Reactive>]) -> Result<FusedNotifier, CoreError> {
        let fused = Notifier::with_scope(scope_union(deps));
        let mut links = Vec::with_capacity(deps.len());
        for dep in deps {
            let tick = fused.clone();
            links.push(dep.watch(Arc::new(move || tick.notify()))?);
        }
        Ok(FusedNotifier {
            notifier: fused,
            links,
        })
    }
}

impl Reactive for Notifier {
    fn scope(&self) -> Scope {
        self.inner.scope
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError> {
        Ok(self
            .inner
            .subscribers
            .add(Arc::new(move |(): &()| listener())))
    }
}

/// A notifier derived from other sources.  Holds the input watches; `close`
/// severs them.
pub struct FusedNotifier {
    notifier: Notifier,
    links: Vec<WatchGuard>,
}

impl FusedNotifier {
    pub fn notifier(&self) -> &Notifier {
        &self.notifier
    }

    pub fn close(&self) {
        for link in &self.links {
            link.cancel();
        }
    }
}

impl Reactive for FusedNotifier {
    fn scope(&self) -> Scope {
        self.notifier.scope()
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError> {
        self.notifier.watch(listener)
    }
}
