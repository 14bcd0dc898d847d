//! External notifier lifecycle.
//!
//! Concrete change producers (database LISTEN/NOTIFY clients, filesystem
//! watchers) live outside this crate; what they need from it is a notifier
//! that starts the underlying listener lazily on the first watcher, stops it
//! when the last one drops, and restarts it on re-subscribe -- without
//! leaking listeners under subscribe/unsubscribe churn.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::error::CoreError;
use crate::source::{Notifier, Reactive, Scope, WatchGuard};

/// Teardown returned by an adapter's start hook; called when the last
/// watcher drops.
pub type StopFn = Box<dyn FnOnce() + Send>;

type StartFn = Arc<dyn Fn(Notifier) -> StopFn + Send + Sync>;

struct Lifecycle {
    watchers: usize,
    stop: Option<StopFn>,
}

struct LazyInner {
    notifier: Notifier,
    start: StartFn,
    lifecycle: Mutex<Lifecycle>,
}

/// A global notifier bound to an external listener.
///
/// The start hook receives the notifier and may call `notify` from inside
/// its own I/O callback -- including synchronously while starting.
pub struct LazyNotifier {
    inner: Arc<LazyInner>,
}

impl Clone for LazyNotifier {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl LazyNotifier {
    pub fn new(start: impl Fn(Notifier) -> StopFn + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(LazyInner {
                notifier: Notifier::new(),
                start: Arc::new(start),
                lifecycle: Mutex::new(Lifecycle {
                    watchers: 0,
                    stop: None,
                }),
            }),
        }
    }

    pub fn watcher_count(&self) -> usize {
        self.inner.lifecycle.lock().expect("adapter lock").watchers
    }

    /// Whether the underlying listener is currently started.
    pub fn is_listening(&self) -> bool {
        self.inner.lifecycle.lock().expect("adapter lock").stop.is_some()
    }
}

impl Reactive for LazyNotifier {
    fn scope(&self) -> Scope {
        Scope::Global
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError> {
        // Register the edge first so a synchronous tick from the start hook
        // reaches this watcher too.
        let edge = self.inner.notifier.watch(listener)?;
        let start_now = {
            let mut lc = self.inner.lifecycle.lock().expect("adapter lock");
            lc.watchers += 1;
            lc.watchers == 1
        };
        if start_now {
            debug!("starting external listener");
            let stop = (self.inner.start)(self.inner.notifier.clone());
            self.inner.lifecycle.lock().expect("adapter lock").stop = Some(stop);
        }

        let inner = Arc::clone(&self.inner);
        Ok(WatchGuard::with_teardown(
            Arc::new(AtomicBool::new(false)),
            move || {
                edge.cancel();
                let stop = {
                    let mut lc = inner.lifecycle.lock().expect("adapter lock");
                    lc.watchers -= 1;
                    if lc.watchers == 0 { lc.stop.take() } else { None }
                };
                if let Some(stop) = stop {
                    debug!("stopping external listener");
                    stop();
                }
            },
        ))
    }
}

/// Shares one lazily-started notifier per key: `notifier_for("orders")` on
/// two call sites watches a single underlying listener.
pub struct NotifierPool<K> {
    start: Arc<dyn Fn(&K, Notifier) -> StopFn + Send + Sync>,
    entries: Mutex<HashMap<K, LazyNotifier>>,
}

impl<K: Eq + Hash + Clone + Send + Sync + 'static> NotifierPool<K> {
    pub fn new(start: impl Fn(&K, Notifier) -> StopFn + Send + Sync + 'static) -> Self {
        Self {
            start: Arc::new(start),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn notifier_for(&self, key: &K) -> LazyNotifier {
        let mut entries = self.entries.lock().expect("pool lock");
        entries
            .entry(key.clone())
            .or_insert_with(|| {
                let start = Arc::clone(&self.start);
                let key = key.clone();
                LazyNotifier::new(move |notifier| start(&key, notifier))
            })
            .clone()
    }

    pub fn key_count(&self) -> usize {
        self.entries.lock().expect("pool lock").len()
    }
}
