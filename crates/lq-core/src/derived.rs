// Derived computations: re-runnable async functions over reactive deps.
//
// Lifecycle: dependency watches are acquired when the first subscriber
// arrives and released when the last one leaves.  At most one recompute is
// in flight per computation; any number of dependency fires during a run
// coalesce into exactly one follow-up run.  With a debounce interval, each
// fire restarts a single timer and the run starts when the timer survives.
//
// A failed recompute is delivered to each subscriber exactly once and the
// computation returns to idle; the next fire retries.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::Value;
use tokio::time::sleep;

use crate::error::CoreError;
use crate::session::{SessionId, current_session, with_session};
use crate::source::{Reactive, Scope, WatchGuard, scope_union};

/// Result caching across recomputes and zero-subscriber windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// Never keep results; every new subscriber waits for a fresh run.
    None,
    /// Keep the last result for the given duration after each run.
    Ttl(Duration),
    /// Keep the last result for the computation's lifetime.
    Infinite,
}

/// The stored recompute function.  Reads its inputs (stores, captured
/// params) itself; the engine only decides *when* it runs.
pub type ComputeFn = Arc<dyn Fn() -> BoxFuture<'static, Result<Value, CoreError>> + Send + Sync>;

type ResultFn = Arc<dyn Fn(&Result<Value, CoreError>) + Send + Sync>;

struct SubEntry {
    callback: ResultFn,
    cancelled: Arc<AtomicBool>,
}

struct State {
    subscribers: Vec<SubEntry>,
    watches: Vec<WatchGuard>,
    running: bool,
    pending: bool,
    last_value: Option<Value>,
    // Bumping an epoch invalidates the matching sleeper.
    debounce_epoch: u64,
    expiry_epoch: u64,
}

struct Inner {
    deps: Vec<Arc<dyn Reactive>>,
    compute: ComputeFn,
    cache: CachePolicy,
    debounce: Option<Duration>,
    /// Ambient session captured at creation; re-bound around every run so
    /// session stores resolve inside the compute body.
    session: Option<SessionId>,
    state: Mutex<State>,
}

/// A cached, re-runnable computation over reactive dependencies.
///
/// Subscribers receive every produced result (`Ok` or `Err`) in production
/// order; a new subscriber receives the cached value immediately when one
/// exists, otherwise a run is forced.
pub struct Derived {
    inner: Arc<Inner>,
}

impl Clone for Derived {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Derived {
    pub fn new(
        deps: Vec<Arc<dyn Reactive>>,
        compute: ComputeFn,
        cache: CachePolicy,
        debounce: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                deps,
                compute,
                cache,
                debounce,
                session: current_session(),
                state: Mutex::new(State {
                    subscribers: Vec::new(),
                    watches: Vec::new(),
                    running: false,
                    pending: false,
                    last_value: None,
                    debounce_epoch: 0,
                    expiry_epoch: 0,
                }),
            }),
        }
    }

    /// `Session` if any dependency is session-scoped, else `Global`.
    pub fn scope(&self) -> Scope {
        scope_union(&self.inner.deps)
    }

    /// Request a re-run outside of any dependency fire (debounce and
    /// coalescing apply as usual).
    pub fn invalidate(&self) {
        Inner::fire(&self.inner);
    }

    pub fn subscriber_count(&self) -> usize {
        let mut st = self.inner.state.lock().expect("derived state lock");
        st.subscribers
            .retain(|e| !e.cancelled.load(Ordering::SeqCst));
        st.subscribers.len()
    }

    /// Register a subscriber for produced results.
    ///
    /// The first subscriber acquires the dependency watches; session-scoped
    /// dependencies therefore need an ambient session id at that point.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Result<Value, CoreError>) + Send + Sync + 'static,
    ) -> Result<WatchGuard, CoreError> {
        let callback: ResultFn = Arc::new(callback);
        let cancelled = Arc::new(AtomicBool::new(false));

        let needs_watches = {
            let st = self.inner.state.lock().expect("derived state lock");
            st.subscribers.is_empty() && st.watches.is_empty()
        };
        // Watches are acquired outside the state lock: an adapter may tick
        // synchronously while starting its listener.
        let mut acquired = Vec::new();
        if needs_watches {
            let weak = Arc::downgrade(&self.inner);
            for dep in &self.inner.deps {
                let weak = weak.clone();
                let listener: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        Inner::fire(&inner);
                    }
                });
                match dep.watch(listener) {
                    Ok(watch) => acquired.push(watch),
                    Err(err) => {
                        for watch in &acquired {
                            watch.cancel();
                        }
                        return Err(err);
                    }
                }
            }
        }

        let cached = {
            let mut st = self.inner.state.lock().expect("derived state lock");
            if st.watches.is_empty() {
                st.watches = acquired;
            } else {
                // Lost a first-subscriber race; the duplicates are dropped.
                for watch in &acquired {
                    watch.cancel();
                }
            }
            st.subscribers.push(SubEntry {
                callback: Arc::clone(&callback),
                cancelled: Arc::clone(&cancelled),
            });
            st.last_value.clone()
        };

        if let Some(value) = cached {
            // Cached fast path: no recompute just to freshen.
            callback(&Ok(value));
        } else {
            let idle = !self.inner.state.lock().expect("derived state lock").running;
            if idle {
                Inner::fire(&self.inner);
            }
        }

        let weak = Arc::downgrade(&self.inner);
        let token = Arc::clone(&cancelled);
        Ok(WatchGuard::with_teardown(cancelled, move || {
            Inner::release(&weak, &token);
        }))
    }
}

impl Inner {
    /// A dependency fired (or a run was requested).
    fn fire(inner: &Arc<Inner>) {
        if let Some(delay) = inner.debounce {
            let epoch = {
                let mut st = inner.state.lock().expect("derived state lock");
                st.debounce_epoch += 1;
                st.debounce_epoch
            };
            let weak = Arc::downgrade(inner);
            tokio::spawn(async move {
                sleep(delay).await;
                let Some(inner) = weak.upgrade() else { return };
                let due = {
                    let st = inner.state.lock().expect("derived state lock");
                    st.debounce_epoch == epoch && !st.subscribers.is_empty()
                };
                if due {
                    Inner::schedule(&inner);
                }
            });
        } else {
            Inner::schedule(inner);
        }
    }

    /// Enter running, or mark a follow-up if a run is already in flight.
    fn schedule(inner: &Arc<Inner>) {
        let start = {
            let mut st = inner.state.lock().expect("derived state lock");
            if st.running {
                st.pending = true;
                false
            } else {
                st.running = true;
                true
            }
        };
        if start {
            let inner = Arc::clone(inner);
            tokio::spawn(Inner::run_loop(inner));
        }
    }

    async fn run_loop(inner: Arc<Inner>) {
        loop {
            let fut = (inner.compute)();
            let result = match inner.session {
                Some(id) => with_session(id, fut).await,
                None => fut.await,
            };

            let subscribers = {
                let mut st = inner.state.lock().expect("derived state lock");
                if let Ok(value) = &result {
                    match inner.cache {
                        CachePolicy::None => {}
                        CachePolicy::Infinite => st.last_value = Some(value.clone()),
                        CachePolicy::Ttl(ttl) => {
                            st.last_value = Some(value.clone());
                            st.expiry_epoch += 1;
                            Inner::schedule_expiry(&inner, st.expiry_epoch, ttl);
                        }
                    }
                }
                st.subscribers
                    .retain(|e| !e.cancelled.load(Ordering::SeqCst));
                st.subscribers
                    .iter()
                    .map(|e| (Arc::clone(&e.callback), Arc::clone(&e.cancelled)))
                    .collect::<Vec<_>>()
            };
            for (callback, cancelled) in &subscribers {
                if !cancelled.load(Ordering::SeqCst) {
                    callback(&result);
                }
            }

            let again = {
                let mut st = inner.state.lock().expect("derived state lock");
                if st.pending {
                    st.pending = false;
                    true
                } else {
                    st.running = false;
                    false
                }
            };
            if !again {
                break;
            }
        }
    }

    fn schedule_expiry(inner: &Arc<Inner>, epoch: u64, ttl: Duration) {
        let weak = Arc::downgrade(inner);
        tokio::spawn(async move {
            sleep(ttl).await;
            let Some(inner) = weak.upgrade() else { return };
            let mut st = inner.state.lock().expect("derived state lock");
            if st.expiry_epoch == epoch {
                st.last_value = None;
            }
        });
    }

    /// Teardown hook of one subscriber guard.
    fn release(weak: &Weak<Inner>, token: &Arc<AtomicBool>) {
        let Some(inner) = weak.upgrade() else { return };
        let watches = {
            let mut st = inner.state.lock().expect("derived state lock");
            st.subscribers
                .retain(|e| !Arc::ptr_eq(&e.cancelled, token) && !e.cancelled.load(Ordering::SeqCst));
            if st.subscribers.is_empty() {
                // Kill any scheduled debounce timer along with the watches.
                st.debounce_epoch += 1;
                std::mem::take(&mut st.watches)
            } else {
                Vec::new()
            }
        };
        // Cancelled outside the lock: an adapter may stop its listener here.
        for watch in watches {
            watch.cancel();
        }
    }
}
