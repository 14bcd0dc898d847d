//! Ambient session context and session-scoped stores.
//!
//! A session id is bound for the dynamic extent of one inbound frame's
//! processing -- including every async continuation spawned from it -- via a
//! tokio task-local.  Session stores resolve the ambient id on each access,
//! so query bodies read their own session's state without threading the id.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, OnceLock, Weak};

use uuid::Uuid;

use crate::error::CoreError;
use crate::source::{Reactive, Scope, Subscribers, WatchGuard};

/// Opaque per-connection identity.  Generated on connect, torn down on
/// disconnect; a reconnect is a new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

tokio::task_local! {
    static CURRENT_SESSION: SessionId;
}

/// Bind `id` as the ambient session for the dynamic extent of `fut`.
///
/// The binding survives every `.await` inside `fut`; it is released when the
/// future completes.  Nested bindings shadow outer ones.
pub async fn with_session<F: Future>(id: SessionId, fut: F) -> F::Output {
    CURRENT_SESSION.scope(id, fut).await
}

/// Synchronous variant of [`with_session`] for non-async call sites (the
/// per-connection action factory runs under this).
pub fn with_session_sync<R>(id: SessionId, f: impl FnOnce() -> R) -> R {
    CURRENT_SESSION.sync_scope(id, f)
}

/// The ambient session id, if one is bound.
pub fn current_session() -> Option<SessionId> {
    CURRENT_SESSION.try_with(|id| *id).ok()
}

// ---------------------------------------------------------------------------
// Session teardown registry
// ---------------------------------------------------------------------------

/// Anything holding per-session slots that must be dropped when the session
/// ends.  Session stores register themselves on construction.
trait SessionCleanup: Send + Sync {
    fn discard_session(&self, id: SessionId);
}

fn cleanup_registry() -> &'static Mutex<Vec<Weak<dyn SessionCleanup>>> {
    static REGISTRY: OnceLock<Mutex<Vec<Weak<dyn SessionCleanup>>>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(Vec::new()))
}

/// Release every session-scoped slot owned by `id`.
///
/// The server calls this once per connection, after cancelling the
/// connection's subscriptions.
pub fn end_session(id: SessionId) {
    let live: Vec<Arc<dyn SessionCleanup>> = {
        let mut registry = cleanup_registry().lock().expect("session registry lock");
        registry.retain(|weak| weak.strong_count() > 0);
        registry.iter().filter_map(Weak::upgrade).collect()
    };
    for store in live {
        store.discard_session(id);
    }
}

// ---------------------------------------------------------------------------
// Session store
// ---------------------------------------------------------------------------

struct Slot<T> {
    value: T,
    subscribers: Arc<Subscribers<T>>,
}

struct SessionStoreInner<T> {
    initial: T,
    slots: Mutex<HashMap<SessionId, Slot<T>>>,
}

impl<T: Clone + Send + Sync + 'static> SessionStoreInner<T> {
    /// Run `f` on the current session's slot, creating it lazily.
    fn with_slot<R>(&self, id: SessionId, f: impl FnOnce(&mut Slot<T>) -> R) -> R {
        let mut slots = self.slots.lock().expect("session store lock");
        let slot = slots.entry(id).or_insert_with(|| Slot {
            value: self.initial.clone(),
            subscribers: Arc::new(Subscribers::new()),
        });
        f(slot)
    }
}

impl<T: Clone + Send + Sync + 'static> SessionCleanup for SessionStoreInner<T> {
    fn discard_session(&self, id: SessionId) {
        self.slots.lock().expect("session store lock").remove(&id);
    }
}

/// A family of per-session values behind one handle.
///
/// Reads and writes route to the slot of the ambient session id; the slot is
/// created lazily from the initial value on first access.  Fan-out reaches
/// only subscribers registered under the same session.  Any access with no
/// ambient session bound fails with [`CoreError::NoSessionContext`].
pub struct SessionStore<T> {
    inner: Arc<SessionStoreInner<T>>,
}

impl<T> Clone for SessionStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> SessionStore<T> {
    pub fn new(initial: T) -> Self {
        let inner = Arc::new(SessionStoreInner {
            initial,
            slots: Mutex::new(HashMap::new()),
        });
        let weak: Weak<dyn SessionCleanup> =
            Arc::downgrade(&(Arc::clone(&inner) as Arc<dyn SessionCleanup>));
        cleanup_registry()
            .lock()
            .expect("session registry lock")
            .push(weak);
        Self { inner }
    }

    fn session(&self) -> Result<SessionId, CoreError> {
        current_session().ok_or(CoreError::NoSessionContext)
    }

    pub fn get(&self) -> Result<T, CoreError> {
        let id = self.session()?;
        Ok(self.inner.with_slot(id, |slot| slot.value.clone()))
    }

    /// Replace this session's value and fan out to this session's
    /// subscribers before returning.
    pub fn set(&self, value: T) -> Result<(), CoreError> {
        let id = self.session()?;
        let subscribers = self.inner.with_slot(id, |slot| {
            slot.value = value.clone();
            Arc::clone(&slot.subscribers)
        });
        subscribers.emit(&value);
        Ok(())
    }

    pub fn mutate(&self, f: impl FnOnce(&mut T)) -> Result<(), CoreError> {
        let id = self.session()?;
        let (next, subscribers) = self.inner.with_slot(id, |slot| {
            f(&mut slot.value);
            (slot.value.clone(), Arc::clone(&slot.subscribers))
        });
        subscribers.emit(&next);
        Ok(())
    }

    /// Subscribe under the ambient session.  The callback fires immediately
    /// with the session's current value, then once per same-session write.
    pub fn subscribe(
        &self,
        callback: impl Fn(&T) + Send + Sync + 'static,
    ) -> Result<WatchGuard, CoreError> {
        let id = self.session()?;
        let callback: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(callback);
        let (current, guard) = self.inner.with_slot(id, |slot| {
            (slot.value.clone(), slot.subscribers.add(Arc::clone(&callback)))
        });
        callback(&current);
        Ok(guard)
    }

    /// Number of sessions with a materialized slot.
    pub fn session_count(&self) -> usize {
        self.inner.slots.lock().expect("session store lock").len()
    }
}

impl<T: Clone + Send + Sync + 'static> Reactive for SessionStore<T> {
    fn scope(&self) -> Scope {
        Scope::Session
    }

    fn watch(&self, listener: Arc<dyn Fn() + Send + Sync>) -> Result<WatchGuard, CoreError> {
        let id = self.session()?;
        let adapted: Arc<dyn Fn(&T) + Send + Sync> = Arc::new(move |_| listener());
        Ok(self.inner.with_slot(id, |slot| slot.subscribers.add(adapted)))
    }
}
