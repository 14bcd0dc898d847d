use std::collections::HashMap;
use std::sync::Arc;

use lq_core::{ActionFactory, CoreError, LiveQuery, SessionId, WatchGuard};
use serde_json::Value;
use tokio::sync::RwLock;

/// Dedup key for one shared live computation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ActiveKey {
    pub session_id: SessionId,
    pub action: String,
    /// Canonical encoding of the validated params.
    pub fingerprint: String,
}

/// One shared computation and its attached subscription instances.
pub struct ActiveEntry {
    pub query: LiveQuery,
    /// subId -> cancellation token
    pub subscribers: HashMap<String, WatchGuard>,
}

pub type ActiveRegistry = Arc<RwLock<HashMap<ActiveKey, ActiveEntry>>>;

#[derive(Clone)]
pub struct AppState {
    /// Builds one connection's action map, under that connection's session.
    pub factory: ActionFactory,
    /// Server-global registry of live subscriptions across all connections.
    pub active: ActiveRegistry,
}

impl AppState {
    pub fn new(factory: ActionFactory) -> Self {
        Self {
            factory,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Attach `sub_id` under `key`, creating the shared computation via
    /// `make` when the key is not yet live.  Re-using a `sub_id` replaces
    /// (and cancels) the previous attachment.
    pub async fn attach_subscriber(
        &self,
        key: ActiveKey,
        sub_id: String,
        make: impl FnOnce() -> LiveQuery,
        on_result: impl Fn(&Result<Value, CoreError>) + Send + Sync + 'static,
    ) -> Result<(), CoreError> {
        let mut active = self.active.write().await;
        let fresh = !active.contains_key(&key);
        let entry = active.entry(key.clone()).or_insert_with(|| ActiveEntry {
            query: make(),
            subscribers: HashMap::new(),
        });
        match entry.query.subscribe(on_result) {
            Ok(guard) => {
                if let Some(previous) = entry.subscribers.insert(sub_id, guard) {
                    previous.cancel();
                }
                Ok(())
            }
            Err(err) => {
                if fresh {
                    active.remove(&key);
                }
                Err(err)
            }
        }
    }

    /// Detach `sub_id`; dropping the last subscriber drops the entry, which
    /// releases the computation's dependency watches.  Returns whether the
    /// subscription existed.
    pub async fn detach_subscriber(&self, key: &ActiveKey, sub_id: &str) -> bool {
        let mut active = self.active.write().await;
        let Some(entry) = active.get_mut(key) else {
            return false;
        };
        let Some(guard) = entry.subscribers.remove(sub_id) else {
            return false;
        };
        guard.cancel();
        if entry.subscribers.is_empty() {
            active.remove(key);
        }
        true
    }

    /// Cancel and drop every entry owned by `session_id`.  Returns the
    /// number of entries removed.
    pub async fn cleanup_session(&self, session_id: SessionId) -> usize {
        let mut active = self.active.write().await;
        let keys: Vec<ActiveKey> = active
            .keys()
            .filter(|key| key.session_id == session_id)
            .cloned()
            .collect();
        let mut removed = 0;
        for key in keys {
            if let Some(entry) = active.remove(&key) {
                for guard in entry.subscribers.values() {
                    guard.cancel();
                }
                removed += 1;
            }
        }
        removed
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }
}
