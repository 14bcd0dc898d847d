//! Sample action set served by the binary and driven by the e2e suites.
//!
//! Exercises each runtime feature: a notifier-driven items list (shared
//! across connections), a session-scoped current user with a login mutation,
//! a validated add-item mutation, and a plain fetch.

use std::sync::Arc;

use lq_core::validate::from_fn;
use lq_core::{
    Action, ActionFactory, ActionMap, CachePolicy, Fetch, Mutation, Notifier, Query, SessionStore,
    Store, handler,
};
use serde_json::{Value, json};

/// The shared item table and its change signal, visible to every connection.
#[derive(Clone)]
pub struct ItemTable {
    pub items: Store<Vec<Value>>,
    pub changed: Notifier,
}

impl Default for ItemTable {
    fn default() -> Self {
        Self::new()
    }
}

impl ItemTable {
    pub fn new() -> Self {
        Self {
            items: Store::new(Vec::new()),
            changed: Notifier::new(),
        }
    }

    /// Insert a row and fire the change signal, like an external writer
    /// observed through a table notifier.
    pub fn insert(&self, row: Value) {
        self.items.mutate(|rows| rows.push(row));
        self.changed.notify();
    }
}

pub fn demo_factory() -> ActionFactory {
    let table = ItemTable::new();
    factory_over(table)
}

/// Factory over an externally owned table, so tests can drive the data
/// while the server serves it.
pub fn factory_over(table: ItemTable) -> ActionFactory {
    Arc::new(move || build_actions(&table))
}

fn build_actions(table: &ItemTable) -> ActionMap {
    let mut actions = ActionMap::new();

    // itemsList: recomputes whenever the table's change signal fires.
    let items = table.items.clone();
    actions.insert(
        "itemsList".to_owned(),
        Action::query(
            Query::new(handler(move |_params| {
                let items = items.clone();
                async move { Ok(Value::Array(items.get())) }
            }))
            .dep(Arc::new(table.changed.clone()))
            .cache(CachePolicy::Infinite),
        ),
    );

    // Per-connection: the session's authenticated user.  Created inside the
    // factory, so it binds to the connection being opened.
    let current_user: SessionStore<Value> = SessionStore::new(Value::Null);

    // sessionUser: live view over the session store.
    let user = current_user.clone();
    actions.insert(
        "sessionUser".to_owned(),
        Action::query(
            Query::new(handler(move |_params| {
                let user = user.clone();
                async move { user.get() }
            }))
            .dep(Arc::new(current_user.clone())),
        ),
    );

    // login: sets the session user; other sessions are untouched.
    let user = current_user.clone();
    actions.insert(
        "login".to_owned(),
        Action::mutation(
            Mutation::new(handler(move |params| {
                let user = user.clone();
                async move {
                    user.set(params.clone())?;
                    Ok(params)
                }
            }))
            .validator(from_fn(|raw| {
                if raw.get("username").is_some_and(Value::is_string) {
                    Ok(raw)
                } else {
                    Err("username must be a string".to_owned())
                }
            })),
        ),
    );

    // addItem: validated insert that pokes the change signal.
    let table_for_add = table.clone();
    actions.insert(
        "addItem".to_owned(),
        Action::mutation(
            Mutation::new(handler(move |params| {
                let table = table_for_add.clone();
                async move {
                    table.insert(params.clone());
                    Ok(params)
                }
            }))
            .validator(from_fn(|raw| match raw.get("name") {
                Some(Value::String(_)) => Ok(raw),
                _ => Err("name must be a string".to_owned()),
            })),
        ),
    );

    // ping: a plain fetch, answered with a single update.
    actions.insert(
        "ping".to_owned(),
        Action::fetch(Fetch::new(handler(|_params| async {
            Ok(json!("pong"))
        }))),
    );

    actions
}
