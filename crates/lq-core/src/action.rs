//! Action definitions: live queries, one-shot mutations, immediate fetches.
//!
//! An action map is built once per connection by the user-supplied factory,
//! inside that connection's session scope.  Payloads are JSON values end to
//! end; typed shapes live behind the validator and the handler closures.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::derived::{CachePolicy, ComputeFn, Derived};
use crate::error::CoreError;
use crate::source::{Reactive, Scope, WatchGuard};
use crate::validate::Validator;

/// Async handler over validated params.
pub type HandlerFn =
    Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, CoreError>> + Send + Sync>;

/// Adapt an async closure to a boxed handler.
pub fn handler<F, Fut>(f: F) -> HandlerFn
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, CoreError>> + Send + 'static,
{
    Arc::new(move |params| Box::pin(f(params)))
}

fn apply_validator(
    validator: Option<&Arc<dyn Validator>>,
    name: &str,
    raw: Option<Value>,
) -> Result<Value, CoreError> {
    // Absent params are the empty object, before and after validation.
    let raw = raw.unwrap_or(Value::Object(Map::new()));
    match validator {
        Some(validator) => validator.parse(raw).map_err(|reason| CoreError::InvalidInput {
            action: name.to_owned(),
            reason,
        }),
        None => Ok(raw),
    }
}

// ---------------------------------------------------------------------------
// Query
// ---------------------------------------------------------------------------

/// A subscribable computation definition.
///
/// Declared dependencies and watched stores merge into one dependency list;
/// the compute closure re-reads its stores on every run.
pub struct Query {
    validator: Option<Arc<dyn Validator>>,
    deps: Vec<Arc<dyn Reactive>>,
    cache: CachePolicy,
    debounce: Option<Duration>,
    compute: HandlerFn,
}

impl Query {
    pub fn new(compute: HandlerFn) -> Self {
        Self {
            validator: None,
            deps: Vec::new(),
            cache: CachePolicy::None,
            debounce: None,
            compute,
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Add a dependency; any of its fires re-runs the query.
    pub fn dep(mut self, source: Arc<dyn Reactive>) -> Self {
        self.deps.push(source);
        self
    }

    pub fn cache(mut self, policy: CachePolicy) -> Self {
        self.cache = policy;
        self
    }

    pub fn debounce(mut self, interval: Duration) -> Self {
        self.debounce = Some(interval);
        self
    }

    /// Validate raw params; absent params validate as `{}`.
    pub fn validate(&self, name: &str, raw: Option<Value>) -> Result<Value, CoreError> {
        apply_validator(self.validator.as_ref(), name, raw)
    }

    /// Start a live computation over validated params.
    ///
    /// One computation per invocation; sharing identical subscriptions is
    /// the multiplexer's concern, not the query's.
    pub fn start(&self, params: Value) -> LiveQuery {
        let compute = Arc::clone(&self.compute);
        let run: ComputeFn = Arc::new(move || compute(params.clone()));
        LiveQuery {
            derived: Derived::new(self.deps.clone(), run, self.cache, self.debounce),
        }
    }
}

/// A live result handle: the capability to subscribe to produced values.
pub struct LiveQuery {
    derived: Derived,
}

impl Clone for LiveQuery {
    fn clone(&self) -> Self {
        Self {
            derived: self.derived.clone(),
        }
    }
}

impl LiveQuery {
    pub fn subscribe(
        &self,
        callback: impl Fn(&Result<Value, CoreError>) + Send + Sync + 'static,
    ) -> Result<WatchGuard, CoreError> {
        self.derived.subscribe(callback)
    }

    pub fn scope(&self) -> Scope {
        self.derived.scope()
    }

    pub fn subscriber_count(&self) -> usize {
        self.derived.subscriber_count()
    }
}

// ---------------------------------------------------------------------------
// Mutation
// ---------------------------------------------------------------------------

/// A one-shot command.  No reactive machinery; the reply is correlated by
/// request id at the protocol layer.
pub struct Mutation {
    validator: Option<Arc<dyn Validator>>,
    execute: HandlerFn,
}

impl Mutation {
    pub fn new(execute: HandlerFn) -> Self {
        Self {
            validator: None,
            execute,
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Validate, execute, return the awaited result.
    pub async fn invoke(&self, name: &str, raw: Option<Value>) -> Result<Value, CoreError> {
        let params = apply_validator(self.validator.as_ref(), name, raw)?;
        (self.execute)(params).await
    }
}

// ---------------------------------------------------------------------------
// Fetch
// ---------------------------------------------------------------------------

/// A subscribe-shaped action producing a single immediate value: the
/// multiplexer emits exactly one update and keeps no subscription record.
pub struct Fetch {
    validator: Option<Arc<dyn Validator>>,
    run: HandlerFn,
}

impl Fetch {
    pub fn new(run: HandlerFn) -> Self {
        Self {
            validator: None,
            run,
        }
    }

    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub async fn invoke(&self, name: &str, raw: Option<Value>) -> Result<Value, CoreError> {
        let params = apply_validator(self.validator.as_ref(), name, raw)?;
        (self.run)(params).await
    }
}

// ---------------------------------------------------------------------------
// Action map
// ---------------------------------------------------------------------------

/// A named server operation.
#[derive(Clone)]
pub enum Action {
    Query(Arc<Query>),
    Mutation(Arc<Mutation>),
    Fetch(Arc<Fetch>),
}

impl Action {
    pub fn query(query: Query) -> Self {
        Action::Query(Arc::new(query))
    }

    pub fn mutation(mutation: Mutation) -> Self {
        Action::Mutation(Arc::new(mutation))
    }

    pub fn fetch(fetch: Fetch) -> Self {
        Action::Fetch(Arc::new(fetch))
    }
}

pub type ActionMap = HashMap<String, Action>;

/// Builds one connection's action map.  Invoked once per connection inside
/// that connection's session scope, so session stores created in the factory
/// bind to the connection.
pub type ActionFactory = Arc<dyn Fn() -> ActionMap + Send + Sync>;
