// lq-core: The reactive runtime -- sources, session context, derived
// computations, and action definitions shared by the server service.

pub mod action;
pub mod adapter;
pub mod derived;
pub mod error;
pub mod session;
pub mod source;
pub mod validate;

pub use action::{Action, ActionFactory, ActionMap, Fetch, LiveQuery, Mutation, Query, handler};
pub use derived::{CachePolicy, Derived};
pub use error::CoreError;
pub use session::{
    SessionId, SessionStore, current_session, end_session, with_session, with_session_sync,
};
pub use source::{Notifier, Reactive, Scope, Store, WatchGuard};
pub use validate::Validator;
