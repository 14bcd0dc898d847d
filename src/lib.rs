// liveq: Reactive query server over WebSocket.
//
// Clients subscribe to named queries whose results are pushed whenever a
// declared dependency reports a change; one-shot mutations are correlated by
// request id.  Each connection is a session with isolated session-scoped
// state that query bodies read transparently.
//
// The workspace splits into `lq-core` (sources, session context, derived
// computations, action definitions), `lq-protocol` (wire frames and
// canonical params), and `services/server` (the axum WebSocket service).
// This facade re-exports the embedding API.

pub use lq_core::{
    Action, ActionFactory, ActionMap, CachePolicy, CoreError, Derived, Fetch, LiveQuery, Mutation,
    Notifier, Query, Reactive, Scope, SessionId, SessionStore, Store, Validator, WatchGuard,
    current_session, end_session, handler, with_session, with_session_sync,
};
pub use lq_core::{adapter, validate};
pub use lq_protocol::{ClientFrame, ServerFrame, fingerprint};
