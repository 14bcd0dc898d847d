use thiserror::Error;

/// Failure taxonomy of the reactive runtime.
///
/// Every variant maps to one structured error frame on the wire; none of them
/// ever closes the connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A subscribe or mutation frame named an action that does not exist.
    #[error("unknown action: {0}")]
    UnknownAction(String),

    /// The action's validator rejected the raw params.
    #[error("invalid input for {action}: {reason}")]
    InvalidInput { action: String, reason: String },

    /// A session store was accessed with no ambient session id bound.
    /// Inside a query body this surfaces to subscribers as a compute failure.
    #[error("no session context")]
    NoSessionContext,

    /// The query's compute function failed for the current cycle.  The
    /// computation stays subscribed; the next dependency fire retries.
    #[error("compute failed: {0}")]
    ComputeFailure(String),
}

impl CoreError {
    /// Wrap an arbitrary failure message as a compute failure.
    pub fn compute(msg: impl Into<String>) -> Self {
        CoreError::ComputeFailure(msg.into())
    }
}
