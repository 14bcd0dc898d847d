// lq-protocol: Wire frame types and canonical parameter encoding.
//
// All WebSocket frames use a top-level `type` field for discriminated
// deserialization.  One JSON frame per transport message; field names are
// camelCase on the wire.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod canon;

pub use canon::fingerprint;

// ---------------------------------------------------------------------------
// Client -> Server frames
// ---------------------------------------------------------------------------

/// Open a live subscription to a named query.
///
/// `sub_id` is chosen by the client and scopes to this connection only.  The
/// same `(name, params)` pair may be subscribed under several `sub_id`s; the
/// server shares the underlying computation between them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeFrame {
    pub name: String,
    pub sub_id: String,
    /// Raw params; validated server-side before use.  Absent means `{}`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Close one subscription instance.
///
/// `params` must match the subscribe frame (after canonicalization) so the
/// server can resolve the same underlying computation key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeFrame {
    pub name: String,
    pub sub_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Invoke a one-shot mutation.  The reply is correlated by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationFrame {
    pub name: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// All client-to-server frame kinds.
///
/// ```json
/// { "type": "subscribe", "name": "itemsList", "subId": "a" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum ClientFrame {
    Subscribe(SubscribeFrame),
    Unsubscribe(UnsubscribeFrame),
    Mutation(MutationFrame),
}

// ---------------------------------------------------------------------------
// Server -> Client frames
// ---------------------------------------------------------------------------

/// A new result for one subscription instance.
///
/// Sent once immediately when a cached value exists and then once per
/// completed recompute.  Ordering is production order per subscription;
/// frames of different subscriptions may interleave.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFrame {
    pub name: String,
    pub sub_id: String,
    pub data: Value,
}

/// Successful mutation reply.
///
/// Not ordered relative to any `update` frames the mutation causally
/// triggered; clients must tolerate either order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MutationResultFrame {
    pub name: String,
    pub request_id: String,
    pub data: Value,
}

/// Protocol-level error frame.  Never closes the connection.
///
/// `request_id` is set when the error answers a mutation, `sub_id` when a
/// query recompute failed for that subscription instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
    pub message: String,
}

/// All server-to-client frame kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "camelCase")]
pub enum ServerFrame {
    Update(UpdateFrame),
    MutationResult(MutationResultFrame),
    Error(ErrorFrame),
}
