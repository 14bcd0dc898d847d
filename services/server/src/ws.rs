use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use lq_core::{Action, ActionMap, CoreError, SessionId, end_session, with_session, with_session_sync};
use lq_protocol::{
    ClientFrame, ErrorFrame, MutationFrame, MutationResultFrame, ServerFrame, SubscribeFrame,
    UnsubscribeFrame, UpdateFrame, fingerprint,
};
use serde_json::Value;
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::{debug, info, warn};

use crate::state::{ActiveKey, AppState};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Best-effort write: a closed connection drops the frame silently.
fn send_frame(out: &UnboundedSender<ServerFrame>, frame: ServerFrame) {
    let _ = out.send(frame);
}

fn send_error(
    out: &UnboundedSender<ServerFrame>,
    name: Option<String>,
    request_id: Option<String>,
    sub_id: Option<String>,
    message: String,
) {
    send_frame(
        out,
        ServerFrame::Error(ErrorFrame {
            name,
            request_id,
            sub_id,
            message,
        }),
    );
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let session_id = SessionId::new();
    info!(session_id = %session_id, "client connected");

    // The factory runs inside this connection's session scope, so session
    // stores created in it bind to this connection.
    let actions: ActionMap = with_session_sync(session_id, || (state.factory)());

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ServerFrame>();

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                // The channel cannot close while out_tx lives on this stack.
                let Some(frame) = outbound else { break };
                let Ok(json) = serde_json::to_string(&frame) else { continue };
                if socket.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            inbound = socket.recv() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientFrame>(&text) {
                            // Frames are processed strictly one at a time per
                            // connection; updates queue on the out channel
                            // while a dispatch is in flight.
                            Ok(frame) => {
                                with_session(
                                    session_id,
                                    dispatch_frame(&state, &actions, session_id, &out_tx, frame),
                                )
                                .await;
                            }
                            Err(e) => {
                                send_error(&out_tx, None, None, None, format!("invalid frame: {e}"));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        let _ = socket.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        warn!(session_id = %session_id, error = %e, "WS error");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    // Subscriptions first, session slots second: a late dependency fire must
    // find the watchers gone before the state they read is released.
    let removed = state.cleanup_session(session_id).await;
    end_session(session_id);
    info!(session_id = %session_id, subscriptions = removed, "client disconnected");
}

async fn dispatch_frame(
    state: &AppState,
    actions: &ActionMap,
    session_id: SessionId,
    out: &UnboundedSender<ServerFrame>,
    frame: ClientFrame,
) {
    match frame {
        ClientFrame::Subscribe(sub) => handle_subscribe(state, actions, session_id, out, sub).await,
        ClientFrame::Unsubscribe(unsub) => {
            handle_unsubscribe(state, actions, session_id, unsub).await;
        }
        ClientFrame::Mutation(mutation) => handle_mutation(actions, out, mutation).await,
    }
}

async fn handle_subscribe(
    state: &AppState,
    actions: &ActionMap,
    session_id: SessionId,
    out: &UnboundedSender<ServerFrame>,
    sub: SubscribeFrame,
) {
    let Some(action) = actions.get(&sub.name) else {
        let message = CoreError::UnknownAction(sub.name.clone()).to_string();
        send_error(out, Some(sub.name), None, Some(sub.sub_id), message);
        return;
    };

    match action {
        Action::Query(query) => {
            let params = match query.validate(&sub.name, sub.params) {
                Ok(params) => params,
                Err(err) => {
                    send_error(out, Some(sub.name), None, Some(sub.sub_id), err.to_string());
                    return;
                }
            };
            let key = ActiveKey {
                session_id,
                action: sub.name.clone(),
                fingerprint: fingerprint(Some(&params)),
            };

            let on_result = {
                let name = sub.name.clone();
                let sub_id = sub.sub_id.clone();
                let out = out.clone();
                move |result: &Result<Value, CoreError>| {
                    let frame = match result {
                        Ok(data) => ServerFrame::Update(UpdateFrame {
                            name: name.clone(),
                            sub_id: sub_id.clone(),
                            data: data.clone(),
                        }),
                        Err(err) => ServerFrame::Error(ErrorFrame {
                            name: Some(name.clone()),
                            request_id: None,
                            sub_id: Some(sub_id.clone()),
                            message: err.to_string(),
                        }),
                    };
                    send_frame(&out, frame);
                }
            };

            let attach = state
                .attach_subscriber(key, sub.sub_id.clone(), || query.start(params), on_result)
                .await;
            if let Err(err) = attach {
                send_error(out, Some(sub.name), None, Some(sub.sub_id), err.to_string());
            }
        }
        Action::Fetch(fetch) => match fetch.invoke(&sub.name, sub.params).await {
            // A plain value: one update, no subscription record.
            Ok(data) => send_frame(
                out,
                ServerFrame::Update(UpdateFrame {
                    name: sub.name,
                    sub_id: sub.sub_id,
                    data,
                }),
            ),
            Err(err) => send_error(out, Some(sub.name), None, Some(sub.sub_id), err.to_string()),
        },
        Action::Mutation(_) => {
            send_error(
                out,
                Some(sub.name.clone()),
                None,
                Some(sub.sub_id),
                format!("action is not subscribable: {}", sub.name),
            );
        }
    }
}

async fn handle_unsubscribe(
    state: &AppState,
    actions: &ActionMap,
    session_id: SessionId,
    unsub: UnsubscribeFrame,
) {
    // Resolve the same key the subscribe produced: validated params where
    // the action still exists and validates, raw params otherwise.
    let print = match actions.get(&unsub.name) {
        Some(Action::Query(query)) => match query.validate(&unsub.name, unsub.params.clone()) {
            Ok(params) => fingerprint(Some(&params)),
            Err(_) => fingerprint(unsub.params.as_ref()),
        },
        _ => fingerprint(unsub.params.as_ref()),
    };
    let key = ActiveKey {
        session_id,
        action: unsub.name.clone(),
        fingerprint: print,
    };
    if !state.detach_subscriber(&key, &unsub.sub_id).await {
        // Cancelling something that is not subscribed is a no-op.
        debug!(session_id = %session_id, action = %unsub.name, sub_id = %unsub.sub_id,
            "unsubscribe for unknown subscription");
    }
}

async fn handle_mutation(
    actions: &ActionMap,
    out: &UnboundedSender<ServerFrame>,
    frame: MutationFrame,
) {
    let Some(action) = actions.get(&frame.name) else {
        let message = CoreError::UnknownAction(frame.name.clone()).to_string();
        send_error(out, Some(frame.name), Some(frame.request_id), None, message);
        return;
    };
    let Action::Mutation(mutation) = action else {
        send_error(
            out,
            Some(frame.name.clone()),
            Some(frame.request_id),
            None,
            format!("action is not a mutation: {}", frame.name),
        );
        return;
    };
    match mutation.invoke(&frame.name, frame.params).await {
        Ok(data) => send_frame(
            out,
            ServerFrame::MutationResult(MutationResultFrame {
                name: frame.name,
                request_id: frame.request_id,
                data,
            }),
        ),
        Err(err) => send_error(
            out,
            Some(frame.name),
            Some(frame.request_id),
            None,
            err.to_string(),
        ),
    }
}
