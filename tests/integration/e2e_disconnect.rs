//! End-to-end: closing a connection tears down its subscriptions, releases
//! dependency watches, and drops its session-store slots.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lq_core::{Action, ActionFactory, ActionMap, Mutation, Notifier, Query, SessionStore, handler};
use lq_protocol::{ClientFrame, MutationFrame, ServerFrame, SubscribeFrame};
use lq_test_utils::MockWsClient;
use serde_json::{Value, json};
use server::state::AppState;

/// Action set exposing its sources so the test can count watchers and
/// materialized session slots from outside.
struct Fixture {
    changed: Notifier,
    user: SessionStore<Value>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            changed: Notifier::new(),
            user: SessionStore::new(Value::Null),
        }
    }

    fn factory(&self) -> ActionFactory {
        let changed = self.changed.clone();
        let user = self.user.clone();
        Arc::new(move || {
            let mut actions = ActionMap::new();
            actions.insert(
                "ticks".to_owned(),
                Action::query(
                    Query::new(handler(|_params| async { Ok(json!("tick")) }))
                        .dep(Arc::new(changed.clone())),
                ),
            );
            let user_for_login = user.clone();
            actions.insert(
                "login".to_owned(),
                Action::mutation(Mutation::new(handler(move |params| {
                    let user = user_for_login.clone();
                    async move {
                        user.set(params.clone())?;
                        Ok(params)
                    }
                }))),
            );
            actions
        })
    }
}

async fn start_server(factory: ActionFactory) -> (SocketAddr, AppState) {
    let state = AppState::new(factory);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::build_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn wait_for<F: Fn() -> bool>(what: &str, timeout: Duration, check: F) {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{what} did not happen within {timeout:?}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn close_releases_subscriptions_watches_and_session_slots() {
    let fixture = Fixture::new();
    let (addr, state) = start_server(fixture.factory()).await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut client = MockWsClient::connect(&url).await.unwrap();

    client
        .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
            name: "ticks".to_owned(),
            sub_id: "a".to_owned(),
            params: None,
        }))
        .await
        .unwrap();
    match client.recv_frame().await.unwrap() {
        ServerFrame::Update(update) => assert_eq!(update.data, json!("tick")),
        other => panic!("expected update, got {other:?}"),
    }

    client
        .send_frame(&ClientFrame::Mutation(MutationFrame {
            name: "login".to_owned(),
            request_id: "r".to_owned(),
            params: Some(json!({"username": "alice"})),
        }))
        .await
        .unwrap();
    match client.recv_frame().await.unwrap() {
        ServerFrame::MutationResult(result) => assert_eq!(result.request_id, "r"),
        other => panic!("expected mutationResult, got {other:?}"),
    }

    assert_eq!(fixture.changed.subscriber_count(), 1);
    assert_eq!(fixture.user.session_count(), 1);
    assert_eq!(state.active_count().await, 1);

    client.close().await.unwrap();

    let state_for_wait = state.clone();
    wait_for("active registry cleanup", Duration::from_secs(2), move || {
        state_for_wait.active.try_read().is_ok_and(|map| map.is_empty())
    })
    .await;
    assert_eq!(fixture.changed.subscriber_count(), 0);

    // Session slots are released right after the subscriptions.
    let user = fixture.user.clone();
    wait_for("session slot release", Duration::from_secs(2), move || {
        user.session_count() == 0
    })
    .await;

    // A late fire finds no watchers and emits nothing anywhere.
    fixture.changed.notify();
    assert_eq!(fixture.changed.subscriber_count(), 0);
}

#[tokio::test]
async fn close_with_multiple_subscriptions_cancels_them_all() {
    let fixture = Fixture::new();
    let (addr, state) = start_server(fixture.factory()).await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut client = MockWsClient::connect(&url).await.unwrap();

    for sub_id in ["a", "b"] {
        client
            .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
                name: "ticks".to_owned(),
                sub_id: sub_id.to_owned(),
                params: Some(json!({"who": sub_id})),
            }))
            .await
            .unwrap();
        match client.recv_frame().await.unwrap() {
            ServerFrame::Update(_) => {}
            other => panic!("expected update, got {other:?}"),
        }
    }
    // Distinct params: two computations, two watches.
    assert_eq!(state.active_count().await, 2);
    assert_eq!(fixture.changed.subscriber_count(), 2);

    client.close().await.unwrap();
    let state_for_wait = state.clone();
    wait_for("active registry cleanup", Duration::from_secs(2), move || {
        state_for_wait.active.try_read().is_ok_and(|map| map.is_empty())
    })
    .await;
    assert_eq!(fixture.changed.subscriber_count(), 0);
}
