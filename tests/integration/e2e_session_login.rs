//! End-to-end: session-scoped state stays isolated between connections.

use std::net::SocketAddr;
use std::time::Duration;

use lq_protocol::{ClientFrame, MutationFrame, ServerFrame, SubscribeFrame};
use lq_test_utils::MockWsClient;
use serde_json::{Value, json};
use server::demo::demo_factory;
use server::state::AppState;

async fn start_server() -> SocketAddr {
    let state = AppState::new(demo_factory());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn subscribe_session_user(client: &mut MockWsClient) {
    client
        .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
            name: "sessionUser".to_owned(),
            sub_id: "s".to_owned(),
            params: None,
        }))
        .await
        .unwrap();
    match client.recv_frame().await.unwrap() {
        ServerFrame::Update(update) => {
            assert_eq!(update.sub_id, "s");
            assert_eq!(update.data, Value::Null);
        }
        other => panic!("expected initial null update, got {other:?}"),
    }
}

#[tokio::test]
async fn login_updates_only_the_issuing_session() {
    let addr = start_server().await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut one = MockWsClient::connect(&url).await.unwrap();
    let mut two = MockWsClient::connect(&url).await.unwrap();

    subscribe_session_user(&mut one).await;
    subscribe_session_user(&mut two).await;

    one.send_frame(&ClientFrame::Mutation(MutationFrame {
        name: "login".to_owned(),
        request_id: "r1".to_owned(),
        params: Some(json!({"username": "alice"})),
    }))
    .await
    .unwrap();

    // The reply and the triggered update are not ordered relative to each
    // other; collect both.
    let mut got_result = false;
    let mut got_update = false;
    for _ in 0..2 {
        match one.recv_frame().await.unwrap() {
            ServerFrame::MutationResult(result) => {
                assert_eq!(result.request_id, "r1");
                assert_eq!(result.data, json!({"username": "alice"}));
                got_result = true;
            }
            ServerFrame::Update(update) => {
                assert_eq!(update.sub_id, "s");
                assert_eq!(update.data, json!({"username": "alice"}));
                got_update = true;
            }
            ServerFrame::Error(err) => panic!("unexpected error frame: {err:?}"),
        }
    }
    assert!(got_result && got_update);

    // The other session sees nothing.
    assert!(
        two.recv_frame_timeout(Duration::from_millis(300))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn each_session_reads_its_own_user() {
    let addr = start_server().await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut one = MockWsClient::connect(&url).await.unwrap();
    let mut two = MockWsClient::connect(&url).await.unwrap();

    subscribe_session_user(&mut one).await;
    subscribe_session_user(&mut two).await;

    for (client, name, req) in [(&mut one, "alice", "ra"), (&mut two, "bob", "rb")] {
        client
            .send_frame(&ClientFrame::Mutation(MutationFrame {
                name: "login".to_owned(),
                request_id: req.to_owned(),
                params: Some(json!({"username": name})),
            }))
            .await
            .unwrap();
        let mut saw_user = None;
        for _ in 0..2 {
            match client.recv_frame().await.unwrap() {
                ServerFrame::Update(update) => saw_user = Some(update.data),
                ServerFrame::MutationResult(_) => {}
                ServerFrame::Error(err) => panic!("unexpected error frame: {err:?}"),
            }
        }
        assert_eq!(saw_user, Some(json!({"username": name})));
    }

    // Neither session leaked into the other.
    assert!(
        one.recv_frame_timeout(Duration::from_millis(300))
            .await
            .is_none()
    );
    assert!(
        two.recv_frame_timeout(Duration::from_millis(300))
            .await
            .is_none()
    );
}
