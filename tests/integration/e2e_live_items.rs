//! End-to-end: a live items list pushed over the wire as the data changes.

use std::net::SocketAddr;

use lq_protocol::{ClientFrame, ServerFrame, SubscribeFrame};
use lq_test_utils::MockWsClient;
use serde_json::json;
use server::demo::{ItemTable, factory_over};
use server::state::AppState;

async fn start_server() -> (SocketAddr, ItemTable) {
    let table = ItemTable::new();
    let state = AppState::new(factory_over(table.clone()));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, table)
}

async fn expect_update(client: &mut MockWsClient, sub_id: &str) -> serde_json::Value {
    match client.recv_frame().await.unwrap() {
        ServerFrame::Update(update) => {
            assert_eq!(update.sub_id, sub_id);
            update.data
        }
        other => panic!("expected update for {sub_id}, got {other:?}"),
    }
}

#[tokio::test]
async fn items_list_pushes_the_initial_and_every_subsequent_state() {
    let (addr, table) = start_server().await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut client = MockWsClient::connect(&url).await.unwrap();

    client
        .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
            name: "itemsList".to_owned(),
            sub_id: "a".to_owned(),
            params: None,
        }))
        .await
        .unwrap();
    assert_eq!(expect_update(&mut client, "a").await, json!([]));

    table.insert(json!({"id": 1, "name": "x"}));
    assert_eq!(
        expect_update(&mut client, "a").await,
        json!([{"id": 1, "name": "x"}])
    );

    table.insert(json!({"id": 2, "name": "y"}));
    assert_eq!(
        expect_update(&mut client, "a").await,
        json!([{"id": 1, "name": "x"}, {"id": 2, "name": "y"}])
    );
}

#[tokio::test]
async fn two_connections_both_observe_shared_data() {
    let (addr, table) = start_server().await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut one = MockWsClient::connect(&url).await.unwrap();
    let mut two = MockWsClient::connect(&url).await.unwrap();

    for client in [&mut one, &mut two] {
        client
            .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
                name: "itemsList".to_owned(),
                sub_id: "s".to_owned(),
                params: None,
            }))
            .await
            .unwrap();
        assert_eq!(expect_update(client, "s").await, json!([]));
    }

    table.insert(json!({"id": 1}));
    assert_eq!(expect_update(&mut one, "s").await, json!([{"id": 1}]));
    assert_eq!(expect_update(&mut two, "s").await, json!([{"id": 1}]));
}
