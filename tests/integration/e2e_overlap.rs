//! End-to-end: dependency fires during an in-flight recompute coalesce into
//! exactly one follow-up run.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use lq_core::{Action, ActionFactory, ActionMap, Notifier, Query, handler};
use lq_protocol::{ClientFrame, ServerFrame, SubscribeFrame};
use lq_test_utils::MockWsClient;
use serde_json::json;
use server::state::AppState;

/// A query whose compute takes long enough that the test can pile fires on
/// top of the in-flight run.
fn slow_factory(dep: &Notifier, runs: &Arc<AtomicUsize>) -> ActionFactory {
    let dep = dep.clone();
    let runs = Arc::clone(runs);
    Arc::new(move || {
        let mut actions = ActionMap::new();
        let runs = Arc::clone(&runs);
        actions.insert(
            "slowCount".to_owned(),
            Action::query(
                Query::new(handler(move |_params| {
                    let n = runs.fetch_add(1, Ordering::SeqCst);
                    async move {
                        tokio::time::sleep(Duration::from_millis(300)).await;
                        Ok(json!(n))
                    }
                }))
                .dep(Arc::new(dep.clone())),
            ),
        );
        actions
    })
}

async fn start_server(factory: ActionFactory) -> SocketAddr {
    let state = AppState::new(factory);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = server::build_router(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

#[tokio::test]
async fn five_fires_during_one_run_produce_one_follow_up() {
    let dep = Notifier::new();
    let runs = Arc::new(AtomicUsize::new(0));
    let addr = start_server(slow_factory(&dep, &runs)).await;
    let url = format!("ws://{addr}/ws/v1/live");
    let mut client = MockWsClient::connect(&url).await.unwrap();

    client
        .send_frame(&ClientFrame::Subscribe(SubscribeFrame {
            name: "slowCount".to_owned(),
            sub_id: "s".to_owned(),
            params: None,
        }))
        .await
        .unwrap();

    // Let the first run get underway, then fire mid-flight.
    tokio::time::sleep(Duration::from_millis(100)).await;
    for _ in 0..5 {
        dep.notify();
    }

    let mut data = Vec::new();
    for _ in 0..2 {
        match client.recv_frame().await.unwrap() {
            ServerFrame::Update(update) => data.push(update.data),
            other => panic!("expected update, got {other:?}"),
        }
    }
    assert_eq!(data, vec![json!(0), json!(1)]);

    // Exactly two compute invocations, exactly two updates.
    assert!(
        client
            .recv_frame_timeout(Duration::from_millis(500))
            .await
            .is_none()
    );
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}
