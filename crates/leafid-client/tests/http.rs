mod common;

use axum::routing::get;
use common::{dead_addr, dispenser, spawn_http, spawn_router};
use leafid_client::{Client, Error};
use std::collections::HashSet;

async fn client(addr: std::net::SocketAddr) -> Client {
    Client::builder()
        .http(addr.to_string())
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn get_id_over_http() {
    let addr = spawn_http(dispenser()).await;
    let client = client(addr).await;

    client.ping().await.unwrap();
    assert_eq!(client.get_id("test-biz", 0).await.unwrap(), 1);
    assert_eq!(client.get_id("test-biz", 0).await.unwrap(), 2);
    assert_eq!(client.get_id("other", 0).await.unwrap(), 1);
}

#[tokio::test]
async fn keys_are_escaped() {
    let addr = spawn_http(dispenser()).await;
    let client = client(addr).await;

    assert_eq!(client.get_id("a b/c", 0).await.unwrap(), 1);
    assert_eq!(client.get_id("a b/c", 0).await.unwrap(), 2);
    assert_eq!(client.get_id("a b", 0).await.unwrap(), 1);
}

#[tokio::test]
async fn step_is_forwarded() {
    let dispenser = dispenser();
    let addr = spawn_http(dispenser.clone()).await;
    let client = client(addr).await;

    assert_eq!(client.get_id("stepped", 20).await.unwrap(), 1);
    let snapshot = dispenser.snapshot("stepped").await.unwrap();
    assert_eq!(snapshot.active_segment().max(), 21);
}

#[tokio::test]
async fn oversized_step_is_wrong_request_format() {
    let addr = spawn_http(dispenser()).await;
    let client = client(addr).await;

    let err = client
        .get_id("k", leafid::DEFAULT_MAX_STEP + 1)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::WrongRequestFormat(_)), "{err:?}");
}

#[tokio::test]
async fn closed_server_is_unavailable() {
    let dispenser = dispenser();
    let addr = spawn_http(dispenser.clone()).await;
    let client = client(addr).await;
    dispenser.close().await;

    let err = client.get_id("k", 0).await.unwrap_err();
    assert!(matches!(err, Error::Unavailable(_)), "{err:?}");
}

#[tokio::test]
async fn unrecognized_body() {
    let app = axum::Router::new().route("/api/v1/next/{key}", get(|| async { "hello" }));
    let addr = spawn_router(app).await;
    let client = client(addr).await;

    let err = client.get_id("k", 0).await.unwrap_err();
    assert!(
        matches!(err, Error::ResultNotRecognized { status: 200, .. }),
        "{err:?}"
    );
}

#[tokio::test]
async fn unreachable_server_is_transport_error() {
    let client = client(dead_addr().await).await;
    assert!(matches!(
        client.get_id("k", 0).await.unwrap_err(),
        Error::Transport(_)
    ));
    assert!(matches!(client.ping().await.unwrap_err(), Error::Transport(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_clients_get_unique_ids() {
    let addr = spawn_http(dispenser()).await;
    let client = client(addr).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            let mut ids = Vec::new();
            for _ in 0..100 {
                ids.push(client.get_id("shared", 0).await.unwrap());
            }
            ids
        }));
    }

    let mut seen = HashSet::new();
    for handle in handles {
        for id in handle.await.unwrap() {
            assert!(seen.insert(id));
        }
    }
    assert_eq!(seen.len(), 800);
}
