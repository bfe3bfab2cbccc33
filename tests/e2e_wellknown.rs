//! E2E tests for .well-known endpoints

mod common;

use common::TestServer;
use serde_json::Value;

#[tokio::test]
async fn test_webfinger_local_account() {
    let server = TestServer::new().await;
    server.create_account("alice").await;

    let response = server
        .client
        .get(server.url("/.well-known/webfinger"))
        .query(&[("resource", format!("acct:{}", server.address("alice")))])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/jrd+json");

    let json: Value = response.json().await.unwrap();
    assert_eq!(json["subject"], format!("acct:{}", server.address("alice")));

    let links = json["links"].as_array().unwrap();
    let self_link = links
        .iter()
        .find(|link| link["rel"] == "self")
        .expect("self link");
    assert_eq!(self_link["type"], "application/activity+json");
    assert_eq!(self_link["href"], server.actor_url("alice"));
}

#[tokio::test]
async fn test_webfinger_requires_acct_scheme() {
    let server = TestServer::new().await;
    server.create_account("alice").await;

    let response = server
        .client
        .get(server.url("/.well-known/webfinger"))
        .query(&[("resource", server.address("alice"))])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn test_webfinger_unknown_account() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/.well-known/webfinger"))
        .query(&[("resource", format!("acct:{}", server.address("nobody")))])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_webfinger_foreign_host() {
    let server = TestServer::new().await;
    server.create_account("alice").await;

    let response = server
        .client
        .get(server.url("/.well-known/webfinger"))
        .query(&[("resource", "acct:alice@elsewhere.example")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_host_meta() {
    let server = TestServer::new().await;

    let response = server
        .client
        .get(server.url("/.well-known/host-meta"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "application/xrd+xml");

    let body = response.text().await.unwrap();
    assert!(body.contains("lrdd"));
    assert!(body.contains(&server.url("/.well-known/webfinger")));
}
