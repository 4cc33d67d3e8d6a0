mod common;

use std::time::Duration;

use axum::{body::Body, http::Request, http::StatusCode};
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{admin_request, send, target, webhook, TestRelay};
use webhook_relay::{ForwardUrl, Replay, RequestsStorage};

fn call(path: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("x-delivery", "d-1")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn replay_after_target_recovers_returns_its_response_and_deletes_original() {
    // Bound but not yet accepting: the first delivery times out.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let relay = TestRelay::new();
    relay
        .install(webhook(
            "POST",
            "/orders",
            vec![ForwardUrl::new(format!("http://{addr}/hook"), Duration::from_millis(300))
                .returning_response()],
        ))
        .await;
    let router = relay.router();

    let response = send(&router, call("/orders", "order-17")).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);

    let newest = send(&router, admin_request("GET", "/requests/newest", None)).await;
    assert_eq!(newest.status, StatusCode::OK);
    let listed = newest.json();
    assert_eq!(listed.as_array().unwrap().len(), 1);
    let payload = listed[0]["replayPayload"].clone();
    assert_eq!(payload["deleteOnSuccess"], json!(true));
    let request_id = payload["requestId"].as_str().unwrap().to_string();

    let server = MockServer::builder().listener(listener).start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("x-delivery", "d-1"))
        .and(body_string("order-17"))
        .respond_with(
            ResponseTemplate::new(201)
                .insert_header("x-replayed", "yes")
                .set_body_string("accepted again"),
        )
        .mount(&server)
        .await;

    let replayed = send(&router, admin_request("POST", "/requests/replay", Some(payload))).await;
    assert_eq!(replayed.status, StatusCode::CREATED);
    assert_eq!(replayed.text(), "accepted again");
    assert_eq!(replayed.headers.get("x-replayed").unwrap(), "yes");

    assert!(relay.store.get_request(&request_id).await.unwrap().is_none());
    let lookup = send(&router, admin_request("GET", &format!("/requests/{request_id}"), None)).await;
    assert_eq!(lookup.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn replay_keeps_original_without_delete_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("fine"))
        .mount(&server)
        .await;

    let relay = TestRelay::new();
    relay
        .install(webhook(
            "POST",
            "/in",
            vec![target(server.uri()).returning_response().keeping_successes()],
        ))
        .await;
    let router = relay.router();

    send(&router, call("/in", "hello")).await;
    let captured = relay.wait_for_captures(1).await;
    assert_eq!(captured.len(), 1);

    let mut replay = captured[0].replay_payload().unwrap();
    replay.delete_on_success = false;
    let response = relay.state.replayer().replay(&replay).await.unwrap();
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"fine");

    // Replays are never captured themselves.
    assert_eq!(relay.captured().await.len(), 1);
}

#[tokio::test]
async fn failed_replay_keeps_original_even_with_delete_on_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("still down"))
        .mount(&server)
        .await;

    let relay = TestRelay::new();
    relay
        .install(webhook(
            "POST",
            "/in",
            vec![target(server.uri()).returning_response().keeping_successes()],
        ))
        .await;
    let router = relay.router();

    send(&router, call("/in", "hello")).await;
    let captured = relay.wait_for_captures(1).await;
    let replay = captured[0].replay_payload().unwrap();

    let response = send(
        &router,
        admin_request("POST", "/requests/replay", Some(serde_json::to_value(&replay).unwrap())),
    )
    .await;
    assert_eq!(response.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(response.text(), "still down");
    assert!(relay.store.get_request(&replay.request_id).await.unwrap().is_some());
}

#[tokio::test]
async fn replay_with_unknown_ids_is_rejected() {
    let relay = TestRelay::new();
    let router = relay.router();

    let bogus = Replay {
        request_id: "r-missing".into(),
        webhook_id: "w-missing".into(),
        forward_url_id: "f-missing".into(),
        delete_on_success: true,
    };
    let response = send(
        &router,
        admin_request("POST", "/requests/replay", Some(serde_json::to_value(&bogus).unwrap())),
    )
    .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert!(response.json()["error"].as_str().unwrap().contains("r-missing"));
}

#[tokio::test]
async fn replay_against_removed_target_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let relay = TestRelay::new();
    let wh = relay
        .install(webhook(
            "POST",
            "/in",
            vec![target(server.uri()).returning_response().keeping_successes()],
        ))
        .await;
    send(&relay.router(), call("/in", "x")).await;
    let captured = relay.wait_for_captures(1).await;

    let mut replay = captured[0].replay_payload().unwrap();
    replay.forward_url_id = "f-gone".into();
    assert_eq!(replay.webhook_id, wh.id);

    let err = relay.state.replayer().replay(&replay).await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
}
