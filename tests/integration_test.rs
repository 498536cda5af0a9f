use axum::body::Bytes;
use axum_test::TestServer;
use serde_json::json;

mod common;
use common::{TEST_TOKEN, create_test_app, ndjson, submission, values_to_lines, zstd_bytes};

const IMPORT_QUERY: &str = "/import?owner_id=1&display_name=test";

#[tokio::test]
async fn test_healthz_endpoint() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server.get("/healthz").await;

    response.assert_status_ok();
    response.assert_text("ok");
}

#[tokio::test]
async fn test_healthz_needs_no_token() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .get("/healthz")
        .add_header("Authorization", "Bearer wrong_token")
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_import_without_token_is_rejected() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let lines = values_to_lines(&[submission("a1", "foo", "title", "text")]);
    let response = server
        .post(IMPORT_QUERY)
        .bytes(Bytes::from(zstd_bytes(&ndjson(&lines))))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_import_with_wrong_token_is_rejected() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post(IMPORT_QUERY)
        .add_header("Authorization", "Bearer not_the_token")
        .bytes(Bytes::from_static(b"{}\n"))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_import_with_non_bearer_scheme_is_rejected() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post(IMPORT_QUERY)
        .add_header("Authorization", format!("Basic {TEST_TOKEN}"))
        .bytes(Bytes::from_static(b"{}\n"))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_import_without_owner_is_bad_request() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post("/import?display_name=test")
        .add_header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .bytes(Bytes::from_static(b"{}\n"))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_import_with_unknown_kind_is_bad_request() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post("/import?owner_id=1&display_name=test&kind=votes")
        .add_header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .bytes(Bytes::from_static(b"{}\n"))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_merge_without_token_is_rejected() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post("/merge")
        .json(&json!({
            "owner_id": 1,
            "display_name": "merged",
            "sources": ["proj_0123456789ab"],
        }))
        .await;

    response.assert_status_unauthorized();
}

#[tokio::test]
async fn test_merge_with_no_sources_is_bad_request() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post("/merge")
        .add_header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .json(&json!({
            "owner_id": 1,
            "display_name": "merged",
            "sources": [],
        }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_merge_rejects_hostile_namespace() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server
        .post("/merge")
        .add_header("Authorization", format!("Bearer {TEST_TOKEN}"))
        .json(&json!({
            "owner_id": 1,
            "display_name": "merged",
            "sources": ["proj_0123456789ab", "public\"; DROP SCHEMA public CASCADE; --"],
        }))
        .await;

    response.assert_status_bad_request();
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let server = TestServer::new(create_test_app()).expect("Failed to create test server");

    let response = server.post("/ingest").await;

    response.assert_status_not_found();
}
