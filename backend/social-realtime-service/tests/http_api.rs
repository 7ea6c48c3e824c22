//! REST surface exercised against the in-memory store.

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use serde_json::{json, Value};
use social_realtime_service::auth::StaticTokenVerifier;
use social_realtime_service::config::{NotificationPolicy, WebSocketConfig};
use social_realtime_service::routes;
use social_realtime_service::state::AppState;
use social_realtime_service::store::MemoryStore;
use std::sync::Arc;
use uuid::Uuid;

const ALICE_TOKEN: &str = "alice-token";
const BOB_TOKEN: &str = "bob-token";

struct Users {
    alice: Uuid,
    bob: Uuid,
}

fn test_state() -> (AppState, Users) {
    let users = Users {
        alice: Uuid::new_v4(),
        bob: Uuid::new_v4(),
    };
    let verifier = StaticTokenVerifier::new()
        .with_token(ALICE_TOKEN, users.alice)
        .with_token(BOB_TOKEN, users.bob);
    let state = AppState::build(
        Arc::new(MemoryStore::new()),
        Arc::new(verifier),
        NotificationPolicy::default(),
        WebSocketConfig::default(),
    );
    (state, users)
}

fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {}", token))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($state.clone()))
                .configure(routes::register_routes),
        )
        .await
    };
}

#[actix_rt::test]
async fn requests_without_token_are_rejected() {
    let (state, _) = test_state();
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri("/api/v1/conversations")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "AUTH_ERROR");

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications")
        .insert_header(bearer("forged"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[actix_rt::test]
async fn websocket_handshake_requires_credential() {
    let (state, _) = test_state();
    let app = app!(state);

    let req = test::TestRequest::get().uri("/ws").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let req = test::TestRequest::get().uri("/ws?token=forged").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(state.gateway.hub().presence().connection_count(), 0);
}

#[actix_rt::test]
async fn direct_conversation_send_and_read() {
    let (state, users) = test_state();
    let app = app!(state);

    let req = test::TestRequest::post()
        .uri("/api/v1/conversations/direct")
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({ "other_user_id": users.bob }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    let conversation_id = body["data"]["id"].as_str().unwrap().to_string();

    // Same pair from the other side resolves to the same conversation.
    let req = test::TestRequest::post()
        .uri("/api/v1/conversations/direct")
        .insert_header(bearer(BOB_TOKEN))
        .set_json(json!({ "other_user_id": users.alice }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["id"], conversation_id.as_str());

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/messages", conversation_id))
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({ "content": "hello bob" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["sequence_number"], 1);
    assert_eq!(body["data"]["read_by"], json!([]));

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/unread", conversation_id))
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["unread_count"], 1);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/read", conversation_id))
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["marked"], 1);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/unread", conversation_id))
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["unread_count"], 0);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/messages", conversation_id))
        .insert_header(bearer(ALICE_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let history = body["data"].as_array().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0]["read_by"][0]["user_id"], users.bob.to_string());
}

#[actix_rt::test]
async fn outsider_cannot_read_or_write_history() {
    let (state, users) = test_state();
    let outsider_token = "carol-token";
    let conversation = state
        .gateway
        .conversations()
        .find_or_create_direct(users.alice, users.bob)
        .await
        .unwrap();
    let verifier = StaticTokenVerifier::new().with_token(outsider_token, Uuid::new_v4());
    let state = AppState {
        verifier: Arc::new(verifier),
        ..state
    };
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/conversations/{}/messages", conversation.id))
        .insert_header(bearer(outsider_token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/conversations/{}/messages", conversation.id))
        .insert_header(bearer(outsider_token))
        .set_json(json!({ "content": "let me in" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_rt::test]
async fn invalid_message_content_is_rejected() {
    let (state, users) = test_state();
    let conversation = state
        .gateway
        .conversations()
        .find_or_create_direct(users.alice, users.bob)
        .await
        .unwrap();
    let app = app!(state);

    for content in ["   ".to_string(), "x".repeat(5001)] {
        let req = test::TestRequest::post()
            .uri(&format!("/api/v1/conversations/{}/messages", conversation.id))
            .insert_header(bearer(ALICE_TOKEN))
            .set_json(json!({ "content": content }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

#[actix_rt::test]
async fn notification_lifecycle() {
    let (state, users) = test_state();
    let app = app!(state);
    let post_id = Uuid::new_v4();

    // Two likes on the same post collapse into one record.
    let mut notification_id = String::new();
    for _ in 0..2 {
        let req = test::TestRequest::post()
            .uri("/api/v1/notifications")
            .insert_header(bearer(ALICE_TOKEN))
            .set_json(json!({
                "recipient_id": users.bob,
                "notification_type": "post_liked",
                "title": "New like",
                "message": "Alice liked your post",
                "source_id": post_id,
                "source_type": "post"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["data"]["sender_id"], users.alice.to_string());
        notification_id = body["data"]["id"].as_str().unwrap().to_string();
    }

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications")
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["group_count"], 2);

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications/unread-count")
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["unread_count"], 1);

    // Only the recipient may read it.
    let req = test::TestRequest::put()
        .uri(&format!("/api/v1/notifications/{}/read", notification_id))
        .insert_header(bearer(ALICE_TOKEN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::put()
        .uri("/api/v1/notifications/read-all")
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["marked"], 1);

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications?unread_only=true")
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/notifications/{}", Uuid::new_v4()))
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_rt::test]
async fn post_update_requires_object_changes() {
    let (state, _) = test_state();
    let app = app!(state);
    let post_id = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{}/updated", post_id))
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({ "changes": 3 }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let req = test::TestRequest::post()
        .uri(&format!("/api/v1/posts/{}/updated", post_id))
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({ "changes": { "like_count": 4 } }))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["delivered"], 0);
}

#[actix_rt::test]
async fn presence_endpoint_reports_offline_user() {
    let (state, users) = test_state();
    let app = app!(state);

    let req = test::TestRequest::get()
        .uri(&format!("/api/v1/presence/{}", users.bob))
        .insert_header(bearer(ALICE_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["data"]["online"], false);
    assert_eq!(body["data"]["connections"], 0);
}

#[actix_rt::test]
async fn notification_sender_cannot_be_spoofed() {
    let (state, users) = test_state();
    let app = app!(state);
    let impersonated = Uuid::new_v4();

    let req = test::TestRequest::post()
        .uri("/api/v1/notifications")
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({
            "recipient_id": users.bob,
            "sender_id": impersonated,
            "notification_type": "connection_request",
            "title": "Connection request",
            "message": "Someone wants to connect"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/api/v1/notifications")
        .insert_header(bearer(BOB_TOKEN))
        .to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    // Naming yourself is accepted.
    let req = test::TestRequest::post()
        .uri("/api/v1/notifications")
        .insert_header(bearer(ALICE_TOKEN))
        .set_json(json!({
            "recipient_id": users.bob,
            "sender_id": users.alice,
            "notification_type": "connection_request",
            "title": "Connection request",
            "message": "Alice wants to connect"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["data"]["sender_id"], users.alice.to_string());
}
