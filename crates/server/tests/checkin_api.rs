//! Public API integration tests: check-ins, offline reconciliation, feeds
//! and semaphore groups.

mod common;

use axum::http::StatusCode;
use common::{fixtures, TestFixture};
use serde_json::json;

async fn fixture_with_pipeline() -> TestFixture {
    let fixture = TestFixture::new().await;
    let response = fixture.create_pipeline("p").await;
    assert_status!(response, StatusCode::OK);
    fixture
}

#[tokio::test]
async fn test_checkin_and_double_checkin() {
    let fixture = fixture_with_pipeline().await;
    let body = json!({
        "credential": fixture.checker_credential(),
        "ticketId": "p-t1",
        "eventId": "p-event",
    });

    let response = fixture.post("/api/v1/checkin", body.clone()).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "success", json!(true));

    let response = fixture.post("/api/v1/checkin", body).await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "success", json!(false));
    assert_eq!(response.body["error"]["name"], json!("AlreadyCheckedIn"));
    assert_eq!(response.body["error"]["checker"], json!(fixtures::CHECKER_EMAIL));
    assert!(response.body["error"]["checkinTimestamp"].is_string());
}

#[tokio::test]
async fn test_checkin_by_regular_holder_is_refused() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture
        .post(
            "/api/v1/checkin",
            json!({
                "credential": fixture.holder_credential(),
                "ticketId": "p-t1",
                "eventId": "p-event",
            }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["error"]["name"], json!("NotSuperuser"));
}

#[tokio::test]
async fn test_checkin_with_bad_credential() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture
        .post(
            "/api/v1/checkin",
            json!({
                "credential": "garbage",
                "ticketId": "p-t1",
                "eventId": "p-event",
            }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["error"]["name"], json!("InvalidSignature"));
}

#[tokio::test]
async fn test_checkin_malformed_body() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture.post_raw("/api/v1/checkin", "{not json").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = fixture
        .post("/api/v1/checkin", json!({ "ticketId": "p-t1" }))
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_offline_checkin_queue_and_operator_cleanup() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture
        .post(
            "/api/v1/offline/checkin",
            json!({
                "credential": fixture.checker_credential(),
                "ticketIdsByEvent": { "p-event": ["p-t1", "missing-ticket"] },
            }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "queued", json!(2));

    let response = fixture
        .post("/api/v1/pipelines/pipeline-p/load", json!({}))
        .await;
    assert_json_path!(response.body, "offline_tickets_checked_in", json!(1));
    assert_json_path!(response.body, "offline_tickets_failed_to_check_in", json!(1));

    let info = fixture.get("/api/v1/pipelines/pipeline-p/info").await;
    let queued = info.body["info"]["queued_offline_checkins"].as_array().unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0]["ticket_id"], json!("missing-ticket"));
    assert_eq!(queued[0]["attempts"], json!(1));

    // The reconciled ticket can no longer be checked in online.
    let response = fixture
        .post(
            "/api/v1/checkin",
            json!({
                "credential": fixture.checker_credential(),
                "ticketId": "p-t1",
                "eventId": "p-event",
            }),
        )
        .await;
    assert_eq!(response.body["error"]["name"], json!("AlreadyCheckedIn"));

    let response = fixture
        .delete("/api/v1/pipelines/pipeline-p/offline/missing-ticket")
        .await;
    assert_status!(response, StatusCode::NO_CONTENT);
    let response = fixture
        .delete("/api/v1/pipelines/pipeline-p/offline/missing-ticket")
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_offline_tickets_for_checker() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture
        .post(
            "/api/v1/offline/tickets",
            json!({ "credential": fixture.checker_credential() }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    let tickets = response.body["tickets"].as_array().unwrap();
    assert_eq!(tickets.len(), 3);
    assert!(tickets.iter().all(|t| t["eventId"] == json!("p-event")));

    // A holder without a superuser ticket sees nothing.
    let response = fixture
        .post(
            "/api/v1/offline/tickets",
            json!({ "credential": fixture.holder_credential() }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["tickets"], json!([]));
}

#[tokio::test]
async fn test_poll_feed_issues_tickets() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture
        .post(
            "/api/v1/feeds/p-feed",
            json!({ "credential": fixture.holder_credential() }),
        )
        .await;
    assert_status!(response, StatusCode::OK);
    let actions = response.body["actions"].as_array().unwrap();
    assert_eq!(actions[0]["type"], json!("DeleteFolder"));
    assert_eq!(actions[0]["recursive"], json!(true));
    assert_eq!(actions[1]["type"], json!("ReplaceInFolder"));
    assert_eq!(actions[1]["folder"], json!("p/tickets"));
    assert_eq!(actions[1]["artifacts"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_poll_feed_errors() {
    let fixture = fixture_with_pipeline().await;

    let response = fixture.post("/api/v1/feeds/p-feed", json!({})).await;
    assert_status!(response, StatusCode::UNAUTHORIZED);

    let response = fixture
        .post(
            "/api/v1/feeds/nope",
            json!({ "credential": fixture.holder_credential() }),
        )
        .await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_semaphore_group_after_feed_poll() {
    let fixture = fixture_with_pipeline().await;
    fixture
        .post(
            "/api/v1/feeds/p-feed",
            json!({ "credential": fixture.holder_credential() }),
        )
        .await;

    let group = fixture.get("/api/v1/semaphore/pipeline-p/p-attendees").await;
    assert_status!(group, StatusCode::OK);
    let holder = fixtures::holder(1).public_key_hex();
    assert!(group.body["members"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m.as_str() == Some(holder.as_str())));

    let root = fixture
        .get("/api/v1/semaphore/pipeline-p/p-attendees/root")
        .await;
    assert_status!(root, StatusCode::OK);
    assert_eq!(root.body["root"], group.body["root"]);

    let path = format!(
        "/api/v1/semaphore/pipeline-p/p-attendees/{}",
        root.body["root"].as_str().unwrap()
    );
    let historic = fixture.get(&path).await;
    assert_status!(historic, StatusCode::OK);
    assert_eq!(historic.body["members"], group.body["members"]);

    let missing = fixture.get("/api/v1/semaphore/pipeline-p/no-such-group").await;
    assert_status!(missing, StatusCode::NOT_FOUND);
}
