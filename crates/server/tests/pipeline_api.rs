//! Operator API integration tests: pipeline definitions, diagnostics and
//! manual loads.

mod common;

use axum::http::StatusCode;
use common::{fixtures, TestFixture};
use gatehouse_core::pipeline::DefinitionStore as _;
use gatehouse_core::PipelineKind;
use serde_json::json;

#[tokio::test]
async fn test_health_and_config() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "status", json!("ok"));

    let response = fixture.get("/api/v1/config").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["issuance"]["signing_key_configured"], json!(true));
    assert_eq!(response.body["issuance"]["admin_count"], json!(1));
    assert!(response.body["issuance"].get("signing_key").is_none());
}

#[tokio::test]
async fn test_operator_routes_require_email() {
    let fixture = TestFixture::new().await.as_operator(None);

    let response = fixture.get("/api/v1/pipelines").await;
    assert_status!(response, StatusCode::UNAUTHORIZED);
    assert!(response.body["error"]
        .as_str()
        .unwrap()
        .contains("x-user-email"));

    // Public routes stay open.
    let response = fixture.get("/api/v1/health").await;
    assert_status!(response, StatusCode::OK);
}

#[tokio::test]
async fn test_create_pipeline_runs_first_load() {
    let fixture = TestFixture::new().await;

    let response = fixture.create_pipeline("p").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["definition"]["id"], json!("pipeline-p"));
    assert_eq!(response.body["definition"]["kind"], json!("csv_ticket"));
    assert_eq!(response.body["state"], json!("running"));

    let response = fixture.get("/api/v1/pipelines").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body.as_array().unwrap().len(), 1);

    let response = fixture.get("/api/v1/pipelines/pipeline-p/info").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"]["state"], json!("running"));
    assert_eq!(response.body["info"]["ticket_count"], json!(3));
    assert_eq!(response.body["info"]["feed"]["feedId"], json!("p-feed"));
    assert_eq!(response.body["info"]["last_load"]["success"], json!(true));
}

#[tokio::test]
async fn test_edit_with_stale_timestamp_conflicts() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;

    // Editing an existing definition without its timestamp.
    let response = fixture.create_pipeline("p").await;
    assert_status!(response, StatusCode::CONFLICT);

    let stored = fixture.get("/api/v1/pipelines/pipeline-p").await;
    assert_status!(stored, StatusCode::OK);

    let mut draft = serde_json::to_value(fixtures::draft("p", PipelineKind::CsvTicket)).unwrap();
    draft["options"]["name"] = json!("Renamed");
    draft["time_updated"] = stored.body["time_updated"].clone();
    let response = fixture.put("/api/v1/pipelines", draft).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["definition"]["options"]["name"], json!("Renamed"));
}

#[tokio::test]
async fn test_invalid_definition_is_rejected() {
    let fixture = TestFixture::new().await;

    let mut draft = serde_json::to_value(fixtures::draft("p", PipelineKind::CsvTicket)).unwrap();
    draft["options"]["name"] = json!("");
    let response = fixture.put("/api/v1/pipelines", draft).await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture.get("/api/v1/pipelines").await;
    assert_eq!(response.body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_outsider_cannot_see_pipeline() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;

    let fixture = fixture.as_operator(Some("outsider@example.com"));

    let response = fixture.get("/api/v1/pipelines").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body, json!([]));

    let response = fixture.get("/api/v1/pipelines/pipeline-p").await;
    assert_status!(response, StatusCode::FORBIDDEN);

    let response = fixture.post("/api/v1/pipelines/pipeline-p/load", json!({})).await;
    assert_status!(response, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_manual_load_returns_summary() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;

    let response = fixture
        .post("/api/v1/pipelines/pipeline-p/load", json!({}))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "success", json!(true));
    assert_json_path!(response.body, "atoms_loaded", json!(3));
    assert_json_path!(response.body, "offline_tickets_failed_to_check_in", json!(0));
}

#[tokio::test]
async fn test_remote_pipeline_failure_is_reported() {
    let fixture = TestFixture::new().await;
    fixture
        .backend
        .set_fetch_error(Some(gatehouse_core::pipeline::BackendError::Transport(
            "connection refused".to_string(),
        )))
        .await;

    let draft = serde_json::to_value(fixtures::draft("r", PipelineKind::Pretix)).unwrap();
    let response = fixture.put("/api/v1/pipelines", draft).await;
    assert_status!(response, StatusCode::OK);

    let response = fixture.get("/api/v1/pipelines/pipeline-r/info").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["info"]["last_load"]["success"], json!(false));
    assert!(response.body["status"]["load_incident_id"].is_string());

    fixture.backend.set_fetch_error(None).await;
    let response = fixture
        .post("/api/v1/pipelines/pipeline-r/load", json!({}))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_json_path!(response.body, "success", json!(true));
}

#[tokio::test]
async fn test_delete_pipeline() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;

    let response = fixture.delete("/api/v1/pipelines/pipeline-p").await;
    assert_status!(response, StatusCode::NO_CONTENT);

    let response = fixture.get("/api/v1/pipelines/pipeline-p").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.delete("/api/v1/pipelines/pipeline-p").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_definitions_survive_service_restart() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;
    fixture.service.stop().await;

    let status = fixture
        .service
        .scheduler()
        .slot_status("pipeline-p")
        .await
        .unwrap();
    assert_eq!(status.state, gatehouse_core::SlotState::Stopped);

    // The definition stays in the database file.
    let db_path = fixture.temp_dir.path().join("test.db");
    let stores = gatehouse_core::ServiceStores::open(&db_path).unwrap();
    let stored = stores.definitions.get("pipeline-p").unwrap();
    assert!(stored.is_some());
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let fixture = TestFixture::new().await;
    fixture.create_pipeline("p").await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("gatehouse_http_requests_total"));
    assert!(body.contains("gatehouse_pipeline_slots"));
}
