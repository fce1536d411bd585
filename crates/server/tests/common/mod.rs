//! Common test utilities for API testing.
//!
//! This module provides a test fixture that creates an in-process server
//! over a temporary database, with a manual clock shared by the service and
//! the credential factory.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::Utc;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use gatehouse_core::{
    auth::OPERATOR_EMAIL_HEADER,
    clock::ManualClock,
    pipeline::{BackendRegistry, PipelineKind},
    testing::{fixtures::CredentialFactory, MockTicketBackend},
    IssuanceService, NoneAuthenticator, SerializedCredential, ServiceStores,
};

/// Re-export fixtures for test convenience
pub use gatehouse_core::testing::fixtures;

/// Test fixture for API testing.
///
/// # Example
///
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_list_pipelines() {
///     let fixture = TestFixture::new().await;
///
///     let response = fixture.get("/api/v1/pipelines").await;
///
///     assert_eq!(response.status, 200);
/// }
/// ```
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    pub service: Arc<IssuanceService>,
    /// Mock backend serving `Pretix` pipelines
    pub backend: MockTicketBackend,
    pub clock: Arc<ManualClock>,
    pub credentials: CredentialFactory,
    /// Operator email sent with every request, if any
    pub operator: Option<String>,
    /// Temporary directory for the test database
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    /// Create a new test fixture acting as the configured admin.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = fixtures::test_config();
        config.database.path = db_path.clone();

        let clock = Arc::new(ManualClock::new(Utc::now()));
        let backend = MockTicketBackend::new();
        let mut backends = BackendRegistry::with_builtin();
        backends.register(PipelineKind::Pretix, backend.factory());

        let stores = ServiceStores::open(&db_path).expect("Failed to open stores");
        let service = Arc::new(
            IssuanceService::new(&config, stores, backends, clock.clone())
                .expect("Failed to create service"),
        );
        service.start().await.expect("Failed to start service");

        let state = Arc::new(gatehouse_server::state::AppState::new(
            config,
            Arc::new(NoneAuthenticator),
            Arc::clone(&service),
        ));
        let router = gatehouse_server::api::create_router(state);

        Self {
            router,
            service,
            backend,
            credentials: CredentialFactory::new(clock.clone(), 3600),
            clock,
            operator: Some(fixtures::ADMIN_EMAIL.to_string()),
            temp_dir,
        }
    }

    /// Same fixture acting as another operator.
    pub fn as_operator(mut self, email: Option<&str>) -> Self {
        self.operator = email.map(str::to_string);
        self
    }

    /// Credential of the event checker (holds a staff ticket in every
    /// fixture pipeline).
    pub fn checker_credential(&self) -> SerializedCredential {
        self.credentials
            .credential(&fixtures::holder(2), Some(fixtures::CHECKER_EMAIL))
    }

    /// Credential of a regular ticket holder.
    pub fn holder_credential(&self) -> SerializedCredential {
        self.credentials
            .credential(&fixtures::holder(1), Some(fixtures::HOLDER_EMAIL))
    }

    /// Create pipeline `pipeline-{prefix}` through the API.
    pub async fn create_pipeline(&self, prefix: &str) -> TestResponse {
        let draft = fixtures::draft(prefix, PipelineKind::CsvTicket);
        self.put("/api/v1/pipelines", serde_json::to_value(draft).unwrap())
            .await
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a PUT request with JSON body.
    pub async fn put(&self, path: &str, body: Value) -> TestResponse {
        self.request("PUT", path, Some(body)).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    /// Send a POST request with raw string body (for testing malformed JSON).
    pub async fn post_raw(&self, path: &str, body: &str) -> TestResponse {
        let request = self
            .builder("POST", path)
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send(request).await
    }

    /// Send a GET request and return the raw body text.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = self.builder("GET", path).body(Body::empty()).unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).to_string())
    }

    fn builder(&self, method: &str, path: &str) -> axum::http::request::Builder {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(operator) = &self.operator {
            builder = builder.header(OPERATOR_EMAIL_HEADER, operator);
        }
        builder
    }

    /// Send a request to the test server.
    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let mut request_builder = self.builder(method, path);

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        self.send(request_builder.body(body).unwrap()).await
    }

    async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}

/// Helper to assert a JSON path equals expected value.
#[macro_export]
macro_rules! assert_json_path {
    ($json:expr, $path:expr, $expected:expr) => {
        let actual = &$json[$path];
        assert_eq!(
            actual, &$expected,
            "Path '{}' expected {:?}, got {:?}",
            $path, $expected, actual
        );
    };
}
