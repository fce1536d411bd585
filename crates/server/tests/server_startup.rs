use std::io::Write;
use std::net::TcpListener;
use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tempfile::{NamedTempFile, TempDir};
use tokio::time::{sleep, timeout};

/// Valid Ed25519 public key (RFC 8032, test 1).
const EMAIL_ISSUER_KEY: &str = "d75a980182b10ab7d54bfed3c964073a0ee172f3daa62325af021a68f707511a";

/// Find an available port
fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Create a minimal valid config
fn minimal_config(port: u16, db_path: &Path) -> String {
    format!(
        r#"
[auth]
method = "none"

[issuance]
signing_key = "{}"
email_issuer_public_key = "{}"
admin_emails = ["admin@example.com"]

[server]
host = "127.0.0.1"
port = {}

[database]
path = "{}"
"#,
        "15".repeat(32),
        EMAIL_ISSUER_KEY,
        port,
        db_path.display()
    )
}

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    temp_file.write_all(content.as_bytes()).unwrap();
    temp_file.flush().unwrap();
    temp_file
}

/// Spawn the server and return a handle
async fn spawn_server(config_path: &Path) -> tokio::process::Child {
    tokio::process::Command::new(env!("CARGO_BIN_EXE_gatehouse"))
        .env("GATEHOUSE_CONFIG", config_path)
        .env("RUST_LOG", "error") // Quiet logs during tests
        .kill_on_drop(true)
        .spawn()
        .expect("Failed to spawn server")
}

/// Wait for server to be ready
async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    let client = Client::new();
    for _ in 0..max_attempts {
        if client
            .get(format!("http://127.0.0.1:{}/api/v1/health", port))
            .send()
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn run_expecting_failure(config_path: &Path) -> std::process::Output {
    timeout(
        Duration::from_secs(5),
        tokio::process::Command::new(env!("CARGO_BIN_EXE_gatehouse"))
            .env("GATEHOUSE_CONFIG", config_path)
            .env("RUST_LOG", "error")
            .output(),
    )
    .await
    .expect("Command timed out")
    .expect("Failed to execute command")
}

#[tokio::test]
async fn test_health_endpoint() {
    let port = get_available_port();
    let dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &dir.path().join("gatehouse.db")));

    let mut server = spawn_server(temp_file.path()).await;

    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let response = client
        .get(format!("http://127.0.0.1:{}/api/v1/health", port))
        .send()
        .await
        .expect("Failed to send request");

    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["status"], "ok");

    // Cleanup
    server.kill().await.ok();
}

#[tokio::test]
async fn test_config_endpoint_returns_sanitized() {
    let port = get_available_port();
    let dir = TempDir::new().unwrap();
    let temp_file = write_config(&minimal_config(port, &dir.path().join("gatehouse.db")));

    let mut server = spawn_server(temp_file.path()).await;

    assert!(
        wait_for_server(port, 40).await,
        "Server did not start in time"
    );

    let client = Client::new();
    let url = format!("http://127.0.0.1:{}/api/v1/config", port);

    // Operator routes need an operator email.
    let response = client.get(&url).send().await.expect("Failed to send request");
    assert_eq!(response.status().as_u16(), 401);

    let response = client
        .get(&url)
        .header("x-user-email", "admin@example.com")
        .send()
        .await
        .expect("Failed to send request");
    assert!(response.status().is_success());

    let json: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(json["auth"]["method"], "none");
    assert_eq!(json["server"]["port"], port);
    assert_eq!(json["issuance"]["signing_key_configured"], true);
    assert!(json["issuance"].get("signing_key").is_none());

    // Cleanup
    server.kill().await.ok();
}

#[tokio::test]
async fn test_missing_config_file_exits_with_error() {
    let result = run_expecting_failure(Path::new("/nonexistent/config.toml")).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_missing_issuance_section_exits_with_error() {
    let temp_file = write_config(
        r#"
[auth]
method = "none"

[server]
port = 8080
"#,
    );

    let result = run_expecting_failure(temp_file.path()).await;
    assert!(!result.status.success());
}

#[tokio::test]
async fn test_invalid_signing_key_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let config = minimal_config(get_available_port(), &dir.path().join("gatehouse.db"))
        .replace(&"15".repeat(32), "not-hex");
    let temp_file = write_config(&config);

    let result = run_expecting_failure(temp_file.path()).await;
    assert!(!result.status.success());
}
