//! End-to-end tests against running binaries
//!
//! These tests require:
//! 1. PostgreSQL database running (with migrations applied)
//! 2. Redis running
//! 3. Intake server running on configured port
//! 4. `captioner` and `generator` workers running
//! 5. Inference, mailer and bucket credentials configured
//!
//! Run with: cargo test --test e2e_test -- --ignored --nocapture
//!
//! Set API_BASE_URL to override default (http://localhost:3000)

mod helpers;

use helpers::*;
use reqwest::StatusCode;

/// Get base URL from env or default to localhost
fn get_base_url() -> String {
    std::env::var("API_BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string())
}

fn get_recipient() -> String {
    std::env::var("E2E_EMAIL").unwrap_or_else(|_| "e2e@example.com".to_string())
}

#[tokio::test]
#[ignore] // Requires running intake server and infrastructure
async fn test_e2e_health_check() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/health", base_url))
        .send()
        .await
        .expect("Health check failed");

    assert!(
        response.status().is_success(),
        "Health check returned non-success status: {}",
        response.status()
    );

    println!("✓ Health check passed");
}

#[tokio::test]
#[ignore] // Requires running intake server, both workers and all infrastructure
async fn test_e2e_photo_reaches_terminal_state() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    // 1. Upload
    let registered = register_photo(&client, &base_url, &get_recipient(), sample_png(64, 64))
        .await
        .expect("Failed to upload photo");

    assert_eq!(registered.status, "pending");
    println!("  ✓ Upload accepted, id: {}", registered.id);

    // 2. Poll until captioned and generated
    let finished = wait_for_request(&client, &base_url, registered.id)
        .await
        .expect("Failed to wait for request");

    println!("  ✓ Request finished with status: {}", finished.status);

    // 3. Terminal state shape
    match finished.status.as_str() {
        "completed" => {
            let url = finished.result_url.expect("completed request without URL");
            assert!(url.starts_with("http"), "unexpected result URL {url}");
            assert!(url.contains(&format!("result/{}/", registered.id)));
            assert!(finished.caption.is_some_and(|c| !c.is_empty()));
        }
        "failed" => {
            assert!(finished.result_url.is_none());
            println!("  ⚠ Generation failed for request {}", registered.id);
        }
        other => panic!("unexpected terminal status {other}"),
    }
}

#[tokio::test]
#[ignore] // Requires running intake server and infrastructure
async fn test_e2e_rejects_invalid_uploads() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = post_upload(&client, &base_url, "not-an-email", sample_png(8, 8))
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let response = post_upload(&client, &base_url, &get_recipient(), b"plain text".to_vec())
        .await
        .expect("Request failed");
    assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

    println!("✓ Invalid uploads rejected");
}

#[tokio::test]
#[ignore] // Requires running intake server and infrastructure
async fn test_e2e_unknown_request_is_404() {
    let base_url = get_base_url();
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{}/api/v1/requests/{}", base_url, i64::MAX))
        .send()
        .await
        .expect("Status check failed");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
