//! Test helper utilities for E2E testing

use image::{ImageFormat, Rgb, RgbImage};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::time::Duration;
use tokio::time::sleep;

/// Response from POST /api/v1/requests
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub id: i64,
    pub status: String,
}

/// Response from GET /api/v1/requests/{id}
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestStatusResponse {
    pub id: i64,
    pub status: String,
    pub caption: Option<String>,
    pub result_url: Option<String>,
}

/// A small, decodable PNG: a horizontal gradient.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, _| {
        let shade = (x * 255 / width.max(1)) as u8;
        Rgb([shade, 128, 255 - shade])
    });

    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
        .expect("PNG encoding failed");
    buf
}

/// Upload a photo to the intake endpoint and return the raw response.
pub async fn post_upload(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    photo: Vec<u8>,
) -> Result<reqwest::Response, Box<dyn std::error::Error>> {
    let form = multipart::Form::new().text("email", email.to_string()).part(
        "image",
        multipart::Part::bytes(photo)
            .file_name("photo.png")
            .mime_str("image/png")?,
    );

    let response = client
        .post(format!("{}/api/v1/requests", base_url))
        .multipart(form)
        .send()
        .await?;
    Ok(response)
}

/// Upload a photo and expect it to be accepted.
pub async fn register_photo(
    client: &reqwest::Client,
    base_url: &str,
    email: &str,
    photo: Vec<u8>,
) -> Result<RegisterResponse, Box<dyn std::error::Error>> {
    let response = post_upload(client, base_url, email, photo).await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await?;
        return Err(format!("Upload failed with status {}: {}", status, error_text).into());
    }

    Ok(response.json::<RegisterResponse>().await?)
}

/// Poll request status until it reaches a terminal state (with timeout)
pub async fn poll_request_status(
    client: &reqwest::Client,
    base_url: &str,
    id: i64,
    timeout_secs: u64,
) -> Result<RequestStatusResponse, Box<dyn std::error::Error>> {
    let max_attempts = timeout_secs * 2; // Poll every 500ms

    for attempt in 0..max_attempts {
        let response = client
            .get(format!("{}/api/v1/requests/{}", base_url, id))
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(format!("Status check failed: {}", error_text).into());
        }

        let status_response = response.json::<RequestStatusResponse>().await?;

        match status_response.status.as_str() {
            "completed" | "failed" => return Ok(status_response),
            "pending" | "ready" => {
                if attempt % 10 == 0 && attempt > 0 {
                    println!(
                        "  ... still {} (attempt {}/{})",
                        status_response.status, attempt, max_attempts
                    );
                }
                sleep(Duration::from_millis(500)).await;
            }
            _ => {
                return Err(format!("Unknown request status: {}", status_response.status).into());
            }
        }
    }

    Err(format!("Request did not finish within {} seconds", timeout_secs).into())
}

/// Wait for the caption and generation workers to finish a request
pub async fn wait_for_request(
    client: &reqwest::Client,
    base_url: &str,
    id: i64,
) -> Result<RequestStatusResponse, Box<dyn std::error::Error>> {
    poll_request_status(client, base_url, id, 180).await
}
