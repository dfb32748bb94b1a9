//! Captcha Client (C1): screenshot bytes -> text, via an external OCR service.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::Deserialize;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum CaptchaError {
    #[error("captcha service returned status {0}")]
    BadStatus(u16),
    #[error("captcha service request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Deserialize)]
struct OcrResponse {
    result: String,
}

/// Shared client for the external CAPTCHA OCR service, built once at startup
/// and handed to every Coordinator by `Arc`.
#[derive(Clone)]
pub struct CaptchaClient {
    http: reqwest::Client,
    service_url: String,
    token: Option<String>,
}

impl CaptchaClient {
    pub fn new(service_url: String, token: Option<String>) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            service_url,
            token,
        })
    }

    /// Solve a captcha image. The caller decides whether the returned text is
    /// usable (length == 6); this client only reports service-level failure.
    pub async fn solve(&self, image_bytes: &[u8], tag: &str) -> Result<String, CaptchaError> {
        let encoded = BASE64.encode(image_bytes);

        let mut req = self
            .http
            .post(&self.service_url)
            .form(&[
                ("image", encoded.as_str()),
                ("len_str", "6"),
                ("mode", "auto"),
                ("tag", tag),
            ]);

        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(CaptchaError::BadStatus(resp.status().as_u16()));
        }

        let body: OcrResponse = resp.json().await?;
        Ok(body.result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn solve_returns_result_field() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": "AB12CD"
            })))
            .mount(&server)
            .await;

        let client = CaptchaClient::new(server.uri(), None).unwrap();
        let text = client.solve(b"fake-png-bytes", "job-1").await.unwrap();
        assert_eq!(text, "AB12CD");
    }

    #[tokio::test]
    async fn solve_errors_on_non_200() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = CaptchaClient::new(server.uri(), None).unwrap();
        let err = client.solve(b"x", "job-1").await.unwrap_err();
        assert!(matches!(err, CaptchaError::BadStatus(503)));
    }
}
