use anyhow::{Context, Result};
use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;

use crate::config::TargetConfig;
use crate::corpus::WorkItem;
use crate::error::FailureReason;
use crate::stats::RequestOutcome;

/// Multipart field carrying the uploaded file.
pub const FILE_FIELD: &str = "file[]";

/// Map a response status (or the error that prevented one) to an outcome.
/// Only exactly 200 counts as success.
pub fn classify(response: Result<StatusCode, FailureReason>, latency: Duration) -> RequestOutcome {
    match response {
        Ok(StatusCode::OK) => RequestOutcome::Success(latency),
        Ok(status) => RequestOutcome::Failure(FailureReason::Status(status.as_u16())),
        Err(reason) => RequestOutcome::Failure(reason),
    }
}

/// Trait for upload adapters
pub trait Uploader: Send + Sync {
    fn name(&self) -> &'static str;

    /// Send one upload for `item` and classify it. Never fails; every error is
    /// folded into [`RequestOutcome::Failure`].
    fn upload<'a>(
        &'a self,
        item: &'a WorkItem,
    ) -> Pin<Box<dyn std::future::Future<Output = RequestOutcome> + Send + 'a>>;
}

/// Mock uploader for testing (answers every request with a fixed status after a delay)
pub struct MockUploader {
    delay: Duration,
    status: StatusCode,
    calls: AtomicU64,
}

impl MockUploader {
    pub fn new(delay_ms: u64) -> Self {
        Self::with_status(delay_ms, StatusCode::OK)
    }

    pub fn with_status(delay_ms: u64, status: StatusCode) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms),
            status,
            calls: AtomicU64::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

impl Uploader for MockUploader {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn upload<'a>(
        &'a self,
        _item: &'a WorkItem,
    ) -> Pin<Box<dyn std::future::Future<Output = RequestOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::Relaxed);
            let start = Instant::now();
            sleep(self.delay).await;
            classify(Ok(self.status), start.elapsed())
        })
    }
}

/// Multipart POST uploader over a shared reqwest client.
pub struct HttpUploader {
    client: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl HttpUploader {
    pub fn new(target: &TargetConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(target.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: target.url.clone(),
            headers: static_headers(target)?,
        })
    }

    fn form(item: &WorkItem) -> Result<Form, FailureReason> {
        let part = Part::bytes(item.payload().to_vec())
            .file_name(item.name().to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| FailureReason::Multipart(e.to_string()))?;
        Ok(Form::new().part(FILE_FIELD, part))
    }
}

/// Header bag sent with every upload. Content-Type is set per request by the
/// multipart form.
fn static_headers(target: &TargetConfig) -> Result<HeaderMap> {
    let pairs: [(HeaderName, String); 11] = [
        (header::ACCEPT, "*/*".to_string()),
        (header::ACCEPT_LANGUAGE, "en-US,en;q=0.9".to_string()),
        (header::CONNECTION, "keep-alive".to_string()),
        (header::ORIGIN, target.origin.clone()),
        (header::REFERER, target.referer.clone()),
        (HeaderName::from_static("sec-fetch-dest"), "empty".to_string()),
        (HeaderName::from_static("sec-fetch-mode"), "cors".to_string()),
        (HeaderName::from_static("sec-fetch-site"), "same-origin".to_string()),
        (header::USER_AGENT, target.user_agent.clone()),
        (header::AUTHORIZATION, format!("Bearer {}", target.bearer_token)),
        (HeaderName::from_static("time-zone"), target.time_zone.clone()),
    ];

    let mut headers = HeaderMap::with_capacity(pairs.len());
    for (name, value) in pairs {
        let value = HeaderValue::from_str(&value)
            .with_context(|| format!("Invalid value for header {name}"))?;
        headers.insert(name, value);
    }
    if let Some(auth) = headers.get_mut(header::AUTHORIZATION) {
        auth.set_sensitive(true);
    }
    Ok(headers)
}

impl Uploader for HttpUploader {
    fn name(&self) -> &'static str {
        "http"
    }

    fn upload<'a>(
        &'a self,
        item: &'a WorkItem,
    ) -> Pin<Box<dyn std::future::Future<Output = RequestOutcome> + Send + 'a>> {
        Box::pin(async move {
            let form = match Self::form(item) {
                Ok(form) => form,
                Err(reason) => return RequestOutcome::Failure(reason),
            };

            let request = self
                .client
                .post(&self.url)
                .headers(self.headers.clone())
                .multipart(form);

            // Timing stops once headers arrive; the body is dropped unread.
            let start = Instant::now();
            let response = request
                .send()
                .await
                .map(|response| response.status())
                .map_err(|e| FailureReason::from_reqwest(&e));
            classify(response, start.elapsed())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::Corpus;

    #[test]
    fn test_classify_only_200_succeeds() {
        let latency = Duration::from_millis(7);
        assert_eq!(
            classify(Ok(StatusCode::OK), latency),
            RequestOutcome::Success(latency)
        );
        for status in [
            StatusCode::CREATED,
            StatusCode::ACCEPTED,
            StatusCode::NO_CONTENT,
            StatusCode::UNAUTHORIZED,
            StatusCode::INTERNAL_SERVER_ERROR,
        ] {
            assert_eq!(
                classify(Ok(status), latency),
                RequestOutcome::Failure(FailureReason::Status(status.as_u16()))
            );
        }
        assert_eq!(
            classify(Err(FailureReason::Timeout), latency),
            RequestOutcome::Failure(FailureReason::Timeout)
        );
    }

    #[test]
    fn test_classify_is_order_independent() {
        let inputs = [
            Ok(StatusCode::OK),
            Ok(StatusCode::BAD_GATEWAY),
            Err(FailureReason::Transport("reset".into())),
            Ok(StatusCode::OK),
        ];
        let forward: Vec<bool> = inputs
            .iter()
            .cloned()
            .map(|r| classify(r, Duration::ZERO).is_success())
            .collect();
        let mut backward: Vec<bool> = inputs
            .iter()
            .rev()
            .cloned()
            .map(|r| classify(r, Duration::ZERO).is_success())
            .collect();
        backward.reverse();
        assert_eq!(forward, backward);
        assert_eq!(forward, vec![true, false, false, true]);
    }

    #[test]
    fn test_static_headers() {
        let target = TargetConfig {
            bearer_token: "abc".into(),
            ..TargetConfig::default()
        };
        let headers = static_headers(&target).unwrap();
        assert_eq!(headers.len(), 11);
        assert_eq!(headers[header::AUTHORIZATION], "Bearer abc");
        assert!(headers[header::AUTHORIZATION].is_sensitive());
        assert_eq!(headers["time-zone"], "Europe/Moscow");
        assert_eq!(headers["sec-fetch-site"], "same-origin");
        assert!(headers.get(header::CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_invalid_token_is_a_setup_error() {
        let target = TargetConfig {
            bearer_token: "bad\ntoken".into(),
            ..TargetConfig::default()
        };
        assert!(HttpUploader::new(&target).is_err());
    }

    #[tokio::test]
    async fn test_mock_uploader_counts_calls() {
        let corpus = Corpus::from_entries([("a.png", vec![0u8; 4])]).unwrap();
        let uploader = MockUploader::with_status(0, StatusCode::SERVICE_UNAVAILABLE);

        let outcome = uploader.upload(&corpus.item(0)).await;
        assert_eq!(outcome, RequestOutcome::Failure(FailureReason::Status(503)));
        assert_eq!(uploader.calls(), 1);
    }
}
