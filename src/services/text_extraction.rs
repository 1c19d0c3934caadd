use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;

use crate::core::config::OcrSettings;

/// Runs OCR over a raw document and returns its text with layout discarded.
#[async_trait]
pub(crate) trait TextExtractor: Send + Sync {
    async fn extract_text(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String>;
}

#[derive(Debug, Clone)]
pub(crate) struct DatalabTextExtractor {
    client: Client,
    api_key: String,
    base_url: String,
    poll_interval: Duration,
    max_poll_attempts: u32,
}

#[derive(Debug, Clone)]
struct OcrJobRef {
    request_id: String,
    request_check_url: String,
}

impl DatalabTextExtractor {
    pub(crate) fn from_settings(settings: &OcrSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build OCR HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.api_key.clone(),
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_secs(settings.poll_interval_seconds),
            max_poll_attempts: settings.max_poll_attempts,
        })
    }

    async fn submit_job(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<OcrJobRef> {
        let endpoint = format!("{}/ocr", self.base_url);
        let part = Part::bytes(bytes.to_vec())
            .file_name(file_name.to_string())
            .mime_str(content_type)
            .context("Invalid content type for OCR upload")?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(&endpoint)
            .header("X-Api-Key", &self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to call OCR submit endpoint")?;

        let status = response.status();
        let raw_body = response.text().await.context("Failed to read OCR submit response")?;
        let parsed = serde_json::from_str::<Value>(&raw_body).map_err(|err| {
            anyhow::anyhow!(
                "OCR submit returned non-JSON body (status {status}): {err}: {raw_body}"
            )
        })?;

        if !status.is_success() {
            anyhow::bail!(
                "OCR submit failed (status {status}): {}",
                extract_error_message(&parsed)
            );
        }

        if parsed.get("success").and_then(Value::as_bool).is_some_and(|value| !value) {
            anyhow::bail!("OCR submit returned success=false: {}", extract_error_message(&parsed));
        }

        extract_job_ref(&self.base_url, &parsed)
            .context("OCR submit response missing request reference")
    }

    async fn poll_result(&self, job_ref: &OcrJobRef) -> Result<String> {
        for attempt in 0..self.max_poll_attempts {
            let response = self
                .client
                .get(&job_ref.request_check_url)
                .header("X-Api-Key", &self.api_key)
                .send()
                .await
                .context("Failed to call OCR result endpoint")?;

            let status_code = response.status();
            let raw_body = response.text().await.context("Failed to read OCR poll response")?;
            let parsed: Value = serde_json::from_str(&raw_body).map_err(|err| {
                anyhow::anyhow!(
                    "OCR poll returned non-JSON body (status {status_code}): {err}: {raw_body}"
                )
            })?;

            if !status_code.is_success() {
                anyhow::bail!(
                    "OCR poll failed (status {status_code}): {}",
                    extract_error_message(&parsed)
                );
            }

            let status = parsed
                .get("status")
                .and_then(Value::as_str)
                .map(|value| value.to_ascii_lowercase())
                .unwrap_or_else(|| "unknown".to_string());

            if status == "complete" || status == "completed" {
                return Ok(flatten_text(&parsed));
            }

            if status == "failed" || status == "error" {
                anyhow::bail!(
                    "OCR job {} failed: {}",
                    job_ref.request_id,
                    extract_error_message(&parsed)
                );
            }

            if attempt + 1 >= self.max_poll_attempts {
                break;
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        Err(anyhow::anyhow!(
            "OCR polling gave up on request {} after {} attempts",
            job_ref.request_id,
            self.max_poll_attempts
        ))
    }
}

#[async_trait]
impl TextExtractor for DatalabTextExtractor {
    async fn extract_text(
        &self,
        bytes: &[u8],
        file_name: &str,
        content_type: &str,
    ) -> Result<String> {
        let job_ref = self.submit_job(bytes, file_name, content_type).await?;
        tracing::debug!(request_id = %job_ref.request_id, file_name, "OCR job submitted");
        self.poll_result(&job_ref).await
    }
}

/// Joins every recognised line across pages with single spaces.
fn flatten_text(payload: &Value) -> String {
    let container = payload.get("result").unwrap_or(payload);

    let lines: Vec<&str> = container
        .get("pages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .flat_map(|page| {
            page.get("text_lines").and_then(Value::as_array).into_iter().flatten()
        })
        .filter_map(|line| line.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if !lines.is_empty() {
        return lines.join(" ");
    }

    container
        .get("text")
        .or_else(|| container.get("markdown"))
        .and_then(Value::as_str)
        .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
        .unwrap_or_default()
}

fn extract_job_ref(base_url: &str, payload: &Value) -> Option<OcrJobRef> {
    let request_check_url = extract_request_check_url(base_url, payload);
    let request_id = payload
        .get("request_id")
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| {
            request_check_url.clone().and_then(|url| {
                url.trim_end_matches('/').rsplit('/').next().map(ToString::to_string)
            })
        })?;

    let request_check_url =
        request_check_url.unwrap_or_else(|| format!("{base_url}/ocr/{request_id}"));

    Some(OcrJobRef { request_id, request_check_url })
}

fn extract_request_check_url(base_url: &str, payload: &Value) -> Option<String> {
    let raw = payload.get("request_check_url").and_then(Value::as_str)?;
    if raw.starts_with("http://") || raw.starts_with("https://") {
        return Some(raw.to_string());
    }
    let normalized_base = format!("{}/", base_url.trim_end_matches('/'));
    reqwest::Url::parse(&normalized_base)
        .ok()
        .and_then(|base| base.join(raw).ok())
        .map(|url| url.to_string())
}

fn extract_error_message(payload: &Value) -> String {
    if let Some(detail) = payload.get("detail") {
        if let Some(text) = detail.as_str() {
            return text.to_string();
        }
        if let Some(items) = detail.as_array() {
            let joined = items
                .iter()
                .filter_map(|item| {
                    item.get("msg")
                        .and_then(Value::as_str)
                        .or_else(|| item.get("message").and_then(Value::as_str))
                })
                .collect::<Vec<_>>()
                .join("; ");
            if !joined.is_empty() {
                return joined;
            }
        }
    }

    payload
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
