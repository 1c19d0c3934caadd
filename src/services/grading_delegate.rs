use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::core::config::GradingSettings;
use crate::services::rubric::RubricEntry;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub(crate) struct BoundingBox {
    pub(crate) x0: f64,
    pub(crate) y0: f64,
    pub(crate) x1: f64,
    pub(crate) y1: f64,
}

impl BoundingBox {
    pub(crate) fn is_finite(&self) -> bool {
        [self.x0, self.y0, self.x1, self.y1].iter().all(|value| value.is_finite())
    }
}

/// One per-question result from the analysis service.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DetectionResult {
    /// Rubric question this result belongs to; positional when the service omits it.
    pub(crate) question_id: String,
    pub(crate) bounding_box: BoundingBox,
    pub(crate) is_correct: bool,
    /// Points reported by the service for this question.
    pub(crate) points: f64,
}

impl DetectionResult {
    pub(crate) fn awarded_points(&self) -> f64 {
        if self.is_correct {
            self.points
        } else {
            0.0
        }
    }
}

/// Sends a document and its rubric to the external analysis engine.
#[async_trait]
pub(crate) trait GradingDelegate: Send + Sync {
    async fn grade(
        &self,
        document: &[u8],
        document_reference: &str,
        rubric: &[RubricEntry],
    ) -> Result<Vec<DetectionResult>>;
}

#[derive(Debug, Serialize)]
struct RubricItemPayload<'a> {
    question_id: &'a str,
    question: &'a str,
    answer: Option<&'a str>,
    canonical_answers: &'a [String],
    points: f64,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    results: Vec<AnalyzeResult>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeResult {
    #[serde(default)]
    question_id: Option<String>,
    #[serde(alias = "bounding_box")]
    question_rect: BoundingBox,
    is_correct: bool,
    #[serde(default)]
    points: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct HttpGradingDelegate {
    client: Client,
    endpoint: String,
}

impl HttpGradingDelegate {
    pub(crate) fn from_settings(settings: &GradingSettings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.timeout_seconds))
            .build()
            .context("Failed to build grading HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/analyze_qcm", settings.service_url.trim_end_matches('/')),
        })
    }
}

#[async_trait]
impl GradingDelegate for HttpGradingDelegate {
    async fn grade(
        &self,
        document: &[u8],
        document_reference: &str,
        rubric: &[RubricEntry],
    ) -> Result<Vec<DetectionResult>> {
        let correct_answers = serde_json::to_string(&rubric_payload(rubric))
            .context("Failed to serialize rubric")?;

        let pdf = Part::bytes(document.to_vec())
            .file_name("sheet.pdf")
            .mime_str("application/pdf")
            .context("Invalid document content type")?;
        let form = Form::new()
            .part("pdf", pdf)
            .text("document_reference", document_reference.to_string())
            .text("correct_answers", correct_answers);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .context("Failed to call grading service")?;

        let status = response.status();
        let raw_body = response.text().await.context("Failed to read grading response")?;
        if !status.is_success() {
            anyhow::bail!("Grading service failed (status {status}): {}", truncate(&raw_body));
        }

        let parsed: AnalyzeResponse = serde_json::from_str(&raw_body).map_err(|err| {
            anyhow::anyhow!(
                "Grading service returned malformed body: {err}: {}",
                truncate(&raw_body)
            )
        })?;

        Ok(correlate(parsed.results, rubric))
    }
}

fn rubric_payload(rubric: &[RubricEntry]) -> Vec<RubricItemPayload<'_>> {
    rubric
        .iter()
        .map(|entry| RubricItemPayload {
            question_id: &entry.question_id,
            question: &entry.question_text,
            answer: entry.canonical_value.as_deref(),
            canonical_answers: &entry.canonical_answers,
            points: entry.points,
        })
        .collect()
}

/// Attaches a question id to each result, falling back to its position in the rubric.
fn correlate(results: Vec<AnalyzeResult>, rubric: &[RubricEntry]) -> Vec<DetectionResult> {
    results
        .into_iter()
        .enumerate()
        .map(|(index, result)| DetectionResult {
            question_id: result
                .question_id
                .or_else(|| rubric.get(index).map(|entry| entry.question_id.clone()))
                .unwrap_or_else(|| format!("#{index}")),
            bounding_box: result.question_rect,
            is_correct: result.is_correct,
            points: result.points,
        })
        .collect()
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(500) {
        Some((index, _)) => &body[..index],
        None => body,
    }
}
