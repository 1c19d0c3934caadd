use std::future::Future;
use std::time::{Duration, Instant};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub(crate) enum PipelineError {
    #[error("{entity} not found ({criteria})")]
    NotFound { entity: &'static str, criteria: String },
    #[error("{service} call failed: {message}")]
    ExternalService { service: &'static str, message: String },
    #[error("no identifiable student: {reason}")]
    NoIdentifiableStudent { reason: String },
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("persistence failed at {stage}: {message}")]
    Persistence { stage: &'static str, message: String },
}

impl PipelineError {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "not_found",
            Self::ExternalService { .. } => "external_service",
            Self::NoIdentifiableStudent { .. } => "no_identifiable_student",
            Self::Validation(_) => "validation",
            Self::Persistence { .. } => "persistence",
        }
    }

    /// Whether re-running the whole operation may succeed.
    pub(crate) fn is_retryable(&self) -> bool {
        matches!(self, Self::ExternalService { .. } | Self::Persistence { .. })
    }

    pub(crate) fn not_found(entity: &'static str, criteria: impl Into<String>) -> Self {
        Self::NotFound { entity, criteria: criteria.into() }
    }

    pub(crate) fn external(service: &'static str, err: anyhow::Error) -> Self {
        Self::ExternalService { service, message: format!("{err:#}") }
    }

    pub(crate) fn persistence(stage: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Persistence { stage, message: err.to_string() }
    }
}

/// Runs one external call under a deadline; expiry and errors both fail only the current item.
pub(crate) async fn call_external<T, F>(
    service: &'static str,
    limit: Duration,
    future: F,
) -> Result<T, PipelineError>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(limit, future).await;
    metrics::histogram!("external_call_duration_seconds", "service" => service)
        .record(started.elapsed().as_secs_f64());

    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(PipelineError::external(service, err)),
        Err(_) => Err(PipelineError::ExternalService {
            service,
            message: format!("timed out after {}s", limit.as_secs_f64()),
        }),
    }
}
