use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use serde::Serialize;
use tokio::sync::{mpsc, OwnedMutexGuard, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::db::models::Sheet;
use crate::services::activity::{self, ActivityRecorder};
use crate::services::annotator::{format_points, AnnotatedDocument, Annotator};
use crate::services::document::{self, DocumentKind};
use crate::services::grading_delegate::{DetectionResult, GradingDelegate};
use crate::services::rubric::{self, RubricEntry};
use crate::services::storage::{self, ObjectStore};
use crate::services::store::{ExamSelector, GradingStore};
use crate::tasks::errors::{call_external, PipelineError};
use crate::tasks::CallTimeouts;

const OUTCOME_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum CorrectionState {
    Idle,
    RubricLoading,
    Grading,
    Annotating,
    Persisting,
    Done,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct CorrectionResult {
    pub(crate) sheet_id: String,
    pub(crate) corrected_path: String,
    pub(crate) score: f64,
    pub(crate) previous_score: Option<f64>,
    pub(crate) location: String,
    pub(crate) marks: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct OutcomeError {
    pub(crate) kind: &'static str,
    pub(crate) message: String,
    pub(crate) retryable: bool,
}

impl From<&PipelineError> for OutcomeError {
    fn from(err: &PipelineError) -> Self {
        Self { kind: err.kind(), message: err.to_string(), retryable: err.is_retryable() }
    }
}

/// Per-sheet result of a batch correction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SheetOutcome {
    pub(crate) sheet_id: String,
    pub(crate) state: CorrectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) failed_at: Option<CorrectionState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<CorrectionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<OutcomeError>,
}

/// Serialises work on the same sheet id within this process.
#[derive(Debug, Default)]
struct SheetLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SheetLocks {
    async fn acquire(&self, sheet_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(sheet_id.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

struct Transitions<'a> {
    sheet_id: &'a str,
    state: CorrectionState,
}

impl Transitions<'_> {
    fn advance(&mut self, next: CorrectionState) {
        tracing::debug!(
            sheet_id = self.sheet_id,
            from = ?self.state,
            to = ?next,
            "Correction state"
        );
        self.state = next;
    }
}

/// Rubric loading, delegated grading, annotation and two-phase persistence for sheets.
#[derive(Clone)]
pub(crate) struct CorrectionOrchestrator {
    store: Arc<dyn GradingStore>,
    objects: Arc<dyn ObjectStore>,
    grading: Arc<dyn GradingDelegate>,
    annotator: Arc<Annotator>,
    activity: Arc<dyn ActivityRecorder>,
    timeouts: CallTimeouts,
    concurrency: usize,
    locks: Arc<SheetLocks>,
}

impl CorrectionOrchestrator {
    pub(crate) fn new(
        store: Arc<dyn GradingStore>,
        objects: Arc<dyn ObjectStore>,
        grading: Arc<dyn GradingDelegate>,
        annotator: Arc<Annotator>,
        activity: Arc<dyn ActivityRecorder>,
        timeouts: CallTimeouts,
        concurrency: usize,
    ) -> Self {
        Self {
            store,
            objects,
            grading,
            annotator,
            activity,
            timeouts,
            concurrency: concurrency.max(1),
            locks: Arc::new(SheetLocks::default()),
        }
    }

    pub(crate) async fn correct_one(
        &self,
        sheet_id: &str,
        actor_id: &str,
    ) -> Result<CorrectionResult, PipelineError> {
        self.correct_tracked(sheet_id, actor_id).await.map_err(|(_, err)| err)
    }

    /// Corrects one sheet and reports it as an outcome instead of an error.
    pub(crate) async fn correct_outcome(&self, sheet_id: &str, actor_id: &str) -> SheetOutcome {
        match self.correct_tracked(sheet_id, actor_id).await {
            Ok(result) => SheetOutcome {
                sheet_id: sheet_id.to_string(),
                state: CorrectionState::Done,
                failed_at: None,
                result: Some(result),
                error: None,
            },
            Err((failed_at, err)) => SheetOutcome {
                sheet_id: sheet_id.to_string(),
                state: CorrectionState::Failed,
                failed_at: Some(failed_at),
                result: None,
                error: Some(OutcomeError::from(&err)),
            },
        }
    }

    async fn correct_tracked(
        &self,
        sheet_id: &str,
        actor_id: &str,
    ) -> Result<CorrectionResult, (CorrectionState, PipelineError)> {
        let _guard = self.locks.acquire(sheet_id).await;
        let started = Instant::now();
        let mut transitions = Transitions { sheet_id, state: CorrectionState::Idle };

        let result = self.run(&mut transitions, sheet_id).await;
        metrics::histogram!("correction_duration_seconds").record(started.elapsed().as_secs_f64());

        match result {
            Ok(result) => {
                transitions.advance(CorrectionState::Done);
                metrics::counter!("sheet_corrections_total", "status" => "done").increment(1);
                self.activity.record(
                    actor_id,
                    activity::SHEET_CORRECTED,
                    format!(
                        "Corrected answer sheet {} with score {}",
                        result.sheet_id,
                        format_points(result.score)
                    ),
                );
                tracing::info!(
                    sheet_id,
                    score = result.score,
                    corrected_path = %result.corrected_path,
                    "Sheet corrected"
                );
                Ok(result)
            }
            Err(err) => {
                let failed_at = transitions.state;
                transitions.advance(CorrectionState::Failed);
                metrics::counter!("sheet_corrections_total", "status" => err.kind()).increment(1);

                if let PipelineError::Persistence { stage, .. } = &err {
                    metrics::counter!("persistence_failures_total").increment(1);
                    tracing::error!(
                        sheet_id,
                        stage,
                        error = %err,
                        "Annotated sheet was not durably recorded; sheet left uncorrected"
                    );
                } else {
                    tracing::warn!(
                        sheet_id,
                        failed_at = ?failed_at,
                        kind = err.kind(),
                        error = %err,
                        "Sheet correction failed"
                    );
                }

                Err((failed_at, err))
            }
        }
    }

    async fn run(
        &self,
        transitions: &mut Transitions<'_>,
        sheet_id: &str,
    ) -> Result<CorrectionResult, PipelineError> {
        let sheet = self.fetch_sheet(sheet_id).await?;

        transitions.advance(CorrectionState::RubricLoading);
        let exam = call_external(
            "database",
            self.timeouts.database,
            self.store.find_exam_by_id(&sheet.exam_id),
        )
        .await?
        .ok_or_else(|| PipelineError::not_found("exam", format!("id={}", sheet.exam_id)))?;
        let rubric = call_external(
            "database",
            self.timeouts.database,
            rubric::load_rubric(self.store.as_ref(), &exam.id),
        )
        .await?;
        rubric::validate_rubric(&rubric).map_err(PipelineError::Validation)?;

        transitions.advance(CorrectionState::Grading);
        let raw = call_external(
            "object_store",
            self.timeouts.object_store,
            self.objects.get(&sheet.raw_path),
        )
        .await?;
        let pdf = document::normalize_to_pdf(raw)
            .map_err(|err| PipelineError::Validation(format!("raw document unusable: {err:#}")))?;
        let detections = call_external(
            "grading",
            self.timeouts.grading,
            self.grading.grade(&pdf, &sheet.raw_path, &rubric),
        )
        .await?;
        validate_detections(&detections, &rubric)?;

        transitions.advance(CorrectionState::Annotating);
        let annotated = self.annotate(pdf, detections, rubric::rubric_total(&rubric)).await?;

        transitions.advance(CorrectionState::Persisting);
        self.persist(&sheet, annotated.bytes, annotated.total_score, annotated.marks).await
    }

    async fn fetch_sheet(&self, sheet_id: &str) -> Result<Sheet, PipelineError> {
        call_external("database", self.timeouts.database, self.store.find_sheet(sheet_id))
            .await?
            .ok_or_else(|| PipelineError::not_found("sheet", format!("id={sheet_id}")))
    }

    async fn annotate(
        &self,
        pdf: Vec<u8>,
        detections: Vec<DetectionResult>,
        rubric_total: f64,
    ) -> Result<AnnotatedDocument, PipelineError> {
        let annotator = self.annotator.clone();
        tokio::task::spawn_blocking(move || annotator.annotate(&pdf, &detections, rubric_total))
            .await
            .map_err(|err| PipelineError::Validation(format!("annotation task aborted: {err}")))?
            .map_err(|err| PipelineError::Validation(format!("annotation failed: {err:#}")))
    }

    /// Stores the artifact under a fresh key, then records it on the sheet.
    async fn persist(
        &self,
        sheet: &Sheet,
        bytes: Vec<u8>,
        score: f64,
        marks: usize,
    ) -> Result<CorrectionResult, PipelineError> {
        let key = storage::corrected_key(&sheet.id, &Uuid::new_v4().to_string());

        let stored = call_external(
            "object_store",
            self.timeouts.object_store,
            self.objects.put(&key, bytes, DocumentKind::Pdf.content_type()),
        )
        .await
        .map_err(|err| PipelineError::persistence("object_store", err))?;

        let updated = call_external(
            "database",
            self.timeouts.database,
            self.store.mark_corrected(&sheet.id, &key, score),
        )
        .await
        .map_err(|err| PipelineError::persistence("repository", err))?;

        if !updated {
            return Err(PipelineError::persistence(
                "repository",
                format!("sheet {} disappeared before it could be marked", sheet.id),
            ));
        }

        Ok(CorrectionResult {
            sheet_id: sheet.id.clone(),
            corrected_path: key,
            score,
            previous_score: sheet.score,
            location: stored.location,
            marks,
        })
    }

    /// Corrects every sheet of the selected exam on a bounded pool.
    ///
    /// Outcomes are streamed as sheets finish; an unknown exam fails before any work starts.
    pub(crate) async fn correct_batch_stream(
        &self,
        selector: &ExamSelector,
        actor_id: &str,
    ) -> Result<mpsc::Receiver<SheetOutcome>, PipelineError> {
        let exam = call_external("database", self.timeouts.database, self.store.find_exam(selector))
            .await?
            .ok_or_else(|| PipelineError::not_found("exam", selector.to_string()))?;
        let sheets = call_external(
            "database",
            self.timeouts.database,
            self.store.list_sheets_for_exam(&exam.id),
        )
        .await?;

        let mut seen = HashSet::new();
        let sheet_ids: Vec<String> =
            sheets.into_iter().map(|row| row.id).filter(|id| seen.insert(id.clone())).collect();

        tracing::info!(
            exam_id = %exam.id,
            sheets = sheet_ids.len(),
            concurrency = self.concurrency,
            "Starting batch correction"
        );

        let (tx, rx) = mpsc::channel(OUTCOME_BUFFER);
        let orchestrator = self.clone();
        let actor_id = actor_id.to_string();

        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(orchestrator.concurrency));
            let mut in_flight = JoinSet::new();

            for sheet_id in sheet_ids {
                if tx.is_closed() {
                    tracing::info!(
                        exam_id = %exam.id,
                        "Batch consumer gone; not starting remaining sheets"
                    );
                    break;
                }
                let Ok(permit) = semaphore.clone().acquire_owned().await else {
                    break;
                };

                let orchestrator = orchestrator.clone();
                let actor_id = actor_id.clone();
                let tx = tx.clone();
                in_flight.spawn(async move {
                    let outcome = orchestrator.correct_outcome(&sheet_id, &actor_id).await;
                    drop(permit);
                    let _ = tx.send(outcome).await;
                });
            }

            while let Some(joined) = in_flight.join_next().await {
                if let Err(err) = joined {
                    tracing::error!(error = %err, "Correction task ended abnormally");
                }
            }
        });

        Ok(rx)
    }

    pub(crate) async fn correct_batch(
        &self,
        selector: &ExamSelector,
        actor_id: &str,
    ) -> Result<Vec<SheetOutcome>, PipelineError> {
        let mut rx = self.correct_batch_stream(selector, actor_id).await?;
        let mut outcomes = Vec::new();
        while let Some(outcome) = rx.recv().await {
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Replaces the corrected artifact and score with a manually edited version.
    pub(crate) async fn override_correction(
        &self,
        sheet_id: &str,
        pdf: Vec<u8>,
        score: f64,
        explanation: &str,
        actor_id: &str,
    ) -> Result<CorrectionResult, PipelineError> {
        if DocumentKind::sniff(&pdf) != Some(DocumentKind::Pdf) {
            return Err(PipelineError::Validation("override document must be a PDF".to_string()));
        }
        if !score.is_finite() || score < 0.0 {
            return Err(PipelineError::Validation(format!("invalid score {score}")));
        }
        if explanation.trim().is_empty() {
            return Err(PipelineError::Validation("explanation is required".to_string()));
        }

        let _guard = self.locks.acquire(sheet_id).await;
        let sheet = self.fetch_sheet(sheet_id).await?;

        let result = match self.persist(&sheet, pdf, score, 0).await {
            Ok(result) => result,
            Err(err) => {
                metrics::counter!("persistence_failures_total").increment(1);
                tracing::error!(sheet_id, error = %err, "Correction override not recorded");
                return Err(err);
            }
        };

        let previous = sheet.score.map(format_points).unwrap_or_else(|| "none".to_string());
        self.activity.record(
            actor_id,
            activity::CORRECTION_OVERRIDDEN,
            format!(
                "Overrode correction of sheet {}: score {} -> {}. Reason: {}",
                sheet.id,
                previous,
                format_points(score),
                explanation.trim()
            ),
        );
        tracing::info!(sheet_id, score, "Correction overridden");

        Ok(result)
    }
}

/// Rejects detections that cannot be placed or scored against the rubric.
fn validate_detections(
    detections: &[DetectionResult],
    rubric: &[RubricEntry],
) -> Result<(), PipelineError> {
    let worth: HashMap<&str, f64> =
        rubric.iter().map(|entry| (entry.question_id.as_str(), entry.points)).collect();
    let mut seen = HashSet::with_capacity(detections.len());

    for detection in detections {
        let Some(&max_points) = worth.get(detection.question_id.as_str()) else {
            return Err(PipelineError::Validation(format!(
                "detection references unknown question {}",
                detection.question_id
            )));
        };
        if !seen.insert(detection.question_id.as_str()) {
            return Err(PipelineError::Validation(format!(
                "question {} was reported more than once",
                detection.question_id
            )));
        }
        if !detection.bounding_box.is_finite() {
            return Err(PipelineError::Validation(format!(
                "detection for question {} has a non-finite bounding box",
                detection.question_id
            )));
        }
        if !detection.points.is_finite() || detection.points < 0.0 {
            return Err(PipelineError::Validation(format!(
                "detection for question {} has invalid points {}",
                detection.question_id, detection.points
            )));
        }
        if detection.points > max_points {
            return Err(PipelineError::Validation(format!(
                "detection for question {} awards {} of {} points",
                detection.question_id, detection.points, max_points
            )));
        }
    }

    Ok(())
}
