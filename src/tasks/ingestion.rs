use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::core::config::PipelineSettings;
use crate::db::models::Exam;
use crate::services::activity::{self, ActivityRecorder};
use crate::services::document::DocumentKind;
use crate::services::storage::{self, ObjectStore};
use crate::services::store::{ExamSelector, GradingStore, NewSheet};
use crate::services::student_matcher::{self, Identification, IdentityStrategy};
use crate::services::text_extraction::TextExtractor;
use crate::tasks::errors::{call_external, PipelineError};
use crate::tasks::CallTimeouts;

#[derive(Debug, Clone)]
pub(crate) struct UploadedFile {
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct CreatedSheet {
    pub(crate) sheet_id: String,
    pub(crate) file_name: String,
    pub(crate) student_id: String,
    pub(crate) student_external_id: String,
    pub(crate) raw_path: String,
    pub(crate) location: String,
    pub(crate) sha256: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SkippedFile {
    pub(crate) file_name: String,
    pub(crate) kind: &'static str,
    pub(crate) reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct IngestReport {
    pub(crate) exam_id: String,
    pub(crate) created_count: usize,
    pub(crate) created: Vec<CreatedSheet>,
    pub(crate) skipped: Vec<SkippedFile>,
}

/// Turns uploaded scans into identified sheets, one file at a time.
#[derive(Clone)]
pub(crate) struct IngestionPipeline {
    store: Arc<dyn GradingStore>,
    objects: Arc<dyn ObjectStore>,
    text_extractor: Arc<dyn TextExtractor>,
    identity: Arc<dyn IdentityStrategy>,
    activity: Arc<dyn ActivityRecorder>,
    timeouts: CallTimeouts,
    allowed_content_types: Vec<String>,
    max_upload_bytes: usize,
}

impl IngestionPipeline {
    pub(crate) fn new(
        store: Arc<dyn GradingStore>,
        objects: Arc<dyn ObjectStore>,
        text_extractor: Arc<dyn TextExtractor>,
        identity: Arc<dyn IdentityStrategy>,
        activity: Arc<dyn ActivityRecorder>,
        timeouts: CallTimeouts,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            objects,
            text_extractor,
            identity,
            activity,
            timeouts,
            allowed_content_types: settings.allowed_content_types.clone(),
            max_upload_bytes: (settings.max_upload_size_mb as usize).saturating_mul(1024 * 1024),
        }
    }

    pub(crate) fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Ingests every file independently; only an unresolvable exam fails the whole batch.
    pub(crate) async fn ingest(
        &self,
        files: Vec<UploadedFile>,
        selector: &ExamSelector,
        actor_id: &str,
    ) -> Result<IngestReport, PipelineError> {
        if files.is_empty() {
            return Err(PipelineError::Validation("no files uploaded".to_string()));
        }

        let exam = call_external("database", self.timeouts.database, self.store.find_exam(selector))
            .await?
            .ok_or_else(|| PipelineError::not_found("exam", selector.to_string()))?;

        tracing::info!(exam_id = %exam.id, files = files.len(), "Ingesting answer sheets");

        let mut created = Vec::new();
        let mut skipped = Vec::new();

        for file in files {
            let file_name = file.file_name.clone();
            match self.ingest_one(&exam, file, actor_id).await {
                Ok(sheet) => {
                    metrics::counter!("sheets_ingested_total", "status" => "created").increment(1);
                    created.push(sheet);
                }
                Err(err) => {
                    metrics::counter!("sheets_ingested_total", "status" => err.kind()).increment(1);
                    tracing::warn!(
                        exam_id = %exam.id,
                        file_name = %file_name,
                        kind = err.kind(),
                        error = %err,
                        "Skipping uploaded file"
                    );
                    skipped.push(SkippedFile {
                        file_name,
                        kind: err.kind(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        Ok(IngestReport { exam_id: exam.id, created_count: created.len(), created, skipped })
    }

    async fn ingest_one(
        &self,
        exam: &Exam,
        file: UploadedFile,
        actor_id: &str,
    ) -> Result<CreatedSheet, PipelineError> {
        let kind = self.check_upload(&file)?;

        let raw_key = storage::raw_key(&Uuid::new_v4().to_string(), &file.file_name);
        let stored = call_external(
            "object_store",
            self.timeouts.object_store,
            self.objects.put(&raw_key, file.bytes.clone(), kind.content_type()),
        )
        .await?;

        let text = call_external(
            "ocr",
            self.timeouts.ocr,
            self.text_extractor.extract_text(&file.bytes, &file.file_name, kind.content_type()),
        )
        .await?;

        let identification = call_external(
            "database",
            self.timeouts.database,
            student_matcher::identify_student(self.store.as_ref(), self.identity.as_ref(), &text),
        )
        .await?;

        let student = match identification {
            Identification::Matched(student) => student,
            other => {
                tracing::info!(raw_path = %raw_key, "Raw upload kept without a sheet");
                return Err(PipelineError::NoIdentifiableStudent { reason: other.describe() });
            }
        };

        let sheet = call_external(
            "database",
            self.timeouts.database,
            self.store.create_sheet(NewSheet {
                student_id: student.id.clone(),
                exam_id: exam.id.clone(),
                subject_id: exam.subject_id.clone(),
                raw_path: raw_key.clone(),
            }),
        )
        .await?;

        self.activity.record(
            actor_id,
            activity::SHEET_UPLOADED,
            format!(
                "Uploaded answer sheet {} for student {} ({}) on exam {}",
                file.file_name, student.name, student.external_id, exam.title
            ),
        );

        tracing::info!(
            sheet_id = %sheet.id,
            student_id = %student.id,
            file_name = %file.file_name,
            "Answer sheet created"
        );

        Ok(CreatedSheet {
            sheet_id: sheet.id,
            file_name: file.file_name,
            student_id: student.id,
            student_external_id: student.external_id,
            raw_path: sheet.raw_path,
            location: stored.location,
            sha256: stored.sha256,
        })
    }

    /// Rejects anything that is not an allowed, well-formed document before it costs an OCR call.
    fn check_upload(&self, file: &UploadedFile) -> Result<DocumentKind, PipelineError> {
        if file.bytes.is_empty() {
            return Err(PipelineError::Validation("file is empty".to_string()));
        }

        if file.bytes.len() > self.max_upload_bytes {
            return Err(PipelineError::Validation(format!(
                "file exceeds {} bytes",
                self.max_upload_bytes
            )));
        }

        let declared =
            file.content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        if !self.allowed_content_types.iter().any(|allowed| *allowed == declared) {
            return Err(PipelineError::Validation(format!(
                "content type {} is not accepted",
                file.content_type
            )));
        }

        let sniffed = DocumentKind::sniff(&file.bytes).ok_or_else(|| {
            PipelineError::Validation("file is not a PDF, PNG or JPEG document".to_string())
        })?;

        if DocumentKind::from_content_type(&declared) != Some(sniffed) {
            return Err(PipelineError::Validation(format!(
                "declared {} but content is {}",
                declared,
                sniffed.content_type()
            )));
        }

        Ok(sniffed)
    }
}
