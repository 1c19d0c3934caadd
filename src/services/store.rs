use std::fmt;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{CanonicalAnswer, Exam, Question, Sheet, SheetListingRow, Student};
use crate::db::types::{ExamSession, ExamTerm};
use crate::repositories;

/// Batch-level parameters that resolve exactly one exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ExamSelector {
    pub(crate) session: ExamSession,
    pub(crate) term: ExamTerm,
    pub(crate) academic_year: String,
    pub(crate) subject_id: String,
    pub(crate) class_id: String,
}

impl fmt::Display for ExamSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session={:?} term={:?} academic_year={} subject_id={} class_id={}",
            self.session, self.term, self.academic_year, self.subject_id, self.class_id
        )
    }
}

#[derive(Debug, Clone)]
pub(crate) struct NewSheet {
    pub(crate) student_id: String,
    pub(crate) exam_id: String,
    pub(crate) subject_id: String,
    pub(crate) raw_path: String,
}

/// Persistence contract used by the ingestion and correction pipelines.
#[async_trait]
pub(crate) trait GradingStore: Send + Sync {
    async fn find_exam(&self, selector: &ExamSelector) -> anyhow::Result<Option<Exam>>;

    async fn find_exam_by_id(&self, exam_id: &str) -> anyhow::Result<Option<Exam>>;

    /// Questions of an exam in creation order.
    async fn list_questions(&self, exam_id: &str) -> anyhow::Result<Vec<Question>>;

    async fn list_canonical_answers(
        &self,
        question_ids: &[String],
    ) -> anyhow::Result<Vec<CanonicalAnswer>>;

    async fn find_student_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<Student>>;

    async fn create_sheet(&self, sheet: NewSheet) -> anyhow::Result<Sheet>;

    async fn find_sheet(&self, sheet_id: &str) -> anyhow::Result<Option<Sheet>>;

    async fn list_sheets_for_exam(&self, exam_id: &str) -> anyhow::Result<Vec<SheetListingRow>>;

    /// Returns false when no sheet with this id exists.
    async fn mark_corrected(
        &self,
        sheet_id: &str,
        corrected_path: &str,
        score: f64,
    ) -> anyhow::Result<bool>;
}

#[derive(Debug, Clone)]
pub(crate) struct PgGradingStore {
    pool: PgPool,
}

impl PgGradingStore {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GradingStore for PgGradingStore {
    async fn find_exam(&self, selector: &ExamSelector) -> anyhow::Result<Option<Exam>> {
        repositories::exams::find_by_criteria(
            &self.pool,
            repositories::exams::ExamCriteria {
                session: selector.session,
                term: selector.term,
                academic_year: &selector.academic_year,
                subject_id: &selector.subject_id,
                class_id: &selector.class_id,
            },
        )
        .await
        .context("Failed to resolve exam")
    }

    async fn find_exam_by_id(&self, exam_id: &str) -> anyhow::Result<Option<Exam>> {
        repositories::exams::find_by_id(&self.pool, exam_id).await.context("Failed to fetch exam")
    }

    async fn list_questions(&self, exam_id: &str) -> anyhow::Result<Vec<Question>> {
        repositories::questions::list_by_exam(&self.pool, exam_id)
            .await
            .context("Failed to list questions")
    }

    async fn list_canonical_answers(
        &self,
        question_ids: &[String],
    ) -> anyhow::Result<Vec<CanonicalAnswer>> {
        repositories::questions::list_canonical_answers(&self.pool, question_ids)
            .await
            .context("Failed to list canonical answers")
    }

    async fn find_student_by_external_id(
        &self,
        external_id: &str,
    ) -> anyhow::Result<Option<Student>> {
        repositories::students::find_by_external_id(&self.pool, external_id)
            .await
            .context("Failed to fetch student")
    }

    async fn create_sheet(&self, sheet: NewSheet) -> anyhow::Result<Sheet> {
        let id = Uuid::new_v4().to_string();
        repositories::sheets::create(
            &self.pool,
            repositories::sheets::CreateSheet {
                id: &id,
                student_id: &sheet.student_id,
                exam_id: &sheet.exam_id,
                subject_id: &sheet.subject_id,
                raw_path: &sheet.raw_path,
                created_at: primitive_now_utc(),
            },
        )
        .await
        .context("Failed to create sheet")
    }

    async fn find_sheet(&self, sheet_id: &str) -> anyhow::Result<Option<Sheet>> {
        repositories::sheets::find_by_id(&self.pool, sheet_id)
            .await
            .context("Failed to fetch sheet")
    }

    async fn list_sheets_for_exam(&self, exam_id: &str) -> anyhow::Result<Vec<SheetListingRow>> {
        repositories::sheets::list_with_students_by_exam(&self.pool, exam_id)
            .await
            .context("Failed to list sheets")
    }

    async fn mark_corrected(
        &self,
        sheet_id: &str,
        corrected_path: &str,
        score: f64,
    ) -> anyhow::Result<bool> {
        repositories::sheets::mark_corrected(
            &self.pool,
            sheet_id,
            corrected_path,
            score,
            primitive_now_utc(),
        )
        .await
        .context("Failed to mark sheet corrected")
    }
}
