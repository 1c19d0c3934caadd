use sqlx::PgPool;

use crate::db::models::Exam;
use crate::db::types::{ExamSession, ExamTerm};

pub(crate) const COLUMNS: &str =
    "id, subject_id, class_ids, session, term, academic_year, title, created_at";

pub(crate) struct ExamCriteria<'a> {
    pub(crate) session: ExamSession,
    pub(crate) term: ExamTerm,
    pub(crate) academic_year: &'a str,
    pub(crate) subject_id: &'a str,
    pub(crate) class_id: &'a str,
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!("SELECT {COLUMNS} FROM exams WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

/// Oldest exam matching every criterion, with the class as a member of `class_ids`.
pub(crate) async fn find_by_criteria(
    pool: &PgPool,
    criteria: ExamCriteria<'_>,
) -> Result<Option<Exam>, sqlx::Error> {
    sqlx::query_as::<_, Exam>(&format!(
        "SELECT {COLUMNS} FROM exams
         WHERE session = $1
           AND term = $2
           AND academic_year = $3
           AND subject_id = $4
           AND $5 = ANY(class_ids)
         ORDER BY created_at, id
         LIMIT 1"
    ))
    .bind(criteria.session)
    .bind(criteria.term)
    .bind(criteria.academic_year)
    .bind(criteria.subject_id)
    .bind(criteria.class_id)
    .fetch_optional(pool)
    .await
}
