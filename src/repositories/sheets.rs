use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::{Sheet, SheetListingRow};

pub(crate) const COLUMNS: &str = "id, student_id, exam_id, subject_id, raw_path, corrected_path, \
     score, created_at, updated_at";

pub(crate) struct CreateSheet<'a> {
    pub(crate) id: &'a str,
    pub(crate) student_id: &'a str,
    pub(crate) exam_id: &'a str,
    pub(crate) subject_id: &'a str,
    pub(crate) raw_path: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateSheet<'_>) -> Result<Sheet, sqlx::Error> {
    sqlx::query_as::<_, Sheet>(&format!(
        "INSERT INTO answer_sheets
            (id, student_id, exam_id, subject_id, raw_path, corrected_path, score, created_at, updated_at)
         VALUES ($1, $2, $3, $4, $5, NULL, NULL, $6, $6)
         RETURNING {COLUMNS}"
    ))
    .bind(params.id)
    .bind(params.student_id)
    .bind(params.exam_id)
    .bind(params.subject_id)
    .bind(params.raw_path)
    .bind(params.created_at)
    .fetch_one(pool)
    .await
}

pub(crate) async fn find_by_id(pool: &PgPool, id: &str) -> Result<Option<Sheet>, sqlx::Error> {
    sqlx::query_as::<_, Sheet>(&format!("SELECT {COLUMNS} FROM answer_sheets WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub(crate) async fn list_with_students_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<SheetListingRow>, sqlx::Error> {
    sqlx::query_as::<_, SheetListingRow>(
        "SELECT s.id,
                s.student_id,
                st.name AS student_name,
                st.external_id AS student_external_id,
                s.raw_path,
                s.corrected_path,
                s.score
         FROM answer_sheets s
         JOIN students st ON st.id = s.student_id
         WHERE s.exam_id = $1
         ORDER BY s.created_at, s.id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

/// Sets the corrected artifact and score in one statement; returns false when the sheet is gone.
pub(crate) async fn mark_corrected(
    pool: &PgPool,
    id: &str,
    corrected_path: &str,
    score: f64,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE answer_sheets
         SET corrected_path = $1,
             score = $2,
             updated_at = $3
         WHERE id = $4",
    )
    .bind(corrected_path)
    .bind(score)
    .bind(now)
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
