use sqlx::PgPool;

use crate::db::models::{CanonicalAnswer, Question};

pub(crate) async fn list_by_exam(
    pool: &PgPool,
    exam_id: &str,
) -> Result<Vec<Question>, sqlx::Error> {
    sqlx::query_as::<_, Question>(
        "SELECT id, exam_id, text, answer_kind, allow_multiple_answers, points, position, created_at
         FROM questions
         WHERE exam_id = $1
         ORDER BY position, created_at, id",
    )
    .bind(exam_id)
    .fetch_all(pool)
    .await
}

pub(crate) async fn list_canonical_answers(
    pool: &PgPool,
    question_ids: &[String],
) -> Result<Vec<CanonicalAnswer>, sqlx::Error> {
    if question_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, CanonicalAnswer>(
        "SELECT id, question_id, value, created_at
         FROM canonical_answers
         WHERE question_id = ANY($1)
         ORDER BY created_at, id",
    )
    .bind(question_ids)
    .fetch_all(pool)
    .await
}
