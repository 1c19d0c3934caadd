use sqlx::PgPool;

use crate::db::models::Student;

pub(crate) async fn find_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<Student>, sqlx::Error> {
    sqlx::query_as::<_, Student>(
        "SELECT id, external_id, name, class_id, created_at FROM students WHERE external_id = $1",
    )
    .bind(external_id)
    .fetch_optional(pool)
    .await
}
