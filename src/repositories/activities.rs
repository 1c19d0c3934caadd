use sqlx::PgPool;
use time::PrimitiveDateTime;

pub(crate) struct CreateActivity<'a> {
    pub(crate) id: &'a str,
    pub(crate) actor_id: &'a str,
    pub(crate) action: &'a str,
    pub(crate) description: &'a str,
    pub(crate) created_at: PrimitiveDateTime,
}

pub(crate) async fn create(pool: &PgPool, params: CreateActivity<'_>) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO activities (id, actor_id, action, description, created_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(params.id)
    .bind(params.actor_id)
    .bind(params.action)
    .bind(params.description)
    .bind(params.created_at)
    .execute(pool)
    .await?;

    Ok(())
}
