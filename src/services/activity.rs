use sqlx::PgPool;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::repositories;

pub(crate) const SHEET_UPLOADED: &str = "sheet_uploaded";
pub(crate) const SHEET_CORRECTED: &str = "sheet_corrected";
pub(crate) const CORRECTION_OVERRIDDEN: &str = "correction_overridden";

/// Audit trail sink. Recording never blocks the caller and never fails it.
pub(crate) trait ActivityRecorder: Send + Sync {
    fn record(&self, actor_id: &str, action: &str, description: String);
}

#[derive(Debug, Clone)]
pub(crate) struct PgActivityRecorder {
    pool: PgPool,
}

impl PgActivityRecorder {
    pub(crate) fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl ActivityRecorder for PgActivityRecorder {
    fn record(&self, actor_id: &str, action: &str, description: String) {
        let pool = self.pool.clone();
        let actor_id = actor_id.to_string();
        let action = action.to_string();

        tokio::spawn(async move {
            let id = Uuid::new_v4().to_string();
            let result = repositories::activities::create(
                &pool,
                repositories::activities::CreateActivity {
                    id: &id,
                    actor_id: &actor_id,
                    action: &action,
                    description: &description,
                    created_at: primitive_now_utc(),
                },
            )
            .await;

            if let Err(err) = result {
                tracing::warn!(
                    error = %err,
                    actor_id = %actor_id,
                    action = %action,
                    "Failed to record activity"
                );
            }
        });
    }
}
