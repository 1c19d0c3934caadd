pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod db;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;
pub(crate) mod tasks;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use anyhow::Context;
use sqlx::PgPool;

use crate::core::{
    config::Settings,
    state::{AppState, PipelineServices},
    telemetry,
};
use crate::services::activity::PgActivityRecorder;
use crate::services::annotator::Annotator;
use crate::services::grading_delegate::HttpGradingDelegate;
use crate::services::storage::{DisabledObjectStore, ObjectStore, S3ObjectStore};
use crate::services::store::PgGradingStore;
use crate::services::student_matcher::RegexIdentityStrategy;
use crate::services::text_extraction::DatalabTextExtractor;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let db_pool = db::init_pool(&settings).await?;
    db::run_migrations(&db_pool).await?;

    let services = build_services(&settings, &db_pool).await?;
    let state = AppState::new(settings, db_pool, services);

    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        concurrency = state.settings().pipeline().correction_concurrency,
        "Autograder API listening"
    );

    axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await?;
    state.db().close().await;
    tracing::info!("Database pool closed");

    Ok(())
}

async fn build_services(settings: &Settings, db_pool: &PgPool) -> anyhow::Result<PipelineServices> {
    let (objects, object_store_enabled): (Arc<dyn ObjectStore>, bool) =
        match S3ObjectStore::from_settings(settings.s3()).await? {
            Some(store) => (Arc::new(store), true),
            None => {
                tracing::warn!("S3 credentials not configured; sheet storage is disabled");
                (Arc::new(DisabledObjectStore), false)
            }
        };

    if settings.ocr().api_key.is_empty() {
        tracing::warn!("OCR_API_KEY is empty; student identification will fail");
    }

    let annotator = Annotator::from_settings(settings.annotation())
        .context("Failed to load annotation font")?;
    let identity =
        RegexIdentityStrategy::four_digit().context("Failed to compile student id pattern")?;

    Ok(PipelineServices {
        store: Arc::new(PgGradingStore::new(db_pool.clone())),
        objects,
        text_extractor: Arc::new(DatalabTextExtractor::from_settings(settings.ocr())?),
        grading: Arc::new(HttpGradingDelegate::from_settings(settings.grading())?),
        annotator: Arc::new(annotator),
        activity: Arc::new(PgActivityRecorder::new(db_pool.clone())),
        identity: Arc::new(identity),
        object_store_enabled,
    })
}
