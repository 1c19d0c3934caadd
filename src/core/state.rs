use std::sync::Arc;

use sqlx::PgPool;

use crate::core::config::Settings;
use crate::services::activity::ActivityRecorder;
use crate::services::annotator::Annotator;
use crate::services::grading_delegate::GradingDelegate;
use crate::services::storage::ObjectStore;
use crate::services::store::GradingStore;
use crate::services::student_matcher::IdentityStrategy;
use crate::services::text_extraction::TextExtractor;
use crate::tasks::correction::CorrectionOrchestrator;
use crate::tasks::ingestion::IngestionPipeline;
use crate::tasks::CallTimeouts;

/// Constructed external dependencies of the pipelines.
#[derive(Clone)]
pub(crate) struct PipelineServices {
    pub(crate) store: Arc<dyn GradingStore>,
    pub(crate) objects: Arc<dyn ObjectStore>,
    pub(crate) text_extractor: Arc<dyn TextExtractor>,
    pub(crate) grading: Arc<dyn GradingDelegate>,
    pub(crate) annotator: Arc<Annotator>,
    pub(crate) activity: Arc<dyn ActivityRecorder>,
    pub(crate) identity: Arc<dyn IdentityStrategy>,
    pub(crate) object_store_enabled: bool,
}

#[derive(Clone)]
pub(crate) struct AppState {
    inner: Arc<InnerState>,
}

struct InnerState {
    settings: Settings,
    db: PgPool,
    services: PipelineServices,
    timeouts: CallTimeouts,
    ingestion: IngestionPipeline,
    correction: CorrectionOrchestrator,
}

impl AppState {
    pub(crate) fn new(settings: Settings, db: PgPool, services: PipelineServices) -> Self {
        let timeouts = CallTimeouts::from_settings(&settings);
        Self::with_timeouts(settings, db, services, timeouts)
    }

    pub(crate) fn with_timeouts(
        settings: Settings,
        db: PgPool,
        services: PipelineServices,
        timeouts: CallTimeouts,
    ) -> Self {
        let ingestion = IngestionPipeline::new(
            services.store.clone(),
            services.objects.clone(),
            services.text_extractor.clone(),
            services.identity.clone(),
            services.activity.clone(),
            timeouts,
            settings.pipeline(),
        );
        let correction = CorrectionOrchestrator::new(
            services.store.clone(),
            services.objects.clone(),
            services.grading.clone(),
            services.annotator.clone(),
            services.activity.clone(),
            timeouts,
            settings.pipeline().correction_concurrency,
        );

        Self {
            inner: Arc::new(InnerState { settings, db, services, timeouts, ingestion, correction }),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub(crate) fn db(&self) -> &PgPool {
        &self.inner.db
    }

    pub(crate) fn services(&self) -> &PipelineServices {
        &self.inner.services
    }

    pub(crate) fn timeouts(&self) -> CallTimeouts {
        self.inner.timeouts
    }

    pub(crate) fn ingestion(&self) -> &IngestionPipeline {
        &self.inner.ingestion
    }

    pub(crate) fn correction(&self) -> &CorrectionOrchestrator {
        &self.inner.correction
    }
}
