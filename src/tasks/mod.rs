pub(crate) mod correction;
pub(crate) mod errors;
pub(crate) mod ingestion;
pub(crate) mod listing;

use std::time::Duration;

use crate::core::config::Settings;

const DATABASE_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Deadlines applied to every call leaving the process.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallTimeouts {
    pub(crate) database: Duration,
    pub(crate) object_store: Duration,
    pub(crate) ocr: Duration,
    pub(crate) grading: Duration,
}

impl CallTimeouts {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        // OCR covers submit plus every poll round.
        let ocr_budget = settings.ocr().timeout_seconds
            + settings.ocr().poll_interval_seconds * u64::from(settings.ocr().max_poll_attempts);

        Self {
            database: DATABASE_CALL_TIMEOUT,
            object_store: Duration::from_secs(settings.s3().timeout_seconds),
            ocr: Duration::from_secs(ocr_budget),
            grading: Duration::from_secs(settings.grading().timeout_seconds),
        }
    }
}
