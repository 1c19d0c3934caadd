mod form;
mod handlers;

use axum::extract::DefaultBodyLimit;
use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

/// Most files accepted in one upload request.
pub(crate) const MAX_FILES_PER_UPLOAD: usize = 50;
const FORM_OVERHEAD_BYTES: usize = 64 * 1024;

pub(crate) fn router(max_file_bytes: usize) -> Router<AppState> {
    let max_upload_body =
        max_file_bytes.saturating_mul(MAX_FILES_PER_UPLOAD).saturating_add(FORM_OVERHEAD_BYTES);
    let max_override_body = max_file_bytes.saturating_add(FORM_OVERHEAD_BYTES);

    Router::new()
        .route(
            "/upload",
            post(handlers::upload_sheets).layer(DefaultBodyLimit::max(max_upload_body)),
        )
        .route("/correct", post(handlers::correct_batch))
        .route("/list", post(handlers::list_sheets))
        .route("/:sheet_id", get(handlers::get_sheet))
        .route("/:sheet_id/correct", post(handlers::correct_sheet))
        .route(
            "/:sheet_id/override",
            post(handlers::override_correction).layer(DefaultBodyLimit::max(max_override_body)),
        )
}
