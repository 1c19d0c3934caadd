use axum::{
    extract::{Multipart, Path, State},
    Json,
};

use crate::api::errors::ApiError;
use crate::api::guards::Actor;
use crate::api::sheets::form;
use crate::api::validation::parse_selector;
use crate::core::state::AppState;
use crate::schemas::sheet::{
    BatchCorrectionResponse, CorrectionResponse, ExamSelectorRequest, ListSheetsRequest,
    SheetResponse,
};
use crate::tasks::ingestion::IngestReport;
use crate::tasks::listing::{self, SheetListing};

pub(super) async fn upload_sheets(
    State(state): State<AppState>,
    Actor(actor): Actor,
    multipart: Multipart,
) -> Result<Json<IngestReport>, ApiError> {
    ensure_object_store(&state)?;

    let form = form::read_upload_form(multipart, state.ingestion().max_upload_bytes()).await?;
    let selector = parse_selector(form.selector)?;

    let report = state.ingestion().ingest(form.files, &selector, &actor).await?;
    Ok(Json(report))
}

pub(super) async fn correct_sheet(
    Path(sheet_id): Path<String>,
    State(state): State<AppState>,
    Actor(actor): Actor,
) -> Result<Json<CorrectionResponse>, ApiError> {
    ensure_object_store(&state)?;

    let result = state.correction().correct_one(&sheet_id, &actor).await?;
    Ok(Json(result.into()))
}

pub(super) async fn correct_batch(
    State(state): State<AppState>,
    Actor(actor): Actor,
    Json(payload): Json<ExamSelectorRequest>,
) -> Result<Json<BatchCorrectionResponse>, ApiError> {
    ensure_object_store(&state)?;
    let selector = parse_selector(payload)?;

    let outcomes = state.correction().correct_batch(&selector, &actor).await?;
    Ok(Json(BatchCorrectionResponse::from_outcomes(outcomes)))
}

pub(super) async fn list_sheets(
    State(state): State<AppState>,
    Json(payload): Json<ListSheetsRequest>,
) -> Result<Json<SheetListing>, ApiError> {
    ensure_object_store(&state)?;
    let variant = payload.variant;
    let selector = parse_selector(payload.selector)?;

    let services = state.services();
    let listing = listing::list_sheets(
        services.store.as_ref(),
        services.objects.as_ref(),
        state.timeouts(),
        &selector,
        variant,
    )
    .await?;
    Ok(Json(listing))
}

pub(super) async fn get_sheet(
    Path(sheet_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<SheetResponse>, ApiError> {
    let sheet =
        listing::get_sheet(state.services().store.as_ref(), state.timeouts(), &sheet_id).await?;
    Ok(Json(sheet.into()))
}

pub(super) async fn override_correction(
    Path(sheet_id): Path<String>,
    State(state): State<AppState>,
    Actor(actor): Actor,
    multipart: Multipart,
) -> Result<Json<CorrectionResponse>, ApiError> {
    ensure_object_store(&state)?;

    let form = form::read_override_form(multipart, state.ingestion().max_upload_bytes()).await?;
    let result = state
        .correction()
        .override_correction(
            &sheet_id,
            form.pdf,
            form.fields.score,
            &form.fields.explanation,
            &actor,
        )
        .await?;
    Ok(Json(result.into()))
}

fn ensure_object_store(state: &AppState) -> Result<(), ApiError> {
    if state.services().object_store_enabled {
        Ok(())
    } else {
        Err(ApiError::ServiceUnavailable("S3 storage is not configured".to_string()))
    }
}
