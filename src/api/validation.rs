use validator::Validate;

use crate::api::errors::ApiError;
use crate::db::types::{ExamSession, ExamTerm};
use crate::schemas::sheet::ExamSelectorRequest;
use crate::services::store::ExamSelector;

/// Validates a client selector and resolves its session and term aliases.
pub(crate) fn parse_selector(request: ExamSelectorRequest) -> Result<ExamSelector, ApiError> {
    request.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let session = ExamSession::parse(&request.session)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown session '{}'", request.session)))?;
    let term = ExamTerm::parse(&request.term)
        .ok_or_else(|| ApiError::BadRequest(format!("Unknown term '{}'", request.term)))?;

    Ok(ExamSelector {
        session,
        term,
        academic_year: request.academic_year.trim().to_string(),
        subject_id: request.subject_id.trim().to_string(),
        class_id: request.class_id.trim().to_string(),
    })
}
