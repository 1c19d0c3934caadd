use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::core::time::format_primitive;
use crate::db::models::Sheet;
use crate::tasks::correction::{CorrectionResult, SheetOutcome};
use crate::tasks::listing::SheetVariant;

/// Exam selector as sent by clients; session and term accept their usual aliases.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub(crate) struct ExamSelectorRequest {
    #[validate(length(min = 1, message = "session is required"))]
    pub(crate) session: String,
    #[validate(length(min = 1, message = "term is required"))]
    pub(crate) term: String,
    #[validate(length(min = 4, max = 16, message = "academic_year is invalid"))]
    pub(crate) academic_year: String,
    #[validate(length(min = 1, max = 64, message = "subject_id is required"))]
    pub(crate) subject_id: String,
    #[validate(length(min = 1, max = 64, message = "class_id is required"))]
    pub(crate) class_id: String,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ListSheetsRequest {
    #[serde(flatten)]
    #[validate(nested)]
    pub(crate) selector: ExamSelectorRequest,
    #[serde(default)]
    pub(crate) variant: SheetVariant,
}

#[derive(Debug, Validate)]
pub(crate) struct OverrideFields {
    #[validate(range(min = 0.0, message = "score must be non-negative"))]
    pub(crate) score: f64,
    #[validate(length(min = 1, max = 2000, message = "explanation is required"))]
    pub(crate) explanation: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct CorrectionResponse {
    pub(crate) sheet_id: String,
    pub(crate) corrected_path: String,
    pub(crate) score: f64,
    pub(crate) previous_score: Option<f64>,
    pub(crate) location: String,
}

impl From<CorrectionResult> for CorrectionResponse {
    fn from(result: CorrectionResult) -> Self {
        Self {
            sheet_id: result.sheet_id,
            corrected_path: result.corrected_path,
            score: result.score,
            previous_score: result.previous_score,
            location: result.location,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchCorrectionResponse {
    pub(crate) total: usize,
    pub(crate) succeeded: usize,
    pub(crate) failed: usize,
    pub(crate) outcomes: Vec<SheetOutcome>,
}

impl BatchCorrectionResponse {
    pub(crate) fn from_outcomes(mut outcomes: Vec<SheetOutcome>) -> Self {
        outcomes.sort_by(|a, b| a.sheet_id.cmp(&b.sheet_id));
        let succeeded = outcomes.iter().filter(|outcome| outcome.error.is_none()).count();
        Self { total: outcomes.len(), succeeded, failed: outcomes.len() - succeeded, outcomes }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct SheetResponse {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) exam_id: String,
    pub(crate) subject_id: String,
    pub(crate) raw_path: String,
    pub(crate) corrected_path: Option<String>,
    pub(crate) score: Option<f64>,
    pub(crate) is_corrected: bool,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

impl From<Sheet> for SheetResponse {
    fn from(sheet: Sheet) -> Self {
        Self {
            is_corrected: sheet.is_corrected(),
            id: sheet.id,
            student_id: sheet.student_id,
            exam_id: sheet.exam_id,
            subject_id: sheet.subject_id,
            raw_path: sheet.raw_path,
            corrected_path: sheet.corrected_path,
            score: sheet.score,
            created_at: format_primitive(sheet.created_at),
            updated_at: format_primitive(sheet.updated_at),
        }
    }
}
