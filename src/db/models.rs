use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::PrimitiveDateTime;

use crate::db::types::{AnswerKind, ExamSession, ExamTerm};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct Student {
    pub(crate) id: String,
    pub(crate) external_id: String,
    pub(crate) name: String,
    pub(crate) class_id: String,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct Exam {
    pub(crate) id: String,
    pub(crate) subject_id: String,
    pub(crate) class_ids: Vec<String>,
    pub(crate) session: ExamSession,
    pub(crate) term: ExamTerm,
    pub(crate) academic_year: String,
    pub(crate) title: String,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) exam_id: String,
    pub(crate) text: String,
    pub(crate) answer_kind: AnswerKind,
    pub(crate) allow_multiple_answers: bool,
    pub(crate) points: f64,
    pub(crate) position: i32,
    pub(crate) created_at: PrimitiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct CanonicalAnswer {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) value: String,
    pub(crate) created_at: PrimitiveDateTime,
}

/// One identified scanned answer document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct Sheet {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) exam_id: String,
    pub(crate) subject_id: String,
    pub(crate) raw_path: String,
    pub(crate) corrected_path: Option<String>,
    pub(crate) score: Option<f64>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
}

impl Sheet {
    pub(crate) fn is_corrected(&self) -> bool {
        self.corrected_path.is_some() && self.score.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub(crate) struct SheetListingRow {
    pub(crate) id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) student_external_id: String,
    pub(crate) raw_path: String,
    pub(crate) corrected_path: Option<String>,
    pub(crate) score: Option<f64>,
}
