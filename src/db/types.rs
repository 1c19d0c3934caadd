use serde::{Deserialize, Serialize};
use sqlx::Type;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "exam_session", rename_all = "lowercase")]
pub(crate) enum ExamSession {
    Regular,
    Resit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "exam_term", rename_all = "lowercase")]
pub(crate) enum ExamTerm {
    First,
    Second,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "answer_kind", rename_all = "snake_case")]
pub(crate) enum AnswerKind {
    FreeText,
    MultipleChoice,
    TrueFalse,
    FillBlank,
    Diagram,
}

impl ExamSession {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "regular" | "first" | "1" => Some(Self::Regular),
            "resit" | "retake" | "2" => Some(Self::Resit),
            _ => None,
        }
    }
}

impl ExamTerm {
    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "first" | "1" | "s1" => Some(Self::First),
            "second" | "2" | "s2" => Some(Self::Second),
            _ => None,
        }
    }
}
