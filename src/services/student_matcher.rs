use regex::Regex;

use crate::db::models::Student;
use crate::services::store::GradingStore;

const DEFAULT_IDENTITY_PATTERN: &str = r"(?-u:\b)[0-9]{4}(?-u:\b)";

/// Extracts a student identity token from OCR text.
pub(crate) trait IdentityStrategy: Send + Sync {
    fn extract_token<'a>(&self, text: &'a str) -> Option<&'a str>;
}

/// First regex match wins; later candidates are never tried.
#[derive(Debug, Clone)]
pub(crate) struct RegexIdentityStrategy {
    pattern: Regex,
}

impl RegexIdentityStrategy {
    pub(crate) fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self { pattern: Regex::new(pattern)? })
    }

    pub(crate) fn four_digit() -> Result<Self, regex::Error> {
        Self::new(DEFAULT_IDENTITY_PATTERN)
    }
}

impl IdentityStrategy for RegexIdentityStrategy {
    fn extract_token<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.pattern.find(text).map(|found| found.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Identification {
    Matched(Student),
    NoToken,
    UnknownToken(String),
}

impl Identification {
    pub(crate) fn describe(&self) -> String {
        match self {
            Self::Matched(student) => format!("matched {}", student.external_id),
            Self::NoToken => "no identity token in extracted text".to_string(),
            Self::UnknownToken(token) => format!("no enrolled student with identifier {token}"),
        }
    }
}

pub(crate) async fn identify_student(
    store: &dyn GradingStore,
    strategy: &dyn IdentityStrategy,
    text: &str,
) -> anyhow::Result<Identification> {
    let Some(token) = strategy.extract_token(text) else {
        return Ok(Identification::NoToken);
    };

    Ok(match store.find_student_by_external_id(token).await? {
        Some(student) => Identification::Matched(student),
        None => Identification::UnknownToken(token.to_string()),
    })
}
