use std::collections::HashMap;

use serde::Serialize;

use crate::db::types::AnswerKind;
use crate::services::store::GradingStore;

/// Flattened grading key entry for one question.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct RubricEntry {
    pub(crate) question_id: String,
    pub(crate) question_text: String,
    pub(crate) answer_kind: AnswerKind,
    /// First canonical answer, if any.
    pub(crate) canonical_value: Option<String>,
    pub(crate) canonical_answers: Vec<String>,
    pub(crate) points: f64,
}

/// Loads the rubric of an exam in question creation order.
///
/// Questions without canonical answers are kept; the analysis service may still grade them by kind.
pub(crate) async fn load_rubric(
    store: &dyn GradingStore,
    exam_id: &str,
) -> anyhow::Result<Vec<RubricEntry>> {
    let questions = store.list_questions(exam_id).await?;
    let question_ids: Vec<String> = questions.iter().map(|question| question.id.clone()).collect();

    let mut answers_by_question: HashMap<String, Vec<String>> = HashMap::new();
    for answer in store.list_canonical_answers(&question_ids).await? {
        answers_by_question.entry(answer.question_id).or_default().push(answer.value);
    }

    Ok(questions
        .into_iter()
        .map(|question| {
            let canonical_answers = answers_by_question.remove(&question.id).unwrap_or_default();
            RubricEntry {
                canonical_value: canonical_answers.first().cloned(),
                canonical_answers,
                question_id: question.id,
                question_text: question.text,
                answer_kind: question.answer_kind,
                points: question.points,
            }
        })
        .collect())
}

pub(crate) fn rubric_total(rubric: &[RubricEntry]) -> f64 {
    rubric.iter().map(|entry| entry.points).sum()
}

/// First rubric problem that makes the exam ungradable, if any.
pub(crate) fn validate_rubric(rubric: &[RubricEntry]) -> Result<(), String> {
    if rubric.is_empty() {
        return Err("exam has no questions".to_string());
    }

    for entry in rubric {
        if !entry.points.is_finite() || entry.points <= 0.0 {
            return Err(format!(
                "question {} has invalid points {}",
                entry.question_id, entry.points
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, InMemoryStore};

    #[tokio::test]
    async fn entries_follow_question_creation_order() {
        let store = InMemoryStore::default();
        let exam = store.seed_exam(test_support::sample_selector());
        let second = store.seed_question(&exam.id, "Q2", 3.0, 2);
        let first = store.seed_question(&exam.id, "Q1", 5.0, 1);
        store.seed_answer(&first.id, "B");
        store.seed_answer(&first.id, "D");

        let rubric = load_rubric(&store, &exam.id).await.expect("rubric");
        let again = load_rubric(&store, &exam.id).await.expect("rubric");

        assert_eq!(rubric, again);
        assert_eq!(rubric.len(), 2);
        assert_eq!(rubric[0].question_id, first.id);
        assert_eq!(rubric[0].canonical_value.as_deref(), Some("B"));
        assert_eq!(rubric[0].canonical_answers, vec!["B".to_string(), "D".to_string()]);
        assert_eq!(rubric[1].question_id, second.id);
        assert_eq!(rubric[1].canonical_value, None);
        assert_eq!(rubric_total(&rubric), 8.0);
    }

    #[tokio::test]
    async fn validation_rejects_empty_and_non_positive_points() {
        assert!(validate_rubric(&[]).is_err());

        let store = InMemoryStore::default();
        let exam = store.seed_exam(test_support::sample_selector());
        store.seed_question(&exam.id, "Q1", 0.0, 1);
        let rubric = load_rubric(&store, &exam.id).await.expect("rubric");

        let err = validate_rubric(&rubric).expect_err("zero points");
        assert!(err.contains("invalid points"));
    }
}
