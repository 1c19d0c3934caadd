use serde::{Deserialize, Serialize};

use crate::db::models::{Sheet, SheetListingRow};
use crate::services::storage::ObjectStore;
use crate::services::store::{ExamSelector, GradingStore};
use crate::tasks::errors::{call_external, PipelineError};
use crate::tasks::CallTimeouts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum SheetVariant {
    #[default]
    Raw,
    Corrected,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct ListedSheet {
    pub(crate) sheet_id: String,
    pub(crate) student_id: String,
    pub(crate) student_name: String,
    pub(crate) student_external_id: String,
    pub(crate) path: String,
    pub(crate) score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub(crate) struct SheetListing {
    pub(crate) exam_id: String,
    pub(crate) variant: SheetVariant,
    pub(crate) sheets: Vec<ListedSheet>,
}

/// Sheets of the selected exam whose raw or corrected object is actually stored.
pub(crate) async fn list_sheets(
    store: &dyn GradingStore,
    objects: &dyn ObjectStore,
    timeouts: CallTimeouts,
    selector: &ExamSelector,
    variant: SheetVariant,
) -> Result<SheetListing, PipelineError> {
    let exam = call_external("database", timeouts.database, store.find_exam(selector))
        .await?
        .ok_or_else(|| PipelineError::not_found("exam", selector.to_string()))?;
    let rows =
        call_external("database", timeouts.database, store.list_sheets_for_exam(&exam.id)).await?;

    let mut sheets = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(path) = variant_path(&row, variant) else {
            continue;
        };

        let lookup = objects.exists(&path);
        let exists = match call_external("object_store", timeouts.object_store, lookup).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(
                    sheet_id = %row.id,
                    path = %path,
                    error = %err,
                    "Sheet object lookup failed; skipping"
                );
                continue;
            }
        };
        if !exists {
            tracing::warn!(
                sheet_id = %row.id,
                path = %path,
                variant = ?variant,
                "Sheet object missing from storage; skipping"
            );
            continue;
        }

        sheets.push(ListedSheet {
            sheet_id: row.id,
            student_id: row.student_id,
            student_name: row.student_name,
            student_external_id: row.student_external_id,
            path,
            score: row.score,
        });
    }

    Ok(SheetListing { exam_id: exam.id, variant, sheets })
}

pub(crate) async fn get_sheet(
    store: &dyn GradingStore,
    timeouts: CallTimeouts,
    sheet_id: &str,
) -> Result<Sheet, PipelineError> {
    call_external("database", timeouts.database, store.find_sheet(sheet_id))
        .await?
        .ok_or_else(|| PipelineError::not_found("sheet", format!("id={sheet_id}")))
}

fn variant_path(row: &SheetListingRow, variant: SheetVariant) -> Option<String> {
    match variant {
        SheetVariant::Raw => Some(row.raw_path.clone()),
        SheetVariant::Corrected => row.corrected_path.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, FakeObjectStore, InMemoryStore};

    #[tokio::test]
    async fn missing_objects_are_skipped() {
        let store = InMemoryStore::default();
        let objects = FakeObjectStore::default();
        let exam = store.seed_exam(test_support::sample_selector());
        let awa = store.seed_student("1111", "Awa", "3A");
        let binta = store.seed_student("2222", "Binta", "3A");
        let kept = store.seed_sheet(&awa, &exam, "answer-sheets/a.pdf");
        store.seed_sheet(&binta, &exam, "answer-sheets/b.pdf");
        objects.insert("answer-sheets/a.pdf", b"%PDF-1.5".to_vec());

        let listing = list_sheets(
            &store,
            &objects,
            test_support::short_timeouts(),
            &test_support::sample_selector(),
            SheetVariant::Raw,
        )
        .await
        .expect("listing");

        assert_eq!(listing.exam_id, exam.id);
        assert_eq!(listing.sheets.len(), 1);
        assert_eq!(listing.sheets[0].sheet_id, kept.id);
        assert_eq!(listing.sheets[0].student_name, "Awa");
    }

    #[tokio::test]
    async fn unreachable_objects_are_skipped() {
        let store = InMemoryStore::default();
        let objects = FakeObjectStore::default();
        let exam = store.seed_exam(test_support::sample_selector());
        let awa = store.seed_student("1111", "Awa", "3A");
        let binta = store.seed_student("2222", "Binta", "3A");
        store.seed_sheet(&awa, &exam, "answer-sheets/a.pdf");
        let kept = store.seed_sheet(&binta, &exam, "answer-sheets/b.pdf");
        objects.insert("answer-sheets/a.pdf", b"%PDF-1.5".to_vec());
        objects.insert("answer-sheets/b.pdf", b"%PDF-1.5".to_vec());
        objects.fail_lookup("answer-sheets/a.pdf");

        let listing = list_sheets(
            &store,
            &objects,
            test_support::short_timeouts(),
            &test_support::sample_selector(),
            SheetVariant::Raw,
        )
        .await
        .expect("listing");

        assert_eq!(listing.sheets.len(), 1);
        assert_eq!(listing.sheets[0].sheet_id, kept.id);
    }

    #[tokio::test]
    async fn corrected_variant_lists_only_corrected_sheets() {
        let store = InMemoryStore::default();
        let objects = FakeObjectStore::default();
        let exam = store.seed_exam(test_support::sample_selector());
        let awa = store.seed_student("1111", "Awa", "3A");
        let corrected = store.seed_sheet(&awa, &exam, "answer-sheets/a.pdf");
        store.seed_sheet(&awa, &exam, "answer-sheets/b.pdf");
        let corrected_path = "corrected-answer-sheets/x/1.pdf";
        store.mark_corrected(&corrected.id, corrected_path, 12.0).await.expect("mark");
        objects.insert(corrected_path, b"%PDF-1.5".to_vec());
        objects.insert("answer-sheets/b.pdf", b"%PDF-1.5".to_vec());

        let listing = list_sheets(
            &store,
            &objects,
            test_support::short_timeouts(),
            &test_support::sample_selector(),
            SheetVariant::Corrected,
        )
        .await
        .expect("listing");

        assert_eq!(listing.sheets.len(), 1);
        assert_eq!(listing.sheets[0].path, corrected_path);
        assert_eq!(listing.sheets[0].score, Some(12.0));
    }

    #[tokio::test]
    async fn unknown_exam_and_sheet_are_not_found() {
        let store = InMemoryStore::default();
        let objects = FakeObjectStore::default();

        let err = list_sheets(
            &store,
            &objects,
            test_support::short_timeouts(),
            &test_support::sample_selector(),
            SheetVariant::Raw,
        )
        .await
        .expect_err("no exam");
        assert_eq!(err.kind(), "not_found");

        let err = get_sheet(&store, test_support::short_timeouts(), "missing")
            .await
            .expect_err("no sheet");
        assert_eq!(err, PipelineError::not_found("sheet", "id=missing"));
    }

    #[test]
    fn variant_defaults_to_raw() {
        let variant: SheetVariant = serde_json::from_str("\"corrected\"").expect("variant");
        assert_eq!(variant, SheetVariant::Corrected);
        assert_eq!(SheetVariant::default(), SheetVariant::Raw);
    }
}
