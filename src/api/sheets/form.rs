use axum::extract::multipart::{Field, Multipart};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::api::sheets::MAX_FILES_PER_UPLOAD;
use crate::schemas::sheet::{ExamSelectorRequest, OverrideFields};
use crate::tasks::ingestion::UploadedFile;

const MAX_TEXT_FIELD_BYTES: usize = 4096;

pub(super) struct UploadForm {
    pub(super) files: Vec<UploadedFile>,
    pub(super) selector: ExamSelectorRequest,
}

pub(super) struct OverrideForm {
    pub(super) pdf: Vec<u8>,
    pub(super) fields: OverrideFields,
}

pub(super) async fn read_upload_form(
    mut multipart: Multipart,
    max_file_bytes: usize,
) -> Result<UploadForm, ApiError> {
    let mut files = Vec::new();
    let mut selector = ExamSelectorRequest::default();

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "files" | "files[]" | "file" => {
                if files.len() == MAX_FILES_PER_UPLOAD {
                    return Err(ApiError::BadRequest(format!(
                        "At most {MAX_FILES_PER_UPLOAD} files per upload"
                    )));
                }
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type =
                    field.content_type().unwrap_or("application/octet-stream").to_string();
                let bytes = read_file(field, max_file_bytes).await?;
                files.push(UploadedFile { file_name, content_type, bytes });
            }
            "session" => selector.session = read_text(field).await?,
            "term" => selector.term = read_text(field).await?,
            "academic_year" => selector.academic_year = read_text(field).await?,
            "subject_id" => selector.subject_id = read_text(field).await?,
            "class_id" => selector.class_id = read_text(field).await?,
            other => tracing::debug!(field = other, "Ignoring unknown upload field"),
        }
    }

    Ok(UploadForm { files, selector })
}

pub(super) async fn read_override_form(
    mut multipart: Multipart,
    max_file_bytes: usize,
) -> Result<OverrideForm, ApiError> {
    let mut pdf = None;
    let mut score = None;
    let mut explanation = String::new();

    while let Some(field) = next_field(&mut multipart).await? {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "pdf" | "file" => pdf = Some(read_file(field, max_file_bytes).await?),
            "score" => {
                let text = read_text(field).await?;
                let parsed = text.parse::<f64>().map_err(|_| {
                    ApiError::BadRequest("score must be a valid number".to_string())
                })?;
                score = Some(parsed);
            }
            "explanation" => explanation = read_text(field).await?,
            other => tracing::debug!(field = other, "Ignoring unknown override field"),
        }
    }

    let pdf = pdf.ok_or_else(|| ApiError::BadRequest("pdf is required".to_string()))?;
    let score = score.ok_or_else(|| ApiError::BadRequest("score is required".to_string()))?;
    let fields = OverrideFields { score, explanation };
    fields.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(OverrideForm { pdf, fields })
}

async fn next_field(multipart: &mut Multipart) -> Result<Option<Field<'_>>, ApiError> {
    multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))
}

async fn read_file(mut field: Field<'_>, max_bytes: usize) -> Result<Vec<u8>, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
    {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(ApiError::PayloadTooLarge(format!(
                "File exceeds the {max_bytes} byte limit"
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_text(mut field: Field<'_>) -> Result<String, ApiError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field
        .chunk()
        .await
        .map_err(|_| ApiError::BadRequest("Failed to read form field".to_string()))?
    {
        if bytes.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(ApiError::BadRequest("Form field is too long".to_string()));
        }
        bytes.extend_from_slice(&chunk);
    }

    String::from_utf8(bytes)
        .map(|text| text.trim().to_string())
        .map_err(|_| ApiError::BadRequest("Form field must be UTF-8".to_string()))
}
