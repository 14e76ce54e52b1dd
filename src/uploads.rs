//! Attachment intake: multipart collection, the MIME allow-list and size
//! ceilings, and collision-resistant stored names.

use std::collections::HashMap;
use std::path::Path;

use axum::extract::Multipart;
use chrono::Utc;
use rand::Rng;

use crate::error::{AppError, AppResult};

pub const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
pub const MAX_FILES_PER_REQUEST: usize = 5;

const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/jpg",
    "image/png",
    "image/gif",
    "application/pdf",
    "text/plain",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/zip",
    "application/x-zip-compressed",
];

#[derive(Debug)]
pub struct UploadedFile {
    pub original_name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// A collected multipart ticket form: plain text fields by name plus any
/// `attachments` files, fully buffered. Nothing is validated or written
/// until the caller asks.
#[derive(Debug, Default)]
pub struct TicketForm {
    fields: HashMap<String, String>,
    pub files: Vec<UploadedFile>,
}

impl TicketForm {
    pub async fn from_multipart(multipart: &mut Multipart) -> AppResult<Self> {
        let mut form = TicketForm::default();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|_| AppError::validation("invalid multipart payload"))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if let Some(file_name) = field.file_name() {
                let original_name = file_name.to_string();
                let mime_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|_| AppError::validation("failed to read uploaded file"))?
                    .to_vec();
                form.files.push(UploadedFile {
                    original_name,
                    mime_type,
                    bytes,
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|_| AppError::validation("failed to read form field"))?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed field value; empty strings count as absent.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    pub fn require(&self, name: &str) -> AppResult<&str> {
        self.text(name)
            .ok_or_else(|| AppError::validation(format!("{name} is required")))
    }
}

/// Checks every file against the allow-list and ceilings before anything is
/// written, so a rejection aborts the whole request with no stored blobs
/// and no dangling rows.
pub fn validate_attachments(files: &[UploadedFile]) -> AppResult<()> {
    if files.len() > MAX_FILES_PER_REQUEST {
        return Err(AppError::validation(format!(
            "too many attachments: maximum {MAX_FILES_PER_REQUEST} files per request"
        )));
    }

    for file in files {
        if !ALLOWED_MIME_TYPES.contains(&file.mime_type.as_str()) {
            return Err(AppError::unsupported_media_type(&file.mime_type));
        }
        if file.bytes.len() > MAX_FILE_BYTES {
            return Err(AppError::validation(format!(
                "{} exceeds the 10 MiB attachment limit",
                file.original_name
            )));
        }
    }

    Ok(())
}

/// `{unix_millis}-{9-digit random}-{sanitized stem}{.ext}`. The timestamp
/// and random suffix make collisions practically impossible; the sanitized
/// stem keeps the name human-traceable.
pub fn stored_filename(original_name: &str) -> String {
    let path = Path::new(original_name);
    let stem = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("file");
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(sanitize_component)
        .filter(|ext| !ext.is_empty());

    let millis = Utc::now().timestamp_millis();
    let random: u32 = rand::thread_rng().gen_range(0..1_000_000_000);

    match extension {
        Some(ext) => format!("{millis}-{random:09}-{}.{ext}", sanitize_component(stem)),
        None => format!("{millis}-{random:09}-{}", sanitize_component(stem)),
    }
}

fn sanitize_component(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}
