use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::pagination::{PageMeta, PageQuery};
use crate::uploads::FileCategory;

pub const UPLOAD_COLUMNS: &str = "id, original_name, filename, path, url, mimetype, size, \
     category, extension, thumbnail_url, user_id, created_at, updated_at";

/// A row of the `uploads` table. `path` is relative to the upload root.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Upload {
    pub id: i32,
    pub original_name: String,
    pub filename: String,
    pub path: String,
    pub url: String,
    pub mimetype: String,
    pub size: i64,
    pub category: String,
    pub extension: String,
    pub thumbnail_url: Option<String>,
    pub user_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Rename and/or move a stored file.
#[derive(Debug, Deserialize)]
pub struct UpdateUploadInput {
    pub filename: Option<String>,
    pub folder: Option<String>,
    pub category: Option<FileCategory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadQuery {
    pub category: Option<FileCategory>,
    pub user_id: Option<i32>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

impl UploadQuery {
    pub fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub file: Upload,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MultipleUploadResponse {
    pub message: String,
    pub files: Vec<Upload>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadList {
    pub uploads: Vec<Upload>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub original_name: String,
    pub size: usize,
    pub mimetype: String,
    pub extension: String,
    pub category: FileCategory,
}

/// Outcome of `POST /uploads/validate`; nothing is stored.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub is_valid: bool,
    pub message: String,
    pub errors: Vec<String>,
    pub file_info: FileInfo,
}
