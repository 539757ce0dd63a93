//! On-disk storage for uploaded files.
//!
//! Files land under `{upload_dir}/{category}/...` and are served back at
//! `{APP_URL}/uploads/{relative path}`. Everything here is independent of the
//! database; handlers persist the resulting [`StoredFile`] themselves.

use actix_multipart::Multipart;
use actix_web::web;
use chrono::{DateTime, Datelike, Utc};
use futures::TryStreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::AppError;

pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;
pub const MAX_FILES_COUNT: usize = 10;
pub const THUMBNAIL_SIZE: u32 = 200;
pub const THUMBNAIL_DIR: &str = "thumbnails";
/// URL path prefix the stored files are served under.
pub const PUBLIC_PREFIX: &str = "uploads";

pub const ERR_FILE_TOO_LARGE: &str = "File size exceeds the maximum allowed size";
pub const ERR_INVALID_FILE_TYPE: &str = "File type is not allowed";
pub const ERR_TOO_MANY_FILES: &str = "Too many files uploaded at once";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileCategory {
    Images,
    Documents,
    Videos,
    Audio,
    Archives,
    Other,
}

impl FileCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            FileCategory::Images => "images",
            FileCategory::Documents => "documents",
            FileCategory::Videos => "videos",
            FileCategory::Audio => "audio",
            FileCategory::Archives => "archives",
            FileCategory::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        ALL_CATEGORIES
            .iter()
            .copied()
            .find(|category| category.as_str() == value)
    }
}

impl fmt::Display for FileCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const ALL_CATEGORIES: [FileCategory; 6] = [
    FileCategory::Images,
    FileCategory::Documents,
    FileCategory::Videos,
    FileCategory::Audio,
    FileCategory::Archives,
    FileCategory::Other,
];

/// MIME type, its category and the extensions accepted for it.
const ALLOWED_FILE_TYPES: &[(&str, FileCategory, &[&str])] = &[
    ("image/jpeg", FileCategory::Images, &[".jpg", ".jpeg"]),
    ("image/png", FileCategory::Images, &[".png"]),
    ("image/gif", FileCategory::Images, &[".gif"]),
    ("image/webp", FileCategory::Images, &[".webp"]),
    ("image/svg+xml", FileCategory::Images, &[".svg"]),
    ("application/pdf", FileCategory::Documents, &[".pdf"]),
    ("application/msword", FileCategory::Documents, &[".doc"]),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        FileCategory::Documents,
        &[".docx"],
    ),
    ("application/vnd.ms-excel", FileCategory::Documents, &[".xls"]),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        FileCategory::Documents,
        &[".xlsx"],
    ),
    ("text/plain", FileCategory::Documents, &[".txt"]),
    ("video/mp4", FileCategory::Videos, &[".mp4"]),
    ("video/webm", FileCategory::Videos, &[".webm"]),
    ("video/ogg", FileCategory::Videos, &[".ogv"]),
    ("video/avi", FileCategory::Videos, &[".avi"]),
    ("video/mov", FileCategory::Videos, &[".mov"]),
    ("audio/mpeg", FileCategory::Audio, &[".mp3"]),
    ("audio/wav", FileCategory::Audio, &[".wav"]),
    ("audio/ogg", FileCategory::Audio, &[".ogg"]),
    ("audio/mp4", FileCategory::Audio, &[".m4a"]),
    ("application/zip", FileCategory::Archives, &[".zip"]),
    ("application/x-rar-compressed", FileCategory::Archives, &[".rar"]),
    ("application/x-7z-compressed", FileCategory::Archives, &[".7z"]),
    ("application/gzip", FileCategory::Archives, &[".gz"]),
];

pub fn category_for_mime(mimetype: &str) -> FileCategory {
    ALLOWED_FILE_TYPES
        .iter()
        .find(|(mime, _, _)| *mime == mimetype)
        .map(|(_, category, _)| *category)
        .unwrap_or(FileCategory::Other)
}

fn is_allowed_mime(mimetype: &str) -> bool {
    ALLOWED_FILE_TYPES.iter().any(|(mime, _, _)| *mime == mimetype)
}

fn is_allowed_extension(extension: &str) -> bool {
    ALLOWED_FILE_TYPES
        .iter()
        .any(|(_, _, extensions)| extensions.contains(&extension))
}

/// Lowercased extension including the dot (`".png"`), or `""`.
pub fn extension_of(filename: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| format!(".{}", ext.to_lowercase()))
        .unwrap_or_default()
}

/// A file read from a multipart request, not yet written anywhere.
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub original_name: String,
    pub mimetype: String,
    pub bytes: Vec<u8>,
}

impl IncomingFile {
    /// Uses the declared content type unless it is missing or generic, in
    /// which case the type is guessed from the filename.
    pub fn new(original_name: String, declared: Option<String>, bytes: Vec<u8>) -> Self {
        let mimetype = match declared {
            Some(mime) if mime != "application/octet-stream" => mime,
            _ => mime_guess::from_path(&original_name)
                .first_raw()
                .unwrap_or("application/octet-stream")
                .to_string(),
        };
        Self {
            original_name,
            mimetype,
            bytes,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn extension(&self) -> String {
        extension_of(&self.original_name)
    }

    pub fn category(&self) -> FileCategory {
        category_for_mime(&self.mimetype)
    }
}

/// Every rule the file breaks; empty when it may be stored.
pub fn check_file(file: &IncomingFile) -> Vec<String> {
    let mut errors = Vec::new();
    if file.size() > MAX_FILE_SIZE {
        errors.push(format!("{} ({})", ERR_FILE_TOO_LARGE, file.original_name));
    }
    if !is_allowed_mime(&file.mimetype) {
        errors.push(format!(
            "{} ({}): {}",
            ERR_INVALID_FILE_TYPE, file.original_name, file.mimetype
        ));
    }
    let extension = file.extension();
    if !is_allowed_extension(&extension) {
        errors.push(format!(
            "{} ({}): {}",
            ERR_INVALID_FILE_TYPE, file.original_name, extension
        ));
    }
    errors
}

/// Rejects the batch on the first broken rule.
pub fn validate_files(files: &[IncomingFile]) -> Result<(), AppError> {
    if files.is_empty() {
        return Err(AppError::BadRequest("No files provided".into()));
    }
    if files.len() > MAX_FILES_COUNT {
        return Err(AppError::BadRequest(ERR_TOO_MANY_FILES.into()));
    }
    for file in files {
        if let Some(error) = check_file(file).into_iter().next() {
            return Err(AppError::BadRequest(error));
        }
    }
    Ok(())
}

/// `{uuid}-{unix millis}{extension}`
pub fn generate_filename(extension: &str) -> String {
    format!(
        "{}-{}{}",
        Uuid::new_v4(),
        Utc::now().timestamp_millis(),
        extension
    )
}

/// Keeps only path segments made of letters, digits, `_` and `-`.
/// `"../a/./b c/d"` becomes `"a/d"`.
pub fn sanitize_folder(folder: &str) -> Option<String> {
    let segments: Vec<&str> = folder
        .split(['/', '\\'])
        .filter(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        })
        .collect();
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

/// A rename target must be one path segment of letters, digits, `_`, `-`, `.`.
pub fn sanitize_filename(filename: &str) -> Option<String> {
    let name = filename.trim();
    let valid = !name.is_empty()
        && name != "."
        && name != ".."
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    valid.then(|| name.to_string())
}

/// Folder relative to the upload root: the sanitized custom folder when one
/// is given, otherwise the date.
pub fn folder_for(category: FileCategory, custom: Option<&str>, now: DateTime<Utc>) -> String {
    match custom.and_then(sanitize_folder) {
        Some(folder) => format!("{}/{}", category, folder),
        None => format!(
            "{}/{:04}/{:02}/{:02}",
            category,
            now.year(),
            now.month(),
            now.day()
        ),
    }
}

pub fn public_url(app_url: &str, relative: &str) -> String {
    format!(
        "{}/{}/{}",
        app_url.trim_end_matches('/'),
        PUBLIC_PREFIX,
        relative.trim_start_matches('/')
    )
}

/// Writes a `THUMBNAIL_SIZE` bounded copy of `source` to `dest`.
pub fn generate_thumbnail(source: &[u8], dest: &Path) -> Result<(), image::ImageError> {
    let img = image::ImageReader::new(Cursor::new(source))
        .with_guessed_format()?
        .decode()?;
    let thumb = img.thumbnail(THUMBNAIL_SIZE, THUMBNAIL_SIZE);
    match image::ImageFormat::from_path(dest) {
        Ok(image::ImageFormat::Jpeg) => {
            image::DynamicImage::ImageRgb8(thumb.to_rgb8()).save(dest)
        }
        _ => thumb.save(dest),
    }
}

#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub folder: Option<String>,
    pub generate_thumbnail: bool,
}

/// What was written to disk, ready to be inserted into `uploads`.
#[derive(Debug, Clone)]
pub struct StoredFile {
    pub original_name: String,
    pub filename: String,
    pub path: String,
    pub url: String,
    pub mimetype: String,
    pub size: i64,
    pub category: FileCategory,
    pub extension: String,
    pub thumbnail_url: Option<String>,
}

/// Where uploaded files live and how they are addressed.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    app_url: String,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, app_url: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            app_url: app_url.into(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, relative: &str) -> String {
        public_url(&self.app_url, relative)
    }

    fn thumbnail_relative(filename: &str) -> String {
        format!("{}/thumb_{}", THUMBNAIL_DIR, filename)
    }

    /// Writes an already validated file and, for images on request, its thumbnail.
    pub async fn store(
        &self,
        file: IncomingFile,
        options: &UploadOptions,
    ) -> Result<StoredFile, AppError> {
        let category = file.category();
        let extension = file.extension();
        let filename = generate_filename(&extension);
        let folder = folder_for(category, options.folder.as_deref(), Utc::now());
        let relative = format!("{}/{}", folder, filename);

        fs::create_dir_all(self.root.join(&folder)).await?;
        fs::write(self.root.join(&relative), &file.bytes).await?;

        let thumbnail_url = if options.generate_thumbnail && category == FileCategory::Images {
            self.write_thumbnail(file.bytes.clone(), &filename).await
        } else {
            None
        };

        log::info!(
            "Stored upload '{}' as {} ({} bytes)",
            file.original_name,
            relative,
            file.size()
        );

        Ok(StoredFile {
            original_name: file.original_name.clone(),
            size: file.size() as i64,
            url: self.url_for(&relative),
            path: relative,
            filename,
            mimetype: file.mimetype,
            category,
            extension,
            thumbnail_url,
        })
    }

    /// Formats `image` cannot decode are skipped with a warning.
    async fn write_thumbnail(&self, bytes: Vec<u8>, filename: &str) -> Option<String> {
        let relative = Self::thumbnail_relative(filename);
        if let Err(e) = fs::create_dir_all(self.root.join(THUMBNAIL_DIR)).await {
            log::warn!("Could not create thumbnail directory: {}", e);
            return None;
        }
        let dest = self.root.join(&relative);
        match web::block(move || generate_thumbnail(&bytes, &dest)).await {
            Ok(Ok(())) => Some(self.url_for(&relative)),
            Ok(Err(e)) => {
                log::warn!("Skipping thumbnail for {}: {}", filename, e);
                None
            }
            Err(e) => {
                log::warn!("Thumbnail task for {} failed: {}", filename, e);
                None
            }
        }
    }

    /// Moves a stored file to a new folder and/or name; returns the new
    /// relative path.
    pub async fn relocate(&self, current: &str, folder: &str, filename: &str) -> Result<String, AppError> {
        let relative = format!("{}/{}", folder, filename);
        if relative == current {
            return Ok(relative);
        }
        let target = self.root.join(&relative);
        if fs::try_exists(&target).await? {
            return Err(AppError::Conflict(format!("{} already exists", relative)));
        }
        fs::create_dir_all(self.root.join(folder)).await?;
        fs::rename(self.root.join(current), &target).await?;
        Ok(relative)
    }

    pub async fn rename_thumbnail(&self, old_filename: &str, new_filename: &str) -> Option<String> {
        let from = self.root.join(Self::thumbnail_relative(old_filename));
        let relative = Self::thumbnail_relative(new_filename);
        match fs::rename(&from, self.root.join(&relative)).await {
            Ok(()) => Some(self.url_for(&relative)),
            Err(e) => {
                log::warn!("Could not rename thumbnail for {}: {}", old_filename, e);
                None
            }
        }
    }

    /// Moves a relocated file back to `original`, and its thumbnail back from
    /// `renamed_thumbnail = (new filename, old filename)`. Failures are logged.
    pub async fn restore(
        &self,
        moved_to: &str,
        original: &str,
        renamed_thumbnail: Option<(&str, &str)>,
    ) {
        let (folder, filename) = original.rsplit_once('/').unwrap_or(("", original));
        if let Err(e) = self.relocate(moved_to, folder, filename).await {
            log::error!("Could not restore {} to {}: {}", moved_to, original, e);
        }
        if let Some((new_filename, old_filename)) = renamed_thumbnail {
            self.rename_thumbnail(new_filename, old_filename).await;
        }
    }

    /// Removes the file and its thumbnail. A missing thumbnail is only logged.
    pub async fn remove(&self, relative: &str, filename: &str, has_thumbnail: bool) -> Result<(), AppError> {
        match fs::remove_file(self.root.join(relative)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::warn!("Upload {} was already missing on disk", relative);
            }
            Err(e) => return Err(e.into()),
        }
        if has_thumbnail {
            let thumbnail = self.root.join(Self::thumbnail_relative(filename));
            if let Err(e) = fs::remove_file(&thumbnail).await {
                log::warn!("Failed to delete thumbnail {}: {}", thumbnail.display(), e);
            }
        }
        Ok(())
    }
}

/// The parts of a multipart upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub files: Vec<IncomingFile>,
    pub options: UploadOptions,
}

/// Reads every part of a multipart body. File parts are buffered and capped
/// at `MAX_FILE_SIZE`; the `folder` and `generateThumbnail` text parts fill
/// `UploadOptions`. Other text parts are ignored.
pub async fn read_upload_form(mut payload: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();

    while let Some(mut field) = payload.try_next().await? {
        let name = field.name().to_string();
        let filename = field
            .content_disposition()
            .get_filename()
            .map(|f| f.to_string());
        let declared = field.content_type().map(|mime| mime.essence_str().to_string());

        let mut bytes = Vec::new();
        while let Some(chunk) = field.try_next().await? {
            if bytes.len() + chunk.len() > MAX_FILE_SIZE {
                return Err(AppError::BadRequest(format!(
                    "{} ({})",
                    ERR_FILE_TOO_LARGE,
                    filename.as_deref().unwrap_or(&name)
                )));
            }
            bytes.extend_from_slice(&chunk);
        }

        match filename {
            Some(original_name) => {
                if form.files.len() >= MAX_FILES_COUNT {
                    return Err(AppError::BadRequest(ERR_TOO_MANY_FILES.into()));
                }
                form.files.push(IncomingFile::new(original_name, declared, bytes));
            }
            None => {
                let value = String::from_utf8_lossy(&bytes).trim().to_string();
                match name.as_str() {
                    "folder" if !value.is_empty() => form.options.folder = Some(value),
                    "generateThumbnail" => {
                        form.options.generate_thumbnail = matches!(value.as_str(), "true" | "1")
                    }
                    _ => {}
                }
            }
        }
    }

    Ok(form)
}
