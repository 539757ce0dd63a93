use crate::{
    auth::AuthenticatedUserId,
    error::AppError,
    models::{
        upload::{
            FileInfo, MultipleUploadResponse, UpdateUploadInput, UploadList, UploadQuery,
            UploadResponse, ValidationReport, UPLOAD_COLUMNS,
        },
        MessageResponse, Upload,
    },
    uploads::{
        check_file, extension_of, folder_for, read_upload_form, sanitize_filename,
        validate_files, FileCategory, StoredFile, UploadStore,
    },
};
use actix_multipart::Multipart;
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use chrono::Utc;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tokio::fs;

pub(crate) async fn insert_upload(
    pool: &PgPool,
    stored: &StoredFile,
    user_id: Option<i32>,
) -> Result<Upload, AppError> {
    let upload = sqlx::query_as::<_, Upload>(&format!(
        "INSERT INTO uploads (original_name, filename, path, url, mimetype, size, category, \
         extension, thumbnail_url, user_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {}",
        UPLOAD_COLUMNS
    ))
    .bind(&stored.original_name)
    .bind(&stored.filename)
    .bind(&stored.path)
    .bind(&stored.url)
    .bind(&stored.mimetype)
    .bind(stored.size)
    .bind(stored.category.as_str())
    .bind(&stored.extension)
    .bind(&stored.thumbnail_url)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(upload)
}

async fn fetch_upload(pool: &PgPool, upload_id: i32) -> Result<Upload, AppError> {
    sqlx::query_as::<_, Upload>(&format!("SELECT {} FROM uploads WHERE id = $1", UPLOAD_COLUMNS))
        .bind(upload_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("File not found".into()))
}

async fn fetch_owned_upload(pool: &PgPool, upload_id: i32, user_id: i32) -> Result<Upload, AppError> {
    let upload = fetch_upload(pool, upload_id).await?;
    if upload.user_id != Some(user_id) {
        log::warn!("User {} tried to modify upload {}", user_id, upload_id);
        return Err(AppError::Forbidden("You can only modify your own files".into()));
    }
    Ok(upload)
}

/// Upload one file
///
/// Multipart body with one file part plus optional `folder` and
/// `generateThumbnail` text parts.
///
/// ## Responses:
/// - `201 Created`: `{ message, file }`.
/// - `400 Bad Request`: no file, more than one file, or a rejected type or size.
#[post("/single")]
pub async fn upload_single(
    pool: web::Data<PgPool>,
    store: web::Data<UploadStore>,
    user: AuthenticatedUserId,
    payload: Multipart,
) -> Result<impl Responder, AppError> {
    let mut form = read_upload_form(payload).await?;
    validate_files(&form.files)?;
    if form.files.len() > 1 {
        return Err(AppError::BadRequest("Only one file may be uploaded here".into()));
    }

    let stored = store.store(form.files.remove(0), &form.options).await?;
    let file = insert_upload(&pool, &stored, Some(user.0)).await?;
    Ok(HttpResponse::Created().json(UploadResponse {
        message: "File uploaded successfully".into(),
        file,
    }))
}

/// Upload up to `MAX_FILES_COUNT` files. The whole batch is validated
/// before anything is written.
#[post("/multiple")]
pub async fn upload_multiple(
    pool: web::Data<PgPool>,
    store: web::Data<UploadStore>,
    user: AuthenticatedUserId,
    payload: Multipart,
) -> Result<impl Responder, AppError> {
    let form = read_upload_form(payload).await?;
    validate_files(&form.files)?;

    let mut files = Vec::with_capacity(form.files.len());
    for incoming in form.files {
        let stored = store.store(incoming, &form.options).await?;
        files.push(insert_upload(&pool, &stored, Some(user.0)).await?);
    }

    Ok(HttpResponse::Created().json(MultipleUploadResponse {
        message: format!("{} files uploaded successfully", files.len()),
        count: files.len(),
        files,
    }))
}

/// Dry run of the upload rules for the first file in the body. Nothing is
/// stored.
#[post("/validate")]
pub async fn validate_upload(
    _user: AuthenticatedUserId,
    payload: Multipart,
) -> Result<impl Responder, AppError> {
    let form = read_upload_form(payload).await?;
    let file = form
        .files
        .first()
        .ok_or_else(|| AppError::BadRequest("No file uploaded".into()))?;

    let errors = check_file(file);
    let is_valid = errors.is_empty();
    Ok(HttpResponse::Ok().json(ValidationReport {
        is_valid,
        message: if is_valid {
            "File is valid".into()
        } else {
            "File validation failed".into()
        },
        errors,
        file_info: FileInfo {
            original_name: file.original_name.clone(),
            size: file.size(),
            mimetype: file.mimetype.clone(),
            extension: file.extension(),
            category: file.category(),
        },
    }))
}

/// List uploads, filtered by `?category=` and `?userId=`.
#[get("")]
pub async fn list_uploads(
    pool: web::Data<PgPool>,
    query: web::Query<UploadQuery>,
) -> Result<impl Responder, AppError> {
    let page = query.page_query().resolve();

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM uploads WHERE TRUE");
    let mut select = QueryBuilder::<Postgres>::new(format!(
        "SELECT {} FROM uploads WHERE TRUE",
        UPLOAD_COLUMNS
    ));
    for builder in [&mut count, &mut select] {
        if let Some(category) = query.category {
            builder.push(" AND category = ").push_bind(category.as_str());
        }
        if let Some(user_id) = query.user_id {
            builder.push(" AND user_id = ").push_bind(user_id);
        }
    }
    let total: i64 = count.build_query_scalar().fetch_one(&**pool).await?;

    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset());
    let uploads = select.build_query_as::<Upload>().fetch_all(&**pool).await?;

    Ok(HttpResponse::Ok().json(UploadList {
        uploads,
        meta: page.meta(total),
    }))
}

#[get("/{id}")]
pub async fn get_upload(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(fetch_upload(&pool, path.into_inner()).await?))
}

/// Rename and/or move a file
///
/// `filename` renames in place (the extension is kept). `folder` and
/// `category` move the file the same way a new upload would be placed.
#[patch("/{id}")]
pub async fn update_upload(
    pool: web::Data<PgPool>,
    store: web::Data<UploadStore>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<UpdateUploadInput>,
) -> Result<impl Responder, AppError> {
    let upload = fetch_owned_upload(&pool, path.into_inner(), user.0).await?;
    let UpdateUploadInput {
        filename,
        folder,
        category,
    } = input.into_inner();

    let new_filename = match filename {
        Some(name) => {
            let name = sanitize_filename(&name)
                .ok_or_else(|| AppError::BadRequest("Invalid filename".into()))?;
            if extension_of(&name) == upload.extension {
                name
            } else {
                format!("{}{}", name, upload.extension)
            }
        }
        None => upload.filename.clone(),
    };

    let current_category = FileCategory::parse(&upload.category).unwrap_or(FileCategory::Other);
    let new_category = category.unwrap_or(current_category);
    let new_folder = if folder.is_some() || category.is_some() {
        folder_for(new_category, folder.as_deref(), Utc::now())
    } else {
        upload
            .path
            .rsplit_once('/')
            .map(|(dir, _)| dir.to_string())
            .unwrap_or_default()
    };

    let new_path = store.relocate(&upload.path, &new_folder, &new_filename).await?;
    let thumbnail_renamed = upload.thumbnail_url.is_some() && new_filename != upload.filename;
    let thumbnail_url = if thumbnail_renamed {
        store.rename_thumbnail(&upload.filename, &new_filename).await
    } else {
        upload.thumbnail_url.clone()
    };

    let result = sqlx::query_as::<_, Upload>(&format!(
        "UPDATE uploads SET filename = $1, path = $2, url = $3, category = $4, \
         thumbnail_url = $5, updated_at = NOW() WHERE id = $6 RETURNING {}",
        UPLOAD_COLUMNS
    ))
    .bind(&new_filename)
    .bind(&new_path)
    .bind(store.url_for(&new_path))
    .bind(new_category.as_str())
    .bind(&thumbnail_url)
    .bind(upload.id)
    .fetch_one(&**pool)
    .await;

    let updated = match result {
        Ok(updated) => updated,
        Err(e) => {
            let renamed = (thumbnail_renamed && thumbnail_url.is_some())
                .then_some((new_filename.as_str(), upload.filename.as_str()));
            store.restore(&new_path, &upload.path, renamed).await;
            return Err(e.into());
        }
    };

    log::info!("Upload {} moved to {}", upload.id, new_path);
    Ok(HttpResponse::Ok().json(UploadResponse {
        message: "File updated successfully".into(),
        file: updated,
    }))
}

/// Delete a file's record, then the file and its thumbnail.
#[delete("/{id}")]
pub async fn delete_upload(
    pool: web::Data<PgPool>,
    store: web::Data<UploadStore>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let upload = fetch_owned_upload(&pool, path.into_inner(), user.0).await?;

    sqlx::query("DELETE FROM uploads WHERE id = $1")
        .bind(upload.id)
        .execute(&**pool)
        .await?;
    if let Err(e) = store
        .remove(&upload.path, &upload.filename, upload.thumbnail_url.is_some())
        .await
    {
        log::error!("Upload {} deleted but {} stayed on disk: {}", upload.id, upload.path, e);
    }

    log::info!("User {} deleted upload {}", user.0, upload.id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("File deleted successfully")))
}

/// Serves stored files at `/uploads/{relative path}`.
#[get("/uploads/{path:.*}")]
pub async fn serve_file(
    store: web::Data<UploadStore>,
    path: web::Path<String>,
) -> Result<impl Responder, AppError> {
    let relative = path.into_inner();
    let safe = !relative.is_empty()
        && relative
            .split('/')
            .all(|segment| !segment.is_empty() && segment != "." && segment != "..");
    if !safe || relative.contains('\\') {
        return Err(AppError::NotFound("File not found".into()));
    }

    let bytes = match fs::read(store.root().join(&relative)).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::NotFound("File not found".into()))
        }
        Err(e) => return Err(e.into()),
    };
    let mime = mime_guess::from_path(&relative).first_or_octet_stream();
    Ok(HttpResponse::Ok()
        .content_type(mime.essence_str())
        .body(bytes))
}
