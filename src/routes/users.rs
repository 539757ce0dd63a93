use crate::{
    auth::{
        password::{hash_password_async, verify_password_async},
        AuthenticatedUserId, PasswordPolicy,
    },
    error::AppError,
    models::{
        user::{
            ChangePasswordInput, UpdateUserInput, UserList, UserSearchQuery, VerifyPasswordInput,
            USER_PROFILE_COLUMNS,
        },
        MessageResponse, PageQuery, UserProfile,
    },
    routes::{ensure_self, uploads::insert_upload},
    uploads::{read_upload_form, validate_files, FileCategory, UploadOptions, UploadStore},
};
use actix_multipart::Multipart;
use actix_web::{delete, get, patch, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::PgPool;
use validator::Validate;

const PROFILE_PICTURE_FOLDER: &str = "profile-pictures";

async fn fetch_profile(pool: &PgPool, user_id: i32) -> Result<UserProfile, AppError> {
    sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_PROFILE_COLUMNS
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))
}

async fn fetch_password_hash(pool: &PgPool, user_id: i32) -> Result<String, AppError> {
    sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))
}

/// Rejects an email or username already held by another account.
async fn ensure_identity_available(
    pool: &PgPool,
    user_id: i32,
    email: Option<&str>,
    username: Option<&str>,
) -> Result<(), AppError> {
    if let Some(email) = email {
        let taken: bool =
            sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM users WHERE email = $1 AND id <> $2)")
                .bind(email)
                .bind(user_id)
                .fetch_one(pool)
                .await?;
        if taken {
            return Err(AppError::Conflict("Email already in use".into()));
        }
    }
    if let Some(username) = username {
        let taken: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM users WHERE username = $1 AND id <> $2)",
        )
        .bind(username)
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        if taken {
            return Err(AppError::Conflict("Username already taken".into()));
        }
    }
    Ok(())
}

/// All users, newest first.
#[get("")]
pub async fn get_users(
    pool: web::Data<PgPool>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let page = query.resolve();
    let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&**pool)
        .await?;
    let users = sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
        USER_PROFILE_COLUMNS
    ))
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(UserList {
        users,
        meta: page.meta(total),
    }))
}

/// Exact, case-insensitive lookup by `?email=` or `?username=`.
#[get("/search")]
pub async fn search_users(
    pool: web::Data<PgPool>,
    query: web::Query<UserSearchQuery>,
) -> Result<impl Responder, AppError> {
    let (column, value) = match (&query.email, &query.username) {
        (Some(email), _) if !email.trim().is_empty() => ("email", email.trim()),
        (_, Some(username)) if !username.trim().is_empty() => ("username", username.trim()),
        _ => {
            return Err(AppError::BadRequest(
                "Email or username query parameter is required".into(),
            ))
        }
    };

    let user = sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {} FROM users WHERE LOWER({}) = LOWER($1)",
        USER_PROFILE_COLUMNS, column
    ))
    .bind(value)
    .fetch_optional(&**pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;
    Ok(HttpResponse::Ok().json(user))
}

#[get("/{id}")]
pub async fn get_user(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(fetch_profile(&pool, path.into_inner()).await?))
}

/// Update the caller's profile
///
/// Absent fields are left unchanged. A new password goes through the
/// strength policy before it is hashed.
///
/// ## Responses:
/// - `200 OK`: `{ message, user }`.
/// - `400 Bad Request`: the new password is too weak.
/// - `403 Forbidden`: `id` is not the caller.
/// - `409 Conflict`: email or username held by another account.
#[patch("/{id}")]
pub async fn update_user(
    pool: web::Data<PgPool>,
    policy: web::Data<PasswordPolicy>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<UpdateUserInput>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_self(user, user_id)?;
    input.validate()?;

    let UpdateUserInput {
        email,
        username,
        password,
        bio,
        image,
    } = input.into_inner();

    if let Some(password) = &password {
        policy.enforce(password, "Password validation failed")?;
    }
    ensure_identity_available(&pool, user_id, email.as_deref(), username.as_deref()).await?;

    let password_hash = match password {
        Some(password) => Some(hash_password_async(password).await?),
        None => None,
    };

    let updated = sqlx::query_as::<_, UserProfile>(&format!(
        "UPDATE users SET email = COALESCE($1, email), username = COALESCE($2, username), \
         password_hash = COALESCE($3, password_hash), bio = COALESCE($4, bio), \
         image = COALESCE($5, image), updated_at = NOW() WHERE id = $6 RETURNING {}",
        USER_PROFILE_COLUMNS
    ))
    .bind(&email)
    .bind(&username)
    .bind(&password_hash)
    .bind(&bio)
    .bind(&image)
    .bind(user_id)
    .fetch_optional(&**pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "User updated successfully",
        "user": updated,
    })))
}

#[post("/{id}/change-password")]
pub async fn change_password(
    pool: web::Data<PgPool>,
    policy: web::Data<PasswordPolicy>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<ChangePasswordInput>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_self(user, user_id)?;
    input.validate()?;
    let ChangePasswordInput {
        current_password,
        new_password,
    } = input.into_inner();

    if current_password == new_password {
        return Err(AppError::BadRequest(
            "New password must be different from the current password".into(),
        ));
    }
    policy.enforce(&new_password, "New password validation failed")?;

    let stored = fetch_password_hash(&pool, user_id).await?;
    if !verify_password_async(current_password, stored).await? {
        log::warn!("User {} supplied a wrong current password", user_id);
        return Err(AppError::Unauthorized("Current password is incorrect".into()));
    }

    let password_hash = hash_password_async(new_password).await?;
    sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
        .bind(&password_hash)
        .bind(user_id)
        .execute(&**pool)
        .await?;

    log::info!("User {} changed their password", user_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Password changed successfully")))
}

/// `{ isValid }` for the caller's own password.
#[post("/{id}/verify-password")]
pub async fn verify_user_password(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    input: web::Json<VerifyPasswordInput>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_self(user, user_id)?;
    input.validate()?;

    let stored = fetch_password_hash(&pool, user_id).await?;
    let is_valid = verify_password_async(input.into_inner().password, stored).await?;
    Ok(HttpResponse::Ok().json(json!({ "isValid": is_valid })))
}

/// Upload a profile picture
///
/// Expects one image in a multipart body. The file is stored under
/// `images/profile-pictures` and its URL becomes the user's `image`.
#[post("/{id}/profile-image")]
pub async fn upload_profile_image(
    pool: web::Data<PgPool>,
    store: web::Data<UploadStore>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    payload: Multipart,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_self(user, user_id)?;

    let mut form = read_upload_form(payload).await?;
    validate_files(&form.files)?;
    if form.files.len() != 1 {
        return Err(AppError::BadRequest(
            "Exactly one profile image must be uploaded".into(),
        ));
    }
    let file = form.files.remove(0);
    if file.category() != FileCategory::Images {
        return Err(AppError::BadRequest(
            "Only image files are allowed for profile pictures".into(),
        ));
    }

    let options = UploadOptions {
        folder: Some(PROFILE_PICTURE_FOLDER.to_string()),
        generate_thumbnail: false,
    };
    let stored = store.store(file, &options).await?;
    let upload = insert_upload(&pool, &stored, Some(user_id)).await?;

    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "UPDATE users SET image = $1, updated_at = NOW() WHERE id = $2 RETURNING {}",
        USER_PROFILE_COLUMNS
    ))
    .bind(&upload.url)
    .bind(user_id)
    .fetch_one(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(json!({
        "message": "Profile image updated successfully",
        "user": profile,
        "file": upload,
    })))
}

/// Delete the caller's account. Articles, comments, likes and follows go
/// with it; uploads are kept with no owner.
#[delete("/{id}")]
pub async fn delete_user(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_self(user, user_id)?;

    let removed = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(&**pool)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound("User not found".into()));
    }

    log::info!("Deleted user {}", user_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("User deleted successfully")))
}
