use crate::{
    auth::{
        generate_token_pair,
        password::{hash_password_async, verify_password_async},
        verify_token, AuthResponse, AuthenticatedUserId, EmailRequest, LoginRequest,
        PasswordPolicy, RefreshTokenRequest, RegisterRequest, ResetPasswordRequest, TokenKind,
        VerifyEmailRequest,
    },
    config::Config,
    error::AppError,
    mailer::{password_reset_email, verification_email, MailMessage, Mailer},
    models::{
        user::{UserProfile, UserRecord, USER_PROFILE_COLUMNS},
        MessageResponse,
    },
};
use actix_web::{get, post, web, HttpResponse, Responder};
use chrono::{Duration, Utc};
use sqlx::PgPool;
use uuid::Uuid;
use validator::Validate;

const RESET_TOKEN_TTL_HOURS: i64 = 1;
const FORGOT_PASSWORD_REPLY: &str = "If the email exists, a reset link has been sent";

/// Hands a message to the mailer. Delivery problems never fail the request.
pub(crate) fn deliver(mailer: &dyn Mailer, message: MailMessage) {
    if let Err(e) = mailer.send(&message) {
        log::warn!("Failed to send '{}' to {}: {}", message.subject, message.to, e);
    }
}

/// Register a new user
///
/// Creates the account, mails a verification link and returns a token pair.
///
/// ## Responses:
/// - `201 Created`: `{ accessToken, refreshToken, user }`.
/// - `400 Bad Request`: the password fails the strength policy.
/// - `409 Conflict`: email or username already taken.
/// - `422 Unprocessable Entity`: field validation failed.
#[post("/register")]
pub async fn register(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    policy: web::Data<PasswordPolicy>,
    mailer: web::Data<dyn Mailer>,
    register_data: web::Json<RegisterRequest>,
) -> Result<impl Responder, AppError> {
    register_data.validate()?;
    policy.enforce(&register_data.password, "Password validation failed")?;

    let RegisterRequest {
        username,
        email,
        password,
        bio,
        image,
    } = register_data.into_inner();

    let existing: Option<(String, String)> =
        sqlx::query_as("SELECT email, username FROM users WHERE email = $1 OR username = $2")
            .bind(&email)
            .bind(&username)
            .fetch_optional(&**pool)
            .await?;
    if let Some((taken_email, _)) = existing {
        return Err(if taken_email == email {
            AppError::Conflict("Email already registered".into())
        } else {
            AppError::Conflict("Username already taken".into())
        });
    }

    let password_hash = hash_password_async(password).await?;
    let verification_token = Uuid::new_v4().to_string();

    let user = sqlx::query_as::<_, UserProfile>(&format!(
        "INSERT INTO users (username, email, password_hash, bio, image, verification_token) \
         VALUES ($1, $2, $3, $4, $5, $6) RETURNING {}",
        USER_PROFILE_COLUMNS
    ))
    .bind(&username)
    .bind(&email)
    .bind(&password_hash)
    .bind(&bio)
    .bind(&image)
    .bind(&verification_token)
    .fetch_one(&**pool)
    .await?;

    log::info!("Registered user {} ({})", user.id, user.username);
    deliver(
        mailer.get_ref(),
        verification_email(
            &config.mail_from,
            &user.email,
            &config.frontend_url,
            &verification_token,
        ),
    );

    let tokens = generate_token_pair(user.id, &config.jwt)?;
    Ok(HttpResponse::Created().json(AuthResponse { tokens, user }))
}

/// Login user
///
/// Wrong email and wrong password produce the same `401`.
#[post("/login")]
pub async fn login(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    login_data: web::Json<LoginRequest>,
) -> Result<impl Responder, AppError> {
    login_data.validate()?;
    let LoginRequest { email, password } = login_data.into_inner();

    let record = sqlx::query_as::<_, UserRecord>(
        "SELECT id, email, username, password_hash, bio, image, email_verified, created_at, updated_at \
         FROM users WHERE email = $1",
    )
    .bind(&email)
    .fetch_optional(&**pool)
    .await?;

    let Some(record) = record else {
        log::warn!("Login attempt for unknown email");
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    };

    if !verify_password_async(password, record.password_hash.clone()).await? {
        log::warn!("Failed login for user {}", record.id);
        return Err(AppError::Unauthorized("Invalid credentials".into()));
    }

    let tokens = generate_token_pair(record.id, &config.jwt)?;
    Ok(HttpResponse::Ok().json(AuthResponse {
        tokens,
        user: record.into(),
    }))
}

#[post("/refresh")]
pub async fn refresh(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    body: web::Json<RefreshTokenRequest>,
) -> Result<impl Responder, AppError> {
    let claims = verify_token(&body.refresh_token, TokenKind::Refresh, &config.jwt)
        .map_err(|_| AppError::Unauthorized("Invalid refresh token".into()))?;

    let exists: Option<i32> = sqlx::query_scalar("SELECT id FROM users WHERE id = $1")
        .bind(claims.sub)
        .fetch_optional(&**pool)
        .await?;
    if exists.is_none() {
        return Err(AppError::Unauthorized("User not found".into()));
    }

    Ok(HttpResponse::Ok().json(generate_token_pair(claims.sub, &config.jwt)?))
}

/// Stores a one-hour reset token and mails it. The reply is the same whether
/// or not the address is registered.
#[post("/forgot-password")]
pub async fn forgot_password(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    mailer: web::Data<dyn Mailer>,
    body: web::Json<EmailRequest>,
) -> Result<impl Responder, AppError> {
    body.validate()?;

    let reset_token = Uuid::new_v4().to_string();
    let expiry = Utc::now() + Duration::hours(RESET_TOKEN_TTL_HOURS);
    let updated: Option<String> = sqlx::query_scalar(
        "UPDATE users SET reset_token = $1, reset_token_expiry = $2, updated_at = NOW() \
         WHERE email = $3 RETURNING email",
    )
    .bind(&reset_token)
    .bind(expiry)
    .bind(&body.email)
    .fetch_optional(&**pool)
    .await?;

    match updated {
        Some(email) => deliver(
            mailer.get_ref(),
            password_reset_email(&config.mail_from, &email, &config.frontend_url, &reset_token),
        ),
        None => log::info!("Password reset requested for an unknown email"),
    }

    Ok(HttpResponse::Ok().json(MessageResponse::new(FORGOT_PASSWORD_REPLY)))
}

#[post("/reset-password")]
pub async fn reset_password(
    pool: web::Data<PgPool>,
    policy: web::Data<PasswordPolicy>,
    body: web::Json<ResetPasswordRequest>,
) -> Result<impl Responder, AppError> {
    body.validate()?;
    policy.enforce(&body.new_password, "Password validation failed")?;
    let ResetPasswordRequest {
        token,
        new_password,
    } = body.into_inner();

    let user_id: Option<i32> = sqlx::query_scalar(
        "SELECT id FROM users WHERE reset_token = $1 AND reset_token_expiry > NOW()",
    )
    .bind(&token)
    .fetch_optional(&**pool)
    .await?;
    let Some(user_id) = user_id else {
        return Err(AppError::BadRequest("Invalid or expired reset token".into()));
    };

    let password_hash = hash_password_async(new_password).await?;
    sqlx::query(
        "UPDATE users SET password_hash = $1, reset_token = NULL, reset_token_expiry = NULL, \
         updated_at = NOW() WHERE id = $2",
    )
    .bind(&password_hash)
    .bind(user_id)
    .execute(&**pool)
    .await?;

    log::info!("Password reset for user {}", user_id);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Password reset successfully")))
}

#[post("/verify-email")]
pub async fn verify_email(
    pool: web::Data<PgPool>,
    body: web::Json<VerifyEmailRequest>,
) -> Result<impl Responder, AppError> {
    body.validate()?;

    let verified: Option<i32> = sqlx::query_scalar(
        "UPDATE users SET email_verified = TRUE, verification_token = NULL, updated_at = NOW() \
         WHERE verification_token = $1 RETURNING id",
    )
    .bind(&body.token)
    .fetch_optional(&**pool)
    .await?;

    match verified {
        Some(user_id) => {
            log::info!("Email verified for user {}", user_id);
            Ok(HttpResponse::Ok().json(MessageResponse::new("Email verified successfully")))
        }
        None => Err(AppError::BadRequest("Invalid verification token".into())),
    }
}

#[post("/resend-verification")]
pub async fn resend_verification(
    pool: web::Data<PgPool>,
    config: web::Data<Config>,
    mailer: web::Data<dyn Mailer>,
    body: web::Json<EmailRequest>,
) -> Result<impl Responder, AppError> {
    body.validate()?;

    let user: Option<(i32, bool)> =
        sqlx::query_as("SELECT id, email_verified FROM users WHERE email = $1")
            .bind(&body.email)
            .fetch_optional(&**pool)
            .await?;
    let (user_id, already_verified) =
        user.ok_or_else(|| AppError::BadRequest("User not found".into()))?;
    if already_verified {
        return Err(AppError::BadRequest("Email is already verified".into()));
    }

    let verification_token = Uuid::new_v4().to_string();
    sqlx::query("UPDATE users SET verification_token = $1, updated_at = NOW() WHERE id = $2")
        .bind(&verification_token)
        .bind(user_id)
        .execute(&**pool)
        .await?;

    deliver(
        mailer.get_ref(),
        verification_email(
            &config.mail_from,
            &body.email,
            &config.frontend_url,
            &verification_token,
        ),
    );
    Ok(HttpResponse::Ok().json(MessageResponse::new("Verification email sent")))
}

/// Tokens are stateless; logging out is acknowledged and left to the client.
#[post("/logout")]
pub async fn logout(user: AuthenticatedUserId) -> Result<impl Responder, AppError> {
    log::info!("User {} logged out", user.0);
    Ok(HttpResponse::Ok().json(MessageResponse::new("Logged out successfully")))
}

#[get("/me")]
pub async fn me(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
) -> Result<impl Responder, AppError> {
    let profile = sqlx::query_as::<_, UserProfile>(&format!(
        "SELECT {} FROM users WHERE id = $1",
        USER_PROFILE_COLUMNS
    ))
    .bind(user.0)
    .fetch_optional(&**pool)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(HttpResponse::Ok().json(profile))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMiddleware;
    use crate::routes::test_support::{bearer, lazy_pool, test_app_data, test_config};
    use actix_web::{http::StatusCode, test, App};
    use serde_json::json;

    #[actix_rt::test]
    async fn test_register_rejects_weak_password_before_touching_the_database() {
        let app = test::init_service(
            test_app_data(App::new()).service(web::scope("/auth").service(register)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({
                "username": "writer",
                "email": "writer@example.com",
                "password": "password"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["message"], "Password validation failed");
        assert_eq!(body["strength"], "Very Weak");
        assert!(body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .any(|e| e == crate::auth::strength::ERR_COMMON));
        assert_eq!(body["suggestion"].as_str().map(str::len), Some(12));
    }

    #[actix_rt::test]
    async fn test_register_validation_errors() {
        let app = test::init_service(
            test_app_data(App::new()).service(web::scope("/auth").service(register)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/register")
            .set_json(json!({
                "username": "writer",
                "email": "invalid-email",
                "password": "Str0ng!Pass"
            }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_login_validation() {
        let app = test::init_service(
            test_app_data(App::new()).service(web::scope("/auth").service(login)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/login")
            .set_json(json!({ "email": "not-an-email", "password": "x" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[actix_rt::test]
    async fn test_refresh_rejects_access_token() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(lazy_pool()))
                .app_data(web::Data::new(test_config()))
                .service(web::scope("/auth").service(refresh)),
        )
        .await;

        let access = crate::auth::generate_token(1, TokenKind::Access, &test_config().jwt).unwrap();
        let req = test::TestRequest::post()
            .uri("/auth/refresh")
            .set_json(json!({ "refreshToken": access }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[actix_rt::test]
    async fn test_reset_password_applies_policy() {
        let app = test::init_service(
            test_app_data(App::new()).service(web::scope("/auth").service(reset_password)),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/auth/reset-password")
            .set_json(json!({ "token": "abc", "newPassword": "aaaaaaaa" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[actix_rt::test]
    async fn test_logout_requires_token() {
        let app = test::init_service(
            test_app_data(App::new()).service(
                web::scope("/api")
                    .wrap(AuthMiddleware::new(test_config().jwt))
                    .configure(crate::routes::config),
            ),
        )
        .await;

        let req = test::TestRequest::post().uri("/api/auth/logout").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::post()
            .uri("/api/auth/logout")
            .insert_header(bearer(5))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
