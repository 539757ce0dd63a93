use crate::{
    auth::{AuthenticatedUserId, OptionalUserId},
    error::AppError,
    models::{
        like::{CreateLikeInput, LikeCheck, LikeRow, LikeStats, LIKE_SELECT},
        Like, LikeList, MessageResponse, PageQuery, ToggleLikeResponse,
    },
    routes::{ensure_article_exists, ensure_user_exists},
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::PgPool;

/// Flips the caller's like on an article.
///
/// Runs in one transaction: the existing like is deleted if there is one,
/// otherwise a like is inserted with `ON CONFLICT DO NOTHING`, so concurrent
/// toggles on the same pair never hit the unique constraint.
pub async fn toggle_like(
    pool: &PgPool,
    user_id: i32,
    article_id: i32,
) -> Result<ToggleLikeResponse, AppError> {
    ensure_article_exists(pool, article_id).await?;

    let mut tx = pool.begin().await?;
    let removed = sqlx::query("DELETE FROM likes WHERE article_id = $1 AND user_id = $2")
        .bind(article_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let response = if removed > 0 {
        ToggleLikeResponse {
            message: "Article unliked successfully".into(),
            is_liked: false,
        }
    } else {
        sqlx::query(
            "INSERT INTO likes (article_id, user_id) VALUES ($1, $2) \
             ON CONFLICT (article_id, user_id) DO NOTHING",
        )
        .bind(article_id)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;
        ToggleLikeResponse {
            message: "Article liked successfully".into(),
            is_liked: true,
        }
    };
    tx.commit().await?;

    log::debug!(
        "User {} toggled like on article {}: {}",
        user_id,
        article_id,
        response.is_liked
    );
    Ok(response)
}

async fn fetch_like(pool: &PgPool, like_id: i32) -> Result<Like, AppError> {
    let row = sqlx::query_as::<_, LikeRow>(&format!("{} WHERE l.id = $1", LIKE_SELECT))
        .bind(like_id)
        .fetch_one(pool)
        .await?;
    Ok(row.into())
}

async fn is_liked(pool: &PgPool, user_id: i32, article_id: i32) -> Result<bool, AppError> {
    let liked: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM likes WHERE article_id = $1 AND user_id = $2)",
    )
    .bind(article_id)
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(liked)
}

/// `filter` is `"l.article_id"` or `"l.user_id"`.
async fn list_likes(
    pool: &PgPool,
    filter: &str,
    id: i32,
    page: &PageQuery,
) -> Result<LikeList, AppError> {
    let page = page.resolve();
    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM likes l WHERE {} = $1",
        filter
    ))
    .bind(id)
    .fetch_one(pool)
    .await?;

    let rows = sqlx::query_as::<_, LikeRow>(&format!(
        "{} WHERE {} = $1 ORDER BY l.created_at DESC LIMIT $2 OFFSET $3",
        LIKE_SELECT, filter
    ))
    .bind(id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(LikeList {
        likes: rows.into_iter().map(Like::from).collect(),
        meta: page.meta(total),
    })
}

/// Like an article. `409 Conflict` when the caller already likes it.
#[post("")]
pub async fn like_article(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    body: web::Json<CreateLikeInput>,
) -> Result<impl Responder, AppError> {
    ensure_article_exists(&pool, body.article_id).await?;

    let like_id: Option<i32> = sqlx::query_scalar(
        "INSERT INTO likes (article_id, user_id) VALUES ($1, $2) \
         ON CONFLICT (article_id, user_id) DO NOTHING RETURNING id",
    )
    .bind(body.article_id)
    .bind(user.0)
    .fetch_optional(&**pool)
    .await?;
    let like_id = like_id.ok_or_else(|| AppError::Conflict("Article already liked".into()))?;

    let like = fetch_like(&pool, like_id).await?;
    Ok(HttpResponse::Created().json(json!({
        "message": "Article liked successfully",
        "like": like,
    })))
}

#[post("/toggle/{article_id}")]
pub async fn toggle(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let response = toggle_like(&pool, user.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(response))
}

/// Remove the caller's like. `404` when there is none.
#[delete("/{article_id}")]
pub async fn unlike_article(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let removed = sqlx::query("DELETE FROM likes WHERE article_id = $1 AND user_id = $2")
        .bind(path.into_inner())
        .bind(user.0)
        .execute(&**pool)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound("Like not found".into()));
    }
    Ok(HttpResponse::Ok().json(MessageResponse::new("Article unliked successfully")))
}

#[get("/article/{article_id}")]
pub async fn article_likes(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    ensure_article_exists(&pool, article_id).await?;
    Ok(HttpResponse::Ok().json(list_likes(&pool, "l.article_id", article_id, &query).await?))
}

#[get("/user/{user_id}")]
pub async fn user_likes(
    pool: web::Data<PgPool>,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_user_exists(&pool, user_id).await?;
    Ok(HttpResponse::Ok().json(list_likes(&pool, "l.user_id", user_id, &query).await?))
}

#[get("/my-likes")]
pub async fn my_likes(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    Ok(HttpResponse::Ok().json(list_likes(&pool, "l.user_id", user.0, &query).await?))
}

/// `{ likesCount, isLiked }`; `isLiked` is false for anonymous callers.
#[get("/stats/{article_id}")]
pub async fn like_stats(
    pool: web::Data<PgPool>,
    user: OptionalUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let article_id = path.into_inner();
    ensure_article_exists(&pool, article_id).await?;

    let likes_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM likes WHERE article_id = $1")
        .bind(article_id)
        .fetch_one(&**pool)
        .await?;
    let is_liked = match user.0 {
        Some(user_id) => is_liked(&pool, user_id, article_id).await?,
        None => false,
    };

    Ok(HttpResponse::Ok().json(LikeStats {
        likes_count,
        is_liked,
    }))
}

#[get("/check/{article_id}")]
pub async fn check_like(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let is_liked = is_liked(&pool, user.0, path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(LikeCheck { is_liked }))
}
