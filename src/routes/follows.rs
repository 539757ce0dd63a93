//! Follow graph. Every route acts on behalf of the authenticated caller.

use crate::{
    auth::AuthenticatedUserId,
    error::AppError,
    models::{
        follow::{Follow, FollowCheck, FollowRow, FOLLOW_SELECT},
        FollowList, FollowStats, FollowUser, MessageResponse, PageQuery,
    },
    routes::ensure_user_exists,
};
use actix_web::{delete, get, post, web, HttpResponse, Responder};
use serde_json::json;
use sqlx::PgPool;

/// Which side of the relationship a list walks.
#[derive(Debug, Clone, Copy)]
enum Direction {
    /// Users following `$1`.
    Followers,
    /// Users `$1` follows.
    Following,
}

impl Direction {
    fn join(self) -> &'static str {
        match self {
            Direction::Followers => "JOIN follows f ON f.follower_id = u.id WHERE f.following_id = $1",
            Direction::Following => "JOIN follows f ON f.following_id = u.id WHERE f.follower_id = $1",
        }
    }
}

/// `$2` is the caller; `is_following` is relative to them.
const FOLLOW_USER_COLUMNS: &str = "SELECT u.id, u.username, u.email, u.bio, u.image, \
     EXISTS (SELECT 1 FROM follows mine WHERE mine.follower_id = $2 AND mine.following_id = u.id) \
     AS is_following FROM users u";

async fn list_follow_users(
    pool: &PgPool,
    direction: Direction,
    user_id: i32,
    caller: i32,
    page: PageQuery,
) -> Result<FollowList, AppError> {
    let page = page.resolve();

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM users u {}",
        direction.join()
    ))
    .bind(user_id)
    .fetch_one(pool)
    .await?;

    let users = sqlx::query_as::<_, FollowUser>(&format!(
        "{} {} ORDER BY f.created_at DESC LIMIT $3 OFFSET $4",
        FOLLOW_USER_COLUMNS,
        direction.join()
    ))
    .bind(user_id)
    .bind(caller)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(pool)
    .await?;

    Ok(FollowList {
        users,
        meta: page.meta(total),
    })
}

fn reject_self_follow(caller: i32, target: i32) -> Result<(), AppError> {
    if caller == target {
        log::warn!("User {} tried to follow themselves", caller);
        return Err(AppError::BadRequest("Cannot follow yourself".into()));
    }
    Ok(())
}

/// Follow a user
///
/// ## Responses:
/// - `201 Created`: `{ message, follow }`.
/// - `400 Bad Request`: the caller tried to follow themselves.
/// - `404 Not Found`: no such user.
/// - `409 Conflict`: already following.
#[post("/{user_id}")]
pub async fn follow_user(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let following_id = path.into_inner();
    reject_self_follow(user.0, following_id)?;

    ensure_user_exists(&pool, following_id)
        .await
        .map_err(|e| match e {
            AppError::NotFound(_) => AppError::NotFound("User to follow not found".into()),
            other => other,
        })?;

    let follow_id: Option<i32> = sqlx::query_scalar(
        "INSERT INTO follows (follower_id, following_id) VALUES ($1, $2) \
         ON CONFLICT (follower_id, following_id) DO NOTHING RETURNING id",
    )
    .bind(user.0)
    .bind(following_id)
    .fetch_optional(&**pool)
    .await?;
    let follow_id =
        follow_id.ok_or_else(|| AppError::Conflict("Already following this user".into()))?;

    let follow: Follow = sqlx::query_as::<_, FollowRow>(&format!("{} WHERE f.id = $1", FOLLOW_SELECT))
        .bind(follow_id)
        .fetch_one(&**pool)
        .await?
        .into();

    log::debug!("User {} followed {}", user.0, following_id);
    Ok(HttpResponse::Created().json(json!({
        "message": "Successfully followed user",
        "follow": follow,
    })))
}

#[delete("/{user_id}")]
pub async fn unfollow_user(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let removed = sqlx::query("DELETE FROM follows WHERE follower_id = $1 AND following_id = $2")
        .bind(user.0)
        .bind(path.into_inner())
        .execute(&**pool)
        .await?
        .rows_affected();
    if removed == 0 {
        return Err(AppError::NotFound("Follow relationship not found".into()));
    }
    Ok(HttpResponse::Ok().json(MessageResponse::new("Successfully unfollowed user")))
}

#[get("/followers/{user_id}")]
pub async fn followers(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_user_exists(&pool, user_id).await?;
    let list = list_follow_users(&pool, Direction::Followers, user_id, user.0, *query).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/following/{user_id}")]
pub async fn following(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_user_exists(&pool, user_id).await?;
    let list = list_follow_users(&pool, Direction::Following, user_id, user.0, *query).await?;
    Ok(HttpResponse::Ok().json(list))
}

#[get("/stats/{user_id}")]
pub async fn follow_stats(
    pool: web::Data<PgPool>,
    _user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let user_id = path.into_inner();
    ensure_user_exists(&pool, user_id).await?;

    let (followers_count, following_count): (i64, i64) = sqlx::query_as(
        "SELECT \
         (SELECT COUNT(*) FROM follows WHERE following_id = $1), \
         (SELECT COUNT(*) FROM follows WHERE follower_id = $1)",
    )
    .bind(user_id)
    .fetch_one(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(FollowStats {
        followers_count,
        following_count,
    }))
}

/// Whether the caller follows `user_id`.
#[get("/check/{user_id}")]
pub async fn check_follow(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
) -> Result<impl Responder, AppError> {
    let is_following: bool = sqlx::query_scalar(
        "SELECT EXISTS (SELECT 1 FROM follows WHERE follower_id = $1 AND following_id = $2)",
    )
    .bind(user.0)
    .bind(path.into_inner())
    .fetch_one(&**pool)
    .await?;
    Ok(HttpResponse::Ok().json(FollowCheck { is_following }))
}

/// Rows of `users u` that follow both placeholders.
fn mutual_condition(first: &str, second: &str) -> String {
    format!(
        "EXISTS (SELECT 1 FROM follows a WHERE a.follower_id = u.id AND a.following_id = {}) \
         AND EXISTS (SELECT 1 FROM follows b WHERE b.follower_id = u.id AND b.following_id = {})",
        first, second
    )
}

/// Users who follow both the caller and `user_id`.
#[get("/mutual/{user_id}")]
pub async fn mutual_followers(
    pool: web::Data<PgPool>,
    user: AuthenticatedUserId,
    path: web::Path<i32>,
    query: web::Query<PageQuery>,
) -> Result<impl Responder, AppError> {
    let other_id = path.into_inner();
    let found: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE id = ANY($1)")
        .bind(vec![user.0, other_id])
        .fetch_one(&**pool)
        .await?;
    let expected = if user.0 == other_id { 1 } else { 2 };
    if found < expected {
        return Err(AppError::NotFound("One or both users not found".into()));
    }

    let page = query.resolve();

    let total: i64 = sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM users u WHERE {}",
        mutual_condition("$1", "$2")
    ))
    .bind(user.0)
    .bind(other_id)
    .fetch_one(&**pool)
    .await?;

    let users = sqlx::query_as::<_, FollowUser>(&format!(
        "{} WHERE {} ORDER BY u.username LIMIT $4 OFFSET $5",
        FOLLOW_USER_COLUMNS,
        mutual_condition("$1", "$3")
    ))
    .bind(user.0)
    .bind(user.0)
    .bind(other_id)
    .bind(page.limit)
    .bind(page.offset())
    .fetch_all(&**pool)
    .await?;

    Ok(HttpResponse::Ok().json(FollowList {
        users,
        meta: page.meta(total),
    }))
}
