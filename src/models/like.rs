use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::article::ArticleSummary;
use super::pagination::PageMeta;
use super::user::UserSummary;

pub const LIKE_SELECT: &str = "SELECT l.id, l.created_at, \
     u.id AS user_id, u.username AS user_username, u.email AS user_email, \
     u.bio AS user_bio, u.image AS user_image, \
     a.id AS article_id, a.title AS article_title, a.slug AS article_slug \
     FROM likes l \
     JOIN users u ON u.id = l.user_id \
     JOIN articles a ON a.id = l.article_id";

#[derive(Debug, FromRow)]
pub struct LikeRow {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub user_id: i32,
    pub user_username: String,
    pub user_email: String,
    pub user_bio: Option<String>,
    pub user_image: Option<String>,
    pub article_id: i32,
    pub article_title: String,
    pub article_slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Like {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub user: UserSummary,
    pub article: ArticleSummary,
}

impl From<LikeRow> for Like {
    fn from(row: LikeRow) -> Self {
        Self {
            id: row.id,
            created_at: row.created_at,
            user: UserSummary {
                id: row.user_id,
                username: row.user_username,
                email: row.user_email,
                bio: row.user_bio,
                image: row.user_image,
            },
            article: ArticleSummary {
                id: row.article_id,
                title: row.article_title,
                slug: row.article_slug,
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLikeInput {
    pub article_id: i32,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LikeList {
    pub likes: Vec<Like>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

/// Result of flipping the caller's like on an article.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ToggleLikeResponse {
    pub message: String,
    pub is_liked: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikeStats {
    pub likes_count: i64,
    pub is_liked: bool,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikeCheck {
    pub is_liked: bool,
}
