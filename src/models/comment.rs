use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::article::ArticleSummary;
use super::pagination::PageMeta;
use super::user::UserSummary;

pub const COMMENT_SELECT: &str = "SELECT c.id, c.body, c.created_at, c.updated_at, \
     u.id AS author_id, u.username AS author_username, u.email AS author_email, \
     u.bio AS author_bio, u.image AS author_image, \
     a.id AS article_id, a.title AS article_title, a.slug AS article_slug \
     FROM comments c \
     JOIN users u ON u.id = c.author_id \
     JOIN articles a ON a.id = c.article_id";

#[derive(Debug, FromRow)]
pub struct CommentRow {
    pub id: i32,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_id: i32,
    pub author_username: String,
    pub author_email: String,
    pub author_bio: Option<String>,
    pub author_image: Option<String>,
    pub article_id: i32,
    pub article_title: String,
    pub article_slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub id: i32,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: UserSummary,
    pub article: ArticleSummary,
}

impl From<CommentRow> for Comment {
    fn from(row: CommentRow) -> Self {
        Self {
            id: row.id,
            body: row.body,
            created_at: row.created_at,
            updated_at: row.updated_at,
            author: UserSummary {
                id: row.author_id,
                username: row.author_username,
                email: row.author_email,
                bio: row.author_bio,
                image: row.author_image,
            },
            article: ArticleSummary {
                id: row.article_id,
                title: row.article_title,
                slug: row.article_slug,
            },
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateCommentInput {
    pub article_id: i32,
    #[validate(length(min = 1, message = "Comment body cannot be empty"))]
    pub body: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateCommentInput {
    #[validate(length(min = 1, message = "Comment body cannot be empty"))]
    pub body: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentListQuery {
    pub article_id: Option<i32>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CommentList {
    pub comments: Vec<Comment>,
    #[serde(flatten)]
    pub meta: PageMeta,
}
