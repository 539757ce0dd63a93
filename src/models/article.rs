use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::pagination::{PageMeta, PageQuery, SortOrder};
use super::user::UserSummary;

/// Article columns plus the embedded author and the comment/like counts.
/// Callers append `WHERE`/`ORDER BY`/`LIMIT`.
pub const ARTICLE_SELECT: &str = "SELECT a.id, a.title, a.slug, a.description, a.body, a.published, \
     a.created_at, a.updated_at, \
     u.id AS author_id, u.username AS author_username, u.email AS author_email, \
     u.bio AS author_bio, u.image AS author_image, \
     (SELECT COUNT(*) FROM comments c WHERE c.article_id = a.id) AS comments_count, \
     (SELECT COUNT(*) FROM likes l WHERE l.article_id = a.id) AS likes_count \
     FROM articles a JOIN users u ON u.id = a.author_id";

#[derive(Debug, FromRow)]
pub struct ArticleRow {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub body: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author_id: i32,
    pub author_username: String,
    pub author_email: String,
    pub author_bio: Option<String>,
    pub author_image: Option<String>,
    pub comments_count: i64,
    pub likes_count: i64,
}

/// `{ id, name }` as embedded in an article.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
pub struct TagRef {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleCounts {
    pub comments: i64,
    pub likes: i64,
}

/// `{ id, title, slug }` as embedded in comments and likes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArticleSummary {
    pub id: i32,
    pub title: String,
    pub slug: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Article {
    pub id: i32,
    pub title: String,
    pub slug: String,
    pub description: Option<String>,
    pub body: String,
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub author: UserSummary,
    pub tags: Vec<TagRef>,
    #[serde(rename = "_count")]
    pub count: ArticleCounts,
    pub is_liked: bool,
}

impl Article {
    pub fn from_row(row: ArticleRow, tags: Vec<TagRef>, is_liked: bool) -> Self {
        Self {
            id: row.id,
            title: row.title,
            slug: row.slug,
            description: row.description,
            body: row.body,
            published: row.published,
            created_at: row.created_at,
            updated_at: row.updated_at,
            author: UserSummary {
                id: row.author_id,
                username: row.author_username,
                email: row.author_email,
                bio: row.author_bio,
                image: row.author_image,
            },
            tags,
            count: ArticleCounts {
                comments: row.comments_count,
                likes: row.likes_count,
            },
            is_liked,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateArticleInput {
    #[validate(length(min = 1, max = 255, message = "Title cannot be empty"))]
    pub title: String,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "Body cannot be empty"))]
    pub body: String,
    pub published: Option<bool>,
    pub tags: Option<Vec<String>>,
}

/// Partial update. `tags`, when present, replaces the article's tag set.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateArticleInput {
    #[validate(length(min = 1, max = 255, message = "Title cannot be empty"))]
    pub title: Option<String>,
    pub description: Option<String>,
    #[validate(length(min = 1, message = "Body cannot be empty"))]
    pub body: Option<String>,
    pub published: Option<bool>,
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArticleSortBy {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
}

impl ArticleSortBy {
    pub fn column(self) -> &'static str {
        match self {
            ArticleSortBy::CreatedAt => "a.created_at",
            ArticleSortBy::UpdatedAt => "a.updated_at",
            ArticleSortBy::Title => "a.title",
        }
    }
}

/// Filters for `GET /articles`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleQuery {
    /// Case-insensitive match on title, description or body.
    pub search: Option<String>,
    /// Case-insensitive match on the author's username.
    pub author: Option<String>,
    /// Case-insensitive match on any tag name.
    pub tag: Option<String>,
    pub published: Option<bool>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<ArticleSortBy>,
    pub sort_order: Option<SortOrder>,
}

impl ArticleQuery {
    pub fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ArticleList {
    pub articles: Vec<Article>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArticleStats {
    pub total_articles: i64,
    pub published_articles: i64,
    pub draft_articles: i64,
}
