use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::article::{ArticleCounts, ArticleRow, ArticleSummary};
use super::pagination::{PageMeta, PageQuery, SortOrder};
use super::user::UserSummary;
use crate::error::AppError;

/// Width of the `tags.name` column.
pub const MAX_TAG_NAME_LEN: usize = 50;

lazy_static! {
    static ref NON_TAG_CHARS: Regex = Regex::new(r"[^a-z0-9\s-]").unwrap();
    static ref WHITESPACE_RUN: Regex = Regex::new(r"\s+").unwrap();
}

/// Canonical form of a tag name: lowercase, only `[a-z0-9]`, whitespace and
/// `-`, whitespace runs collapsed to one space, trimmed.
///
/// ```
/// use quillpost::models::tag::normalize_tag_name;
/// assert_eq!(normalize_tag_name("  Web-Dev!! "), "web-dev");
/// ```
pub fn normalize_tag_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let stripped = NON_TAG_CHARS.replace_all(&lowered, "");
    let collapsed = WHITESPACE_RUN.replace_all(&stripped, " ");
    collapsed.trim().to_string()
}

/// Normalizes a list of raw names, dropping empties and duplicates while
/// keeping first-seen order.
pub fn normalize_tag_names<S: AsRef<str>>(names: &[S]) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(names.len());
    for name in names {
        let name = normalize_tag_name(name.as_ref());
        if !name.is_empty() && !normalized.contains(&name) {
            normalized.push(name);
        }
    }
    normalized
}

/// `normalize_tag_names` for tags supplied with an article. A name still
/// longer than `MAX_TAG_NAME_LEN` after normalization is a `BadRequest`.
pub fn article_tag_names<S: AsRef<str>>(names: &[S]) -> Result<Vec<String>, AppError> {
    let normalized = normalize_tag_names(names);
    if let Some(long) = normalized
        .iter()
        .find(|name| name.chars().count() > MAX_TAG_NAME_LEN)
    {
        return Err(AppError::BadRequest(format!(
            "Tag \"{}\" is longer than {} characters",
            long, MAX_TAG_NAME_LEN
        )));
    }
    Ok(normalized)
}

/// A tag with the number of articles using it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    pub id: i32,
    pub name: String,
    pub article_count: i64,
}

#[derive(Debug, Deserialize, Validate)]
pub struct TagInput {
    #[validate(length(min = 1, max = 50, message = "Tag name must be 1 to 50 characters"))]
    pub name: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TagSortBy {
    #[default]
    Name,
    ArticleCount,
    CreatedAt,
}

impl TagSortBy {
    pub fn column(self) -> &'static str {
        match self {
            TagSortBy::Name => "t.name",
            TagSortBy::ArticleCount => "article_count",
            TagSortBy::CreatedAt => "t.created_at",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagQuery {
    pub search: Option<String>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub sort_by: Option<TagSortBy>,
    pub sort_order: Option<SortOrder>,
}

impl TagQuery {
    pub fn page_query(&self) -> PageQuery {
        PageQuery {
            page: self.page,
            limit: self.limit,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TagSearchQuery {
    pub q: String,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagList {
    pub tags: Vec<Tag>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagUsage {
    pub name: String,
    pub article_count: i64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagStats {
    pub total_tags: i64,
    pub most_used_tags: Vec<TagUsage>,
}

/// A published article as listed under a tag.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaggedArticle {
    #[serde(flatten)]
    pub article: ArticleSummary,
    pub description: Option<String>,
    pub author: UserSummary,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "_count")]
    pub count: ArticleCounts,
}

impl From<ArticleRow> for TaggedArticle {
    fn from(row: ArticleRow) -> Self {
        TaggedArticle {
            article: ArticleSummary {
                id: row.id,
                title: row.title,
                slug: row.slug,
            },
            description: row.description,
            author: UserSummary {
                id: row.author_id,
                username: row.author_username,
                email: row.author_email,
                bio: row.author_bio,
                image: row.author_image,
            },
            created_at: row.created_at,
            count: ArticleCounts {
                comments: row.comments_count,
                likes: row.likes_count,
            },
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagWithArticles {
    pub id: i32,
    pub name: String,
    pub articles: Vec<TaggedArticle>,
    #[serde(flatten)]
    pub meta: PageMeta,
}
