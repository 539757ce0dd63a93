use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::pagination::PageMeta;
use super::user::UserSummary;

pub const FOLLOW_SELECT: &str = "SELECT f.id, f.created_at, \
     fr.id AS follower_id, fr.username AS follower_username, fr.email AS follower_email, \
     fr.bio AS follower_bio, fr.image AS follower_image, \
     fg.id AS following_id, fg.username AS following_username, fg.email AS following_email, \
     fg.bio AS following_bio, fg.image AS following_image \
     FROM follows f \
     JOIN users fr ON fr.id = f.follower_id \
     JOIN users fg ON fg.id = f.following_id";

#[derive(Debug, FromRow)]
pub struct FollowRow {
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub follower_id: i32,
    pub follower_username: String,
    pub follower_email: String,
    pub follower_bio: Option<String>,
    pub follower_image: Option<String>,
    pub following_id: i32,
    pub following_username: String,
    pub following_email: String,
    pub following_bio: Option<String>,
    pub following_image: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Follow {
    pub id: i32,
    pub follower: UserSummary,
    pub following: UserSummary,
    pub created_at: DateTime<Utc>,
}

impl From<FollowRow> for Follow {
    fn from(row: FollowRow) -> Self {
        Self {
            id: row.id,
            follower: UserSummary {
                id: row.follower_id,
                username: row.follower_username,
                email: row.follower_email,
                bio: row.follower_bio,
                image: row.follower_image,
            },
            following: UserSummary {
                id: row.following_id,
                username: row.following_username,
                email: row.following_email,
                bio: row.following_bio,
                image: row.following_image,
            },
            created_at: row.created_at,
        }
    }
}

/// A user in a follower/following list, with whether the caller follows them.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowUser {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub is_following: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct FollowList {
    pub users: Vec<FollowUser>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowStats {
    pub followers_count: i64,
    pub following_count: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowCheck {
    pub is_following: bool,
}
