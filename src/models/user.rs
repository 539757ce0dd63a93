use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

use super::pagination::PageMeta;

/// Columns selected for every public view of a user.
pub const USER_PROFILE_COLUMNS: &str =
    "id, email, username, bio, image, email_verified, created_at, updated_at";

/// A full `users` row, including the secrets that never leave the server.
#[derive(Debug, FromRow)]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub password_hash: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<UserRecord> for UserProfile {
    fn from(record: UserRecord) -> Self {
        Self {
            id: record.id,
            email: record.email,
            username: record.username,
            bio: record.bio,
            image: record.image,
            email_verified: record.email_verified,
            created_at: record.created_at,
            updated_at: record.updated_at,
        }
    }
}

/// A user as returned by the API.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: i32,
    pub email: String,
    pub username: String,
    pub bio: Option<String>,
    pub image: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The compact author/user block embedded in articles, comments, likes and follows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i32,
    pub username: String,
    pub email: String,
    pub bio: Option<String>,
    pub image: Option<String>,
}

/// Partial profile update; absent fields are left unchanged.
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateUserInput {
    #[validate(email)]
    pub email: Option<String>,
    #[validate(
        length(min = 3, max = 32),
        regex(
            path = "crate::auth::USERNAME_REGEX",
            message = "Username must be alphanumeric, underscores, or hyphens"
        )
    )]
    pub username: Option<String>,
    #[validate(length(min = 6, max = 128))]
    pub password: Option<String>,
    #[validate(length(max = 500))]
    pub bio: Option<String>,
    #[validate(url)]
    pub image: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordInput {
    #[validate(length(min = 1))]
    pub current_password: String,
    #[validate(length(min = 6, max = 128))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct VerifyPasswordInput {
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<UserProfile>,
    #[serde(flatten)]
    pub meta: PageMeta,
}

#[derive(Debug, Deserialize)]
pub struct UserSearchQuery {
    pub email: Option<String>,
    pub username: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    fn empty_update() -> UpdateUserInput {
        UpdateUserInput {
            email: None,
            username: None,
            password: None,
            bio: None,
            image: None,
        }
    }

    #[test]
    fn test_update_user_input_validation() {
        assert!(empty_update().validate().is_ok());

        let mut input = empty_update();
        input.email = Some("invalid-email".to_string());
        assert!(input.validate().is_err());

        let mut input = empty_update();
        input.username = Some("bad name!".to_string());
        assert!(input.validate().is_err());

        let mut input = empty_update();
        input.password = Some("short".to_string());
        assert!(input.validate().is_err());

        let mut input = empty_update();
        input.bio = Some("Writes about Rust.".to_string());
        input.image = Some("https://cdn.example.com/me.png".to_string());
        assert!(input.validate().is_ok());
    }

    #[test]
    fn test_profile_hides_secrets() {
        let now = Utc::now();
        let profile: UserProfile = UserRecord {
            id: 1,
            email: "writer@example.com".into(),
            username: "writer".into(),
            password_hash: "$2b$12$secret".into(),
            bio: None,
            image: None,
            email_verified: false,
            created_at: now,
            updated_at: now,
        }
        .into();

        let json = serde_json::to_string(&profile).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("emailVerified"));
    }
}
