pub mod article;
pub mod comment;
pub mod follow;
pub mod like;
pub mod pagination;
pub mod tag;
pub mod upload;
pub mod user;

pub use article::{Article, ArticleList, ArticleQuery, CreateArticleInput, UpdateArticleInput};
pub use comment::{Comment, CommentList, CreateCommentInput, UpdateCommentInput};
pub use follow::{FollowList, FollowStats, FollowUser};
pub use like::{Like, LikeList, ToggleLikeResponse};
pub use pagination::{Page, PageMeta, PageQuery};
pub use tag::{normalize_tag_name, Tag, TagInput};
pub use upload::Upload;
pub use user::{UserProfile, UserRecord, UserSummary};

use serde::{Deserialize, Serialize};

/// `{ "message": ... }` body used by deletes and other acknowledgements.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
