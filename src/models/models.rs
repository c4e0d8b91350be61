use serde::{Serialize, Deserialize};
use crate::config::PREVIEW_LENGTH;

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    /// Argon2 PHC string.
    pub password: String,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub birth_date: Option<String>,
    #[serde(default)]
    pub verified: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub content: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub likes: Vec<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default)]
    pub is_pinned: bool,
    #[serde(default)]
    pub is_edited: bool,
    #[serde(default)]
    pub view_count: u64,
    #[serde(default)]
    pub share_count: u64,
}

impl Post {
    pub fn like_count(&self) -> usize {
        self.likes.len()
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }

    /// First characters of the content, used in notification messages.
    pub fn preview(&self) -> String {
        if self.content.chars().count() > PREVIEW_LENGTH {
            let head: String = self.content.chars().take(PREVIEW_LENGTH).collect();
            format!("{}...", head)
        } else {
            self.content.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Follow {
    pub follower_id: String,
    pub following_id: String,
    pub created_at: String,
    #[serde(default = "default_true")]
    pub notifications_enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Follow,
    Reply,
    Mention,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Notification {
    pub id: String,
    pub recipient_id: String,
    pub actor_id: String,
    pub kind: NotificationKind,
    pub post_id: Option<String>,
    pub message: String,
    #[serde(default)]
    pub is_read: bool,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct HashTag {
    pub name: String,
    /// Newest first.
    #[serde(default)]
    pub post_ids: Vec<String>,
    pub created_at: String,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UserSession {
    pub key: String,
    pub user_id: String,
    pub created_at: String,
    pub last_activity: String,
    #[serde(default)]
    pub user_agent: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ApiKey {
    pub key: String,
    pub user_id: String,
    pub name: String,
    pub created_at: String,
    #[serde(default)]
    pub last_used: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

pub type Followings = Vec<String>;
pub type Followers = Vec<String>;
