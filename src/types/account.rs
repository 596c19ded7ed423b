use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub created_at: i64,
    pub clerk_user_id: String,
}

impl User {
    /// Users are keyed by their identity-provider id.
    pub fn id_for(clerk_user_id: &str) -> String {
        format!("usr_{}", clerk_user_id)
    }
}

/// A user bookmarking a series. The id is derived from the pair, so a user
/// can favorite a series at most once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Favorite {
    pub id: String,
    pub created_at: i64,
    pub user_id: String,
    pub series_id: String,
}

impl Favorite {
    pub fn id_for(user_id: &str, series_id: &str) -> String {
        format!("fav_{}_{}", user_id, series_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewChapter,
    SeriesUpdate,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    pub created_at: i64,
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub series_id: Option<String>,
    #[serde(default)]
    pub chapter_id: Option<String>,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub link: Option<String>,
}
