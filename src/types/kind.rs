use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString};

/// The bound entity collections.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Display,
    EnumString,
    EnumIter,
    AsRefStr,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Series,
    Chapters,
    Pages,
    Users,
    Favorites,
    Genres,
    Notifications,
}

impl EntityKind {
    /// Collection name in the document store. Also the name of the kind's
    /// total counter.
    pub fn collection(self) -> &'static str {
        match self {
            EntityKind::Series => "series",
            EntityKind::Chapters => "chapters",
            EntityKind::Pages => "pages",
            EntityKind::Users => "users",
            EntityKind::Favorites => "favorites",
            EntityKind::Genres => "genres",
            EntityKind::Notifications => "notifications",
        }
    }

    /// Shards for the kind's total counter. Chapters and pages are written
    /// most often; genres almost never.
    pub fn default_shards(self) -> usize {
        match self {
            EntityKind::Chapters | EntityKind::Pages => 16,
            EntityKind::Genres => 2,
            EntityKind::Series
            | EntityKind::Users
            | EntityKind::Favorites
            | EntityKind::Notifications => 8,
        }
    }

    /// Prefix for generated document ids.
    pub fn id_prefix(self) -> &'static str {
        match self {
            EntityKind::Series => "srs",
            EntityKind::Chapters => "chp",
            EntityKind::Pages => "pg",
            EntityKind::Users => "usr",
            EntityKind::Favorites => "fav",
            EntityKind::Genres => "gnr",
            EntityKind::Notifications => "ntf",
        }
    }
}
