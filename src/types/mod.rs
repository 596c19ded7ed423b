//! Entity documents and the kinds they belong to.

pub mod account;
pub mod content;
pub mod kind;

pub use account::{Favorite, Notification, NotificationKind, User};
pub use content::{slugify, Chapter, Genre, Page, Series, SeriesStatus};
pub use kind::EntityKind;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A document stored in one of the bound collections.
pub trait Entity: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    fn id(&self) -> &str;

    /// Creation time in milliseconds since the Unix epoch.
    fn created_at(&self) -> i64;
}

macro_rules! impl_entity {
    ($($ty:ty => $kind:ident),+ $(,)?) => {
        $(
            impl Entity for $ty {
                const KIND: EntityKind = EntityKind::$kind;

                fn id(&self) -> &str {
                    &self.id
                }

                fn created_at(&self) -> i64 {
                    self.created_at
                }
            }
        )+
    };
}

/// An entity carrying a denormalized copy of its view counter.
pub trait Viewed: Entity {
    fn view_count(&self) -> Option<i64>;
    fn set_view_count(&mut self, total: i64);
}

impl Viewed for Series {
    fn view_count(&self) -> Option<i64> {
        self.view_count
    }

    fn set_view_count(&mut self, total: i64) {
        self.view_count = Some(total);
    }
}

impl Viewed for Chapter {
    fn view_count(&self) -> Option<i64> {
        self.view_count
    }

    fn set_view_count(&mut self, total: i64) {
        self.view_count = Some(total);
    }
}

impl_entity!(
    Series => Series,
    Chapter => Chapters,
    Page => Pages,
    User => Users,
    Favorite => Favorites,
    Genre => Genres,
    Notification => Notifications,
);
