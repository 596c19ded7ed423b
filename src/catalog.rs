//! Mutation handlers for the catalog.
//!
//! Every handler pairs its document writes with the matching counting calls
//! through [`CountingRegistry`]. Creates write the document and then count;
//! if counting fails the document is rolled back. Deletes remove the counting
//! state first, so a missing aggregate entry fails the mutation while the
//! document is still there for backfill to re-index.

use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::aggregate::Bounds;
use crate::bindings::{Counted, CountingRegistry};
use crate::clock::Clock;
use crate::error::{CountsError, CountsResult};
use crate::store::{
    from_document, get_typed, put_typed, scan_typed, to_document, DocumentStore, Mutation,
};
use crate::types::{
    slugify, Chapter, Entity, EntityKind, Favorite, Genre, Notification, NotificationKind, Page,
    Series, SeriesStatus, User, Viewed,
};

#[derive(Debug, Clone)]
pub struct NewSeries {
    pub title: String,
    pub description: Option<String>,
    pub author: Option<String>,
    pub status: SeriesStatus,
    pub genres: Vec<String>,
}

impl NewSeries {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: None,
            author: None,
            status: SeriesStatus::Ongoing,
            genres: Vec::new(),
        }
    }
}

/// Fields to change on a series. `None` leaves a field as it is.
#[derive(Debug, Clone, Default)]
pub struct SeriesUpdate {
    pub title: Option<String>,
    pub description: Option<String>,
    pub author: Option<String>,
    pub status: Option<SeriesStatus>,
    pub genres: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct NewChapter {
    pub series_id: String,
    pub chapter_number: f64,
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ChapterUpdate {
    pub chapter_number: Option<f64>,
    pub title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub chapter_id: String,
    pub page_number: u32,
    pub storage_id: String,
}

#[derive(Debug, Clone)]
pub struct NewGenre {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewNotification {
    pub user_id: String,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    pub series_id: Option<String>,
    pub chapter_id: Option<String>,
    pub link: Option<String>,
}

/// What a series delete removed along with the series.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SeriesDeletion {
    pub chapters: usize,
    pub pages: usize,
    pub favorites: usize,
}

pub struct Catalog {
    registry: Arc<CountingRegistry>,
    clock: Arc<dyn Clock>,
}

impl Catalog {
    pub fn new(registry: Arc<CountingRegistry>, clock: Arc<dyn Clock>) -> Self {
        Self { registry, clock }
    }

    pub fn registry(&self) -> &Arc<CountingRegistry> {
        &self.registry
    }

    fn store(&self) -> &dyn DocumentStore {
        self.registry.store().as_ref()
    }

    fn now(&self) -> i64 {
        self.clock.now_millis()
    }

    /// Read one document, `None` if it does not exist.
    pub fn find<T: Entity>(&self, id: &str) -> CountsResult<Option<T>> {
        get_typed(self.store(), T::KIND.collection(), id)
    }

    /// Read one document, `NotFound` if it does not exist.
    pub fn get<T: Entity>(&self, id: &str) -> CountsResult<T> {
        self.find(id)?
            .ok_or_else(|| CountsError::NotFound(format!("{} {}", T::KIND, id)))
    }

    /// Every document of `T` matching `pred`, ordered by id.
    pub fn list<T: Entity>(&self, pred: impl Fn(&T) -> bool) -> CountsResult<Vec<T>> {
        Ok(scan_typed::<T>(self.store(), T::KIND.collection())?
            .into_iter()
            .filter(|doc| pred(doc))
            .collect())
    }

    fn create<T: Counted>(&self, operation: &'static str, doc: T) -> CountsResult<T> {
        let collection = T::KIND.collection();
        let mut value = Some(to_document(&doc)?);
        self.store().update(collection, doc.id(), &mut |current| match current {
            Some(_) => Err(CountsError::AlreadyExists(format!("{} {}", T::KIND, doc.id()))),
            None => Ok(value.take().map(Mutation::Put).unwrap_or(Mutation::Keep)),
        })?;

        if let Err(e) = self.registry.on_insert(&doc) {
            self.registry
                .metrics()
                .record_drift(operation, doc.id(), &e.to_string());
            if let Err(rollback) = self.store().delete(collection, doc.id()) {
                error!(
                    operation = operation,
                    id = doc.id(),
                    error = %rollback,
                    "Failed to roll back document after counting failed"
                );
            }
            return Err(e);
        }

        info!(operation = operation, id = doc.id());
        Ok(doc)
    }

    fn update<T: Counted>(&self, operation: &'static str, old: &T, new: T) -> CountsResult<T> {
        let collection = T::KIND.collection();
        put_typed(self.store(), collection, new.id(), &new)?;

        if let Err(e) = self.registry.on_replace(old, &new) {
            self.registry
                .metrics()
                .record_drift(operation, new.id(), &e.to_string());
            if let Err(rollback) = put_typed(self.store(), collection, old.id(), old) {
                error!(
                    operation = operation,
                    id = old.id(),
                    error = %rollback,
                    "Failed to restore document after counting failed"
                );
            }
            return Err(e);
        }

        info!(operation = operation, id = new.id());
        Ok(new)
    }

    fn remove<T: Counted>(&self, operation: &'static str, doc: &T) -> CountsResult<()> {
        if let Err(e) = self.registry.on_delete(doc) {
            if e.is_drift() {
                self.registry
                    .metrics()
                    .record_drift(operation, doc.id(), &e.to_string());
            }
            return Err(e);
        }
        self.store().delete(T::KIND.collection(), doc.id())?;

        info!(operation = operation, id = doc.id());
        Ok(())
    }

    /// Slug for `title`, suffixed with the id's sequence number when another
    /// series already uses it.
    fn unique_slug(&self, title: &str, id: &str) -> CountsResult<String> {
        let base = slugify(title);
        let base = if base.is_empty() { id.to_string() } else { base };
        let taken = !self
            .list::<Series>(|s| s.slug == base && s.id != id)?
            .is_empty();
        if !taken {
            return Ok(base);
        }
        let suffix = id.rsplit('_').next().unwrap_or(id).trim_start_matches('0');
        Ok(format!("{}-{}", base, suffix))
    }

    fn check_genres(&self, genres: &[String]) -> CountsResult<()> {
        for genre in genres {
            self.get::<Genre>(genre)?;
        }
        Ok(())
    }

    pub fn create_series(&self, input: NewSeries) -> CountsResult<Series> {
        if input.title.trim().is_empty() {
            return Err(CountsError::InvalidArgument("series title cannot be empty".into()));
        }
        self.check_genres(&input.genres)?;

        let id = self.registry.next_id(EntityKind::Series)?;
        let now = self.now();
        let series = Series {
            slug: self.unique_slug(&input.title, &id)?,
            id,
            created_at: now,
            title: input.title,
            description: input.description,
            author: input.author,
            status: input.status,
            genres: input.genres,
            updated_at: now,
            view_count: None,
        };
        self.create("create_series", series)
    }

    pub fn update_series(&self, id: &str, update: SeriesUpdate) -> CountsResult<Series> {
        let old: Series = self.get(id)?;
        let mut new = old.clone();

        if let Some(title) = update.title {
            if title.trim().is_empty() {
                return Err(CountsError::InvalidArgument("series title cannot be empty".into()));
            }
            if title != old.title {
                new.slug = self.unique_slug(&title, id)?;
                new.title = title;
            }
        }
        if let Some(genres) = update.genres {
            self.check_genres(&genres)?;
            new.genres = genres;
        }
        if update.description.is_some() {
            new.description = update.description;
        }
        if update.author.is_some() {
            new.author = update.author;
        }
        if let Some(status) = update.status {
            new.status = status;
        }
        new.updated_at = self.now();

        self.update("update_series", &old, new)
    }

    /// Delete a series with its chapters, their pages and every favorite of
    /// it. View counters of the series and its chapters are reset.
    pub fn delete_series(&self, id: &str) -> CountsResult<SeriesDeletion> {
        let series: Series = self.get(id)?;
        let mut deletion = SeriesDeletion::default();

        let chapter_ids = self
            .registry
            .chapters_by_series()
            .index()
            .ids_in_range(id, &Bounds::all())?;
        for chapter_id in chapter_ids {
            if self.find::<Chapter>(&chapter_id)?.is_none() {
                warn!(
                    operation = "delete_series",
                    chapter_id = %chapter_id,
                    "Indexed chapter has no document, skipping"
                );
                continue;
            }
            deletion.pages += self.delete_chapter(&chapter_id)?;
            deletion.chapters += 1;
        }
        for favorite in self.list::<Favorite>(|f| f.series_id == id)? {
            self.remove("delete_series", &favorite)?;
            deletion.favorites += 1;
        }

        self.remove("delete_series", &series)?;
        self.registry.reset_views(id)?;

        info!(
            operation = "delete_series",
            id = id,
            chapters = deletion.chapters,
            pages = deletion.pages,
            favorites = deletion.favorites,
        );
        Ok(deletion)
    }

    fn check_chapter_number(&self, series_id: &str, number: f64) -> CountsResult<()> {
        if !number.is_finite() || number < 0.0 {
            return Err(CountsError::InvalidArgument(format!(
                "invalid chapter number {}",
                number
            )));
        }
        let existing = self
            .registry
            .chapters_by_series()
            .count(Some(series_id), &Bounds::exactly(number))?;
        if existing > 0 {
            return Err(CountsError::Conflict(format!(
                "Chapter {} already exists.",
                number
            )));
        }
        Ok(())
    }

    fn touch_series(&self, series_id: &str) -> CountsResult<()> {
        let now = self.now();
        self.store()
            .update(EntityKind::Series.collection(), series_id, &mut |current| {
                let Some(doc) = current else {
                    return Ok(Mutation::Keep);
                };
                let mut series: Series = from_document(doc)?;
                series.updated_at = now;
                Ok(Mutation::Put(to_document(&series)?))
            })?;
        Ok(())
    }

    pub fn create_chapter(&self, input: NewChapter) -> CountsResult<Chapter> {
        self.get::<Series>(&input.series_id)?;
        self.check_chapter_number(&input.series_id, input.chapter_number)?;

        let chapter = Chapter {
            id: self.registry.next_id(EntityKind::Chapters)?,
            created_at: self.now(),
            series_id: input.series_id,
            chapter_number: input.chapter_number,
            title: input.title,
            view_count: None,
        };
        let chapter = self.create("create_chapter", chapter)?;
        self.touch_series(&chapter.series_id)?;
        Ok(chapter)
    }

    /// Create a chapter and one page per storage id, numbered from 1.
    pub fn create_chapter_with_pages(
        &self,
        input: NewChapter,
        storage_ids: &[String],
    ) -> CountsResult<(Chapter, Vec<Page>)> {
        let chapter = self.create_chapter(input)?;
        let mut pages = Vec::with_capacity(storage_ids.len());
        for (i, storage_id) in storage_ids.iter().enumerate() {
            pages.push(self.add_page(NewPage {
                chapter_id: chapter.id.clone(),
                page_number: i as u32 + 1,
                storage_id: storage_id.clone(),
            })?);
        }
        Ok((chapter, pages))
    }

    /// Update a chapter. A new chapter number moves its entry in
    /// `chapters_by_series`.
    pub fn update_chapter(&self, id: &str, update: ChapterUpdate) -> CountsResult<Chapter> {
        let old: Chapter = self.get(id)?;
        let mut new = old.clone();

        if let Some(number) = update.chapter_number {
            if number != old.chapter_number {
                self.check_chapter_number(&old.series_id, number)?;
                new.chapter_number = number;
            }
        }
        if update.title.is_some() {
            new.title = update.title;
        }

        self.update("update_chapter", &old, new)
    }

    /// Delete a chapter and its pages. Returns the number of pages deleted.
    pub fn delete_chapter(&self, id: &str) -> CountsResult<usize> {
        let chapter: Chapter = self.get(id)?;

        let page_ids = self
            .registry
            .pages_by_chapter()
            .index()
            .ids_in_range(id, &Bounds::all())?;
        let mut deleted = 0;
        for page_id in page_ids {
            let Some(page) = self.find::<Page>(&page_id)? else {
                warn!(
                    operation = "delete_chapter",
                    page_id = %page_id,
                    "Indexed page has no document, skipping"
                );
                continue;
            };
            self.remove("delete_chapter", &page)?;
            deleted += 1;
        }
        self.remove("delete_chapter", &chapter)?;
        self.registry.reset_views(id)?;

        Ok(deleted)
    }

    pub fn add_page(&self, input: NewPage) -> CountsResult<Page> {
        self.get::<Chapter>(&input.chapter_id)?;
        if input.page_number == 0 {
            return Err(CountsError::InvalidArgument("page numbers start at 1".into()));
        }

        let page = Page {
            id: self.registry.next_id(EntityKind::Pages)?,
            created_at: self.now(),
            chapter_id: input.chapter_id,
            page_number: input.page_number,
            storage_id: input.storage_id,
        };
        self.create("add_page", page)
    }

    pub fn delete_page(&self, id: &str) -> CountsResult<()> {
        let page: Page = self.get(id)?;
        self.remove("delete_page", &page)
    }

    /// Renumber the given pages 1..=n in order. Returns how many pages got a
    /// new number.
    pub fn reorder_pages(&self, chapter_id: &str, page_ids: &[String]) -> CountsResult<usize> {
        self.get::<Chapter>(chapter_id)?;

        let mut pages = Vec::with_capacity(page_ids.len());
        for id in page_ids {
            let page: Page = self.get(id)?;
            if page.chapter_id != chapter_id {
                return Err(CountsError::InvalidArgument(format!(
                    "page {} does not belong to chapter {}",
                    id, chapter_id
                )));
            }
            pages.push(page);
        }

        let mut moved = 0;
        for (i, old) in pages.into_iter().enumerate() {
            let number = i as u32 + 1;
            if old.page_number == number {
                continue;
            }
            let mut new = old.clone();
            new.page_number = number;
            self.update("reorder_pages", &old, new)?;
            moved += 1;
        }
        Ok(moved)
    }

    /// Create the user for an identity-provider id if it does not exist yet.
    /// Returns the user and whether it was created.
    pub fn upsert_user(&self, clerk_user_id: &str) -> CountsResult<(User, bool)> {
        if clerk_user_id.is_empty() {
            return Err(CountsError::InvalidArgument("clerk user id cannot be empty".into()));
        }
        let id = User::id_for(clerk_user_id);
        if let Some(user) = self.find::<User>(&id)? {
            return Ok((user, false));
        }

        let user = User {
            id,
            created_at: self.now(),
            clerk_user_id: clerk_user_id.to_string(),
        };
        match self.create("upsert_user", user) {
            Ok(user) => Ok((user, true)),
            // Lost a race with another upsert of the same user.
            Err(CountsError::AlreadyExists(_)) => Ok((self.get(&User::id_for(clerk_user_id))?, false)),
            Err(e) => Err(e),
        }
    }

    /// Returns whether a user was deleted.
    pub fn delete_user(&self, clerk_user_id: &str) -> CountsResult<bool> {
        let Some(user) = self.find::<User>(&User::id_for(clerk_user_id))? else {
            return Ok(false);
        };
        self.remove("delete_user", &user)?;
        Ok(true)
    }

    /// Favorite the series, or unfavorite it if it already is. Returns
    /// whether the series is now a favorite.
    pub fn toggle_favorite(&self, user_id: &str, series_id: &str) -> CountsResult<bool> {
        self.get::<User>(user_id)?;
        self.get::<Series>(series_id)?;

        let id = Favorite::id_for(user_id, series_id);
        if let Some(existing) = self.find::<Favorite>(&id)? {
            self.remove("toggle_favorite", &existing)?;
            return Ok(false);
        }

        let favorite = Favorite {
            id,
            created_at: self.now(),
            user_id: user_id.to_string(),
            series_id: series_id.to_string(),
        };
        self.create("toggle_favorite", favorite)?;
        Ok(true)
    }

    pub fn create_genre(&self, input: NewGenre) -> CountsResult<Genre> {
        let slug = slugify(&input.name);
        if slug.is_empty() {
            return Err(CountsError::InvalidArgument(format!(
                "invalid genre name '{}'",
                input.name
            )));
        }
        if !self.list::<Genre>(|g| g.slug == slug)?.is_empty() {
            return Err(CountsError::Conflict(format!("genre {} already exists", slug)));
        }

        let genre = Genre {
            id: self.registry.next_id(EntityKind::Genres)?,
            created_at: self.now(),
            name: input.name,
            slug,
            description: input.description,
        };
        self.create("create_genre", genre)
    }

    /// Delete a genre no series uses.
    pub fn delete_genre(&self, id: &str) -> CountsResult<()> {
        let genre: Genre = self.get(id)?;
        let using = self.list::<Series>(|s| s.genres.iter().any(|g| g == id))?;
        if !using.is_empty() {
            return Err(CountsError::Conflict(format!(
                "Cannot delete genre: {} series are using it",
                using.len()
            )));
        }
        self.remove("delete_genre", &genre)
    }

    pub fn create_notification(&self, input: NewNotification) -> CountsResult<Notification> {
        self.get::<User>(&input.user_id)?;

        let notification = Notification {
            id: self.registry.next_id(EntityKind::Notifications)?,
            created_at: self.now(),
            user_id: input.user_id,
            kind: input.kind,
            title: input.title,
            message: input.message,
            series_id: input.series_id,
            chapter_id: input.chapter_id,
            is_read: false,
            link: input.link,
        };
        self.create("create_notification", notification)
    }

    pub fn delete_notification(&self, id: &str) -> CountsResult<()> {
        let notification: Notification = self.get(id)?;
        self.remove("delete_notification", &notification)
    }

    /// Count a view of the series and refresh its `view_count`. Returns the
    /// new total.
    pub fn record_series_view(&self, id: &str) -> CountsResult<i64> {
        self.record_view::<Series>(id)
    }

    pub fn record_chapter_view(&self, id: &str) -> CountsResult<i64> {
        self.record_view::<Chapter>(id)
    }

    fn record_view<T: Viewed>(&self, id: &str) -> CountsResult<i64> {
        self.get::<T>(id)?;
        let total = self.registry.record_view(id)?;
        self.registry.write_view_count::<T>(id, total)?;
        Ok(total)
    }
}
