//! Test fixtures for catalog content

use manga_counts::catalog::{NewChapter, NewGenre, NewNotification, NewSeries};
use manga_counts::types::{Chapter, NotificationKind, Page, Series, SeriesStatus};
use manga_counts::Catalog;

pub fn new_chapter(series_id: &str, number: f64) -> NewChapter {
    NewChapter {
        series_id: series_id.to_string(),
        chapter_number: number,
        title: Some(format!("Chapter {}", number)),
    }
}

pub fn new_genre(name: &str) -> NewGenre {
    NewGenre {
        name: name.to_string(),
        description: None,
    }
}

pub fn system_notification(user_id: &str) -> NewNotification {
    NewNotification {
        user_id: user_id.to_string(),
        kind: NotificationKind::System,
        title: "Maintenance".to_string(),
        message: "Reading may be slow tonight".to_string(),
        series_id: None,
        chapter_id: None,
        link: None,
    }
}

/// A completed series with one chapter per number.
pub fn series_with_chapters(
    catalog: &Catalog,
    title: &str,
    numbers: &[f64],
) -> (Series, Vec<Chapter>) {
    let mut input = NewSeries::new(title);
    input.status = SeriesStatus::Completed;
    let series = catalog.create_series(input).unwrap();
    let chapters = numbers
        .iter()
        .map(|&n| catalog.create_chapter(new_chapter(&series.id, n)).unwrap())
        .collect();
    (series, chapters)
}

/// A chapter of `series_id` with `pages` pages numbered from 1.
pub fn chapter_with_pages(
    catalog: &Catalog,
    series_id: &str,
    number: f64,
    pages: usize,
) -> (Chapter, Vec<Page>) {
    let storage: Vec<String> = (0..pages).map(|i| format!("blob-{}-{}", number, i)).collect();
    catalog
        .create_chapter_with_pages(new_chapter(series_id, number), &storage)
        .unwrap()
}

/// Bare series document, for writing straight into the store.
pub fn raw_series(i: usize, created_at: i64) -> Series {
    Series {
        id: format!("srs_raw_{:04}", i),
        created_at,
        title: format!("Imported {}", i),
        slug: format!("imported-{}", i),
        description: None,
        author: None,
        status: SeriesStatus::Ongoing,
        genres: vec![],
        updated_at: created_at,
        view_count: None,
    }
}
