//! Filtered, sorted projection of the view for display.
//!
//! Pure functions only. Recompute on every store, overlay or filter change.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use super::data::{Anime, AnimeFields, AnimeStatus};
use super::overlay::ViewRow;

/// Search text plus status subset. An empty subset means "no status filter".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filter {
    pub search: String,
    pub statuses: BTreeSet<AnimeStatus>,
}

impl Filter {
    pub fn search(text: impl Into<String>) -> Self {
        Self {
            search: text.into(),
            statuses: BTreeSet::new(),
        }
    }

    pub fn with_statuses(mut self, statuses: impl IntoIterator<Item = AnimeStatus>) -> Self {
        self.statuses = statuses.into_iter().collect();
        self
    }

    /// Flip one status in or out of the subset
    pub fn toggle(&mut self, status: AnimeStatus) {
        if !self.statuses.remove(&status) {
            self.statuses.insert(status);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.search.is_empty() && self.statuses.is_empty()
    }

    pub fn matches(&self, fields: &AnimeFields) -> bool {
        let name_ok = self.search.is_empty()
            || fields
                .name
                .to_lowercase()
                .contains(&self.search.to_lowercase());
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&fields.status);
        name_ok && status_ok
    }
}

/// Anything that can be listed
pub trait Listed {
    fn fields(&self) -> &AnimeFields;
}

impl Listed for AnimeFields {
    fn fields(&self) -> &AnimeFields {
        self
    }
}

impl Listed for Anime {
    fn fields(&self) -> &AnimeFields {
        &self.fields
    }
}

impl Listed for ViewRow {
    fn fields(&self) -> &AnimeFields {
        &self.fields
    }
}

/// Case-folded name order, then raw text, so "bebop" and "Bebop" sit together
pub fn compare_names(a: &str, b: &str) -> Ordering {
    a.to_lowercase()
        .cmp(&b.to_lowercase())
        .then_with(|| a.cmp(b))
}

/// Score descending, then name ascending
pub fn compare(a: &AnimeFields, b: &AnimeFields) -> Ordering {
    b.score
        .cmp(&a.score)
        .then_with(|| compare_names(&a.name, &b.name))
}

/// Filter then stable-sort
pub fn project<'a, T: Listed>(items: &'a [T], filter: &Filter) -> Vec<&'a T> {
    let mut rows: Vec<&T> = items
        .iter()
        .filter(|item| filter.matches(item.fields()))
        .collect();
    // sort_by is stable: equal (score, name) keep their input order
    rows.sort_by(|a, b| compare(a.fields(), b.fields()));
    rows
}

/// What the list should show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Listing<T> {
    /// The collection itself is empty
    NoData,
    /// The filter removed everything
    NoResults,
    Rows(Vec<T>),
}

impl<T> Listing<T> {
    pub fn rows(&self) -> &[T] {
        match self {
            Listing::Rows(rows) => rows,
            _ => &[],
        }
    }
}

/// Project and tell "no data" apart from "no results"
pub fn listing<T: Listed + Clone>(items: &[T], filter: &Filter) -> Listing<T> {
    if items.is_empty() {
        return Listing::NoData;
    }
    let rows = project(items, filter);
    if rows.is_empty() {
        Listing::NoResults
    } else {
        Listing::Rows(rows.into_iter().cloned().collect())
    }
}
