//! Canonical, last-confirmed collection of records for one window.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::data::{Anime, AnimeId};
use crate::error::{GatewayError, LoadError};
use crate::gateway::Gateway;

/// The Entity Store holds only records the backend has confirmed.
///
/// Every record has an id, and ids are unique. Order follows the backend's
/// list order; confirmed creates are appended.
#[derive(Debug, Default)]
pub struct EntityStore {
    entries: Vec<Anime>,
    loading: bool,
    error: Option<LoadError>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the collection from the gateway's list operation.
    ///
    /// On failure the previous collection is kept and the error flag is set.
    pub async fn load(&mut self, gateway: &dyn Gateway) -> Result<(), LoadError> {
        self.begin_load();
        let result = gateway.list().await;
        self.finish_load(result)
    }

    /// Mark a reload as in flight
    pub fn begin_load(&mut self) {
        self.loading = true;
    }

    /// Apply the result of a list call
    pub fn finish_load(&mut self, result: Result<Vec<Anime>, GatewayError>) -> Result<(), LoadError> {
        self.loading = false;
        match result {
            Ok(entries) => {
                self.replace_all(entries);
                self.error = None;
                Ok(())
            }
            Err(err) => {
                let err = LoadError(err);
                warn!("Catalog load failed, keeping {} records: {}", self.entries.len(), err);
                self.error = Some(err.clone());
                Err(err)
            }
        }
    }

    fn replace_all(&mut self, entries: Vec<Anime>) {
        // Last occurrence wins if the backend ever repeats an id
        let mut seen = HashSet::new();
        let mut unique: Vec<Anime> = entries
            .into_iter()
            .rev()
            .filter(|anime| seen.insert(anime.id.clone()))
            .collect();
        unique.reverse();

        debug!("Store replaced with {} records", unique.len());
        self.entries = unique;
    }

    /// Insert if absent, replace in place if present
    pub fn apply_confirmed(&mut self, anime: Anime) {
        match self.position(&anime.id) {
            Some(index) => self.entries[index] = anime,
            None => self.entries.push(anime),
        }
    }

    /// Remove by id, returning the removed record
    pub fn remove_confirmed(&mut self, id: &AnimeId) -> Option<Anime> {
        self.position(id).map(|index| self.entries.remove(index))
    }

    pub fn get(&self, id: &AnimeId) -> Option<&Anime> {
        self.entries.iter().find(|anime| &anime.id == id)
    }

    pub fn entities(&self) -> &[Anime] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Set after the last load failed, cleared by the next successful one
    pub fn error(&self) -> Option<&LoadError> {
        self.error.as_ref()
    }

    fn position(&self, id: &AnimeId) -> Option<usize> {
        self.entries.iter().position(|anime| &anime.id == id)
    }
}
