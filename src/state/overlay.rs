//! Optimistic overlay of pending mutations
//!
//! Pending changes are kept as a log of tagged variants and folded over the
//! canonical collection whenever a view is needed. Canonical records are never
//! edited in place, so rolling a change back is just dropping its log entry.

use tracing::debug;

use super::data::{Anime, AnimeFields, AnimeId};
use crate::error::MutationError;

/// Identifies one locally issued mutation until it settles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ticket(u64);

impl Ticket {
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// A change shown immediately and confirmed later
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingMutation {
    /// New record without an id yet
    Create(AnimeFields),
    /// Full replacement of an existing record
    Update(Anime),
    Delete(AnimeId),
}

impl PendingMutation {
    /// The record this mutation targets, if it already has an id
    pub fn target(&self) -> Option<&AnimeId> {
        match self {
            PendingMutation::Create(_) => None,
            PendingMutation::Update(anime) => Some(&anime.id),
            PendingMutation::Delete(id) => Some(id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PendingMutation::Create(_) => "create",
            PendingMutation::Update(_) => "update",
            PendingMutation::Delete(_) => "delete",
        }
    }
}

/// Row identity in the derived view.
///
/// Drafts use their ticket as a temporary key until the backend assigns an id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RowKey {
    Stored(AnimeId),
    Draft(Ticket),
}

/// One row of the derived view
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub key: RowKey,
    pub fields: AnimeFields,
}

impl ViewRow {
    pub fn id(&self) -> Option<&AnimeId> {
        match &self.key {
            RowKey::Stored(id) => Some(id),
            RowKey::Draft(_) => None,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self.key, RowKey::Draft(_))
    }
}

impl From<&Anime> for ViewRow {
    fn from(anime: &Anime) -> Self {
        Self {
            key: RowKey::Stored(anime.id.clone()),
            fields: anime.fields.clone(),
        }
    }
}

/// Apply one mutation to a view
pub fn apply(rows: &mut Vec<ViewRow>, ticket: Ticket, mutation: &PendingMutation) {
    match mutation {
        PendingMutation::Delete(id) => {
            rows.retain(|row| row.id() != Some(id));
        }
        PendingMutation::Update(anime) => {
            // The update may target a record this window has not reloaded yet
            match rows.iter_mut().find(|row| row.id() == Some(&anime.id)) {
                Some(row) => row.fields = anime.fields.clone(),
                None => rows.push(ViewRow::from(anime)),
            }
        }
        PendingMutation::Create(fields) => {
            rows.push(ViewRow {
                key: RowKey::Draft(ticket),
                fields: fields.clone(),
            });
        }
    }
}

/// Log of in-flight mutations issued by one window
#[derive(Debug, Default)]
pub struct Overlay {
    next_ticket: u64,
    pending: Vec<(Ticket, PendingMutation)>,
}

impl Overlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mutation. At most one mutation per id may be in flight.
    pub fn push(&mut self, mutation: PendingMutation) -> Result<Ticket, MutationError> {
        if let Some(id) = mutation.target() {
            if self.is_pending(id) {
                return Err(MutationError::AlreadyPending(id.clone()));
            }
        }

        self.next_ticket += 1;
        let ticket = Ticket(self.next_ticket);
        debug!("Pending {} #{}", mutation.kind(), ticket.0);
        self.pending.push((ticket, mutation));
        Ok(ticket)
    }

    /// Drop a settled mutation from the log
    pub fn resolve(&mut self, ticket: Ticket) -> Option<PendingMutation> {
        let index = self.pending.iter().position(|(t, _)| *t == ticket)?;
        Some(self.pending.remove(index).1)
    }

    pub fn is_pending(&self, id: &AnimeId) -> bool {
        self.pending
            .iter()
            .any(|(_, mutation)| mutation.target() == Some(id))
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }

    /// Canonical collection with every pending mutation applied in issue order
    pub fn view(&self, canonical: &[Anime]) -> Vec<ViewRow> {
        let mut rows: Vec<ViewRow> = canonical.iter().map(ViewRow::from).collect();
        for (ticket, mutation) in &self.pending {
            apply(&mut rows, *ticket, mutation);
        }
        rows
    }
}
