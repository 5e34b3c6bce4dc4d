//! Per-window session
//!
//! A window owns exactly one Entity Store, Optimistic Overlay, notifier
//! subscription and image slot. Nothing here is shared between windows; the
//! backend is reached only through the gateway, and other windows learn about
//! changes only through the notifier.
//!
//! Backend work is split in two halves so several calls can be in flight at
//! once without borrowing the session:
//!
//! 1. `submit` / `refresh` record intent and return a request that owns what it needs
//! 2. `settle` / `apply_refresh` fold the result back in, or do nothing if the
//!    window was closed meanwhile

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{Config, ScoreScale};
use crate::error::{GatewayError, ImportError, LoadError, MutationError, TransferError};
use crate::gateway::Gateway;
use crate::images::{ImageCache, ImageKey, ImageState};
use crate::notify::{Change, Notifier, Subscription, WindowId};
use crate::state::data::{Anime, AnimeFields, AnimeId, AnimeStatus};
use crate::state::overlay::{Overlay, PendingMutation, Ticket, ViewRow};
use crate::state::projection::{self, Filter, Listing};
use crate::state::store::EntityStore;
use crate::transfer::{self, ImportReport};

/// Everything a window needs, passed in explicitly at construction
pub struct WindowContext {
    pub window: WindowId,
    pub gateway: Arc<dyn Gateway>,
    pub notifier: Notifier,
    pub config: Config,
}

/// What the backend confirmed for a mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confirmed {
    /// Authoritative record after a create or update
    Saved(Anime),
    /// `existed` is false if the record was already gone
    Deleted { id: AnimeId, existed: bool },
}

impl Confirmed {
    pub fn id(&self) -> &AnimeId {
        match self {
            Confirmed::Saved(anime) => &anime.id,
            Confirmed::Deleted { id, .. } => id,
        }
    }

    pub fn anime(&self) -> Option<&Anime> {
        match self {
            Confirmed::Saved(anime) => Some(anime),
            Confirmed::Deleted { .. } => None,
        }
    }
}

/// A submitted mutation on its way to the backend
pub struct MutationRequest {
    ticket: Ticket,
    mutation: PendingMutation,
    gateway: Arc<dyn Gateway>,
}

impl MutationRequest {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    pub async fn run(self) -> MutationOutcome {
        let gateway = self.gateway;
        let result = match self.mutation {
            PendingMutation::Create(fields) => gateway.create(fields).await.map(Confirmed::Saved),
            PendingMutation::Update(anime) => gateway.update(anime).await.map(Confirmed::Saved),
            PendingMutation::Delete(id) => {
                let removed = gateway.delete(&id).await;
                removed.map(|existed| Confirmed::Deleted { id, existed })
            }
        };

        MutationOutcome {
            ticket: self.ticket,
            result,
        }
    }
}

pub struct MutationOutcome {
    ticket: Ticket,
    result: Result<Confirmed, GatewayError>,
}

impl MutationOutcome {
    pub fn ticket(&self) -> Ticket {
        self.ticket
    }
}

/// What a refresh brought back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refreshed {
    /// `None` means the record no longer exists
    Entity { id: AnimeId, record: Option<Anime> },
    Collection(Vec<Anime>),
}

/// Refetch triggered by a change notification
pub struct RefreshRequest {
    change: Change,
    gateway: Arc<dyn Gateway>,
}

impl RefreshRequest {
    pub fn change(&self) -> &Change {
        &self.change
    }

    pub async fn run(self) -> RefreshOutcome {
        let result = match &self.change {
            Change::Entity(id) => {
                let record = self.gateway.get(id).await;
                record.map(|record| Refreshed::Entity {
                    id: id.clone(),
                    record,
                })
            }
            Change::Collection => self.gateway.list().await.map(Refreshed::Collection),
        };
        RefreshOutcome { result }
    }
}

pub struct RefreshOutcome {
    result: Result<Refreshed, GatewayError>,
}

/// One window's view of the catalog
pub struct Session {
    window: WindowId,
    gateway: Arc<dyn Gateway>,
    notifier: Notifier,
    scale: ScoreScale,
    store: EntityStore,
    overlay: Overlay,
    filter: Filter,
    subscription: Subscription,
    images: ImageCache,
    closed: bool,
}

impl Session {
    /// Subscribe to the change channel and start with an empty store.
    /// Call [`Session::load`] to fill it.
    pub fn open(ctx: WindowContext) -> Self {
        let subscription = ctx.notifier.subscribe(&ctx.window);
        let images = ImageCache::new(ctx.gateway.clone(), ctx.config.images.recent_capacity);
        info!("Window {} opened", ctx.window.label());

        Self {
            window: ctx.window,
            gateway: ctx.gateway,
            notifier: ctx.notifier,
            scale: ctx.config.score_scale(),
            store: EntityStore::new(),
            overlay: Overlay::new(),
            filter: Filter::default(),
            subscription,
            images,
            closed: false,
        }
    }

    pub fn window(&self) -> &WindowId {
        &self.window
    }

    pub fn score_scale(&self) -> ScoreScale {
        self.scale
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    // =========================================================================
    // Canonical state
    // =========================================================================

    /// Full reload from the backend
    pub async fn load(&mut self) -> Result<(), LoadError> {
        if self.closed {
            debug!("Window {} closed, skipping load", self.window.label());
            return Ok(());
        }
        self.store.load(self.gateway.as_ref()).await
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn get(&self, id: &AnimeId) -> Option<&Anime> {
        self.store.get(id)
    }

    /// Record for an edit form: the local copy, else a backend fetch
    pub async fn hydrate(&mut self, id: &AnimeId) -> Result<Option<Anime>, LoadError> {
        if let Some(anime) = self.store.get(id) {
            return Ok(Some(anime.clone()));
        }

        let record = self.gateway.get(id).await?;
        if let Some(anime) = &record {
            if !self.closed {
                self.store.apply_confirmed(anime.clone());
            }
        }
        Ok(record)
    }

    // =========================================================================
    // Optimistic mutations
    // =========================================================================

    /// Show a change immediately and hand back the backend call to run
    pub fn submit(&mut self, mutation: PendingMutation) -> Result<MutationRequest, MutationError> {
        if self.closed {
            return Err(MutationError::WindowClosed);
        }

        let score = match &mutation {
            PendingMutation::Create(fields) => Some(fields.score),
            PendingMutation::Update(anime) => Some(anime.fields.score),
            PendingMutation::Delete(_) => None,
        };
        if let Some(score) = score.filter(|score| !self.scale.contains(*score)) {
            return Err(MutationError::ScoreOutOfRange {
                score,
                max: self.scale.max(),
            });
        }

        let ticket = self.overlay.push(mutation.clone())?;
        Ok(MutationRequest {
            ticket,
            mutation,
            gateway: self.gateway.clone(),
        })
    }

    /// Fold a finished mutation back in.
    ///
    /// Success merges the authoritative record and tells other windows.
    /// Failure drops the optimistic change and reloads everything, since a
    /// failed write says nothing reliable about what the backend holds.
    pub async fn settle(&mut self, outcome: MutationOutcome) -> Result<Confirmed, MutationError> {
        if self.closed {
            debug!(
                "Window {} closed, ignoring result of #{}",
                self.window.label(),
                outcome.ticket.value()
            );
            return Err(MutationError::WindowClosed);
        }

        if self.overlay.resolve(outcome.ticket).is_none() {
            debug!("Mutation #{} was no longer pending", outcome.ticket.value());
        }

        match outcome.result {
            Ok(confirmed) => {
                match &confirmed {
                    Confirmed::Saved(anime) => {
                        self.images.invalidate(&ImageKey::Entity(anime.id.clone()));
                        self.store.apply_confirmed(anime.clone());
                    }
                    Confirmed::Deleted { id, .. } => {
                        self.images.invalidate(&ImageKey::Entity(id.clone()));
                        self.store.remove_confirmed(id);
                    }
                }
                self.notifier
                    .publish(&self.window, Change::Entity(confirmed.id().clone()));
                Ok(confirmed)
            }
            Err(err) => {
                warn!(
                    "Mutation #{} failed, reloading: {}",
                    outcome.ticket.value(),
                    err
                );
                if let Err(load_err) = self.load().await {
                    warn!("Reload after failed mutation also failed: {}", load_err);
                }
                Err(MutationError::Gateway(err))
            }
        }
    }

    async fn mutate(&mut self, mutation: PendingMutation) -> Result<Confirmed, MutationError> {
        let request = self.submit(mutation)?;
        let outcome = request.run().await;
        self.settle(outcome).await
    }

    pub async fn create(&mut self, fields: AnimeFields) -> Result<Confirmed, MutationError> {
        self.mutate(PendingMutation::Create(fields)).await
    }

    pub async fn update(&mut self, anime: Anime) -> Result<Confirmed, MutationError> {
        self.mutate(PendingMutation::Update(anime)).await
    }

    pub async fn delete(&mut self, id: AnimeId) -> Result<Confirmed, MutationError> {
        self.mutate(PendingMutation::Delete(id)).await
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    // =========================================================================
    // Derived view and projection
    // =========================================================================

    /// Canonical state with every in-flight mutation applied
    pub fn view(&self) -> Vec<ViewRow> {
        self.overlay.view(self.store.entities())
    }

    pub fn listing(&self) -> Listing<ViewRow> {
        projection::listing(&self.view(), &self.filter)
    }

    /// Rows to render, filtered and sorted
    pub fn visible(&self) -> Vec<ViewRow> {
        self.listing().rows().to_vec()
    }

    pub fn filter(&self) -> &Filter {
        &self.filter
    }

    pub fn set_search(&mut self, text: impl Into<String>) {
        self.filter.search = text.into();
    }

    pub fn set_statuses(&mut self, statuses: impl IntoIterator<Item = AnimeStatus>) {
        self.filter.statuses = statuses.into_iter().collect::<BTreeSet<_>>();
    }

    pub fn toggle_status(&mut self, status: AnimeStatus) {
        self.filter.toggle(status);
    }

    // =========================================================================
    // Cross-window changes
    // =========================================================================

    /// Wait for another window to announce a change
    pub async fn next_change(&mut self) -> Option<Change> {
        self.subscription.recv().await
    }

    pub fn refresh(&self, change: Change) -> RefreshRequest {
        RefreshRequest {
            change,
            gateway: self.gateway.clone(),
        }
    }

    /// Merge a refetch. A no-op once the window is closed.
    pub fn apply_refresh(&mut self, outcome: RefreshOutcome) -> Result<(), LoadError> {
        if self.closed {
            debug!("Window {} closed, dropping refresh", self.window.label());
            return Ok(());
        }

        match outcome.result {
            Ok(Refreshed::Entity { id, record }) => {
                self.images.invalidate(&ImageKey::Entity(id.clone()));
                match record {
                    Some(anime) => self.store.apply_confirmed(anime),
                    None => {
                        debug!("{} is gone on the backend, removing", id);
                        self.store.remove_confirmed(&id);
                    }
                }
                Ok(())
            }
            Ok(Refreshed::Collection(entities)) => self.store.finish_load(Ok(entities)),
            Err(err) => {
                warn!("Refresh failed, keeping local data: {}", err);
                Err(LoadError(err))
            }
        }
    }

    pub async fn handle_change(&mut self, change: Change) -> Result<(), LoadError> {
        let outcome = self.refresh(change).run().await;
        self.apply_refresh(outcome)
    }

    /// Apply every change already delivered, without waiting for more.
    ///
    /// Returns how many were applied; the last failure, if any, is returned
    /// after the rest have been processed.
    pub async fn sync_changes(&mut self) -> Result<usize, LoadError> {
        let mut applied = 0;
        let mut failure = None;
        while let Some(change) = self.subscription.try_recv() {
            match self.handle_change(change).await {
                Ok(()) => applied += 1,
                Err(err) => failure = Some(err),
            }
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(applied),
        }
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscription.is_active()
    }

    // =========================================================================
    // Images
    // =========================================================================

    pub fn images(&self) -> &ImageCache {
        &self.images
    }

    /// Load the poster for a record, or for a bare link while creating one
    pub async fn show_poster(&mut self, id: Option<&AnimeId>, link: &str) -> &ImageState {
        let key = ImageKey::for_record(id, link);
        self.images.load(key).await
    }

    // =========================================================================
    // Export / import
    // =========================================================================

    /// Pretty JSON of the backend's current collection
    pub async fn export(&self) -> Result<String, TransferError> {
        let entities = self.gateway.list().await.map_err(LoadError::from)?;
        Ok(transfer::export_document(&entities)?)
    }

    /// Create one record per document entry.
    ///
    /// A malformed document is rejected before anything is written. After
    /// that each record is an independent create; failures are counted, not
    /// fatal.
    pub async fn import(&mut self, document: &str) -> Result<ImportReport, ImportError> {
        if self.closed {
            return Err(ImportError::WindowClosed);
        }
        let records = transfer::parse_document(document)?;
        let mut report = ImportReport::new(records.len());

        for (index, fields) in records.into_iter().enumerate() {
            if !self.scale.contains(fields.score) {
                let err = MutationError::ScoreOutOfRange {
                    score: fields.score,
                    max: self.scale.max(),
                };
                report.record_failure(index, &fields.name, err.to_string());
                continue;
            }

            let name = fields.name.clone();
            match self.gateway.create(fields).await {
                Ok(anime) => {
                    self.store.apply_confirmed(anime);
                    report.record_success();
                }
                Err(err) => {
                    warn!("Import of record {} ({}) failed: {}", index, name, err);
                    report.record_failure(index, &name, err.to_string());
                }
            }
        }

        if report.imported > 0 {
            self.notifier.publish(&self.window, Change::Collection);
        }
        info!("Import finished: {}", report);
        Ok(report)
    }

    // =========================================================================
    // Teardown
    // =========================================================================

    /// Release the subscription and the image handle. Results of calls still
    /// in flight are ignored from now on.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.subscription.unsubscribe();
        self.images.close();
        self.overlay.clear();
        info!("Window {} closed", self.window.label());
    }
}
