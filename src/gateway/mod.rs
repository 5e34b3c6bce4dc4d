//! Backend gateway
//!
//! The request/response boundary to wherever records are persisted. The core
//! only ever talks to the backend through this trait.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::state::data::{Anime, AnimeFields, AnimeId, ImagePayload};

pub mod library;
pub mod poster;

#[cfg(test)]
pub mod testing;

pub use library::Library;
pub use poster::{HttpPosterSource, PosterSource};

/// All calls are fallible and may suspend for network/IPC latency.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Persist a new record; the backend assigns the id
    async fn create(&self, fields: AnimeFields) -> Result<Anime, GatewayError>;

    /// `Ok(None)` when no record has this id
    async fn get(&self, id: &AnimeId) -> Result<Option<Anime>, GatewayError>;

    /// Replace a record, returning the authoritative version
    async fn update(&self, anime: Anime) -> Result<Anime, GatewayError>;

    /// Whether a record was actually removed
    async fn delete(&self, id: &AnimeId) -> Result<bool, GatewayError>;

    async fn list(&self) -> Result<Vec<Anime>, GatewayError>;

    /// Poster for a stored record
    async fn image(&self, id: &AnimeId) -> Result<ImagePayload, GatewayError>;

    /// Poster for a link that may not belong to any record yet
    async fn image_by_link(&self, link: &str) -> Result<ImagePayload, GatewayError>;
}
