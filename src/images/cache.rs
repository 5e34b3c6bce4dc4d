//! Image Resource Cache
//!
//! Resolves a poster for the slot currently on screen. Each `resolve` bumps a
//! generation counter; a fetch that completes for an older generation is thrown
//! away, so a slow response can never replace a newer image or revive a handle
//! that has already been released.

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tracing::{debug, warn};

use super::handle::{DisplayImage, HandleRegistry, ImageHandle};
use crate::error::ImageFetchError;
use crate::gateway::Gateway;
use crate::state::data::AnimeId;

/// What to fetch a poster for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ImageKey {
    /// A stored record
    Entity(AnimeId),
    /// A raw link, for records that are not created yet
    Link(String),
}

impl ImageKey {
    /// Prefer the record id; fall back to a non-empty link
    pub fn for_record(id: Option<&AnimeId>, link: &str) -> Option<ImageKey> {
        match id {
            Some(id) => Some(ImageKey::Entity(id.clone())),
            None if !link.trim().is_empty() => Some(ImageKey::Link(link.trim().to_string())),
            None => None,
        }
    }
}

#[derive(Debug, Default)]
pub enum ImageState {
    #[default]
    Idle,
    Loading(ImageKey),
    Ready {
        key: ImageKey,
        handle: ImageHandle,
    },
    Error {
        key: ImageKey,
        message: String,
    },
}

impl ImageState {
    pub fn key(&self) -> Option<&ImageKey> {
        match self {
            ImageState::Idle => None,
            ImageState::Loading(key) => Some(key),
            ImageState::Ready { key, .. } | ImageState::Error { key, .. } => Some(key),
        }
    }

    pub fn handle(&self) -> Option<&ImageHandle> {
        match self {
            ImageState::Ready { handle, .. } => Some(handle),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ImageState::Error { message, .. } => Some(message),
            _ => None,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ImageState::Loading(_))
    }
}

/// A fetch issued by [`ImageCache::resolve`]. Owns everything it needs, so it
/// can run while the cache keeps serving other calls.
pub struct ImageRequest {
    generation: u64,
    key: ImageKey,
    gateway: Arc<dyn Gateway>,
}

impl ImageRequest {
    pub fn key(&self) -> &ImageKey {
        &self.key
    }

    pub async fn run(self) -> ImageOutcome {
        let payload = match &self.key {
            ImageKey::Entity(id) => self.gateway.image(id).await,
            ImageKey::Link(link) => self.gateway.image_by_link(link).await,
        };
        let result = match payload {
            Ok(payload) => DisplayImage::decode_in_background(payload).await,
            Err(err) => Err(ImageFetchError::from(err)),
        };

        ImageOutcome {
            generation: self.generation,
            key: self.key,
            result,
        }
    }
}

/// Result of an [`ImageRequest`], fed back through [`ImageCache::complete`]
pub struct ImageOutcome {
    generation: u64,
    key: ImageKey,
    result: Result<DisplayImage, ImageFetchError>,
}

impl ImageOutcome {
    pub fn key(&self) -> &ImageKey {
        &self.key
    }
}

/// One image slot plus a small cache of recently decoded posters
pub struct ImageCache {
    gateway: Arc<dyn Gateway>,
    registry: HandleRegistry,
    recent: LruCache<ImageKey, Arc<DisplayImage>>,
    generation: u64,
    state: ImageState,
    closed: bool,
}

impl ImageCache {
    pub fn new(gateway: Arc<dyn Gateway>, recent_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(recent_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            gateway,
            registry: HandleRegistry::new(),
            recent: LruCache::new(capacity),
            generation: 0,
            state: ImageState::Idle,
            closed: false,
        }
    }

    pub fn state(&self) -> &ImageState {
        &self.state
    }

    pub fn registry(&self) -> &HandleRegistry {
        &self.registry
    }

    /// Point the slot at `key`.
    ///
    /// The previous handle is released here, before any new fetch starts.
    /// Returns a request to run unless the slot already shows `key` or the
    /// poster is in the recent cache.
    pub fn resolve(&mut self, key: Option<ImageKey>) -> Option<ImageRequest> {
        if self.closed {
            return None;
        }
        // A dropped request leaves Loading behind; a later resolve reissues it
        let retry = matches!(self.state, ImageState::Error { .. } | ImageState::Loading(_));
        if key.as_ref() == self.state.key() && !retry {
            return None;
        }

        self.generation += 1;
        // Dropping the old state releases its handle
        self.state = ImageState::Idle;

        let key = key?;
        if let Some(image) = self.recent.get(&key).cloned() {
            debug!("Poster for {:?} served from recent cache", key);
            let handle = self.registry.register(image);
            self.state = ImageState::Ready { key, handle };
            return None;
        }

        self.state = ImageState::Loading(key.clone());
        Some(ImageRequest {
            generation: self.generation,
            key,
            gateway: self.gateway.clone(),
        })
    }

    /// Apply a finished fetch. Returns `false` if it was stale and discarded.
    pub fn complete(&mut self, outcome: ImageOutcome) -> bool {
        if self.closed || outcome.generation != self.generation {
            debug!("Discarding stale poster for {:?}", outcome.key);
            return false;
        }

        let ImageOutcome { key, result, .. } = outcome;
        self.state = match result {
            Ok(image) => {
                let image = Arc::new(image);
                self.recent.put(key.clone(), image.clone());
                let handle = self.registry.register(image);
                ImageState::Ready { key, handle }
            }
            Err(err) => {
                warn!("Poster for {:?} failed: {}", key, err);
                ImageState::Error {
                    key,
                    message: err.to_string(),
                }
            }
        };
        true
    }

    /// Resolve and wait for the fetch
    pub async fn load(&mut self, key: Option<ImageKey>) -> &ImageState {
        if let Some(request) = self.resolve(key) {
            let outcome = request.run().await;
            self.complete(outcome);
        }
        &self.state
    }

    /// Forget a decoded poster, e.g. after the record's link changed
    pub fn invalidate(&mut self, key: &ImageKey) {
        self.recent.pop(key);
    }

    /// Release the live handle and ignore every fetch still in flight
    pub fn close(&mut self) {
        self.closed = true;
        self.generation += 1;
        self.state = ImageState::Idle;
        self.recent.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::{png_payload, Op, ScriptedGateway, StaticPosters};
    use crate::state::data::AnimeFields;

    const BEBOP: &str = "https://shikimori.one/animes/1";
    const MONSTER: &str = "https://shikimori.one/animes/19";

    fn gateway() -> Arc<ScriptedGateway> {
        let posters = StaticPosters::png("https://shikimori.one/animes/");
        posters.insert(BEBOP, png_payload(10, 14));
        posters.insert(MONSTER, png_payload(20, 28));
        Arc::new(ScriptedGateway::with_posters(posters))
    }

    fn link(url: &str) -> Option<ImageKey> {
        Some(ImageKey::Link(url.to_string()))
    }

    #[test]
    fn test_key_for_record() {
        let id = AnimeId::new("1");
        assert_eq!(
            ImageKey::for_record(Some(&id), BEBOP),
            Some(ImageKey::Entity(id.clone()))
        );
        assert_eq!(ImageKey::for_record(None, BEBOP), link(BEBOP));
        assert_eq!(ImageKey::for_record(None, "  "), None);
    }

    #[tokio::test]
    async fn test_load_by_link_and_by_entity() {
        let gateway = gateway();
        let anime = gateway
            .backend()
            .create(AnimeFields::new("Monster", 5).with_link(MONSTER))
            .await
            .unwrap();
        let mut cache = ImageCache::new(gateway.clone(), 4);

        let state = cache.load(link(BEBOP)).await;
        assert_eq!(state.handle().unwrap().image().width(), 10);

        let state = cache.load(Some(ImageKey::Entity(anime.id))).await;
        assert_eq!(state.handle().unwrap().image().width(), 20);
        assert_eq!(gateway.calls(Op::Image), 1);
        assert_eq!(gateway.calls(Op::ImageByLink), 1);
    }

    #[tokio::test]
    async fn test_new_key_releases_previous_handle() {
        let mut cache = ImageCache::new(gateway(), 4);

        cache.load(link(BEBOP)).await;
        assert_eq!(cache.registry().live(), 1);

        let request = cache.resolve(link(MONSTER)).unwrap();
        // Released before the new fetch even runs
        assert_eq!(cache.registry().live(), 0);
        assert!(cache.state().is_loading());

        let outcome = request.run().await;
        assert!(cache.complete(outcome));
        assert_eq!(cache.registry().live(), 1);
        assert_eq!(cache.registry().released(), 1);
    }

    #[tokio::test]
    async fn test_stale_fetch_never_replaces_newer_image() {
        let mut cache = ImageCache::new(gateway(), 4);

        let slow = cache.resolve(link(BEBOP)).unwrap();
        let fast = cache.resolve(link(MONSTER)).unwrap();

        assert!(cache.complete(fast.run().await));
        let current_id = cache.state().handle().unwrap().id();

        assert!(!cache.complete(slow.run().await));
        let handle = cache.state().handle().unwrap();
        assert_eq!(handle.id(), current_id);
        assert_eq!(handle.image().width(), 20);
        assert_eq!(cache.registry().live(), 1);
    }

    #[tokio::test]
    async fn test_same_key_does_not_refetch() {
        let gateway = gateway();
        let mut cache = ImageCache::new(gateway.clone(), 4);

        cache.load(link(BEBOP)).await;
        let id = cache.state().handle().unwrap().id();
        assert!(cache.resolve(link(BEBOP)).is_none());
        assert_eq!(cache.state().handle().unwrap().id(), id);
        assert_eq!(gateway.calls(Op::ImageByLink), 1);
    }

    #[tokio::test]
    async fn test_abandoned_request_is_reissued() {
        let mut cache = ImageCache::new(gateway(), 4);

        let abandoned = cache.resolve(link(BEBOP)).unwrap();
        drop(abandoned);
        assert!(cache.state().is_loading());

        let request = cache.resolve(link(BEBOP)).unwrap();
        assert!(cache.complete(request.run().await));
        assert_eq!(cache.state().handle().unwrap().image().width(), 10);
    }

    #[tokio::test]
    async fn test_duplicate_request_result_is_discarded() {
        let gateway = gateway();
        let mut cache = ImageCache::new(gateway.clone(), 4);

        let first = cache.resolve(link(BEBOP)).unwrap();
        let second = cache.resolve(link(BEBOP)).unwrap();

        assert!(cache.complete(second.run().await));
        assert!(!cache.complete(first.run().await));
        assert_eq!(cache.registry().live(), 1);
        assert_eq!(gateway.calls(Op::ImageByLink), 2);
    }

    #[tokio::test]
    async fn test_recent_cache_issues_fresh_handle() {
        let gateway = gateway();
        let mut cache = ImageCache::new(gateway.clone(), 4);

        cache.load(link(BEBOP)).await;
        cache.load(link(MONSTER)).await;
        assert!(cache.resolve(link(BEBOP)).is_none());

        assert_eq!(cache.state().handle().unwrap().image().width(), 10);
        assert_eq!(gateway.calls(Op::ImageByLink), 2);
        assert_eq!(cache.registry().live(), 1);
        assert_eq!(cache.registry().created(), 3);
    }

    #[tokio::test]
    async fn test_error_is_reported_and_cleared() {
        let gateway = gateway();
        gateway.fail_always(Op::ImageByLink);
        let mut cache = ImageCache::new(gateway.clone(), 4);

        let state = cache.load(link(BEBOP)).await;
        assert!(state.error().unwrap().contains("scripted"));
        assert_eq!(cache.registry().live(), 0);

        // Retrying the same key refetches
        gateway.recover(Op::ImageByLink);
        let state = cache.load(link(BEBOP)).await;
        assert!(state.error().is_none());
        assert!(state.handle().is_some());
    }

    #[tokio::test]
    async fn test_unsupported_link_is_error_state() {
        let mut cache = ImageCache::new(gateway(), 4);
        let state = cache.load(link("https://example.com/poster")).await;
        assert!(state.error().is_some());
    }

    #[tokio::test]
    async fn test_idle_key_releases_handle() {
        let mut cache = ImageCache::new(gateway(), 4);
        cache.load(link(BEBOP)).await;

        assert!(cache.resolve(None).is_none());
        assert!(matches!(cache.state(), ImageState::Idle));
        assert_eq!(cache.registry().live(), 0);
    }

    #[tokio::test]
    async fn test_close_drops_in_flight_fetch() {
        let mut cache = ImageCache::new(gateway(), 4);
        cache.load(link(BEBOP)).await;
        let request = cache.resolve(link(MONSTER)).unwrap();

        cache.close();
        assert!(!cache.complete(request.run().await));
        assert_eq!(cache.registry().live(), 0);
        assert!(cache.resolve(link(BEBOP)).is_none());
    }
}
