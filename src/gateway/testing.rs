//! Test doubles for the gateway: canned posters and scripted failures.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use super::library::Library;
use super::poster::{link_allowed, PosterSource};
use super::Gateway;
use crate::error::{GatewayError, ImageFetchError};
use crate::state::data::{Anime, AnimeFields, AnimeId, ImagePayload};

/// Solid-colour PNG of the given size
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbaImage::from_pixel(width, height, image::Rgba([200, 40, 40, 255]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}

pub fn png_payload(width: u32, height: u32) -> ImagePayload {
    ImagePayload {
        bytes: png_bytes(width, height),
        content_type: "image/png".to_string(),
    }
}

/// Serves a fixed poster per link without touching the network
pub struct StaticPosters {
    prefixes: Vec<String>,
    default: ImagePayload,
    by_link: Mutex<HashMap<String, ImagePayload>>,
    fetches: Arc<AtomicUsize>,
}

impl StaticPosters {
    /// 2x2 PNG for every link under `prefix` (empty prefix allows all)
    pub fn png(prefix: &str) -> Self {
        Self {
            prefixes: vec![prefix.to_string()],
            default: png_payload(2, 2),
            by_link: Mutex::new(HashMap::new()),
            fetches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn insert(&self, link: &str, payload: ImagePayload) {
        self.by_link.lock().unwrap().insert(link.to_string(), payload);
    }

    pub fn fetch_counter(&self) -> Arc<AtomicUsize> {
        self.fetches.clone()
    }
}

#[async_trait]
impl PosterSource for StaticPosters {
    async fn fetch(&self, link: &str) -> Result<ImagePayload, ImageFetchError> {
        if !link_allowed(&self.prefixes, link) {
            return Err(ImageFetchError::UnsupportedLink(link.to_string()));
        }
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let by_link = self.by_link.lock().unwrap();
        Ok(by_link.get(link).cloned().unwrap_or_else(|| self.default.clone()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Create,
    Get,
    Update,
    Delete,
    List,
    Image,
    ImageByLink,
}

#[derive(Default)]
struct Script {
    calls: HashMap<Op, usize>,
    fail_on: HashMap<Op, HashSet<usize>>,
    always: HashSet<Op>,
}

/// In-memory library whose calls can be made to fail on demand
pub struct ScriptedGateway {
    inner: Library,
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::with_posters(StaticPosters::png(""))
    }

    pub fn with_posters(posters: StaticPosters) -> Self {
        Self {
            inner: Library::open_in_memory(Box::new(posters)).unwrap(),
            script: Mutex::new(Script::default()),
        }
    }

    /// Direct access to server-side state, bypassing the script
    pub fn backend(&self) -> &Library {
        &self.inner
    }

    pub fn fail_always(&self, op: Op) {
        self.script.lock().unwrap().always.insert(op);
    }

    pub fn recover(&self, op: Op) {
        let mut script = self.script.lock().unwrap();
        script.always.remove(&op);
        script.fail_on.remove(&op);
    }

    /// Fail the `n`th call (1-based) of `op`
    pub fn fail_call(&self, op: Op, n: usize) {
        self.script
            .lock()
            .unwrap()
            .fail_on
            .entry(op)
            .or_default()
            .insert(n);
    }

    pub fn calls(&self, op: Op) -> usize {
        self.script.lock().unwrap().calls.get(&op).copied().unwrap_or(0)
    }

    fn check(&self, op: Op) -> Result<(), GatewayError> {
        let mut script = self.script.lock().unwrap();
        let count = script.calls.entry(op).or_insert(0);
        *count += 1;
        let n = *count;

        let scripted = script.fail_on.get(&op).is_some_and(|calls| calls.contains(&n));
        if scripted || script.always.contains(&op) {
            return Err(GatewayError::Unavailable(format!("scripted {:?} failure", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn create(&self, fields: AnimeFields) -> Result<Anime, GatewayError> {
        self.check(Op::Create)?;
        self.inner.create(fields).await
    }

    async fn get(&self, id: &AnimeId) -> Result<Option<Anime>, GatewayError> {
        self.check(Op::Get)?;
        self.inner.get(id).await
    }

    async fn update(&self, anime: Anime) -> Result<Anime, GatewayError> {
        self.check(Op::Update)?;
        self.inner.update(anime).await
    }

    async fn delete(&self, id: &AnimeId) -> Result<bool, GatewayError> {
        self.check(Op::Delete)?;
        self.inner.delete(id).await
    }

    async fn list(&self) -> Result<Vec<Anime>, GatewayError> {
        self.check(Op::List)?;
        self.inner.list().await
    }

    async fn image(&self, id: &AnimeId) -> Result<ImagePayload, GatewayError> {
        self.check(Op::Image)?;
        self.inner.image(id).await
    }

    async fn image_by_link(&self, link: &str) -> Result<ImagePayload, GatewayError> {
        self.check(Op::ImageByLink)?;
        self.inner.image_by_link(link).await
    }
}
