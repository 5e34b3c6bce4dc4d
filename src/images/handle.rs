use image::{ImageFormat, RgbaImage};
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::error::ImageFetchError;
use crate::state::data::ImagePayload;

/// A decoded poster, ready to hand to a renderer
pub struct DisplayImage {
    content_type: String,
    pixels: RgbaImage,
}

impl DisplayImage {
    /// Decode raw bytes, trusting the MIME type first and sniffing if it lies
    pub fn decode(payload: &ImagePayload) -> Result<Self, ImageFetchError> {
        let by_mime = ImageFormat::from_mime_type(&payload.content_type)
            .map(|format| image::load_from_memory_with_format(&payload.bytes, format));

        let decoded = match by_mime {
            Some(Ok(img)) => img,
            _ => image::load_from_memory(&payload.bytes)
                .map_err(|e| ImageFetchError::Decode(e.to_string()))?,
        };

        Ok(Self {
            content_type: payload.content_type.clone(),
            pixels: decoded.to_rgba8(),
        })
    }

    /// Decode on the blocking pool since it is CPU-bound
    pub async fn decode_in_background(payload: ImagePayload) -> Result<Self, ImageFetchError> {
        tokio::task::spawn_blocking(move || Self::decode(&payload))
            .await
            .map_err(|e| ImageFetchError::Decode(format!("decode task failed: {}", e)))?
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }
}

impl fmt::Debug for DisplayImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DisplayImage")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("content_type", &self.content_type)
            .finish()
    }
}

#[derive(Debug, Default)]
struct Counters {
    next_id: AtomicU64,
    live: AtomicUsize,
    released: AtomicUsize,
}

/// Hands out image handles and tracks how many are live
#[derive(Debug, Clone, Default)]
pub struct HandleRegistry {
    counters: Arc<Counters>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, image: Arc<DisplayImage>) -> ImageHandle {
        let id = self.counters.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.counters.live.fetch_add(1, Ordering::Relaxed);
        debug!("Image handle #{} created ({}x{})", id, image.width(), image.height());
        ImageHandle {
            id,
            image,
            registry: self.clone(),
        }
    }

    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> usize {
        self.counters.released.load(Ordering::Relaxed)
    }

    pub fn created(&self) -> u64 {
        self.counters.next_id.load(Ordering::Relaxed)
    }
}

/// Displayable resource for one image slot.
///
/// Not `Clone`: it is released exactly once, when dropped.
pub struct ImageHandle {
    id: u64,
    image: Arc<DisplayImage>,
    registry: HandleRegistry,
}

impl ImageHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn image(&self) -> &DisplayImage {
        &self.image
    }
}

impl Drop for ImageHandle {
    fn drop(&mut self) {
        self.registry.counters.live.fetch_sub(1, Ordering::Relaxed);
        self.registry.counters.released.fetch_add(1, Ordering::Relaxed);
        debug!("Image handle #{} released", self.id);
    }
}

impl fmt::Debug for ImageHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageHandle")
            .field("id", &self.id)
            .field("image", &self.image)
            .finish()
    }
}
