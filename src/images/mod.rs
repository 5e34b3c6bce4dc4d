//! Poster images
//!
//! - `handle.rs` - decoded images and release-on-drop handles
//! - `cache.rs` - the per-slot resolver with stale-fetch protection

pub mod cache;
pub mod handle;

pub use cache::{ImageCache, ImageKey, ImageOutcome, ImageRequest, ImageState};
pub use handle::{DisplayImage, HandleRegistry, ImageHandle};
