//! Anime catalog client: per-window state over a shared backend.

pub mod config;
pub mod error;
pub mod gateway;
pub mod images;
pub mod notify;
pub mod session;
pub mod state;
pub mod transfer;

pub use config::{Config, ScoreScale};
pub use error::{
    ConfigError, GatewayError, ImageFetchError, ImportError, ImportFormatError, LoadError,
    MutationError, TransferError,
};
pub use gateway::{Gateway, HttpPosterSource, Library, PosterSource};
pub use notify::{Change, Notifier, Subscription, WindowId};
pub use session::{Confirmed, Session, WindowContext};
pub use state::data::{Anime, AnimeFields, AnimeId, AnimeStatus, ImagePayload};
