use async_trait::async_trait;
use chrono::Utc;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info};
use uuid::Uuid;

use super::poster::PosterSource;
use super::Gateway;
use crate::error::{GatewayError, ImageFetchError};
use crate::state::data::{Anime, AnimeFields, AnimeId, AnimeStatus, ImagePayload};

/// The Library is the local SQLite catalog backend.
/// It stores the records and caches fetched posters by link.
pub struct Library {
    conn: Mutex<Connection>,
    db_path: Option<PathBuf>,
    posters: Box<dyn PosterSource>,
}

impl Library {
    /// Open (or create) the catalog at `db_path`, creating parent directories.
    pub fn open(db_path: &Path, posters: Box<dyn PosterSource>) -> Result<Self, GatewayError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::Unavailable(format!(
                    "cannot create catalog directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let conn = Connection::open(db_path)?;
        info!("Catalog opened at {}", db_path.display());

        let library = Library {
            conn: Mutex::new(conn),
            db_path: Some(db_path.to_path_buf()),
            posters,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Throwaway catalog, used by tests and dry runs
    pub fn open_in_memory(posters: Box<dyn PosterSource>) -> Result<Self, GatewayError> {
        let library = Library {
            conn: Mutex::new(Connection::open_in_memory()?),
            db_path: None,
            posters,
        };
        library.init_schema()?;
        Ok(library)
    }

    /// Create all tables and indexes if they don't exist.
    fn init_schema(&self) -> Result<(), GatewayError> {
        let conn = self.lock()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS anime (
                id              TEXT PRIMARY KEY,
                name            TEXT NOT NULL,
                score           INTEGER NOT NULL,
                review          TEXT NOT NULL DEFAULT '',
                link            TEXT NOT NULL DEFAULT '',
                status          TEXT NOT NULL DEFAULT 'none',
                created_at      INTEGER NOT NULL
            )",
            [],
        )?;

        // Posters keyed by source page, shared by every record with that link
        conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                link            TEXT PRIMARY KEY,
                content_type    TEXT NOT NULL,
                data            BLOB NOT NULL,
                fetched_at      INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_anime_created_at
             ON anime(created_at)",
            [],
        )?;

        debug!("Catalog schema initialized");
        Ok(())
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn anime_count(&self) -> Result<i64, GatewayError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM anime", [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn cached_image_count(&self) -> Result<i64, GatewayError> {
        let conn = self.lock()?;
        let count = conn.query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?;
        Ok(count)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, GatewayError> {
        self.conn
            .lock()
            .map_err(|_| GatewayError::Unavailable("catalog connection poisoned".to_string()))
    }

    /// Cached poster, or fetch it and cache it
    async fn poster_for_link(&self, link: &str) -> Result<ImagePayload, GatewayError> {
        if link.is_empty() {
            return Err(GatewayError::Rejected("record has no link".to_string()));
        }

        {
            let conn = self.lock()?;
            if let Some(cached) = select_image(&conn, link)? {
                debug!("Returning cached poster for {}", link);
                return Ok(cached);
            }
        }

        info!("Fetching poster for {}", link);
        let payload = self.posters.fetch(link).await.map_err(poster_error)?;

        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO images (link, content_type, data, fetched_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![link, payload.content_type, payload.bytes, Utc::now().timestamp()],
        )?;

        Ok(payload)
    }
}

#[async_trait]
impl Gateway for Library {
    async fn create(&self, fields: AnimeFields) -> Result<Anime, GatewayError> {
        let anime = Anime::new(Uuid::new_v4().to_string(), fields);
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO anime (id, name, score, review, link, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                anime.id.as_str(),
                anime.fields.name,
                anime.fields.score,
                anime.fields.review,
                anime.fields.link,
                anime.fields.status.as_str(),
                Utc::now().timestamp(),
            ],
        )?;
        debug!("Created {} ({})", anime.id, anime.fields.name);
        Ok(anime)
    }

    async fn get(&self, id: &AnimeId) -> Result<Option<Anime>, GatewayError> {
        let conn = self.lock()?;
        select_anime(&conn, id)
    }

    async fn update(&self, anime: Anime) -> Result<Anime, GatewayError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE anime SET name = ?1, score = ?2, review = ?3, link = ?4, status = ?5
             WHERE id = ?6",
            params![
                anime.fields.name,
                anime.fields.score,
                anime.fields.review,
                anime.fields.link,
                anime.fields.status.as_str(),
                anime.id.as_str(),
            ],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound(anime.id.to_string()));
        }
        // Read back so callers get exactly what was stored
        select_anime(&conn, &anime.id)?.ok_or_else(|| GatewayError::NotFound(anime.id.to_string()))
    }

    async fn delete(&self, id: &AnimeId) -> Result<bool, GatewayError> {
        let conn = self.lock()?;
        let removed = conn.execute("DELETE FROM anime WHERE id = ?1", params![id.as_str()])?;
        Ok(removed > 0)
    }

    async fn list(&self) -> Result<Vec<Anime>, GatewayError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, score, review, link, status FROM anime ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([], anime_from_row)?;

        let mut animes = Vec::new();
        for anime in rows {
            animes.push(anime?);
        }
        Ok(animes)
    }

    async fn image(&self, id: &AnimeId) -> Result<ImagePayload, GatewayError> {
        let link = {
            let conn = self.lock()?;
            select_anime(&conn, id)?
                .ok_or_else(|| GatewayError::NotFound(id.to_string()))?
                .fields
                .link
        };
        self.poster_for_link(&link).await
    }

    async fn image_by_link(&self, link: &str) -> Result<ImagePayload, GatewayError> {
        self.poster_for_link(link).await
    }
}

impl std::fmt::Debug for Library {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Library")
            .field("db_path", &self.db_path)
            .finish()
    }
}

fn anime_from_row(row: &Row<'_>) -> rusqlite::Result<Anime> {
    let status: String = row.get(5)?;
    let status = status
        .parse::<AnimeStatus>()
        .map_err(|e: String| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, e.into()))?;
    Ok(Anime {
        id: AnimeId::new(row.get::<_, String>(0)?),
        fields: AnimeFields {
            name: row.get(1)?,
            score: row.get(2)?,
            review: row.get(3)?,
            link: row.get(4)?,
            status,
        },
    })
}

fn select_anime(conn: &Connection, id: &AnimeId) -> Result<Option<Anime>, GatewayError> {
    let anime = conn
        .query_row(
            "SELECT id, name, score, review, link, status FROM anime WHERE id = ?1",
            params![id.as_str()],
            anime_from_row,
        )
        .optional()?;
    Ok(anime)
}

fn select_image(conn: &Connection, link: &str) -> Result<Option<ImagePayload>, GatewayError> {
    let image = conn
        .query_row(
            "SELECT data, content_type FROM images WHERE link = ?1",
            params![link],
            |row| {
                Ok(ImagePayload {
                    bytes: row.get(0)?,
                    content_type: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(image)
}

fn poster_error(err: ImageFetchError) -> GatewayError {
    match err {
        ImageFetchError::UnsupportedLink(link) => {
            GatewayError::Rejected(format!("unsupported link: {}", link))
        }
        ImageFetchError::Gateway(inner) => inner,
        other => GatewayError::Unavailable(other.to_string()),
    }
}
