//! Shared data structures for the catalog
//!
//! These structs represent the data model that flows between
//! the backend gateway, the window state and the export/import documents.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Backend-assigned identifier. Opaque and never changes once assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimeId(String);

impl AnimeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AnimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AnimeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Watch status of a title
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnimeStatus {
    #[default]
    None,
    Waiting,
    Completed,
    Dropped,
}

impl AnimeStatus {
    pub const ALL: [AnimeStatus; 4] = [
        AnimeStatus::None,
        AnimeStatus::Waiting,
        AnimeStatus::Completed,
        AnimeStatus::Dropped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AnimeStatus::None => "none",
            AnimeStatus::Waiting => "waiting",
            AnimeStatus::Completed => "completed",
            AnimeStatus::Dropped => "dropped",
        }
    }
}

impl fmt::Display for AnimeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnimeStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        AnimeStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == lowered)
            .ok_or_else(|| format!("unknown status '{}'", s))
    }
}

/// Everything a record carries except its identifier.
///
/// This is also the shape of a draft that has not been created yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnimeFields {
    /// Display title
    pub name: String,
    /// Rating in `0..=ScoreScale::max()`
    #[serde(deserialize_with = "deserialize_score")]
    pub score: u8,
    #[serde(default)]
    pub review: String,
    /// Source page, also the key for poster lookups
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub status: AnimeStatus,
}

/// Accepts `4` as well as `4.0`; older exports wrote scores as floats
fn deserialize_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let value = f64::deserialize(deserializer)?;
    if value.fract() == 0.0 && (0.0..=f64::from(u8::MAX)).contains(&value) {
        Ok(value as u8)
    } else {
        Err(D::Error::custom(format!("score must be a whole number, got {}", value)))
    }
}

impl AnimeFields {
    pub fn new(name: impl Into<String>, score: u8) -> Self {
        Self {
            name: name.into(),
            score,
            review: String::new(),
            link: String::new(),
            status: AnimeStatus::None,
        }
    }

    pub fn with_status(mut self, status: AnimeStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = link.into();
        self
    }

    pub fn with_review(mut self, review: impl Into<String>) -> Self {
        self.review = review.into();
        self
    }
}

/// A record confirmed by the backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Anime {
    pub id: AnimeId,
    #[serde(flatten)]
    pub fields: AnimeFields,
}

impl Anime {
    pub fn new(id: impl Into<AnimeId>, fields: AnimeFields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }
}

impl From<String> for AnimeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Raw poster bytes as returned by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub bytes: Vec<u8>,
    /// MIME type, e.g. "image/jpeg"
    pub content_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parses_case_insensitively() {
        assert_eq!("Dropped".parse::<AnimeStatus>(), Ok(AnimeStatus::Dropped));
        assert_eq!(" waiting ".parse::<AnimeStatus>(), Ok(AnimeStatus::Waiting));
        assert!("watching".parse::<AnimeStatus>().is_err());
    }

    #[test]
    fn test_record_json_shape() {
        let anime = Anime::new(
            "42",
            AnimeFields::new("Cowboy Bebop", 5)
                .with_status(AnimeStatus::Completed)
                .with_link("https://shikimori.one/animes/1-cowboy-bebop"),
        );

        let value = serde_json::to_value(&anime).unwrap();
        assert_eq!(value["id"], "42");
        assert_eq!(value["name"], "Cowboy Bebop");
        assert_eq!(value["score"], 5);
        assert_eq!(value["status"], "completed");
        assert_eq!(value["review"], "");
    }

    #[test]
    fn test_fields_ignore_foreign_id() {
        let json = r#"{"id":"old","name":"Naruto","score":3,"status":"dropped"}"#;
        let fields: AnimeFields = serde_json::from_str(json).unwrap();
        assert_eq!(fields.name, "Naruto");
        assert_eq!(fields.status, AnimeStatus::Dropped);
        assert!(fields.link.is_empty());
    }

    #[test]
    fn test_score_accepts_whole_floats_only() {
        let fields: AnimeFields = serde_json::from_str(r#"{"name":"Akira","score":4.0}"#).unwrap();
        assert_eq!(fields.score, 4);
        assert!(serde_json::from_str::<AnimeFields>(r#"{"name":"Akira","score":4.5}"#).is_err());
        assert!(serde_json::from_str::<AnimeFields>(r#"{"name":"Akira","score":-1}"#).is_err());
    }
}
