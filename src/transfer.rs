//! JSON export and import documents

use chrono::{Local, NaiveDate};
use serde_json::Value;
use std::fmt;

use crate::error::ImportFormatError;
use crate::state::data::{Anime, AnimeFields};

/// Pretty-printed array of full records, ids included
pub fn export_document(entities: &[Anime]) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(entities)
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("anime-list-{}.json", date.format("%Y-%m-%d"))
}

pub fn default_export_file_name() -> String {
    export_file_name(Local::now().date_naive())
}

/// Parse a whole document up front. Any `id` present is ignored since the
/// backend assigns a fresh one on create.
pub fn parse_document(document: &str) -> Result<Vec<AnimeFields>, ImportFormatError> {
    let value: Value =
        serde_json::from_str(document).map_err(|e| ImportFormatError::Syntax(e.to_string()))?;
    let Value::Array(items) = value else {
        return Err(ImportFormatError::NotAnArray);
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| {
            serde_json::from_value(item).map_err(|e| ImportFormatError::Record {
                index,
                message: e.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportFailure {
    pub index: usize,
    pub name: String,
    pub message: String,
}

/// Outcome of an import, shown as "N of M imported"
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub total: usize,
    pub imported: usize,
    pub failures: Vec<ImportFailure>,
}

impl ImportReport {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    pub fn record_success(&mut self) {
        self.imported += 1;
    }

    pub fn record_failure(&mut self, index: usize, name: &str, message: String) {
        self.failures.push(ImportFailure {
            index,
            name: name.to_string(),
            message,
        });
    }

    pub fn is_complete(&self) -> bool {
        self.imported == self.total
    }
}

impl fmt::Display for ImportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} imported", self.imported, self.total)
    }
}
