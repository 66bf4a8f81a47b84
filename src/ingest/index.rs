//! The JSON index document every audio source ships.
//!
//! ```json
//! {
//!   "meta": { "name": "...", "year": 2024, "version": 1, "media_dir": "media" },
//!   "headwords": { "ひらがな": ["a.ogg", "b.ogg"] },
//!   "files": { "a.ogg": { "kana_reading": "ひらがな", "pitch_number": "0" } }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const REQUIRED_KEYS: [&str; 3] = ["meta", "headwords", "files"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMeta {
    /// Name given to the dictionary by its creator.
    pub name: String,
    pub year: i64,
    pub version: i64,
    /// Media directory, relative to the index file.
    pub media_dir: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_dir_abs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileInfo {
    pub kana_reading: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceIndex {
    pub meta: SourceMeta,
    pub headwords: BTreeMap<String, Vec<String>>,
    pub files: BTreeMap<String, FileInfo>,
}

impl SourceIndex {
    /// Parses and validates an index document.
    /// Nothing is accepted unless all three top-level sections are present.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidSourceIndex(format!("not valid JSON: {}", e)))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        raise_if_invalid_json(&value)?;
        serde_json::from_value(value).map_err(|e| Error::InvalidSourceIndex(e.to_string()))
    }

    pub fn headword_count(&self) -> usize {
        self.headwords.len()
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

fn raise_if_invalid_json(value: &Value) -> Result<()> {
    let object = value
        .as_object()
        .ok_or_else(|| Error::InvalidSourceIndex("top level must be an object".to_string()))?;
    for key in REQUIRED_KEYS {
        if !object.contains_key(key) {
            return Err(Error::InvalidSourceIndex(format!(
                "audio source file is missing a required key: '{}'",
                key
            )));
        }
    }
    Ok(())
}
