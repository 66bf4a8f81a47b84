pub mod manager;

use serde::{Deserialize, Serialize};

pub use manager::{AudioSourceManager, InitResult};

/// One playable audio file found for a word.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileUrlData {
    /// Remote URL or local path of the audio file.
    pub url: String,
    /// Name the file gets once saved to the media folder.
    pub desired_filename: String,
    pub word: String,
    pub source_name: String,
    pub reading: String,
    pub pitch_number: String,
}

impl FileUrlData {
    pub const UNKNOWN_PITCH: &'static str = "?";

    pub fn is_remote(&self) -> bool {
        is_remote_url(&self.url)
    }
}

/// Identifies a source: its user-given name plus where it was loaded from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NameUrl {
    pub name: String,
    pub url: String,
}

impl NameUrl {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AudioStats {
    pub source_name: String,
    pub num_files: u64,
    pub num_headwords: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct TotalAudioStats {
    pub unique_headwords: u64,
    pub unique_files: u64,
    pub sources: Vec<AudioStats>,
}

pub fn is_remote_url(url: &str) -> bool {
    let lowered = url.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

/// Renders hits as `[sound:...]` references joined by `separator`.
pub fn format_audio_tags(hits: &[FileUrlData], separator: &str) -> String {
    hits.iter()
        .map(|hit| format!("[sound:{}]", hit.desired_filename))
        .collect::<Vec<_>>()
        .join(separator)
}
