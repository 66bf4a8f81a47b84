use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::audio::NameUrl;

pub const CONFIG_FILE_NAME: &str = "onsei.json";

/// One configured audio source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub name: String,
    /// Local path or http(s) URL of the index file.
    pub url: String,
}

impl SourceConfig {
    pub fn name_url(&self) -> NameUrl {
        NameUrl::new(self.name.clone(), self.url.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Seconds to wait for a source index.
    pub dictionary_download_timeout: u64,
    /// Seconds to wait for one audio file.
    pub audio_download_timeout: u64,
    /// Total attempts per request. Only timeouts are retried.
    pub attempts: u32,
    pub maximum_results: usize,
    pub tag_separator: String,
    pub split_morphemes: bool,
    pub ignore_inflections: bool,
    pub stop_if_one_source_has_results: bool,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            dictionary_download_timeout: 30,
            audio_download_timeout: 6,
            attempts: 4,
            maximum_results: 99,
            tag_separator: "<br>".to_string(),
            split_morphemes: true,
            ignore_inflections: false,
            stop_if_one_source_has_results: false,
        }
    }
}

// Request timeouts are kept between 2 and 99 seconds whatever the file says.
fn clamp_timeout(seconds: u64) -> Duration {
    Duration::from_secs(seconds.clamp(2, 99))
}

impl AudioSettings {
    pub fn dictionary_timeout(&self) -> Duration {
        clamp_timeout(self.dictionary_download_timeout)
    }

    pub fn audio_timeout(&self) -> Duration {
        clamp_timeout(self.audio_download_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FuriganaSettings {
    /// Separates a word from its reading in the search text, e.g. `言葉・ことば`.
    pub reading_separator: String,
}

impl Default for FuriganaSettings {
    fn default() -> Self {
        Self {
            reading_separator: "・".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchAccentSettings {
    /// Provider whose rows replace everyone else's when it has any.
    pub preferred_provider: String,
}

impl Default for PitchAccentSettings {
    fn default() -> Self {
        Self {
            preferred_provider: "user".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForvoConfig {
    pub language: String,
    pub preferred_usernames: Vec<String>,
    pub preferred_countries: Vec<String>,
    pub show_gender: bool,
    pub show_country: bool,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for ForvoConfig {
    fn default() -> Self {
        Self {
            language: "ja".to_string(),
            preferred_usernames: Vec::new(),
            preferred_countries: Vec::new(),
            show_gender: true,
            show_country: false,
            timeout_seconds: 10,
            retry_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub audio_sources: Vec<SourceConfig>,
    pub audio_settings: AudioSettings,
    pub furigana: FuriganaSettings,
    pub pitch_accent: PitchAccentSettings,
    pub forvo: ForvoConfig,
}

impl AppConfig {
    pub fn iter_audio_sources(&self) -> impl Iterator<Item = &SourceConfig> {
        self.audio_sources.iter()
    }

    /// Enabled sources in configuration order. A name that repeats an
    /// earlier enabled source is skipped.
    pub fn enabled_sources(&self) -> Vec<&SourceConfig> {
        let mut seen = HashSet::new();
        let mut sources = Vec::new();
        for source in self.iter_audio_sources().filter(|source| source.enabled) {
            if seen.insert(source.name.as_str()) {
                sources.push(source);
            } else {
                warn!(
                    "Audio source name '{}' is used more than once. Ignoring duplicate.",
                    source.name
                );
            }
        }
        sources
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {:?}", path))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).with_context(|| format!("Failed to write config file {:?}", path))
    }
}

/// Main entry point to get the configuration.
/// An explicit path wins. Otherwise the nearby file system is searched, and
/// if nothing turns up the defaults are saved for next time.
pub fn load_config(explicit: Option<&Path>) -> Result<AppConfig> {
    if let Some(path) = explicit {
        info!("Loading config from {:?}", path);
        return AppConfig::from_file(path);
    }

    if let Ok(path) = find_file(CONFIG_FILE_NAME, 3) {
        info!("Found config file: {:?}", path);
        return AppConfig::from_file(&path);
    }

    info!("No {} found nearby. Writing defaults.", CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let path = std::env::current_dir()?.join(CONFIG_FILE_NAME);
    config.save(&path)?;
    info!("Saved default config to {:?}", path);
    Ok(config)
}

fn find_file(filename: &str, max_depth: usize) -> Result<PathBuf> {
    let root = std::env::current_dir()?;
    if let Some(found) = find_file_in(&root, filename, max_depth) {
        return Ok(found);
    }

    // Useful when running from a subdirectory.
    if let Some(parent) = root.parent() {
        if let Some(found) = find_file_in(parent, filename, max_depth) {
            return Ok(found);
        }
    }

    Err(anyhow!("Could not find file '{}' in nearby directories.", filename))
}

fn find_file_in(root: &Path, filename: &str, max_depth: usize) -> Option<PathBuf> {
    WalkDir::new(root)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|e| e.ok())
        .find(|e| e.file_type().is_file() && e.file_name() == filename)
        .map(|e| e.path().to_path_buf())
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_save_and_load_config() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(CONFIG_FILE_NAME);

        let mut config = AppConfig::default();
        config.audio_sources.push(SourceConfig {
            enabled: true,
            name: "TAAS".to_string(),
            url: "/tmp/taas/index.json".to_string(),
        });
        config.audio_settings.attempts = 7;
        config.save(&path)?;

        let loaded = AppConfig::from_file(&path)?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[test]
    fn test_partial_config_uses_defaults() -> Result<()> {
        let parsed: AppConfig = serde_json::from_str(
            r#"{"audio_sources": [{"name": "NHK", "url": "https://example.com/nhk.json"}],
                "audio_settings": {"attempts": 2}}"#,
        )?;
        assert!(parsed.audio_sources[0].enabled);
        assert_eq!(parsed.audio_settings.attempts, 2);
        assert_eq!(parsed.audio_settings.audio_download_timeout, 6);
        assert_eq!(parsed.furigana.reading_separator, "・");
        assert_eq!(parsed.pitch_accent.preferred_provider, "user");
        assert_eq!(parsed.audio_settings.audio_timeout(), Duration::from_secs(6));
        Ok(())
    }

    #[test]
    fn test_enabled_sources_skip_disabled_and_duplicates() {
        let source = |enabled: bool, name: &str, url: &str| SourceConfig {
            enabled,
            name: name.to_string(),
            url: url.to_string(),
        };
        let config = AppConfig {
            audio_sources: vec![
                source(true, "A", "a.json"),
                source(false, "B", "b.json"),
                source(true, "A", "other.json"),
                source(true, "C", "c.json"),
            ],
            ..AppConfig::default()
        };
        let names: Vec<&str> = config.enabled_sources().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["A", "C"]);
        assert_eq!(config.iter_audio_sources().count(), 4);
    }

    #[test]
    fn test_timeouts_are_clamped() {
        let settings = AudioSettings {
            dictionary_download_timeout: 0,
            audio_download_timeout: 1000,
            ..AudioSettings::default()
        };
        assert_eq!(settings.dictionary_timeout(), Duration::from_secs(2));
        assert_eq!(settings.audio_timeout(), Duration::from_secs(99));
    }
}
