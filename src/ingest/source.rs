use std::path::Path;

use crate::audio::{is_remote_url, NameUrl};
use crate::database::CacheStore;
use crate::error::Result;
use crate::utils::config::SourceConfig;

/// A configured source as seen by the loader and the search engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub name: String,
    pub url: String,
    pub enabled: bool,
}

impl From<&SourceConfig> for AudioSource {
    fn from(config: &SourceConfig) -> Self {
        Self {
            name: config.name.clone(),
            url: config.url.trim().to_string(),
            enabled: config.enabled,
        }
    }
}

impl AudioSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            enabled: true,
        }
    }

    pub fn is_local(&self) -> bool {
        !is_remote_url(&self.url)
    }

    pub fn name_url(&self) -> NameUrl {
        NameUrl::new(self.name.clone(), self.url.clone())
    }

    /// Directory the audio files live in.
    ///
    /// An absolute media dir recorded in the index wins. Otherwise the
    /// relative media dir is resolved against the index's own location.
    pub fn media_dir(&self, db: &CacheStore) -> Result<String> {
        if let Some(abs) = db.get_media_dir_abs(&self.name)?.filter(|dir| !dir.is_empty()) {
            return Ok(abs);
        }
        let rel = db.get_media_dir_rel(&self.name)?;
        Ok(self.join(&self.index_dir(), &rel))
    }

    /// Where a single file of this source can be fetched from.
    pub fn file_url(&self, db: &CacheStore, file_name: &str) -> Result<String> {
        Ok(self.join(&self.media_dir(db)?, file_name))
    }

    fn index_dir(&self) -> String {
        if self.is_local() {
            Path::new(&self.url)
                .parent()
                .map(|dir| dir.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            self.url
                .rsplit_once('/')
                .map(|(dir, _)| dir.to_string())
                .unwrap_or_else(|| self.url.clone())
        }
    }

    /// Joins a path under `base` the way this source's URLs are written.
    pub fn join(&self, base: &str, tail: &str) -> String {
        if base.is_empty() {
            return tail.to_string();
        }
        if self.is_local() {
            Path::new(base).join(tail).to_string_lossy().into_owned()
        } else {
            format!("{}/{}", base.trim_end_matches('/'), tail.trim_start_matches('/'))
        }
    }
}
