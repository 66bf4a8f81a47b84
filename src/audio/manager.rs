use std::collections::HashSet;

use tracing::{debug, info, warn};

use crate::audio::{FileUrlData, NameUrl, TotalAudioStats};
use crate::database::{BoundFile, CacheStore};
use crate::error::{Error, Result, SourceError};
use crate::fetch::HttpClient;
use crate::ingest::{hasher, load_source, AudioSource, LoadOutcome};
use crate::search::kana::to_katakana;
use crate::search::WordLookup;
use crate::utils::config::AudioSettings;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default)]
pub struct InitResult {
    /// False when the pass was skipped because nothing changed.
    pub did_run: bool,
    /// Sources that are cached and usable, in configuration order.
    pub sources: Vec<AudioSource>,
    pub errors: Vec<SourceError>,
    /// Names of sources whose index was (re)read during this pass.
    pub reloaded: Vec<String>,
}

impl InitResult {
    pub fn did_not_run(sources: Vec<AudioSource>) -> Self {
        Self {
            did_run: false,
            sources,
            ..Self::default()
        }
    }
}

/// Answers questions about audio sources through one open cache session.
pub struct AudioSourceManager<'a> {
    db: &'a mut CacheStore,
    http: &'a HttpClient,
    settings: &'a AudioSettings,
    sources: Vec<AudioSource>,
}

impl<'a> AudioSourceManager<'a> {
    pub fn new(
        db: &'a mut CacheStore,
        http: &'a HttpClient,
        settings: &'a AudioSettings,
        sources: Vec<AudioSource>,
    ) -> Self {
        Self {
            db,
            http,
            settings,
            sources,
        }
    }

    /// Sources that take part in searches.
    pub fn sources(&self) -> &[AudioSource] {
        &self.sources
    }

    pub fn read_pronunciation_data(&mut self, source: &AudioSource) -> Result<LoadOutcome> {
        load_source(self.db, source, self.http, self.settings.dictionary_timeout())
    }

    /// Loads every configured source. A source that fails is reported and
    /// left out; the others are still loaded.
    pub fn get_sources(&mut self, configured: &[AudioSource]) -> InitResult {
        let mut result = InitResult {
            did_run: true,
            ..InitResult::default()
        };
        for source in configured.iter().filter(|source| source.enabled) {
            match self.read_pronunciation_data(source) {
                Ok(outcome) => {
                    if outcome == LoadOutcome::Loaded {
                        result.reloaded.push(source.name.clone());
                    }
                    result.sources.push(source.clone());
                }
                Err(error) => {
                    warn!("Couldn't load audio source {} ({}): {}", source.name, source.url, error);
                    result.errors.push(SourceError {
                        name: source.name.clone(),
                        url: source.url.clone(),
                        error,
                    });
                }
            }
        }
        self.sources = result.sources.clone();
        result
    }

    pub fn search_word(&self, word: &str) -> Result<Vec<FileUrlData>> {
        let mut hits = Vec::new();
        for source in &self.sources {
            let files = self.db.search_files_in_source(&source.name, word)?;
            if files.is_empty() {
                continue;
            }
            let media_dir = source.media_dir(self.db)?;
            for file in files {
                if let Some(hit) = self.resolve_file(source, &media_dir, file)? {
                    hits.push(hit);
                }
            }
        }
        Ok(hits)
    }

    fn resolve_file(
        &self,
        source: &AudioSource,
        media_dir: &str,
        file: BoundFile,
    ) -> Result<Option<FileUrlData>> {
        let info = match self.db.get_file_info(&source.name, &file.file_name) {
            Ok(info) => info,
            Err(Error::NotFound(what)) => {
                debug!("Headword {} points at unknown {}", file.headword, what);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };
        let url = source.join(media_dir, &file.file_name);
        let desired_filename = desired_filename(
            info.pitch_pattern.as_deref().unwrap_or(&info.kana_reading),
            info.pitch_number.as_deref(),
            &file.file_name,
            &file.ext(),
        );
        Ok(Some(FileUrlData {
            url,
            desired_filename,
            word: file.headword,
            source_name: file.source_name,
            reading: info.kana_reading,
            pitch_number: info
                .pitch_number
                .unwrap_or_else(|| FileUrlData::UNKNOWN_PITCH.to_string()),
        }))
    }

    pub fn total_stats(&self) -> Result<TotalAudioStats> {
        let names: Vec<String> = self.sources.iter().map(|source| source.name.clone()).collect();
        let mut sources = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            if let Some(stats) = self.db.get_stats_by_name(&source.name_url())? {
                sources.push(stats);
            }
        }
        Ok(TotalAudioStats {
            unique_headwords: self.db.distinct_headword_count(&names)?,
            unique_files: self.db.distinct_file_count(&names)?,
            sources,
        })
    }

    /// Deletes the selected sources from the cache. Returns the ones that
    /// were actually there.
    pub fn remove_sources(&mut self, selected: &HashSet<NameUrl>) -> Result<Vec<NameUrl>> {
        let mut removed = Vec::new();
        for cached in self.db.get_cached_sources()? {
            if selected.contains(&cached) {
                info!("Removing audio source {} ({})", cached.name, cached.url);
                self.db.remove_data(&cached.name)?;
                removed.push(cached);
            }
        }
        self.sources
            .retain(|source| !removed.iter().any(|gone| gone.name == source.name));
        Ok(removed)
    }

    /// Evicts cached sources that are no longer configured at all.
    pub fn remove_unused_audio_data(
        &mut self,
        configured_names: &HashSet<String>,
    ) -> Result<Vec<String>> {
        let mut removed = Vec::new();
        for name in self.db.source_names()? {
            if !configured_names.contains(&name) {
                info!("Removing unused cache data for audio source: {}", name);
                self.db.remove_data(&name)?;
                removed.push(name);
            }
        }
        self.sources.retain(|source| !removed.contains(&source.name));
        Ok(removed)
    }

    pub fn clear_all(&mut self) -> Result<()> {
        self.db.clear_all_audio_data()?;
        self.sources.clear();
        Ok(())
    }
}

impl WordLookup for AudioSourceManager<'_> {
    fn search_word(&self, word: &str) -> Result<Vec<FileUrlData>> {
        AudioSourceManager::search_word(self, word)
    }
}

/// Name the file is saved under: the reading (or pitch pattern) in katakana,
/// the pitch number if known, and a short key of the original file name so
/// that different recordings of the same reading don't overwrite each other.
pub fn desired_filename(
    reading: &str,
    pitch_number: Option<&str>,
    file_name: &str,
    ext: &str,
) -> String {
    let mut name: String = to_katakana(reading)
        .chars()
        .filter(|c| !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|'))
        .collect();
    if let Some(pitch) = pitch_number.filter(|pitch| !pitch.is_empty()) {
        name.push('_');
        name.push_str(pitch);
    }
    name.push('_');
    name.push_str(&hasher::short_key(file_name));
    name.push_str(ext);
    name
}
