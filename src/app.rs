use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{info, warn};

use crate::audio::{
    format_audio_tags, AudioSourceManager, FileUrlData, InitResult, NameUrl, TotalAudioStats,
};
use crate::background::BackgroundOp;
use crate::database::{load_pitch_tsv, CacheStore, PitchAccentEntry, CURRENT_DB};
use crate::error::{Error, Result};
use crate::fetch::{
    download_all, only_missing, save_files, FileSaveResults, HttpClient, SourceFileGetter,
};
use crate::ingest::AudioSource;
use crate::providers::ForvoClient;
use crate::search::morph::{InflectionClassifier, MorphemeAnalyzer};
use crate::search::{Deconjugator, OkuriganaClassifier, SearchEngine, SearchOptions};
use crate::utils::config::AppConfig;

/// Everything the front ends need, built once at start-up and passed around.
///
/// Queries hold the source lock for reading. Reconciliation, removal and
/// purging hold it for writing, so a query sees either the old source set
/// or the new one.
pub struct App {
    config: AppConfig,
    db_path: PathBuf,
    http: HttpClient,
    sources: RwLock<Vec<AudioSource>>,
    /// Held for the whole reconciliation pass. True once a pass has run in
    /// this process.
    reconciled: Mutex<bool>,
    analyzer: Box<dyn MorphemeAnalyzer>,
    classifier: Box<dyn InflectionClassifier>,
}

fn poisoned(what: &str) -> Error {
    Error::Cache(format!("{} lock is poisoned", what))
}

impl App {
    pub fn new(config: AppConfig, data_dir: &Path) -> Result<Self> {
        fs::create_dir_all(data_dir)?;
        CURRENT_DB.remove_deprecated_files(data_dir);
        let http = HttpClient::from_settings(&config.audio_settings);
        Ok(Self {
            db_path: data_dir.join(CURRENT_DB.name),
            http,
            config,
            sources: RwLock::new(Vec::new()),
            reconciled: Mutex::new(false),
            analyzer: Box::new(Deconjugator::new()),
            classifier: Box::new(OkuriganaClassifier),
        })
    }

    pub fn with_analyzer(mut self, analyzer: Box<dyn MorphemeAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    pub fn with_classifier(mut self, classifier: Box<dyn InflectionClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Sources that currently take part in searches.
    pub fn active_sources(&self) -> Result<Vec<AudioSource>> {
        Ok(self.sources.read().map_err(|_| poisoned("source"))?.clone())
    }

    fn lock_reconciled(&self) -> Result<MutexGuard<'_, bool>> {
        self.reconciled.lock().map_err(|_| poisoned("reconciliation"))
    }

    fn manager<'a>(
        &'a self,
        db: &'a mut CacheStore,
        sources: Vec<AudioSource>,
    ) -> AudioSourceManager<'a> {
        AudioSourceManager::new(db, &self.http, &self.config.audio_settings, sources)
    }

    /// Brings the cache in line with the configuration.
    ///
    /// Skipped when every enabled source is already active, unless `force`
    /// is set. A source that failed last time is not active, so it is
    /// retried. Sources that fail to load are reported in the result and
    /// left out of the active set. Cached sources that are no longer enabled
    /// are evicted.
    pub fn init_sources(&self, force: bool) -> Result<InitResult> {
        let mut reconciled = self.lock_reconciled()?;
        let configured: Vec<AudioSource> = self
            .config
            .enabled_sources()
            .into_iter()
            .map(AudioSource::from)
            .collect();
        let wanted: HashSet<NameUrl> = configured.iter().map(AudioSource::name_url).collect();

        let mut active = self.sources.write().map_err(|_| poisoned("source"))?;
        let current: HashSet<NameUrl> = active.iter().map(AudioSource::name_url).collect();
        if !force && *reconciled && current == wanted {
            info!("Audio sources are unchanged. Skipping reconciliation.");
            return Ok(InitResult::did_not_run(active.clone()));
        }

        let result = CacheStore::with_session(&self.db_path, |db| {
            let mut manager = self.manager(db, Vec::new());
            let mut result = manager.get_sources(&configured);
            let names: HashSet<String> = configured.iter().map(|s| s.name.clone()).collect();
            let removed = manager.remove_unused_audio_data(&names)?;
            result.sources.retain(|source| !removed.contains(&source.name));
            Ok(result)
        })?;

        info!(
            "Reconciled audio sources: {} active, {} failed, {} reloaded",
            result.sources.len(),
            result.errors.len(),
            result.reloaded.len()
        );
        *active = result.sources.clone();
        *reconciled = true;
        Ok(result)
    }

    pub fn init_sources_in_background(
        self: &Arc<Self>,
        force: bool,
    ) -> Result<BackgroundOp<InitResult>> {
        let app = Arc::clone(self);
        BackgroundOp::spawn("init-sources", move || app.init_sources(force))
    }

    /// Audio files for `text`, capped at `maximum_results`.
    pub fn search_audio(&self, text: &str, options: SearchOptions) -> Result<Vec<FileUrlData>> {
        let active = self.sources.read().map_err(|_| poisoned("source"))?;
        CacheStore::with_session(&self.db_path, |db| {
            let manager = self.manager(db, active.clone());
            let engine = SearchEngine::new(
                &manager,
                self.analyzer.as_ref(),
                self.classifier.as_ref(),
                &self.config.furigana.reading_separator,
            );
            let mut hits = engine.search_audio(text, options)?;
            hits.truncate(self.config.audio_settings.maximum_results);
            Ok(hits)
        })
    }

    /// Searches with the options from the configuration file.
    pub fn search_audio_default(&self, text: &str) -> Result<Vec<FileUrlData>> {
        self.search_audio(text, SearchOptions::from(&self.config.audio_settings))
    }

    pub fn total_stats(&self) -> Result<TotalAudioStats> {
        let active = self.sources.read().map_err(|_| poisoned("source"))?;
        CacheStore::with_session(&self.db_path, |db| {
            self.manager(db, active.clone()).total_stats()
        })
    }

    /// Every source present in the cache, configured or not.
    pub fn cached_sources(&self) -> Result<Vec<NameUrl>> {
        let _active = self.sources.read().map_err(|_| poisoned("source"))?;
        CacheStore::with_session(&self.db_path, |db| db.get_cached_sources())
    }

    /// Deletes the selected sources from the cache. Returns the ones that
    /// were cached. Sources that are still enabled come back on the next
    /// reconciliation.
    pub fn remove_sources(&self, selected: &HashSet<NameUrl>) -> Result<Vec<NameUrl>> {
        let _reconciled = self.lock_reconciled()?;
        let mut active = self.sources.write().map_err(|_| poisoned("source"))?;
        let removed = CacheStore::with_session(&self.db_path, |db| {
            self.manager(db, Vec::new()).remove_sources(selected)
        })?;
        active.retain(|source| !removed.iter().any(|gone| gone.name == source.name));
        Ok(removed)
    }

    /// Wipes all cached audio and pitch accent data.
    pub fn purge_everything(&self) -> Result<()> {
        let _reconciled = self.lock_reconciled()?;
        let mut active = self.sources.write().map_err(|_| poisoned("source"))?;
        CacheStore::with_session(&self.db_path, |db| {
            self.manager(db, Vec::new()).clear_all()?;
            db.clear_pitch_accents_table()
        })?;
        warn!("Purged the audio cache at {:?}", self.db_path);
        active.clear();
        Ok(())
    }

    /// Downloads the hits that are not in `media_dir` yet and writes them
    /// there.
    pub fn download_and_save_tags(
        &self,
        hits: &[FileUrlData],
        media_dir: &Path,
    ) -> Result<FileSaveResults> {
        fs::create_dir_all(media_dir)?;
        let missing = only_missing(hits, media_dir);
        info!("{} of {} files need downloading", missing.len(), hits.len());
        let getter = Arc::new(SourceFileGetter::new(
            self.http.clone(),
            self.config.audio_settings.audio_timeout(),
        ));
        Ok(save_files(download_all(getter, missing), media_dir))
    }

    pub fn download_in_background(
        self: &Arc<Self>,
        hits: Vec<FileUrlData>,
        media_dir: PathBuf,
    ) -> Result<BackgroundOp<FileSaveResults>> {
        let app = Arc::clone(self);
        BackgroundOp::spawn("download", move || {
            app.download_and_save_tags(&hits, &media_dir)
        })
    }

    /// `[sound:...]` tags joined by the configured separator.
    pub fn format_tags(&self, hits: &[FileUrlData]) -> String {
        format_audio_tags(hits, &self.config.audio_settings.tag_separator)
    }

    /// Replaces a provider's pitch accents with the rows of a TSV file.
    pub fn import_pitch_accents(&self, tsv: &Path, provider: &str) -> Result<usize> {
        let rows = load_pitch_tsv(tsv)?;
        CacheStore::with_session(&self.db_path, |db| {
            db.clear_pitch_accents(provider)?;
            db.insert_pitch_accent_data(&rows, provider)
        })?;
        info!("Imported {} pitch accent rows for provider {}", rows.len(), provider);
        Ok(rows.len())
    }

    pub fn search_pitch_accents(
        &self,
        word: &str,
        prefer: Option<&str>,
    ) -> Result<Vec<PitchAccentEntry>> {
        let prefer = prefer.unwrap_or(&self.config.pitch_accent.preferred_provider);
        CacheStore::with_session(&self.db_path, |db| db.search_pitch_accents(word, prefer))
    }

    pub fn forvo(&self) -> ForvoClient {
        ForvoClient::new(self.config.forvo.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::ParsedToken;
    use crate::utils::config::SourceConfig;
    use anyhow::Result;
    use serde_json::json;

    fn write_index(dir: &Path, name: &str, entries: &[(&str, &str, &str)]) -> Result<String> {
        let mut headwords = serde_json::Map::new();
        let mut files = serde_json::Map::new();
        for (headword, file, reading) in entries {
            headwords.insert(headword.to_string(), json!([file]));
            files.insert(file.to_string(), json!({"kana_reading": reading}));
        }
        let path = dir.join(format!("{}.json", name));
        fs::write(
            &path,
            json!({
                "meta": {"name": name, "year": 2024, "version": 1, "media_dir": "media"},
                "headwords": headwords,
                "files": files,
            })
            .to_string(),
        )?;
        Ok(path.to_string_lossy().into_owned())
    }

    fn source(name: &str, url: &str, enabled: bool) -> SourceConfig {
        SourceConfig {
            enabled,
            name: name.to_string(),
            url: url.to_string(),
        }
    }

    #[test]
    fn test_reconcile_then_skip() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let url = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let mut config = AppConfig::default();
        config.audio_sources.push(source("A", &url, true));
        let app = App::new(config, dir.path())?;

        let first = app.init_sources(false)?;
        assert!(first.did_run);
        assert_eq!(first.reloaded, vec!["A".to_string()]);
        assert_eq!(app.active_sources()?.len(), 1);

        let second = app.init_sources(false)?;
        assert!(!second.did_run);
        assert_eq!(second.sources.len(), 1);

        let forced = app.init_sources(true)?;
        assert!(forced.did_run);
        assert!(forced.reloaded.is_empty());

        let hits = app.search_audio("猫", SearchOptions::default())?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source_name, "A");
        assert_eq!(app.format_tags(&hits), format!("[sound:{}]", hits[0].desired_filename));
        Ok(())
    }

    #[test]
    fn test_disabled_source_is_evicted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let b = write_index(dir.path(), "B", &[("犬", "inu.ogg", "いぬ")])?;

        let mut config = AppConfig::default();
        config.audio_sources = vec![source("A", &a, true), source("B", &b, true)];
        App::new(config.clone(), dir.path())?.init_sources(false)?;

        config.audio_sources[1].enabled = false;
        let app = App::new(config, dir.path())?;
        app.init_sources(false)?;
        let cached: Vec<String> = app.cached_sources()?.into_iter().map(|s| s.name).collect();
        assert_eq!(cached, vec!["A".to_string()]);
        assert!(app.search_audio("犬", SearchOptions::default())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_failed_source_is_reported() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let missing = dir.path().join("missing.json").to_string_lossy().into_owned();

        let mut config = AppConfig::default();
        config.audio_sources = vec![source("Missing", &missing, true), source("A", &a, true)];
        let app = App::new(config, dir.path())?;
        let result = app.init_sources(false)?;
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].name, "Missing");
        assert_eq!(result.sources.len(), 1);
        Ok(())
    }

    #[test]
    fn test_remove_and_purge() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let mut config = AppConfig::default();
        config.audio_sources.push(source("A", &a, true));
        let app = App::new(config, dir.path())?;
        app.init_sources(false)?;

        let removed = app.remove_sources(&HashSet::from([NameUrl::new("A", a.clone())]))?;
        assert_eq!(removed.len(), 1);
        assert!(app.active_sources()?.is_empty());
        assert_eq!(app.total_stats()?.unique_files, 0);

        // The removed source is no longer active, so reconciliation runs again.
        assert!(app.init_sources(false)?.did_run);
        assert_eq!(app.total_stats()?.unique_files, 1);

        app.purge_everything()?;
        assert!(app.cached_sources()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_background_reconciliation() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let mut config = AppConfig::default();
        config.audio_sources.push(source("A", &a, true));
        let app = Arc::new(App::new(config, dir.path())?);

        let result = app.init_sources_in_background(false)?.wait()?;
        assert!(result.did_run);
        assert_eq!(app.search_audio_default("猫")?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_download_local_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        fs::create_dir_all(dir.path().join("media"))?;
        fs::write(dir.path().join("media").join("neko.ogg"), b"meow")?;

        let mut config = AppConfig::default();
        config.audio_sources.push(source("A", &a, true));
        let app = Arc::new(App::new(config, dir.path())?);
        app.init_sources(false)?;

        let hits = app.search_audio("猫", SearchOptions::default())?;
        let out = dir.path().join("collection");
        let saved = app.download_in_background(hits.clone(), out.clone())?.wait()?;
        assert_eq!(saved.successes.len(), 1);
        assert!(saved.fails.is_empty());
        assert_eq!(fs::read(out.join(&hits[0].desired_filename))?, b"meow");

        // Already present, nothing to fetch.
        let again = app.download_and_save_tags(&hits, &out)?;
        assert!(again.successes.is_empty() && again.fails.is_empty());
        Ok(())
    }

    #[test]
    fn test_pitch_import_and_search() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let tsv = dir.path().join("user.tsv");
        fs::write(&tsv, "猫\tネコ\t<b>ネ</b>コ\t1\t10\n")?;
        let app = App::new(AppConfig::default(), dir.path())?;
        assert_eq!(app.import_pitch_accents(&tsv, "user")?, 1);
        // Importing again replaces instead of appending.
        assert_eq!(app.import_pitch_accents(&tsv, "user")?, 1);

        let found = app.search_pitch_accents("ネコ", None)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].provider, "user");
        Ok(())
    }

    #[test]
    fn test_failed_source_is_retried_once_available() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let late = dir.path().join("Late.json");
        let mut config = AppConfig::default();
        config
            .audio_sources
            .push(source("Late", &late.to_string_lossy(), true));
        let app = App::new(config, dir.path())?;

        let first = app.init_sources(false)?;
        assert_eq!(first.errors.len(), 1);
        assert!(app.active_sources()?.is_empty());

        write_index(dir.path(), "Late", &[("猫", "neko.ogg", "ねこ")])?;
        let second = app.init_sources(false)?;
        assert!(second.did_run);
        assert!(second.errors.is_empty());
        assert_eq!(app.active_sources()?.len(), 1);
        assert_eq!(app.search_audio("猫", SearchOptions::default())?.len(), 1);

        assert!(!app.init_sources(false)?.did_run);
        Ok(())
    }

    /// Knows a single colloquial form.
    struct NicknameAnalyzer;

    impl MorphemeAnalyzer for NicknameAnalyzer {
        fn translate(&self, text: &str) -> Vec<ParsedToken> {
            if text != "ねこちゃん" {
                return Vec::new();
            }
            vec![ParsedToken {
                word: text.to_string(),
                headword: "猫".to_string(),
                katakana_reading: None,
            }]
        }
    }

    #[test]
    fn test_custom_analyzer_is_used_for_morphemes() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let a = write_index(dir.path(), "A", &[("猫", "neko.ogg", "ねこ")])?;
        let mut config = AppConfig::default();
        config.audio_sources.push(source("A", &a, true));
        let app = App::new(config, dir.path())?.with_analyzer(Box::new(NicknameAnalyzer));
        app.init_sources(false)?;

        let options = SearchOptions {
            split_morphemes: true,
            ..SearchOptions::default()
        };
        let hits = app.search_audio("ねこちゃん", options)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].word, "猫");
        assert!(app.search_audio("ねこちゃん", SearchOptions::default())?.is_empty());
        Ok(())
    }
}
