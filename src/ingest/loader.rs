use std::fs;
use std::path::Path;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::database::CacheStore;
use crate::error::{Error, FetchCause, FetchError, Result};
use crate::fetch::HttpClient;
use crate::ingest::hasher;
use crate::ingest::index::SourceIndex;
use crate::ingest::source::AudioSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The index was (re)read and written to the cache.
    Loaded,
    /// The cache already holds this exact source. Nothing was written.
    Unchanged,
}

/// Brings one source into the cache.
///
/// A source that is cached under the same URL and whose content signature
/// still matches is left alone. Otherwise the index is fetched and validated
/// first, and only then is the old data evicted and the new data written.
pub fn load_source(
    db: &mut CacheStore,
    source: &AudioSource,
    http: &HttpClient,
    timeout: Duration,
) -> Result<LoadOutcome> {
    if db.is_source_cached(&source.name)? && is_up_to_date(db, source, http, timeout)? {
        debug!("Source {} is up to date", source.name);
        return Ok(LoadOutcome::Unchanged);
    }

    let (bytes, signature) = read_index(source, http, timeout)?;
    let index = SourceIndex::from_slice(&bytes)?;

    // Also clears a meta row left without headwords or files.
    db.replace_data(&source.name, &index, &source.url, &signature)?;
    info!(
        "Loaded source {} ({} headwords, {} files) from {}",
        source.name,
        index.headword_count(),
        index.file_count(),
        source.url
    );
    Ok(LoadOutcome::Loaded)
}

fn is_up_to_date(
    db: &CacheStore,
    source: &AudioSource,
    http: &HttpClient,
    timeout: Duration,
) -> Result<bool> {
    let cached_url = db.get_original_url(&source.name)?;
    if cached_url.as_deref() != Some(source.url.as_str()) {
        info!(
            "Source {} moved from {:?} to {}. Reloading.",
            source.name, cached_url, source.url
        );
        return Ok(false);
    }

    let Some(stored) = db.get_content_signature(&source.name)? else {
        return Ok(true);
    };
    let current = if source.is_local() {
        match hasher::local_signature(Path::new(&source.url)) {
            Ok(signature) => Some(signature),
            Err(e) => {
                warn!("Can't read {} to check for changes, keeping cached copy: {}", source.url, e);
                None
            }
        }
    } else {
        match http.head_signature(&source.url, timeout) {
            Ok(signature) => signature,
            Err(e) => {
                warn!("Can't check {} for changes, keeping cached copy: {}", source.url, e);
                None
            }
        }
    };

    match current {
        Some(current) if current != stored => {
            info!("Source {} changed since it was cached. Reloading.", source.name);
            Ok(false)
        }
        _ => Ok(true),
    }
}

fn read_index(
    source: &AudioSource,
    http: &HttpClient,
    timeout: Duration,
) -> Result<(Vec<u8>, String)> {
    if source.is_local() {
        let bytes = fs::read(&source.url).map_err(|e| {
            Error::Fetch(FetchError::new(
                source.url.clone(),
                format!("{} couldn't be read: {}", source.url, e),
                FetchCause::Io(e.to_string()),
            ))
        })?;
        let signature = format!("sha256:{}", hasher::hash_bytes(&bytes));
        Ok((bytes, signature))
    } else {
        let downloaded = http.get_with_retry(&source.url, timeout)?;
        let signature = downloaded.signature();
        Ok((downloaded.bytes, signature))
    }
}
