use std::path::Path;

use tracing::{info, warn};

pub const AUDIO_SCHEMA_NAME: &str = "audio";
pub const AUDIO_SCHEMA_VERSION: i64 = 3;

pub const PITCH_SCHEMA_NAME: &str = "pitch";
pub const PITCH_SCHEMA_VERSION: i64 = 1;

pub const VERSION_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS version (
        schema_name TEXT PRIMARY KEY NOT NULL,
        number INTEGER NOT NULL
    );
";

// `source_name` is the name the user gave the source (e.g. NHK-2016).
// `dictionary_name` is the name given by the source's creator.
pub const AUDIO_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS meta (
        source_name TEXT PRIMARY KEY NOT NULL,
        dictionary_name TEXT NOT NULL,
        year INTEGER NOT NULL,
        version INTEGER NOT NULL,
        original_url TEXT,
        media_dir TEXT NOT NULL,
        media_dir_abs TEXT,
        content_signature TEXT
    );

    CREATE TABLE IF NOT EXISTS headwords (
        source_name TEXT NOT NULL,
        headword TEXT NOT NULL,
        file_name TEXT NOT NULL
    );

    CREATE TABLE IF NOT EXISTS files (
        source_name TEXT NOT NULL,
        file_name TEXT NOT NULL,
        kana_reading TEXT NOT NULL,
        pitch_pattern TEXT,
        pitch_number TEXT
    );

    CREATE INDEX IF NOT EXISTS index_names ON meta(source_name);
    CREATE INDEX IF NOT EXISTS index_file_names ON headwords(source_name, headword);
    CREATE INDEX IF NOT EXISTS index_file_info ON files(source_name, file_name);
";

pub const DROP_AUDIO_SCHEMA: &str = "
    DROP TABLE IF EXISTS meta;
    DROP TABLE IF EXISTS headwords;
    DROP TABLE IF EXISTS files;
";

pub const PITCH_SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS pitch_accents_formatted (
        headword TEXT NOT NULL,
        katakana_reading TEXT NOT NULL,
        html_notation TEXT NOT NULL,
        pitch_number TEXT NOT NULL,
        frequency INTEGER NOT NULL,
        source TEXT NOT NULL
    );

    CREATE INDEX IF NOT EXISTS index_pitch_accents_headword
    ON pitch_accents_formatted(headword);

    CREATE INDEX IF NOT EXISTS index_pitch_accents_reading
    ON pitch_accents_formatted(katakana_reading);

    -- Used when retrieving results and when reloading one provider's rows.
    CREATE INDEX IF NOT EXISTS index_pitch_accents_source
    ON pitch_accents_formatted(source);
";

pub const DROP_PITCH_SCHEMA: &str = "
    DROP TABLE IF EXISTS pitch_accents_formatted;
";

/// The on-disk cache file and the names it used to have.
pub struct DbFile {
    pub name: &'static str,
    pub deprecated: &'static [&'static str],
}

pub const CURRENT_DB: DbFile = DbFile {
    name: "audio_sources_v3.sqlite3",
    deprecated: &[
        "audio_sources.sqlite3",
        "audio_sources_v2.sqlite3",
        "pitch_accents.sqlite3",
    ],
};

impl DbFile {
    /// Deletes cache files left behind by older releases.
    /// Returns how many were removed.
    pub fn remove_deprecated_files(&self, dir: &Path) -> usize {
        let mut removed = 0;
        for name in self.deprecated {
            let path = dir.join(name);
            if !path.is_file() {
                continue;
            }
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    info!("Removed deprecated cache file {:?}", path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove deprecated cache file {:?}: {}", path, e),
            }
        }
        removed
    }
}
