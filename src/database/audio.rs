use std::path::Path;

use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::debug;

use crate::audio::{AudioStats, NameUrl};
use crate::database::repo::{build_or_clause, CacheStore};
use crate::error::{Error, Result};
use crate::ingest::index::{FileInfo, SourceIndex};

/// A headword row joined with its owning source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundFile {
    pub headword: String,
    pub file_name: String,
    pub source_name: String,
}

impl BoundFile {
    /// File extension including the dot, or an empty string.
    pub fn ext(&self) -> String {
        Path::new(&self.file_name)
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }
}

impl CacheStore {
    pub fn search_files_in_source(
        &self,
        source_name: &str,
        headword: &str,
    ) -> Result<Vec<BoundFile>> {
        let mut stmt = self.conn()?.prepare_cached(
            "SELECT file_name FROM headwords WHERE source_name = ?1 AND headword = ?2",
        )?;
        let rows = stmt.query_map(params![source_name, headword], |row| {
            Ok(BoundFile {
                headword: headword.to_string(),
                file_name: row.get(0)?,
                source_name: source_name.to_string(),
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn search_files(&self, headword: &str) -> Result<Vec<BoundFile>> {
        let mut stmt = self
            .conn()?
            .prepare_cached("SELECT file_name, source_name FROM headwords WHERE headword = ?1")?;
        let rows = stmt.query_map(params![headword], |row| {
            Ok(BoundFile {
                headword: headword.to_string(),
                file_name: row.get(0)?,
                source_name: row.get(1)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_file_info(&self, source_name: &str, file_name: &str) -> Result<FileInfo> {
        self.conn()?
            .query_row(
                "SELECT kana_reading, pitch_pattern, pitch_number FROM files
                 WHERE source_name = ?1 AND file_name = ?2
                 LIMIT 1",
                params![source_name, file_name],
                |row| {
                    Ok(FileInfo {
                        kana_reading: row.get(0)?,
                        pitch_pattern: row.get(1)?,
                        pitch_number: row.get(2)?,
                    })
                },
            )
            .optional()?
            .ok_or_else(|| {
                Error::NotFound(format!("file '{}' in source '{}'", file_name, source_name))
            })
    }

    /// Bulk-loads a validated index. Meta, headwords and files are written in
    /// one transaction.
    pub fn insert_data(&mut self, source_name: &str, data: &SourceIndex) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        insert_rows(&tx, source_name, data)?;
        tx.commit()?;
        debug!(
            "Inserted {} headwords and {} files for source {}",
            data.headword_count(),
            data.file_count(),
            source_name
        );
        Ok(())
    }

    /// Swaps whatever is cached for `source_name` with `data` and records
    /// where it came from. Either every write lands or none does, so a
    /// failed update keeps the previous data.
    pub fn replace_data(
        &mut self,
        source_name: &str,
        data: &SourceIndex,
        original_url: &str,
        signature: &str,
    ) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        delete_rows(&tx, source_name)?;
        insert_rows(&tx, source_name, data)?;
        tx.execute(
            "UPDATE meta SET original_url = ?1, content_signature = ?2 WHERE source_name = ?3",
            params![original_url, signature, source_name],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Removes everything known about one source. Callers never observe a
    /// partially removed source.
    pub fn remove_data(&mut self, source_name: &str) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        delete_rows(&tx, source_name)?;
        tx.commit()?;
        Ok(())
    }

    pub fn clear_all_audio_data(&mut self) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        tx.execute_batch(
            "DELETE FROM headwords;
             DELETE FROM files;
             DELETE FROM meta;",
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn distinct_file_count(&self, source_names: &[String]) -> Result<u64> {
        if source_names.is_empty() {
            return Ok(0);
        }
        // File names in different sources may collide. The dictionary name
        // and the original url tell them apart.
        let query = format!(
            "SELECT COUNT(*) FROM (
                SELECT DISTINCT f.file_name, m.dictionary_name, m.original_url
                FROM files f
                INNER JOIN meta m ON f.source_name = m.source_name
                WHERE {}
            )",
            build_or_clause("f.source_name", source_names.len())
        );
        let count: i64 = self
            .conn()?
            .query_row(&query, params_from_iter(source_names.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn distinct_headword_count(&self, source_names: &[String]) -> Result<u64> {
        if source_names.is_empty() {
            return Ok(0);
        }
        let query = format!(
            "SELECT COUNT(*) FROM (SELECT DISTINCT headword FROM headwords WHERE {})",
            build_or_clause("source_name", source_names.len())
        );
        let count: i64 = self
            .conn()?
            .query_row(&query, params_from_iter(source_names.iter()), |row| row.get(0))?;
        Ok(count as u64)
    }

    pub fn get_stats_by_name(&self, source: &NameUrl) -> Result<Option<AudioStats>> {
        let stats = self
            .conn()?
            .query_row(
                "SELECT
                    (SELECT COUNT(DISTINCT headword) FROM headwords
                     WHERE source_name = m.source_name),
                    (SELECT COUNT(DISTINCT file_name) FROM files
                     WHERE source_name = m.source_name)
                 FROM meta m
                 WHERE m.source_name = ?1 AND m.original_url = ?2",
                params![source.name, source.url],
                |row| {
                    Ok(AudioStats {
                        source_name: source.name.clone(),
                        num_headwords: row.get::<_, i64>(0)? as u64,
                        num_files: row.get::<_, i64>(1)? as u64,
                    })
                },
            )
            .optional()?;
        Ok(stats)
    }

    /// Every source with a meta row, whether or not it has any data.
    pub fn source_names(&self) -> Result<Vec<String>> {
        let mut stmt = self.conn()?.prepare("SELECT source_name FROM meta")?;
        let rows = stmt.query_map([], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Sources that have both headword and file rows.
    pub fn get_cached_sources(&self) -> Result<Vec<NameUrl>> {
        let mut stmt = self.conn()?.prepare(
            "SELECT m.source_name, m.original_url
             FROM meta m
             WHERE EXISTS (SELECT 1 FROM headwords WHERE source_name = m.source_name LIMIT 1)
             AND EXISTS (SELECT 1 FROM files WHERE source_name = m.source_name LIMIT 1)",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(NameUrl::new(
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?.unwrap_or_default(),
            ))
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn get_source_by_name(&self, source_name: &str) -> Result<Option<NameUrl>> {
        let source = self
            .conn()?
            .query_row(
                "SELECT m.source_name, m.original_url
                 FROM meta m
                 WHERE m.source_name = ?1
                 AND EXISTS (SELECT 1 FROM headwords WHERE source_name = m.source_name LIMIT 1)
                 AND EXISTS (SELECT 1 FROM files WHERE source_name = m.source_name LIMIT 1)",
                params![source_name],
                |row| {
                    Ok(NameUrl::new(
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                    ))
                },
            )
            .optional()?;
        Ok(source)
    }

    /// True if a source with this name has meta, headword and file rows.
    pub fn is_source_cached(&self, source_name: &str) -> Result<bool> {
        let conn = self.conn()?;
        for query in [
            "SELECT 1 FROM meta WHERE source_name = ?1 LIMIT 1",
            "SELECT 1 FROM headwords WHERE source_name = ?1 LIMIT 1",
            "SELECT 1 FROM files WHERE source_name = ?1 LIMIT 1",
        ] {
            let found: Option<i64> = conn
                .query_row(query, params![source_name], |row| row.get(0))
                .optional()?;
            if found.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_media_dir_abs(&self, source_name: &str) -> Result<Option<String>> {
        self.meta_column(source_name, "media_dir_abs")
    }

    pub fn get_media_dir_rel(&self, source_name: &str) -> Result<String> {
        self.meta_column(source_name, "media_dir")?
            .ok_or_else(|| Error::NotFound(format!("media dir of source '{}'", source_name)))
    }

    pub fn get_original_url(&self, source_name: &str) -> Result<Option<String>> {
        self.meta_column(source_name, "original_url")
    }

    pub fn set_original_url(&self, source_name: &str, new_url: &str) -> Result<()> {
        self.conn()?.execute(
            "UPDATE meta SET original_url = ?1 WHERE source_name = ?2",
            params![new_url, source_name],
        )?;
        Ok(())
    }

    pub fn get_content_signature(&self, source_name: &str) -> Result<Option<String>> {
        self.meta_column(source_name, "content_signature")
    }

    pub fn get_dictionary_name(&self, source_name: &str) -> Result<Option<String>> {
        self.meta_column(source_name, "dictionary_name")
    }

    /// Reads one nullable text column of a meta row. `NotFound` if the
    /// source has no meta row at all.
    fn meta_column(&self, source_name: &str, column: &'static str) -> Result<Option<String>> {
        let query = format!("SELECT {} FROM meta WHERE source_name = ?1 LIMIT 1", column);
        self.conn()?
            .query_row(&query, params![source_name], |row| row.get::<_, Option<String>>(0))
            .optional()?
            .ok_or_else(|| Error::NotFound(format!("audio source '{}'", source_name)))
    }
}

fn delete_rows(conn: &Connection, source_name: &str) -> Result<()> {
    conn.execute("DELETE FROM headwords WHERE source_name = ?1", params![source_name])?;
    conn.execute("DELETE FROM files WHERE source_name = ?1", params![source_name])?;
    conn.execute("DELETE FROM meta WHERE source_name = ?1", params![source_name])?;
    Ok(())
}

fn insert_rows(conn: &Connection, source_name: &str, data: &SourceIndex) -> Result<()> {
    conn.execute(
        "INSERT INTO meta
         (source_name, dictionary_name, year, version, original_url, media_dir, media_dir_abs)
         VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
        params![
            source_name,
            data.meta.name,
            data.meta.year,
            data.meta.version,
            data.meta.media_dir,
            data.meta.media_dir_abs,
        ],
    )?;

    let mut stmt_headword = conn
        .prepare("INSERT INTO headwords (source_name, headword, file_name) VALUES (?1, ?2, ?3)")?;
    for (headword, file_names) in &data.headwords {
        for file_name in file_names {
            stmt_headword.execute(params![source_name, headword, file_name])?;
        }
    }

    let mut stmt_file = conn.prepare(
        "INSERT INTO files (source_name, file_name, kana_reading, pitch_pattern, pitch_number)
         VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for (file_name, info) in &data.files {
        stmt_file.execute(params![
            source_name,
            file_name,
            info.kana_reading,
            info.pitch_pattern,
            info.pitch_number,
        ])?;
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::database::repo::tests::tmp_store;
    use anyhow::Result;
    use serde_json::json;

    pub(crate) fn sample_index(
        dictionary: &str,
        files: &[(&str, &str, &str, Option<&str>)],
    ) -> SourceIndex {
        // (headword, file_name, kana_reading, pitch_number)
        let mut headwords = serde_json::Map::new();
        let mut file_map = serde_json::Map::new();
        for (headword, file_name, reading, pitch) in files {
            if let Some(list) = headwords
                .entry(headword.to_string())
                .or_insert_with(|| json!([]))
                .as_array_mut()
            {
                list.push(json!(file_name));
            }
            file_map.insert(
                file_name.to_string(),
                json!({"kana_reading": reading, "pitch_number": pitch}),
            );
        }
        SourceIndex::from_value(json!({
            "meta": {"name": dictionary, "year": 2024, "version": 1, "media_dir": "media"},
            "headwords": headwords,
            "files": file_map,
        }))
        .expect("valid sample index")
    }

    #[test]
    fn test_insert_and_search() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        let index = sample_index(
            "NHK",
            &[
                ("ひらがな", "hiragana_1.ogg", "ひらがな", Some("0")),
                ("ひらがな", "hiragana_2.ogg", "ひらがな", Some("0")),
                ("平仮名", "hiragana_1.ogg", "ひらがな", Some("0")),
            ],
        );
        store.insert_data("NHK-2016", &index)?;
        store.set_original_url("NHK-2016", "/tmp/nhk/index.json")?;

        let files = store.search_files_in_source("NHK-2016", "ひらがな")?;
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].ext(), ".ogg");
        assert_eq!(store.search_files("平仮名")?.len(), 1);
        assert!(store.search_files_in_source("other", "ひらがな")?.is_empty());

        let info = store.get_file_info("NHK-2016", "hiragana_2.ogg")?;
        assert_eq!(info.kana_reading, "ひらがな");
        assert_eq!(info.pitch_number.as_deref(), Some("0"));
        assert!(matches!(
            store.get_file_info("NHK-2016", "missing.ogg"),
            Err(Error::NotFound(_))
        ));

        assert!(store.is_source_cached("NHK-2016")?);
        assert_eq!(store.get_original_url("NHK-2016")?.as_deref(), Some("/tmp/nhk/index.json"));
        assert_eq!(store.get_media_dir_rel("NHK-2016")?, "media");
        assert_eq!(store.get_media_dir_abs("NHK-2016")?, None);
        assert_eq!(
            store.get_cached_sources()?,
            vec![NameUrl::new("NHK-2016", "/tmp/nhk/index.json")]
        );
        Ok(())
    }

    #[test]
    fn test_counts_and_eviction() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        store.insert_data(
            "A",
            &sample_index(
                "Dict A",
                &[("猫", "neko.ogg", "ねこ", Some("1")), ("犬", "inu.ogg", "いぬ", Some("2"))],
            ),
        )?;
        store.insert_data("B", &sample_index("Dict B", &[("猫", "neko.ogg", "ねこ", Some("1"))]))?;
        store.set_original_url("A", "a.json")?;
        store.set_original_url("B", "b.json")?;

        let both = vec!["A".to_string(), "B".to_string()];
        // Same file name, different dictionaries: counted twice.
        assert_eq!(store.distinct_file_count(&both)?, 3);
        assert_eq!(store.distinct_headword_count(&both)?, 2);
        assert_eq!(store.distinct_file_count(&[])?, 0);

        let stats = store.get_stats_by_name(&NameUrl::new("A", "a.json"))?.expect("stats for A");
        assert_eq!((stats.num_files, stats.num_headwords), (2, 2));
        assert!(store.get_stats_by_name(&NameUrl::new("A", "wrong.json"))?.is_none());

        store.remove_data("A")?;
        let only_a = vec!["A".to_string()];
        assert_eq!(store.distinct_file_count(&only_a)?, 0);
        assert_eq!(store.distinct_headword_count(&only_a)?, 0);
        assert!(!store.is_source_cached("A")?);
        assert_eq!(store.source_names()?, vec!["B".to_string()]);
        assert_eq!(store.get_cached_sources()?, vec![NameUrl::new("B", "b.json")]);
        assert!(store.get_source_by_name("A")?.is_none());

        store.clear_all_audio_data()?;
        assert!(store.source_names()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_meta_without_rows_is_not_cached() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        store.insert_data("Empty", &sample_index("Empty", &[]))?;
        assert_eq!(store.source_names()?, vec!["Empty".to_string()]);
        assert!(!store.is_source_cached("Empty")?);
        assert!(store.get_cached_sources()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_duplicate_insert_rolls_back() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        let index = sample_index("Dict", &[("猫", "neko.ogg", "ねこ", None)]);
        store.insert_data("A", &index)?;
        // Primary key on meta rejects the second insert before any row lands.
        assert!(store.insert_data("A", &index).is_err());
        assert_eq!(store.search_files_in_source("A", "猫")?.len(), 1);
        Ok(())
    }

    #[test]
    fn test_replace_data_records_origin() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        let old = sample_index("Old", &[("猫", "neko.ogg", "ねこ", None)]);
        store.replace_data("A", &old, "a.json", "sha256:1")?;
        let new = sample_index("New", &[("犬", "inu.ogg", "いぬ", Some("2"))]);
        store.replace_data("A", &new, "b.json", "sha256:2")?;

        assert!(store.search_files_in_source("A", "猫")?.is_empty());
        assert_eq!(store.search_files_in_source("A", "犬")?.len(), 1);
        assert_eq!(store.get_dictionary_name("A")?.as_deref(), Some("New"));
        assert_eq!(store.get_original_url("A")?.as_deref(), Some("b.json"));
        assert_eq!(store.get_content_signature("A")?.as_deref(), Some("sha256:2"));

        store.set_original_url("A", "c.json")?;
        assert_eq!(store.get_original_url("A")?.as_deref(), Some("c.json"));
        assert!(matches!(store.get_dictionary_name("Nope"), Err(Error::NotFound(_))));
        Ok(())
    }

    #[test]
    fn test_failed_replace_keeps_previous_data() -> Result<()> {
        let (_dir, mut store) = tmp_store()?;
        let old = sample_index("Old", &[("猫", "neko.ogg", "ねこ", None)]);
        store.replace_data("A", &old, "a.json", "sha256:1")?;

        store.conn()?.execute_batch(
            "CREATE TEMP TRIGGER reject_bad BEFORE INSERT ON files
             WHEN NEW.file_name = 'bad.ogg'
             BEGIN SELECT RAISE(ABORT, 'rejected'); END;",
        )?;
        let broken = sample_index(
            "New",
            &[("犬", "inu.ogg", "いぬ", None), ("悪", "bad.ogg", "わる", None)],
        );
        assert!(store.replace_data("A", &broken, "b.json", "sha256:2").is_err());

        assert_eq!(store.search_files_in_source("A", "猫")?.len(), 1);
        assert!(store.search_files_in_source("A", "犬")?.is_empty());
        assert_eq!(store.get_original_url("A")?.as_deref(), Some("a.json"));
        assert_eq!(store.get_content_signature("A")?.as_deref(), Some("sha256:1"));
        Ok(())
    }
}
