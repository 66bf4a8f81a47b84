use std::path::Path;

use rusqlite::params;
use serde::Serialize;
use tracing::{info, warn};

use crate::database::repo::CacheStore;
use crate::error::{Error, Result};

/// One row of a pitch accent dictionary, as shipped in TSV form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PitchAccentRow {
    pub headword: String,
    pub katakana_reading: String,
    pub html_notation: String,
    pub pitch_number: String,
    pub frequency: i64,
}

/// A stored pitch accent row together with the provider it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PitchAccentEntry {
    pub headword: String,
    pub katakana_reading: String,
    pub html_notation: String,
    pub pitch_number: String,
    pub frequency: i64,
    pub provider: String,
}

impl PitchAccentRow {
    /// Parses `headword\tkatakana_reading\thtml_notation\tpitch_number\tfrequency`.
    pub fn from_tsv_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split('\t').collect();
        if parts.len() < 5 {
            return None;
        }
        Some(Self {
            headword: parts[0].trim().to_string(),
            katakana_reading: parts[1].trim().to_string(),
            html_notation: parts[2].trim().to_string(),
            pitch_number: parts[3].trim().to_string(),
            frequency: parts[4].trim().parse().ok()?,
        })
    }
}

/// Reads a pitch accent TSV file. Malformed lines are skipped.
pub fn load_pitch_tsv(path: &Path) -> Result<Vec<PitchAccentRow>> {
    let content = std::fs::read_to_string(path)?;
    let mut rows = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match PitchAccentRow::from_tsv_line(line) {
            Some(row) => rows.push(row),
            None => warn!("Skipping malformed pitch accent line {} in {:?}", line_no + 1, path),
        }
    }
    if rows.is_empty() {
        return Err(Error::NotFound(format!("pitch accent rows in {:?}", path)));
    }
    Ok(rows)
}

impl CacheStore {
    pub fn get_pitch_accents_headword_count(&self) -> Result<u64> {
        let count: i64 = self.conn()?.query_row(
            "SELECT COUNT(DISTINCT headword) FROM pitch_accents_formatted",
            [],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    pub fn insert_pitch_accent_data(
        &mut self,
        rows: &[PitchAccentRow],
        provider_name: &str,
    ) -> Result<()> {
        let tx = self.conn_mut()?.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO pitch_accents_formatted
                 (headword, katakana_reading, html_notation, pitch_number, frequency, source)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;
            for row in rows {
                stmt.execute(params![
                    row.headword,
                    row.katakana_reading,
                    row.html_notation,
                    row.pitch_number,
                    row.frequency,
                    provider_name,
                ])?;
            }
        }
        tx.commit()?;
        info!("Stored {} pitch accent rows from provider {}", rows.len(), provider_name);
        Ok(())
    }

    /// Rows matching `word` by headword or reading.
    ///
    /// If the preferred provider has any matching row, only its rows are
    /// returned. Otherwise rows from every provider are. Order is frequency
    /// descending, then pitch number, then reading.
    pub fn search_pitch_accents(
        &self,
        word: &str,
        prefer_provider_name: &str,
    ) -> Result<Vec<PitchAccentEntry>> {
        let mut stmt = self.conn()?.prepare_cached(
            "SELECT DISTINCT
                headword, katakana_reading, html_notation, pitch_number, frequency, source
            FROM (
                WITH all_results AS (
                    SELECT * FROM pitch_accents_formatted
                    WHERE (headword = ?1 OR katakana_reading = ?1)
                ),
                preferred_results AS (
                    SELECT * FROM all_results
                    WHERE source = ?2
                )
                SELECT * FROM preferred_results
                UNION ALL
                SELECT * FROM all_results WHERE NOT EXISTS (SELECT 1 FROM preferred_results)
            )
            ORDER BY frequency DESC, pitch_number ASC, katakana_reading ASC",
        )?;
        let rows = stmt.query_map(params![word, prefer_provider_name], |row| {
            Ok(PitchAccentEntry {
                headword: row.get(0)?,
                katakana_reading: row.get(1)?,
                html_notation: row.get(2)?,
                pitch_number: row.get(3)?,
                frequency: row.get(4)?,
                provider: row.get(5)?,
            })
        })?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    pub fn clear_pitch_accents(&self, provider_name: &str) -> Result<()> {
        self.conn()?.execute(
            "DELETE FROM pitch_accents_formatted WHERE source = ?1",
            params![provider_name],
        )?;
        Ok(())
    }

    pub fn clear_pitch_accents_table(&self) -> Result<()> {
        self.conn()?.execute("DELETE FROM pitch_accents_formatted", [])?;
        Ok(())
    }

    /// Drops the table. The next session recreates it empty.
    pub fn delete_pitch_accents_table(&self) -> Result<()> {
        self.conn()?.execute_batch("DROP TABLE IF EXISTS pitch_accents_formatted")?;
        Ok(())
    }
}
