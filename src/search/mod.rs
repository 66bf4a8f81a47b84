pub mod kana;
pub mod morph;
pub mod text;

use std::collections::HashSet;

use crate::audio::FileUrlData;
use crate::error::Result;
use crate::search::kana::{literal_pronunciation, to_hiragana, to_katakana};
use crate::search::morph::{InflectionClassifier, MorphemeAnalyzer};
use crate::search::text::{html_to_text_line, iter_tokens, split_possible_furigana};
use crate::utils::config::AudioSettings;

pub use morph::{Deconjugator, OkuriganaClassifier, ParsedToken};

/// Something that can resolve a single spelling to audio files.
pub trait WordLookup {
    fn search_word(&self, word: &str) -> Result<Vec<FileUrlData>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SearchOptions {
    pub split_morphemes: bool,
    pub ignore_inflections: bool,
    pub stop_if_one_source_has_results: bool,
}

impl From<&AudioSettings> for SearchOptions {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            split_morphemes: settings.split_morphemes,
            ignore_inflections: settings.ignore_inflections,
            stop_if_one_source_has_results: settings.stop_if_one_source_has_results,
        }
    }
}

/// Hits grouped by the word that produced them, in insertion order.
#[derive(Debug, Default)]
struct HitMap {
    entries: Vec<(String, Vec<FileUrlData>)>,
}

impl HitMap {
    fn entry(&mut self, word: &str) -> &mut Vec<FileUrlData> {
        let idx = match self.entries.iter().position(|(key, _)| key == word) {
            Some(idx) => idx,
            None => {
                self.entries.push((word.to_string(), Vec::new()));
                self.entries.len() - 1
            }
        };
        &mut self.entries[idx].1
    }

    fn is_empty_for(&self, word: &str) -> bool {
        self.entries
            .iter()
            .find(|(key, _)| key == word)
            .map_or(true, |(_, hits)| hits.is_empty())
    }

    /// Merges `other` in. Words present in both take `other`'s hits.
    fn update(&mut self, other: HitMap) {
        for (word, hits) in other.entries {
            *self.entry(&word) = hits;
        }
    }

    fn retain_each<F>(&mut self, mut keep: F)
    where
        F: FnMut(&FileUrlData) -> bool,
    {
        for (_, hits) in &mut self.entries {
            hits.retain(|hit| keep(hit));
        }
    }

    /// Per word, keeps only hits from the source of that word's first hit.
    fn take_first_source(&mut self) {
        for (_, hits) in &mut self.entries {
            if hits.len() > 1 {
                let first = hits[0].source_name.clone();
                hits.retain(|hit| hit.source_name == first);
            }
        }
    }

    fn into_flat(self) -> impl Iterator<Item = FileUrlData> {
        self.entries.into_iter().flat_map(|(_, hits)| hits)
    }
}

/// Multi-pass word search over every cached source.
pub struct SearchEngine<'a> {
    lookup: &'a dyn WordLookup,
    analyzer: &'a dyn MorphemeAnalyzer,
    classifier: &'a dyn InflectionClassifier,
    reading_separator: &'a str,
}

impl<'a> SearchEngine<'a> {
    pub fn new(
        lookup: &'a dyn WordLookup,
        analyzer: &'a dyn MorphemeAnalyzer,
        classifier: &'a dyn InflectionClassifier,
        reading_separator: &'a str,
    ) -> Self {
        Self {
            lookup,
            analyzer,
            classifier,
            reading_separator,
        }
    }

    /// Audio files for the words in `src_text`.
    ///
    /// The whole text is tried first, then its reading if one was given,
    /// then each token, then each token's morphemes. Never fails for lack
    /// of matches: the result is just empty.
    pub fn search_audio(&self, src_text: &str, options: SearchOptions) -> Result<Vec<FileUrlData>> {
        let (text, reading) =
            split_possible_furigana(&html_to_text_line(src_text), self.reading_separator);
        let mut hits = HitMap::default();

        let found = self.search_word_variants(&text)?;
        hits.entry(&text).extend(found);

        if let Some(reading) = reading.as_deref() {
            let wanted = literal_pronunciation(reading);
            hits.entry(&text)
                .retain(|hit| literal_pronunciation(&hit.reading) == wanted);

            if hits.is_empty_for(&text) {
                let found = self.search_word_variants(reading)?;
                hits.entry(&text).extend(found);
            }
        }

        if hits.is_empty_for(&text) {
            for part in iter_tokens(&text) {
                let files = self.search_word_variants(&part)?;
                if !files.is_empty() {
                    hits.entry(&part).extend(files);
                } else if options.split_morphemes {
                    hits.update(self.parse_and_search_audio(&part)?);
                }
            }
        }

        if options.ignore_inflections {
            hits.retain_each(|hit| !self.classifier.is_inflected(&hit.word, &hit.reading));
        }

        if options.stop_if_one_source_has_results {
            hits.take_first_source();
        }

        Ok(sorted_files(ensure_unique_files(hits.into_flat())))
    }

    /// The word as written, then in hiragana, then in katakana.
    fn search_word_variants(&self, word: &str) -> Result<Vec<FileUrlData>> {
        if word.is_empty() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let mut tried = HashSet::new();
        for variant in [word.to_string(), to_hiragana(word), to_katakana(word)] {
            if tried.insert(variant.clone()) {
                files.extend(self.lookup.search_word(&variant)?);
            }
        }
        Ok(files)
    }

    fn parse_and_search_audio(&self, part: &str) -> Result<HitMap> {
        let mut hits = HitMap::default();
        for parsed in self.analyzer.translate(part) {
            for variant in parsed.variants() {
                let files = self.search_word_variants(&variant)?;
                if !files.is_empty() {
                    hits.entry(&parsed.headword).extend(files);
                    // Remaining variants would only find the same files again.
                    break;
                }
            }
        }
        Ok(hits)
    }
}

/// Drops repeated (desired filename, reading, pitch) entries, keeping the
/// first one seen.
pub fn ensure_unique_files(hits: impl IntoIterator<Item = FileUrlData>) -> Vec<FileUrlData> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter(|hit| {
            seen.insert((
                hit.desired_filename.clone(),
                hit.reading.clone(),
                hit.pitch_number.clone(),
            ))
        })
        .collect()
}

/// Orders hits by pronunciation and pitch number. Stable, so equal keys keep
/// their search order.
pub fn sorted_files(mut hits: Vec<FileUrlData>) -> Vec<FileUrlData> {
    hits.sort_by_cached_key(|hit| (literal_pronunciation(&hit.reading), hit.pitch_number.clone()));
    hits
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct FakeLookup {
        words: HashMap<String, Vec<FileUrlData>>,
    }

    impl FakeLookup {
        fn add(
            &mut self,
            source: &str,
            headword: &str,
            file: &str,
            reading: &str,
            pitch: &str,
        ) -> &mut Self {
            self.words.entry(headword.to_string()).or_default().push(FileUrlData {
                url: format!("https://example.com/{}/{}", source, file),
                desired_filename: file.to_string(),
                word: headword.to_string(),
                source_name: source.to_string(),
                reading: reading.to_string(),
                pitch_number: pitch.to_string(),
            });
            self
        }
    }

    impl WordLookup for FakeLookup {
        fn search_word(&self, word: &str) -> Result<Vec<FileUrlData>> {
            Ok(self.words.get(word).cloned().unwrap_or_default())
        }
    }

    fn search(lookup: &FakeLookup, text: &str, options: SearchOptions) -> Vec<FileUrlData> {
        let analyzer = Deconjugator::new();
        let classifier = OkuriganaClassifier;
        SearchEngine::new(lookup, &analyzer, &classifier, "・")
            .search_audio(text, options)
            .expect("fake lookup never fails")
    }

    fn names(hits: &[FileUrlData]) -> Vec<&str> {
        hits.iter().map(|hit| hit.desired_filename.as_str()).collect()
    }

    fn all_on() -> SearchOptions {
        SearchOptions {
            split_morphemes: true,
            ..SearchOptions::default()
        }
    }

    #[test]
    fn test_exact_pass_unions_kana_variants() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("A", "ねこ", "neko_hira.ogg", "ねこ", "1")
            .add("A", "ネコ", "neko_kata.ogg", "ネコ", "1");
        let hits = search(&lookup, "<b>ねこ</b>", all_on());
        assert_eq!(names(&hits), vec!["neko_hira.ogg", "neko_kata.ogg"]);
        assert!(hits.iter().all(|hit| hit.source_name == "A"));
    }

    #[test]
    fn test_reading_filters_then_falls_back() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("A", "日", "hi.ogg", "ひ", "0")
            .add("A", "日", "nichi.ogg", "にち", "1")
            .add("A", "じつ", "jitsu.ogg", "じつ", "0");

        assert_eq!(names(&search(&lookup, "日・ヒ", all_on())), vec!["hi.ogg"]);
        // No file of 日 reads じつ, so the reading itself is searched.
        assert_eq!(names(&search(&lookup, "日・じつ", all_on())), vec!["jitsu.ogg"]);
    }

    #[test]
    fn test_tokens_and_morphemes() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("A", "猫", "neko.ogg", "ねこ", "1")
            .add("A", "食べる", "taberu.ogg", "たべる", "2");

        let hits = search(&lookup, "猫 食べた", all_on());
        assert_eq!(names(&hits), vec!["taberu.ogg", "neko.ogg"]);

        let without_split = search(&lookup, "猫 食べた", SearchOptions::default());
        assert_eq!(names(&without_split), vec!["neko.ogg"]);
    }

    #[test]
    fn test_ignore_inflections() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("A", "言う", "iu.ogg", "いう", "0")
            .add("A", "言う", "itta.ogg", "いった", "0");

        assert_eq!(search(&lookup, "言う", all_on()).len(), 2);
        let options = SearchOptions {
            ignore_inflections: true,
            ..all_on()
        };
        assert_eq!(names(&search(&lookup, "言う", options)), vec!["iu.ogg"]);
    }

    #[test]
    fn test_stop_if_one_source_has_results() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("First", "犬", "inu_a.ogg", "いぬ", "2")
            .add("Second", "犬", "inu_b.ogg", "いぬ", "1");

        assert_eq!(search(&lookup, "犬", all_on()).len(), 2);
        let options = SearchOptions {
            stop_if_one_source_has_results: true,
            ..all_on()
        };
        let hits = search(&lookup, "犬", options);
        assert_eq!(names(&hits), vec!["inu_a.ogg"]);
    }

    #[test]
    fn test_duplicates_collapse_and_order_is_stable() {
        let mut lookup = FakeLookup::default();
        lookup
            .add("A", "橋", "hashi_2.ogg", "はし", "2")
            .add("B", "橋", "hashi_2.ogg", "はし", "2")
            .add("B", "橋", "hashi_0.ogg", "ハシ", "0")
            .add("A", "橋", "kyou.ogg", "きょう", "0");

        let hits = search(&lookup, "橋", all_on());
        assert_eq!(names(&hits), vec!["kyou.ogg", "hashi_0.ogg", "hashi_2.ogg"]);
        assert_eq!(hits[2].source_name, "A");
        assert!(search(&lookup, "", all_on()).is_empty());
        assert!(search(&lookup, "存在しない", all_on()).is_empty());
    }
}
