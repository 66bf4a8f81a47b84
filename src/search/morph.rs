//! Morpheme analysis and inflection classification.
//!
//! Both are pluggable. The defaults here are rule based and need no
//! dictionary: the analyzer guesses dictionary forms of conjugated words,
//! and the classifier compares a headword's okurigana with a reading.

use crate::search::kana::{is_hiragana, is_kana, is_kanji, is_katakana, to_hiragana, to_katakana};

/// One morpheme as reported by an analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToken {
    /// Text as it appeared in the input.
    pub word: String,
    /// Dictionary form.
    pub headword: String,
    pub katakana_reading: Option<String>,
}

impl ParsedToken {
    /// Spellings to look up for this token, most specific first.
    pub fn variants(&self) -> Vec<String> {
        let mut variants = vec![self.headword.clone()];
        if let Some(reading) = self.katakana_reading.as_deref().filter(|r| !r.is_empty()) {
            variants.push(reading.to_string());
            variants.push(to_hiragana(reading));
        }
        variants
    }
}

pub trait MorphemeAnalyzer: Send + Sync {
    fn translate(&self, text: &str) -> Vec<ParsedToken>;
}

pub trait InflectionClassifier: Send + Sync {
    /// True if `reading` belongs to an inflected form of `headword` rather
    /// than the headword itself.
    fn is_inflected(&self, headword: &str, reading: &str) -> bool;
}

/// Splits text into kanji-with-okurigana and kana chunks and proposes the
/// dictionary forms each chunk could be a conjugation of.
#[derive(Debug, Default, Clone, Copy)]
pub struct Deconjugator;

impl Deconjugator {
    pub fn new() -> Self {
        Self
    }

    /// Candidate dictionary forms of `word`, without `word` itself.
    pub fn deconjugate(&self, word: &str) -> Vec<String> {
        let mut results = Vec::new();
        results.extend(self.deconjugate_teiru_form(word));
        results.extend(self.deconjugate_te_form(word));
        results.extend(self.deconjugate_masu_form(word));
        results.extend(self.deconjugate_negative(word));
        results.extend(self.deconjugate_i_adjective(word));
        results.retain(|base| base != word && !base.is_empty());
        dedup_in_order(results)
    }

    fn deconjugate_te_form(&self, word: &str) -> Vec<String> {
        let mut results = Vec::new();
        let Some((stem, voiced)) = strip_any(word, &["て", "た"])
            .map(|stem| (stem, false))
            .or_else(|| strip_any(word, &["で", "だ"]).map(|stem| (stem, true)))
        else {
            return results;
        };

        match stem {
            "し" => results.push("する".to_string()),
            "き" => results.push("くる".to_string()),
            "来" => results.push("来る".to_string()),
            "行っ" => results.push("行く".to_string()),
            _ => {}
        }

        if voiced {
            // 読んで, 泳いで
            if let Some(base) = stem.strip_suffix('ん') {
                for ending in ["む", "ぶ", "ぬ"] {
                    results.push(format!("{}{}", base, ending));
                }
            }
            if let Some(base) = stem.strip_suffix('い') {
                results.push(format!("{}ぐ", base));
            }
            return results;
        }

        if let Some(base) = stem.strip_suffix('っ') {
            for ending in ["う", "つ", "る"] {
                results.push(format!("{}{}", base, ending));
            }
        }
        if let Some(base) = stem.strip_suffix('い') {
            results.push(format!("{}く", base));
        }
        if let Some(base) = stem.strip_suffix('し') {
            results.push(format!("{}す", base));
        }
        // Ichidan: 食べて
        if !stem.is_empty() {
            results.push(format!("{}る", stem));
        }
        results
    }

    fn deconjugate_teiru_form(&self, word: &str) -> Vec<String> {
        for (suffix, te) in [
            ("ている", "て"),
            ("ていた", "て"),
            ("てる", "て"),
            ("でいる", "で"),
            ("でいた", "で"),
        ] {
            if let Some(stem) = word.strip_suffix(suffix) {
                return self.deconjugate_te_form(&format!("{}{}", stem, te));
            }
        }
        Vec::new()
    }

    fn deconjugate_masu_form(&self, word: &str) -> Vec<String> {
        let Some(stem) = strip_any(word, &["ました", "ません", "ます", "たい"]) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        match stem {
            "し" => results.push("する".to_string()),
            "き" => results.push("くる".to_string()),
            "来" => results.push("来る".to_string()),
            _ => {}
        }
        if let Some(base) = shift_last(stem, 'い', 'う') {
            results.push(base);
        }
        if !stem.is_empty() {
            results.push(format!("{}る", stem));
        }
        results
    }

    fn deconjugate_negative(&self, word: &str) -> Vec<String> {
        let Some(stem) = strip_any(word, &["なかった", "ない"]) else {
            return Vec::new();
        };
        let mut results = Vec::new();
        match stem {
            "し" => results.push("する".to_string()),
            "こ" => results.push("くる".to_string()),
            _ => {}
        }
        if let Some(base) = shift_last(stem, 'あ', 'う') {
            results.push(base);
        }
        if !stem.is_empty() && !stem.ends_with('く') {
            results.push(format!("{}る", stem));
        }
        results
    }

    fn deconjugate_i_adjective(&self, word: &str) -> Vec<String> {
        strip_any(word, &["かった", "くない", "くて", "ければ", "く"])
            .filter(|stem| !stem.is_empty())
            .map(|stem| vec![format!("{}い", stem)])
            .unwrap_or_default()
    }
}

impl MorphemeAnalyzer for Deconjugator {
    fn translate(&self, text: &str) -> Vec<ParsedToken> {
        let mut tokens = Vec::new();
        for chunk in split_chunks(text) {
            let mut forms = vec![chunk.clone()];
            forms.extend(self.deconjugate(&chunk));
            for headword in dedup_in_order(forms) {
                let katakana_reading =
                    headword.chars().all(is_kana).then(|| to_katakana(&headword));
                tokens.push(ParsedToken {
                    word: chunk.clone(),
                    headword,
                    katakana_reading,
                });
            }
        }
        tokens
    }
}

/// Kanji followed by their okurigana form one chunk. Katakana runs and
/// leading hiragana runs form their own chunks.
fn split_chunks(text: &str) -> Vec<String> {
    #[derive(PartialEq, Clone, Copy)]
    enum Kind {
        Kanji,
        Okurigana,
        Hiragana,
        Katakana,
        Other,
    }

    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut kind = Kind::Other;

    for c in text.chars() {
        let next = if is_kanji(c) {
            Kind::Kanji
        } else if is_hiragana(c) {
            match kind {
                Kind::Kanji | Kind::Okurigana => Kind::Okurigana,
                _ => Kind::Hiragana,
            }
        } else if is_katakana(c) {
            Kind::Katakana
        } else {
            Kind::Other
        };

        let continues = matches!(
            (kind, next),
            (Kind::Kanji, Kind::Kanji)
                | (Kind::Kanji, Kind::Okurigana)
                | (Kind::Okurigana, Kind::Okurigana)
                | (Kind::Hiragana, Kind::Hiragana)
                | (Kind::Katakana, Kind::Katakana)
        );
        if !continues && !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }
        if next != Kind::Other {
            current.push(c);
        }
        kind = next;
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    dedup_in_order(chunks)
}

fn strip_any<'a>(word: &'a str, suffixes: &[&str]) -> Option<&'a str> {
    suffixes.iter().find_map(|suffix| word.strip_suffix(suffix))
}

// Gojuon rows that conjugate, as (a, i, u, e, o).
const ROWS: [[char; 5]; 9] = [
    ['わ', 'い', 'う', 'え', 'お'],
    ['か', 'き', 'く', 'け', 'こ'],
    ['が', 'ぎ', 'ぐ', 'げ', 'ご'],
    ['さ', 'し', 'す', 'せ', 'そ'],
    ['た', 'ち', 'つ', 'て', 'と'],
    ['な', 'に', 'ぬ', 'ね', 'の'],
    ['ば', 'び', 'ぶ', 'べ', 'ぼ'],
    ['ま', 'み', 'む', 'め', 'も'],
    ['ら', 'り', 'る', 'れ', 'ろ'],
];

fn column(vowel: char) -> Option<usize> {
    ['あ', 'い', 'う', 'え', 'お'].iter().position(|&v| v == vowel)
}

/// Moves the last kana of `stem` from the `from` column to the `to` column,
/// e.g. 書き -> 書く.
fn shift_last(stem: &str, from: char, to: char) -> Option<String> {
    let (from, to) = (column(from)?, column(to)?);
    let last = stem.chars().last()?;
    let row = ROWS.iter().find(|row| row[from] == last)?;
    let head = &stem[..stem.len() - last.len_utf8()];
    Some(format!("{}{}", head, row[to]))
}

fn dedup_in_order(items: Vec<String>) -> Vec<String> {
    let mut seen = Vec::with_capacity(items.len());
    for item in items {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    seen
}

/// Treats a hit as inflected when the headword's trailing okurigana does not
/// end its reading, e.g. headword 言う with reading いった.
#[derive(Debug, Default, Clone, Copy)]
pub struct OkuriganaClassifier;

impl InflectionClassifier for OkuriganaClassifier {
    fn is_inflected(&self, headword: &str, reading: &str) -> bool {
        if !headword.chars().any(is_kanji) {
            return false;
        }
        let okurigana: String = {
            let mut tail: Vec<char> = headword.chars().rev().take_while(|&c| is_kana(c)).collect();
            tail.reverse();
            to_hiragana(&tail.into_iter().collect::<String>())
        };
        if okurigana.is_empty() {
            return false;
        }
        !to_hiragana(reading).ends_with(&okurigana)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn forms(word: &str) -> Vec<String> {
        Deconjugator::new().deconjugate(word)
    }

    #[test]
    fn test_te_and_ta_forms() {
        assert!(forms("食べて").contains(&"食べる".to_string()));
        assert!(forms("書いた").contains(&"書く".to_string()));
        assert!(forms("待って").contains(&"待つ".to_string()));
        assert!(forms("読んで").contains(&"読む".to_string()));
        assert!(forms("泳いだ").contains(&"泳ぐ".to_string()));
        assert!(forms("話した").contains(&"話す".to_string()));
        assert_eq!(forms("して")[0], "する");
        assert!(forms("行った").contains(&"行く".to_string()));
    }

    #[test]
    fn test_other_forms() {
        assert!(forms("書きます").contains(&"書く".to_string()));
        assert!(forms("食べません").contains(&"食べる".to_string()));
        assert!(forms("飲みたい").contains(&"飲む".to_string()));
        assert!(forms("書かない").contains(&"書く".to_string()));
        assert!(forms("言わなかった").contains(&"言う".to_string()));
        assert!(forms("高かった").contains(&"高い".to_string()));
        assert!(forms("見ている").contains(&"見る".to_string()));
        assert!(forms("猫").is_empty());
    }

    #[test]
    fn test_translate_splits_chunks() {
        let tokens = Deconjugator::new().translate("猫が食べた");
        let headwords: Vec<&str> = tokens.iter().map(|t| t.headword.as_str()).collect();
        assert_eq!(headwords[0], "猫が");
        assert!(headwords.contains(&"食べる"));

        let kana = Deconjugator::new().translate("コーヒー");
        assert_eq!(kana[0].katakana_reading.as_deref(), Some("コーヒー"));
        assert_eq!(kana[0].variants(), vec!["コーヒー", "コーヒー", "こーひー"]);
    }

    #[test]
    fn test_okurigana_classifier() {
        let classifier = OkuriganaClassifier;
        assert!(!classifier.is_inflected("言う", "いう"));
        assert!(classifier.is_inflected("言う", "いった"));
        assert!(!classifier.is_inflected("猫", "ねこ"));
        assert!(!classifier.is_inflected("ひらがな", "ひらがな"));
        assert!(!classifier.is_inflected("食べる", "タベル"));
    }
}
