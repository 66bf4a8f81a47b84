//! Turning field content into searchable words.

use crate::search::kana::{is_japanese_char, is_kanji};

const ENTITIES: [(&str, &str); 6] = [
    ("&nbsp;", " "),
    ("&lt;", "<"),
    ("&gt;", ">"),
    ("&quot;", "\""),
    ("&#39;", "'"),
    ("&amp;", "&"),
];

/// Plain single-line text from HTML. Tags and `[sound:...]` references are
/// dropped and runs of whitespace collapse to one space.
pub fn html_to_text_line(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                in_tag = true;
                // Block level tags separate words.
                text.push(' ');
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c => text.push(c),
        }
    }

    let text = strip_sound_tags(&text);
    let text = ENTITIES
        .iter()
        .fold(text, |acc, (entity, replacement)| acc.replace(entity, replacement));
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn strip_sound_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("[sound:") {
        out.push_str(&rest[..start]);
        match rest[start..].find(']') {
            Some(end) => rest = &rest[start + end + 1..],
            None => {
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Splits `word・reading` style input into the word and its reading.
///
/// Anki furigana (`言葉[ことば]`) is understood as well. Pitch accent
/// numbers in brackets (`言葉[0]`) are ignored.
pub fn split_possible_furigana(text: &str, separator: &str) -> (String, Option<String>) {
    let text = text.trim();
    if !separator.is_empty() {
        if let Some((word, reading)) = text.split_once(separator) {
            let word = word.trim();
            let reading = reading.trim();
            if !word.is_empty() && !reading.is_empty() {
                return (word.to_string(), Some(reading.to_string()));
            }
        }
    }
    split_anki_furigana(text)
}

fn split_anki_furigana(text: &str) -> (String, Option<String>) {
    if !text.contains('[') {
        return (text.to_string(), None);
    }

    let mut word = String::new();
    let mut reading = String::new();
    // Kanji written since the last bracket or space; replaced by the
    // bracket content in the reading.
    let mut pending = String::new();
    let mut has_reading = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
        match c {
            '[' => {
                let inner: String = chars.by_ref().take_while(|&c| c != ']').collect();
                if inner.is_empty() || inner.chars().all(|c| c.is_ascii_digit()) {
                    reading.push_str(&pending);
                } else {
                    reading.push_str(&inner);
                    has_reading = true;
                }
                pending.clear();
            }
            ' ' => {
                reading.push_str(&pending);
                pending.clear();
            }
            c if is_kanji(c) => {
                word.push(c);
                pending.push(c);
            }
            c => {
                reading.push_str(&pending);
                pending.clear();
                word.push(c);
                reading.push(c);
            }
        }
    }
    reading.push_str(&pending);

    let reading = has_reading.then_some(reading);
    (word, reading)
}

/// Words worth looking up, in order of first appearance. Only tokens that
/// contain Japanese characters are kept.
pub fn iter_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in text.split(is_separator) {
        let token = token.trim();
        if token.is_empty() || !token.chars().any(is_japanese_char) {
            continue;
        }
        if !tokens.iter().any(|seen| seen == token) {
            tokens.push(token.to_string());
        }
    }
    tokens
}

fn is_separator(c: char) -> bool {
    c.is_whitespace()
        || c.is_ascii_punctuation()
        || matches!(
            c,
            '、' | '。' | '，' | '．' | '・' | '「' | '」' | '『' | '』' | '（' | '）'
                | '【' | '】' | '〜' | '～' | '！' | '？' | '：' | '；' | '…' | '〈' | '〉'
                | '《' | '》' | '\u{3000}'
        )
}
