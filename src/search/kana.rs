//! Kana conversion and reading normalization.

const HIRAGANA_START: u32 = 0x3041;
const HIRAGANA_END: u32 = 0x3096;
const KATAKANA_START: u32 = 0x30A1;
const KATAKANA_END: u32 = 0x30F6;
const KANA_OFFSET: u32 = KATAKANA_START - HIRAGANA_START;

const LONG_VOWEL_MARK: char = 'ー';

// Katakana grouped by the vowel they end in.
const VOWEL_ROWS: [(char, &str); 5] = [
    ('ア', "アカガサザタダナハバパマヤラワァャヮヵ"),
    ('イ', "イキギシジチヂニヒビピミリィヰ"),
    ('ウ', "ウクグスズツヅヌフブプムユルゥュッヴ"),
    ('エ', "エケゲセゼテデネヘベペメレェヱヶ"),
    ('オ', "オコゴソゾトドノホボポモヨロヲォョ"),
];

pub fn is_hiragana(c: char) -> bool {
    (HIRAGANA_START..=HIRAGANA_END).contains(&(c as u32)) || matches!(c, 'ゝ' | 'ゞ')
}

pub fn is_katakana(c: char) -> bool {
    (KATAKANA_START..=KATAKANA_END).contains(&(c as u32))
        || matches!(c, 'ヽ' | 'ヾ' | LONG_VOWEL_MARK)
        || ('\u{FF66}'..='\u{FF9F}').contains(&c)
}

pub fn is_kana(c: char) -> bool {
    is_hiragana(c) || is_katakana(c)
}

pub fn is_kanji(c: char) -> bool {
    ('\u{4E00}'..='\u{9FFF}').contains(&c) || ('\u{3400}'..='\u{4DBF}').contains(&c) || c == '々'
}

pub fn is_japanese_char(c: char) -> bool {
    is_kana(c) || is_kanji(c)
}

pub fn to_katakana(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ゝ' => 'ヽ',
            'ゞ' => 'ヾ',
            c if (HIRAGANA_START..=HIRAGANA_END).contains(&(c as u32)) => {
                char::from_u32(c as u32 + KANA_OFFSET).unwrap_or(c)
            }
            c => c,
        })
        .collect()
}

pub fn to_hiragana(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'ヽ' => 'ゝ',
            'ヾ' => 'ゞ',
            c if (KATAKANA_START..=KATAKANA_END).contains(&(c as u32)) => {
                char::from_u32(c as u32 - KANA_OFFSET).unwrap_or(c)
            }
            c => c,
        })
        .collect()
}

fn vowel_of(c: char) -> Option<char> {
    if c == 'ン' {
        return Some('ン');
    }
    VOWEL_ROWS
        .iter()
        .find(|(_, row)| row.contains(c))
        .map(|(vowel, _)| *vowel)
}

/// Canonical katakana spelling of how a reading sounds.
///
/// Spelling variants that sound the same collapse to one form:
/// `ヲ` is `オ`, `ヂ` is `ジ`, `ヅ` is `ズ`, and `ー` becomes the vowel
/// of the kana before it.
pub fn literal_pronunciation(reading: &str) -> String {
    let mut out = String::with_capacity(reading.len());
    let mut prev: Option<char> = None;
    for c in to_katakana(reading).chars() {
        let c = match c {
            'ヲ' => 'オ',
            'ヂ' => 'ジ',
            'ヅ' => 'ズ',
            LONG_VOWEL_MARK => prev.and_then(vowel_of).unwrap_or(LONG_VOWEL_MARK),
            c => c,
        };
        out.push(c);
        prev = Some(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversions() {
        assert_eq!(to_katakana("ひらがな"), "ヒラガナ");
        assert_eq!(to_hiragana("カタカナ"), "かたかな");
        assert_eq!(to_hiragana("コーヒー"), "こーひー");
        assert_eq!(to_katakana("漢字とかな"), "漢字トカナ");
        assert_eq!(to_hiragana(&to_katakana("ぁゔゖ")), "ぁゔゖ");
    }

    #[test]
    fn test_char_classes() {
        assert!(is_kanji('猫'));
        assert!(is_kanji('々'));
        assert!(is_hiragana('ね'));
        assert!(is_katakana('ー'));
        assert!(!is_japanese_char('a'));
        assert!(!is_japanese_char('。'));
    }

    #[test]
    fn test_literal_pronunciation() {
        assert_eq!(literal_pronunciation("おかあさん"), "オカアサン");
        assert_eq!(literal_pronunciation("オカーサン"), "オカアサン");
        assert_eq!(literal_pronunciation("つづく"), "ツズク");
        assert_eq!(literal_pronunciation("はなぢ"), "ハナジ");
        assert_eq!(literal_pronunciation("を"), "オ");
        assert_eq!(literal_pronunciation("ーあ"), "ーア");
    }
}
