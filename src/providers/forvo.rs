//! Scraper for forvo.com word and search pages.

use std::time::Duration;

use base64::{engine::general_purpose, Engine as _};
use tracing::{debug, warn};

use crate::audio::FileUrlData;
use crate::error::Result;
use crate::fetch::HttpClient;
use crate::providers::AudioProvider;
use crate::utils::config::ForvoConfig;

const SERVER_HOST: &str = "https://forvo.com";
const AUDIO_HTTP_HOST: &str = "https://audio12.forvo.com";

pub const WORD_SOURCE_NAME: &str = "Forvo Word";
pub const SEARCH_SOURCE_NAME: &str = "Forvo Search";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForvoGender {
    Male,
    Female,
}

impl ForvoGender {
    pub fn symbol(self) -> &'static str {
        match self {
            ForvoGender::Male => "♂",
            ForvoGender::Female => "♀",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForvoPronunciation {
    pub word: String,
    pub username: String,
    pub audio_url: String,
    pub gender: Option<ForvoGender>,
    pub country: Option<String>,
}

impl ForvoPronunciation {
    /// `word_forvo_username[_gender][_country].ext`
    pub fn make_filename(&self) -> String {
        let mut components = vec![self.word.as_str(), "forvo", self.username.as_str()];
        if let Some(gender) = self.gender {
            components.push(gender.symbol());
        }
        if let Some(country) = self.country.as_deref() {
            components.push(country);
        }
        format!("{}.{}", components.join("_"), file_type(&self.audio_url))
    }
}

/// For search results the author is unknown, so only the language is kept.
pub fn make_search_result_filename(audio_url: &str, word: &str, lang: &str) -> String {
    format!("{}_forvo_{}.{}", word, lang, file_type(audio_url))
}

/// Extension of a file path, e.g. `9478059/76/9478059_76_13287.mp3` -> `mp3`.
fn file_type(file: &str) -> &str {
    file.rsplit('.').next().unwrap_or(file)
}

fn decode_play_arg(play_arg: &str) -> Option<String> {
    let bytes = general_purpose::STANDARD.decode(play_arg.trim()).ok()?;
    String::from_utf8(bytes).ok().filter(|path| !path.is_empty())
}

/// Audio URL from the `onclick` handler of a play button, e.g.
/// `Play(3060224,'OTQyN...','OTQyN..',false,'Yy9wL2Nw...','Yy9wL...','h')`.
///
/// The normalized file is preferred. Pronunciations without one fall back
/// to the raw file.
pub fn extract_url(onclick: &str, extension: &str) -> Option<String> {
    let play_args: Vec<&str> = onclick
        .split(|c: char| matches!(c, '\'' | ',' | '(' | ')'))
        .filter(|arg| !arg.is_empty())
        .skip(1)
        .collect();

    let (normalized_arg, raw_arg) = if extension == "ogg" { (5, 2) } else { (4, 1) };

    if let Some(file) = play_args.get(normalized_arg).and_then(|arg| decode_play_arg(arg)) {
        return Some(format!("{}/audios/{}/{}", AUDIO_HTTP_HOST, file_type(&file), file));
    }
    let file = play_args.get(raw_arg).and_then(|arg| decode_play_arg(arg))?;
    Some(format!("{}/{}/{}", AUDIO_HTTP_HOST, file_type(&file), file))
}

/// Text content with every text node trimmed and glued together, e.g.
/// `Pronunciation bystrawberrybrown(Female from Japan)`.
fn stripped_text(html: &str) -> String {
    let mut text = String::new();
    let mut node = String::new();
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => {
                text.push_str(node.trim());
                node.clear();
                in_tag = true;
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c => node.push(c),
        }
    }
    text.push_str(node.trim());
    text.replace("&nbsp;", "").replace("&amp;", "&")
}

fn attribute<'h>(element: &'h str, name: &str) -> Option<&'h str> {
    let needle = format!("{}=\"", name);
    let start = element.find(&needle)? + needle.len();
    let len = element[start..].find('"')?;
    Some(&element[start..start + len])
}

fn unescape(value: &str) -> String {
    value.replace("&#039;", "'").replace("&#39;", "'").replace("&quot;", "\"").replace("&amp;", "&")
}

fn has_class(tag: &str, class: &str) -> bool {
    attribute(tag, "class").is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

/// `<li>` items of every list with `list_class`, each split into the
/// attributes of its opening tag and its inner markup.
fn list_items<'h>(html: &'h str, list_class: &str) -> Vec<(&'h str, &'h str)> {
    let mut items = Vec::new();
    let mut rest = html;
    while let Some(start) = rest.find("<ul") {
        let list = &rest[start..];
        let end = list.find("</ul>").unwrap_or(list.len());
        let body = &list[..end];
        let tag_end = body.find('>').unwrap_or(body.len());
        if has_class(&body[..tag_end], list_class) {
            for chunk in body[tag_end..].split("<li").skip(1) {
                let chunk = chunk.find("</li>").map_or(chunk, |close| &chunk[..close]);
                let (attrs, inner) = chunk.split_once('>').unwrap_or((chunk, ""));
                items.push((attrs, inner));
            }
        }
        rest = list[end..].get("</ul>".len()..).unwrap_or("");
    }
    items
}

fn find_username(text: &str) -> String {
    text.split_once("Pronunciation by")
        .map(|(_, rest)| rest.split(['(', ')']).next().unwrap_or("").trim())
        .filter(|name| !name.is_empty())
        .unwrap_or("Unknown")
        .to_string()
}

fn find_gender(text: &str) -> Option<ForvoGender> {
    if text.contains("(Male") {
        Some(ForvoGender::Male)
    } else if text.contains("(Female") {
        Some(ForvoGender::Female)
    } else {
        None
    }
}

fn find_country(text: &str) -> Option<String> {
    ["(Male from ", "(Female from "]
        .iter()
        .filter_map(|marker| text.find(marker).map(|pos| pos + marker.len()))
        .min()
        .map(|start| text[start..].split(['(', ')']).next().unwrap_or("").trim().to_string())
        .filter(|country| !country.is_empty())
}

pub struct ForvoClient {
    config: ForvoConfig,
    http: HttpClient,
    timeout: Duration,
}

impl ForvoClient {
    pub fn new(mut config: ForvoConfig) -> Self {
        let http = HttpClient::new(config.retry_attempts.clamp(2, 33));
        let timeout = Duration::from_secs(config.timeout_seconds.max(1));
        config.preferred_countries = config
            .preferred_countries
            .iter()
            .map(|country| country.to_lowercase())
            .collect();
        Self { config, http, timeout }
    }

    fn word_url(&self, word: &str) -> String {
        format!("{}/word/{}/", SERVER_HOST, urlencoding::encode(word))
    }

    fn search_url(&self, word: &str) -> String {
        format!(
            "{}/search/{}/{}/",
            SERVER_HOST,
            urlencoding::encode(word),
            self.config.language
        )
    }

    /// Pronunciations listed for `word` in the configured language.
    pub fn parse_word_page(&self, html: &str, word: &str) -> Vec<ForvoPronunciation> {
        let marker = format!("id=\"language-container-{}\"", self.config.language);
        let Some(start) = html.find(&marker) else {
            debug!("Forvo has no {} section for {}", self.config.language, word);
            return Vec::new();
        };
        let section = &html[start + marker.len()..];
        let section = section
            .find("id=\"language-container-")
            .map_or(section, |end| &section[..end]);

        let mut pronunciations = Vec::new();
        for (attrs, item) in list_items(section, "pronunciations-list") {
            // Ads are list items too.
            if has_class(attrs, "li-ad") {
                continue;
            }
            let Some(audio_url) = attribute(item, "onclick")
                .and_then(|play| extract_url(&unescape(play), "ogg"))
            else {
                warn!("Skipping a Forvo pronunciation of {} without a playable file", word);
                continue;
            };
            let text = stripped_text(item);
            let mut pronunciation = ForvoPronunciation {
                word: word.to_string(),
                username: find_username(&text),
                audio_url,
                gender: None,
                country: None,
            };
            if self.config.show_gender {
                pronunciation.gender = find_gender(&text);
            }
            if self.config.show_country || !self.config.preferred_countries.is_empty() {
                pronunciation.country = find_country(&text);
            }
            pronunciations.push(pronunciation);
        }

        if !self.config.preferred_usernames.is_empty()
            || !self.config.preferred_countries.is_empty()
        {
            self.sort_pronunciations(&mut pronunciations);
        }
        pronunciations
    }

    /// Preferred usernames first, then preferred countries. Everyone else
    /// keeps page order at the end.
    pub fn sort_pronunciations(&self, pronunciations: &mut [ForvoPronunciation]) {
        pronunciations.sort_by_key(|pronunciation| {
            let username_key = self
                .config
                .preferred_usernames
                .iter()
                .position(|name| *name == pronunciation.username)
                .unwrap_or(usize::MAX);
            let country_key = pronunciation
                .country
                .as_deref()
                .and_then(|country| {
                    self.config
                        .preferred_countries
                        .iter()
                        .position(|preferred| *preferred == country.to_lowercase())
                })
                .unwrap_or(usize::MAX);
            (username_key, country_key)
        });
    }

    /// Audio URLs on a search results page.
    pub fn parse_search_page(&self, html: &str) -> Vec<String> {
        list_items(html, "word-play-list-icon-size-l")
            .into_iter()
            .filter_map(|(_, item)| attribute(item, "onclick"))
            .filter_map(|play| extract_url(&unescape(play), "ogg"))
            .collect()
    }

    fn to_file(
        &self,
        url: String,
        desired_filename: String,
        word: &str,
        source_name: &str,
    ) -> FileUrlData {
        FileUrlData {
            url,
            desired_filename,
            word: word.to_string(),
            source_name: source_name.to_string(),
            reading: String::new(),
            pitch_number: FileUrlData::UNKNOWN_PITCH.to_string(),
        }
    }
}

impl AudioProvider for ForvoClient {
    fn name(&self) -> &str {
        "Forvo"
    }

    fn word(&self, word: &str) -> Result<Vec<FileUrlData>> {
        let word = word.trim();
        if word.is_empty() {
            return Ok(Vec::new());
        }
        let html = self.http.get_text(&self.word_url(word), self.timeout)?;
        Ok(self
            .parse_word_page(&html, word)
            .into_iter()
            .map(|pronunciation| {
                let filename = pronunciation.make_filename();
                self.to_file(pronunciation.audio_url, filename, word, WORD_SOURCE_NAME)
            })
            .collect())
    }

    fn search(&self, word: &str) -> Result<Vec<FileUrlData>> {
        let word = word.trim();
        if word.is_empty() {
            return Ok(Vec::new());
        }
        let html = self.http.get_text(&self.search_url(word), self.timeout)?;
        Ok(self
            .parse_search_page(&html)
            .into_iter()
            .map(|url| {
                let filename = make_search_result_filename(&url, word, &self.config.language);
                self.to_file(url, filename, word, SEARCH_SOURCE_NAME)
            })
            .collect())
    }
}
