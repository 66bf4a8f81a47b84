//! Remote providers that are scraped on demand instead of being cached.

pub mod forvo;

use crate::audio::FileUrlData;
use crate::error::Result;

pub use forvo::ForvoClient;

/// A site that can be asked for pronunciations of one word.
pub trait AudioProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Pronunciations listed on the word's own page, with attribution.
    fn word(&self, word: &str) -> Result<Vec<FileUrlData>>;

    /// Pronunciations from the site's search results. Authors are unknown.
    fn search(&self, word: &str) -> Result<Vec<FileUrlData>>;
}
