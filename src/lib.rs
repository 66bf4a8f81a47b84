//! Caches pronunciation audio indexes and finds recordings for Japanese words.

pub mod app;
pub mod audio;
pub mod background;
pub mod database;
pub mod error;
pub mod fetch;
pub mod ingest;
pub mod providers;
pub mod search;
pub mod utils;

pub use app::App;
pub use audio::{FileUrlData, InitResult, NameUrl, TotalAudioStats};
pub use error::{DownloadFailure, Error, FetchError, Result, SourceError};
pub use search::SearchOptions;
