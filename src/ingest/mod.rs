pub mod hasher;
pub mod index;
pub mod loader;
pub mod source;

pub use index::SourceIndex;
pub use loader::{load_source, LoadOutcome};
pub use source::AudioSource;
