pub mod audio;
pub mod pitch;
pub mod repo;
pub mod schema;

pub use audio::BoundFile;
pub use pitch::{load_pitch_tsv, PitchAccentEntry, PitchAccentRow};
pub use repo::CacheStore;
pub use schema::CURRENT_DB;
