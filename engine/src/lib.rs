// Indexing and search engine
// Walkers fill the index, the codec persists it, the search worker queries it

pub mod codec;
pub mod ntfs;
pub mod search;
pub mod service;
pub mod sort;
pub mod walk;
pub mod worker;

#[cfg(target_os = "windows")]
pub mod volume;

pub use search::{Query, SearchResults};
pub use service::{BuildState, Engine, EngineConfig, WalkMode};
pub use sort::SortKind;
