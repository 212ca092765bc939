pub mod entry;
pub mod error;
pub mod progress;
pub mod sync;

pub use entry::{
    ascii_lower_in_place, FileEntry, FileIndex, DIR_BIT, FILETIME_TICKS_PER_MINUTE,
    NAME_OFFSET_MASK,
};
pub use error::FindexError;
pub use progress::ProgressGauge;
pub use sync::{BufferPool, DedupMap, NameArena, SegVec, WorkerPool};
