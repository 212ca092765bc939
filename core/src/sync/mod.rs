// Concurrency primitives shared by the walkers and the search engine

pub mod arena;
pub mod buffers;
pub mod dedup;
pub mod pool;
pub mod seg_vec;

pub use arena::NameArena;
pub use buffers::{AlignedBuf, BufferPool};
pub use dedup::DedupMap;
pub use pool::WorkerPool;
pub use seg_vec::SegVec;
