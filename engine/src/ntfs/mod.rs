// NTFS on-disk format support
// Read-only: everything needed to enumerate file records from the raw MFT

pub mod boot;
pub mod data_runs;
pub mod record;
pub mod stage;

#[cfg(target_os = "windows")]
pub mod walker;

pub use boot::BootSector;
pub use data_runs::{DataRunIter, Extent};
pub use record::{apply_fixup, parse_file_record, MftGeometry, ParsedRecord, RecordName};
pub use stage::Staging;
