use thiserror::Error;

#[derive(Debug, Error)]
pub enum FindexError {
    #[error("Process lacks the elevation required to read the raw volume")]
    DeniedPrivileges,

    #[error("Cannot open raw volume: {0}")]
    RawVolumeUnavailable(String),

    #[error("An index build is already in flight")]
    Busy,

    #[error("Persisted index is corrupt: {0}")]
    CorruptIndexFile(String),

    #[error("MFT parsing is not available on this platform")]
    Unsupported,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}
