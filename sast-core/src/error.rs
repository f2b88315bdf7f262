//! Error kinds shared by every SAST deployable.
//!
//! Variants map onto error *kinds*, not the original Python's bare
//! exceptions: decode errors drop a single record,
//! transient I/O errors are retried per the caller's own policy, config-apply
//! errors roll back the whole transaction, and fatal errors abort the process.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SastError {
    #[error("decode error: {0}")]
    Decode(String),

    #[error("serial I/O error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sqlite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("config apply error: {0}")]
    ConfigApply(String),

    #[error("fatal: {0}")]
    Fatal(String),
}

pub type SastResult<T> = Result<T, SastError>;
