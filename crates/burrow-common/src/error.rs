//! Error types for Burrow.

use thiserror::Error;

/// Result type alias using BurrowError.
pub type Result<T> = std::result::Result<T, BurrowError>;

/// Errors that can occur in Burrow operations.
#[derive(Debug, Error)]
pub enum BurrowError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File errors
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Page not found: {page_no}")]
    PageNotFound { page_no: u32 },

    // Buffer manager errors
    #[error("Buffer pool full, unable to allocate frame")]
    BufferPoolFull,

    // Heap errors
    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("End of file")]
    EndOfFile,

    // Index scan errors
    #[error("Bad scan opcodes: low operator must be GT/GTE, high operator must be LT/LTE")]
    BadOpcodes,

    #[error("Bad scan range: low value exceeds high value")]
    BadScanRange,

    #[error("Scan not initialized")]
    ScanNotInitialized,

    #[error("Index scan completed")]
    IndexScanCompleted,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}
