//! Configuration for the Burrow storage engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for relation and index files.
    pub data_dir: PathBuf,
    /// Number of frames in the buffer pool.
    pub buffer_frames: usize,
    /// Enable fsync when flushing files.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            buffer_frames: 1024,
            fsync_enabled: true,
        }
    }
}
