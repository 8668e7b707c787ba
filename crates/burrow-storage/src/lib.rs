//! Storage engine for Burrow.
//!
//! This crate provides:
//! - Paged file handles with sequential page allocation
//! - Heap relations with slotted record pages and a sequential scanner
//! - Record identifiers
//! - A disk-backed B+-tree index generic over the key type

mod btree;
mod file;
mod heap;
mod record;

pub use btree::{
    BTreeIndex, IndexKey, IndexMetadata, LeafView, NonLeafView, RangeOp, StrKey,
    RELATION_NAME_LEN,
};
pub use file::PagedFile;
pub use heap::{FileScan, HeapFile, MAX_RECORD_SIZE};
pub use record::RecordId;
