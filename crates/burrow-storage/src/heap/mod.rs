//! Heap relations and the sequential file scanner.
//!
//! All page access is routed through the buffer manager: pages are pinned,
//! read or modified in place, and unpinned with the dirty flag when
//! released.

pub mod page;

use crate::file::PagedFile;
use crate::record::RecordId;
use burrow_buffer::BufferManager;
use burrow_common::{BurrowError, Result};
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

pub use page::MAX_RECORD_SIZE;

/// A base relation stored as a paged heap file.
pub struct HeapFile {
    /// Backing paged file.
    file: Arc<PagedFile>,
    /// Shared buffer manager.
    pool: Arc<BufferManager>,
    /// Relation name (the file name component of the path).
    name: String,
}

impl HeapFile {
    fn relation_name(path: &Path) -> String {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Creates a new empty relation at the path.
    pub fn create(path: impl AsRef<Path>, pool: Arc<BufferManager>) -> Result<Self> {
        let path = path.as_ref();
        let file = PagedFile::create(path)?;
        Ok(Self {
            file,
            pool,
            name: Self::relation_name(path),
        })
    }

    /// Opens an existing relation.
    pub fn open(path: impl AsRef<Path>, pool: Arc<BufferManager>) -> Result<Self> {
        let path = path.as_ref();
        let file = PagedFile::open(path)?;
        Ok(Self {
            file,
            pool,
            name: Self::relation_name(path),
        })
    }

    /// Returns the relation name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the relation file path.
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Appends a record and returns its record ID.
    pub fn insert_record(&self, record: &[u8]) -> Result<RecordId> {
        if record.len() > MAX_RECORD_SIZE {
            return Err(BurrowError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }

        // Try the last page first; records are append-only.
        let last_page = self.file.num_pages();
        if last_page > 0 {
            let guard = self.pool.read_page(&self.file, last_page)?;
            let slot = page::insert_record(&mut guard.data_mut()[..], record);
            if let Some(slot_no) = slot {
                guard.mark_dirty();
                return Ok(RecordId::new(last_page, slot_no));
            }
        }

        let (page_no, guard) = self.pool.alloc_page(&self.file)?;
        page::init(&mut guard.data_mut()[..]);
        let slot_no = page::insert_record(&mut guard.data_mut()[..], record)
            .ok_or(BurrowError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            })?;
        guard.mark_dirty();
        Ok(RecordId::new(page_no, slot_no))
    }

    /// Starts a sequential scan over every record in the relation.
    pub fn scan(&self) -> FileScan<'_> {
        FileScan {
            heap: self,
            next_page: 1,
            next_slot: 0,
        }
    }
}

/// Sequential scanner over a heap relation.
///
/// Yields `(record id, record bytes)` pairs in storage order and signals
/// exhaustion with `EndOfFile`.
pub struct FileScan<'a> {
    heap: &'a HeapFile,
    next_page: u32,
    next_slot: u16,
}

impl FileScan<'_> {
    /// Returns the next record, or `EndOfFile` once the relation is
    /// exhausted.
    pub fn scan_next(&mut self) -> Result<(RecordId, Bytes)> {
        loop {
            if self.next_page > self.heap.file.num_pages() {
                return Err(BurrowError::EndOfFile);
            }

            let guard = self.heap.pool.read_page(&self.heap.file, self.next_page)?;
            let data = guard.data();
            if let Some(record) = page::record_at(&data[..], self.next_slot) {
                let rid = RecordId::new(self.next_page, self.next_slot);
                let record = Bytes::copy_from_slice(record);
                self.next_slot += 1;
                return Ok((rid, record));
            }

            drop(data);
            drop(guard);
            self.next_page += 1;
            self.next_slot = 0;
        }
    }
}
