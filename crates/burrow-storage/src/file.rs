//! Paged file handles.
//!
//! A `PagedFile` is a flat file of `PAGE_SIZE` pages addressed by 1-based
//! page numbers. Allocation is strictly sequential; pages are never freed.

use burrow_buffer::PageIo;
use burrow_common::page::{INVALID_PAGE_NO, PAGE_SIZE};
use burrow_common::{BurrowError, Result};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// Source of process-unique file IDs for buffer-pool keying.
static NEXT_FILE_ID: AtomicU32 = AtomicU32::new(1);

/// An open page-addressed file.
pub struct PagedFile {
    /// Path the file was created or opened at.
    path: PathBuf,
    /// Underlying OS file handle.
    file: Mutex<File>,
    /// Process-unique identifier for this handle.
    file_id: u32,
    /// Number of allocated pages.
    num_pages: AtomicU32,
    /// Whether `sync` reaches durable storage (fsync) or is a no-op.
    fsync_enabled: bool,
}

impl PagedFile {
    /// Creates a new empty paged file with fsync enabled, truncating any
    /// existing file at the path.
    pub fn create(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Self::create_with(path, true)
    }

    /// Creates a new empty paged file. `fsync_enabled` controls whether
    /// flushes fsync (see `StorageConfig`).
    pub fn create_with(path: impl AsRef<Path>, fsync_enabled: bool) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        Ok(Arc::new(Self {
            path,
            file: Mutex::new(file),
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            num_pages: AtomicU32::new(0),
            fsync_enabled,
        }))
    }

    /// Opens an existing paged file.
    pub fn open(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            return Err(BurrowError::FileNotFound(path.display().to_string()));
        }
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64) as u32;

        Ok(Arc::new(Self {
            path,
            file: Mutex::new(file),
            file_id: NEXT_FILE_ID.fetch_add(1, Ordering::Relaxed),
            num_pages: AtomicU32::new(num_pages),
            fsync_enabled: true,
        }))
    }

    /// Returns true if a file exists at the path.
    pub fn exists(path: impl AsRef<Path>) -> bool {
        path.as_ref().exists()
    }

    /// Deletes the file at the path.
    pub fn remove(path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BurrowError::FileNotFound(path.display().to_string()));
        }
        std::fs::remove_file(path)?;
        Ok(())
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the process-unique file ID.
    pub fn file_id(&self) -> u32 {
        self.file_id
    }

    /// Returns the number of allocated pages.
    pub fn num_pages(&self) -> u32 {
        self.num_pages.load(Ordering::Acquire)
    }

    /// Byte offset of a page. Page numbers are 1-based.
    fn page_offset(page_no: u32) -> u64 {
        (page_no as u64 - 1) * PAGE_SIZE as u64
    }

    fn check_page_no(&self, page_no: u32) -> Result<()> {
        if page_no == INVALID_PAGE_NO || page_no > self.num_pages() {
            return Err(BurrowError::PageNotFound { page_no });
        }
        Ok(())
    }
}

impl PageIo for PagedFile {
    fn file_id(&self) -> u32 {
        self.file_id
    }

    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
        self.check_page_no(page_no)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(page_no)))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_page(&self, page_no: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
        self.check_page_no(page_no)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(Self::page_offset(page_no)))?;
        file.write_all(buf)?;
        Ok(())
    }

    fn allocate_page(&self) -> Result<u32> {
        let mut file = self.file.lock();
        let page_no = self.num_pages.load(Ordering::Acquire) + 1;
        file.seek(SeekFrom::Start(Self::page_offset(page_no)))?;
        file.write_all(&[0u8; PAGE_SIZE])?;
        self.num_pages.store(page_no, Ordering::Release);
        Ok(page_no)
    }

    fn sync(&self) -> Result<()> {
        if self.fsync_enabled {
            self.file.lock().sync_all()?;
        }
        Ok(())
    }
}
