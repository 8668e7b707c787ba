//! Buffer manager.
//!
//! Every page access goes through here: a page is pinned while in use,
//! unpinned with an accumulated dirty flag when done, and written back to
//! its file when a dirty frame is evicted or the file is flushed.

use crate::frame::{BufferFrame, FrameId};
use crate::replacer::{ClockReplacer, Replacer};
use burrow_common::page::{PageId, PAGE_SIZE};
use burrow_common::{BurrowError, Result, StorageConfig};
use parking_lot::{Mutex, RwLockReadGuard, RwLockWriteGuard};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::Arc;
use sysinfo::System;

/// Page-granular file I/O, the seam between the buffer manager and the
/// storage layer's file handles. Registered handles are used to write back
/// dirty frames on eviction and flush.
pub trait PageIo: Send + Sync {
    /// Process-unique identifier of this file.
    fn file_id(&self) -> u32;

    /// Reads the page into `buf`.
    fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()>;

    /// Writes the page from `buf`.
    fn write_page(&self, page_no: u32, buf: &[u8; PAGE_SIZE]) -> Result<()>;

    /// Extends the file by one zeroed page and returns its page number.
    fn allocate_page(&self) -> Result<u32>;

    /// Syncs the file to durable storage.
    fn sync(&self) -> Result<()>;
}

/// Buffer manager.
///
/// Manages a fixed-size pool of page frames with:
/// - Page ID to frame ID mapping
/// - Free frame list for unoccupied frames
/// - Clock replacement for eviction, with dirty write-back
/// - Pin counting so in-use pages are never evicted
pub struct BufferManager {
    /// Array of buffer frames.
    frames: Vec<BufferFrame>,
    /// Page ID to frame ID mapping.
    page_table: Mutex<HashMap<PageId, FrameId>>,
    /// List of free frame IDs.
    free_list: Mutex<Vec<FrameId>>,
    /// Page replacement policy.
    replacer: ClockReplacer,
    /// File handles keyed by file ID, for eviction write-back and flush.
    files: Mutex<HashMap<u32, Arc<dyn PageIo>>>,
}

impl BufferManager {
    /// Creates a buffer manager with the given number of frames.
    pub fn new(num_frames: usize) -> Self {
        let frames: Vec<_> = (0..num_frames)
            .map(|i| BufferFrame::new(FrameId(i as u32)))
            .collect();
        let free_list: Vec<_> = (0..num_frames).map(|i| FrameId(i as u32)).collect();

        Self {
            frames,
            page_table: Mutex::new(HashMap::new()),
            free_list: Mutex::new(free_list),
            replacer: ClockReplacer::new(num_frames),
            files: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a buffer manager sized from a storage configuration.
    pub fn with_config(config: &StorageConfig) -> Self {
        Self::new(config.buffer_frames)
    }

    /// Creates a buffer manager sized to 25% of available system RAM,
    /// with a floor of 1,000 frames so small machines still cache usefully.
    pub fn auto_sized() -> Self {
        let mut sys = System::new_all();
        sys.refresh_memory();

        let available_bytes = sys.available_memory() as usize;
        let target_bytes = available_bytes / 4;
        let num_frames = (target_bytes / PAGE_SIZE).max(1_000);

        Self::new(num_frames)
    }

    /// Returns the number of frames in the pool.
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Returns the number of free frames.
    pub fn free_count(&self) -> usize {
        self.free_list.lock().len()
    }

    /// Returns the number of pages currently resident.
    pub fn page_count(&self) -> usize {
        self.page_table.lock().len()
    }

    /// Checks if a page is resident in the pool.
    pub fn contains(&self, page_id: PageId) -> bool {
        self.page_table.lock().contains_key(&page_id)
    }

    fn register_file(&self, io: Arc<dyn PageIo>) {
        self.files.lock().entry(io.file_id()).or_insert(io);
    }

    /// Pins a resident page, if any.
    fn lookup(&self, page_id: PageId) -> Option<&BufferFrame> {
        let table = self.page_table.lock();
        let frame_id = *table.get(&page_id)?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.pin();
        self.replacer.record_access(frame_id);
        Some(frame)
    }

    /// Claims a frame for a new occupant: free list first, then eviction.
    /// A dirty victim is written back through its registered file handle.
    fn take_frame(&self) -> Result<FrameId> {
        if let Some(frame_id) = self.free_list.lock().pop() {
            return Ok(frame_id);
        }

        let victim = self
            .replacer
            .evict(&|fid: FrameId| {
                let frame = &self.frames[fid.0 as usize];
                frame.page_id().is_some() && frame.pin_count() == 0
            })
            .ok_or(BurrowError::BufferPoolFull)?;

        let frame = &self.frames[victim.0 as usize];
        if let Some(page_id) = frame.page_id() {
            if frame.is_dirty() {
                let io = self
                    .files
                    .lock()
                    .get(&page_id.file_id)
                    .cloned()
                    .ok_or_else(|| {
                        BurrowError::Internal(format!(
                            "no file handle registered for file {}",
                            page_id.file_id
                        ))
                    })?;
                let data = frame.read_data();
                io.write_page(page_id.page_num, &data)?;
                drop(data);
                frame.set_dirty(false);
            }
            self.page_table.lock().remove(&page_id);
        }

        Ok(victim)
    }

    /// Pins the named page, loading it from the file if it is not resident.
    ///
    /// The caller owns one pin and must balance it with `unpin_page` (or use
    /// `read_page`, which returns a guard that unpins on drop).
    pub fn fetch_page<F>(&self, file: &Arc<F>, page_no: u32) -> Result<&BufferFrame>
    where
        F: PageIo + 'static,
    {
        let io: Arc<dyn PageIo> = file.clone();
        self.register_file(io);
        let page_id = PageId::new(file.file_id(), page_no);

        if let Some(frame) = self.lookup(page_id) {
            return Ok(frame);
        }

        let frame_id = self.take_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();

        {
            let mut data = frame.write_data();
            if let Err(e) = file.read_page(page_no, &mut data) {
                drop(data);
                self.free_list.lock().push(frame_id);
                return Err(e);
            }
        }

        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.lock().insert(page_id, frame_id);
        self.replacer.record_access(frame_id);
        Ok(frame)
    }

    /// Pins the named page behind an RAII guard.
    pub fn read_page<F>(&self, file: &Arc<F>, page_no: u32) -> Result<PageGuard<'_>>
    where
        F: PageIo + 'static,
    {
        let frame = self.fetch_page(file, page_no)?;
        let page_id = PageId::new(file.file_id(), page_no);
        Ok(PageGuard::new(self, frame, page_id))
    }

    /// Allocates a fresh page in the file and pins it zeroed.
    pub fn alloc_page<F>(&self, file: &Arc<F>) -> Result<(u32, PageGuard<'_>)>
    where
        F: PageIo + 'static,
    {
        let io: Arc<dyn PageIo> = file.clone();
        self.register_file(io);
        let page_no = file.allocate_page()?;
        let page_id = PageId::new(file.file_id(), page_no);

        let frame_id = self.take_frame()?;
        let frame = &self.frames[frame_id.0 as usize];
        frame.reset();
        frame.write_data().fill(0);
        frame.set_page_id(Some(page_id));
        frame.pin();
        self.page_table.lock().insert(page_id, frame_id);
        self.replacer.record_access(frame_id);

        Ok((page_no, PageGuard::new(self, frame, page_id)))
    }

    /// Releases one pin on a page. The dirty flag accumulates: unpinning
    /// clean never clears an earlier dirty mark.
    ///
    /// Returns false if the page is not resident.
    pub fn unpin_page(&self, file_id: u32, page_no: u32, dirty: bool) -> bool {
        let page_id = PageId::new(file_id, page_no);
        let table = self.page_table.lock();
        if let Some(&frame_id) = table.get(&page_id) {
            let frame = &self.frames[frame_id.0 as usize];
            if dirty {
                frame.set_dirty(true);
            }
            frame.unpin();
            return true;
        }
        false
    }

    /// Writes back all dirty resident pages of a file and syncs it.
    ///
    /// A file with no resident pages (or one never seen by this pool) is a
    /// no-op.
    pub fn flush_file(&self, file_id: u32) -> Result<()> {
        let io = match self.files.lock().get(&file_id).cloned() {
            Some(io) => io,
            None => return Ok(()),
        };

        let resident: Vec<(PageId, FrameId)> = self
            .page_table
            .lock()
            .iter()
            .filter(|(pid, _)| pid.file_id == file_id)
            .map(|(pid, fid)| (*pid, *fid))
            .collect();

        for (page_id, frame_id) in resident {
            let frame = &self.frames[frame_id.0 as usize];
            if frame.is_dirty() {
                let data = frame.read_data();
                io.write_page(page_id.page_num, &data)?;
                drop(data);
                frame.set_dirty(false);
            }
        }

        io.sync()
    }
}

/// RAII pin on a page.
///
/// Unpins on drop, passing along whether `mark_dirty` was called, so the
/// pin/unpin pairing holds on every exit path including early returns.
pub struct PageGuard<'a> {
    pool: &'a BufferManager,
    frame: &'a BufferFrame,
    page_id: PageId,
    dirty: Cell<bool>,
}

impl<'a> PageGuard<'a> {
    fn new(pool: &'a BufferManager, frame: &'a BufferFrame, page_id: PageId) -> Self {
        Self {
            pool,
            frame,
            page_id,
            dirty: Cell::new(false),
        }
    }

    /// Returns the page number within its file.
    pub fn page_no(&self) -> u32 {
        self.page_id.page_num
    }

    /// Returns read access to the page bytes.
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.read_data()
    }

    /// Returns write access to the page bytes. Call `mark_dirty` after
    /// modifying.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8; PAGE_SIZE]>> {
        self.frame.write_data()
    }

    /// Records that the page was modified; the unpin on drop carries it.
    pub fn mark_dirty(&self) {
        self.dirty.set(true);
    }
}

impl Drop for PageGuard<'_> {
    fn drop(&mut self) {
        self.pool
            .unpin_page(self.page_id.file_id, self.page_id.page_num, self.dirty.get());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// In-memory PageIo double.
    struct MemFile {
        file_id: u32,
        pages: Mutex<Vec<[u8; PAGE_SIZE]>>,
        writes: AtomicU32,
    }

    impl MemFile {
        fn new(file_id: u32) -> Arc<Self> {
            Arc::new(Self {
                file_id,
                pages: Mutex::new(Vec::new()),
                writes: AtomicU32::new(0),
            })
        }

        fn write_count(&self) -> u32 {
            self.writes.load(Ordering::Relaxed)
        }
    }

    impl PageIo for MemFile {
        fn file_id(&self) -> u32 {
            self.file_id
        }

        fn read_page(&self, page_no: u32, buf: &mut [u8; PAGE_SIZE]) -> Result<()> {
            let pages = self.pages.lock();
            let page = pages
                .get((page_no - 1) as usize)
                .ok_or(BurrowError::PageNotFound { page_no })?;
            buf.copy_from_slice(page);
            Ok(())
        }

        fn write_page(&self, page_no: u32, buf: &[u8; PAGE_SIZE]) -> Result<()> {
            let mut pages = self.pages.lock();
            let page = pages
                .get_mut((page_no - 1) as usize)
                .ok_or(BurrowError::PageNotFound { page_no })?;
            page.copy_from_slice(buf);
            self.writes.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn allocate_page(&self) -> Result<u32> {
            let mut pages = self.pages.lock();
            pages.push([0u8; PAGE_SIZE]);
            Ok(pages.len() as u32)
        }

        fn sync(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_buffer_manager_new() {
        let pool = BufferManager::new(10);
        assert_eq!(pool.num_frames(), 10);
        assert_eq!(pool.free_count(), 10);
        assert_eq!(pool.page_count(), 0);
    }

    #[test]
    fn test_with_config_sizes_pool() {
        let config = StorageConfig {
            data_dir: "./data".into(),
            buffer_frames: 8,
            fsync_enabled: false,
        };
        let pool = BufferManager::with_config(&config);
        assert_eq!(pool.num_frames(), 8);
    }

    #[test]
    fn test_alloc_page_pins() {
        let pool = BufferManager::new(10);
        let file = MemFile::new(1);

        let (page_no, guard) = pool.alloc_page(&file).unwrap();
        assert_eq!(page_no, 1);
        assert!(pool.contains(PageId::new(1, 1)));
        assert_eq!(pool.free_count(), 9);

        drop(guard);
        // Unpinned but still resident
        assert!(pool.contains(PageId::new(1, 1)));
    }

    #[test]
    fn test_alloc_page_numbers_are_sequential() {
        let pool = BufferManager::new(10);
        let file = MemFile::new(1);

        for expected in 1..=3u32 {
            let (page_no, _guard) = pool.alloc_page(&file).unwrap();
            assert_eq!(page_no, expected);
        }
    }

    #[test]
    fn test_fetch_page_requires_balanced_unpin() {
        let pool = BufferManager::new(10);
        let file = MemFile::new(1);

        let (page_no, guard) = pool.alloc_page(&file).unwrap();
        drop(guard);

        let frame = pool.fetch_page(&file, page_no).unwrap();
        assert_eq!(frame.pin_count(), 1);

        pool.unpin_page(file.file_id(), page_no, false);
        assert_eq!(frame.pin_count(), 0);
    }

    #[test]
    fn test_dirty_flag_accumulates() {
        let pool = BufferManager::new(10);
        let file = MemFile::new(1);

        let (page_no, guard) = pool.alloc_page(&file).unwrap();
        guard.mark_dirty();
        drop(guard);

        // Unpinning clean afterwards must not clear the dirty mark
        let frame = pool.fetch_page(&file, page_no).unwrap();
        pool.unpin_page(file.file_id(), page_no, false);
        assert!(frame.is_dirty());
    }

    #[test]
    fn test_eviction_writes_back_dirty_page() {
        let pool = BufferManager::new(1);
        let file = MemFile::new(1);

        let (p1, guard) = pool.alloc_page(&file).unwrap();
        guard.data_mut()[0] = 0xAB;
        guard.mark_dirty();
        drop(guard);

        // Second allocation forces eviction of the dirty page
        let (_p2, _guard2) = pool.alloc_page(&file).unwrap();
        assert!(file.write_count() >= 1);
        assert!(!pool.contains(PageId::new(1, p1)));

        drop(_guard2);
        let guard = pool.read_page(&file, p1).unwrap();
        assert_eq!(guard.data()[0], 0xAB);
    }

    #[test]
    fn test_pool_full_when_all_pinned() {
        let pool = BufferManager::new(2);
        let file = MemFile::new(1);

        let (_p1, _g1) = pool.alloc_page(&file).unwrap();
        let (_p2, _g2) = pool.alloc_page(&file).unwrap();

        let result = pool.alloc_page(&file);
        assert!(matches!(result, Err(BurrowError::BufferPoolFull)));
    }

    #[test]
    fn test_pin_prevents_eviction() {
        let pool = BufferManager::new(2);
        let file = MemFile::new(1);

        let (p1, g1) = pool.alloc_page(&file).unwrap();
        let (_p2, g2) = pool.alloc_page(&file).unwrap();
        drop(g2);

        // Only page 2 is unpinned; the next allocation must evict it, not p1
        let (_p3, _g3) = pool.alloc_page(&file).unwrap();
        assert!(pool.contains(PageId::new(1, p1)));

        drop(g1);
    }

    #[test]
    fn test_read_page_missing() {
        let pool = BufferManager::new(4);
        let file = MemFile::new(1);

        let result = pool.read_page(&file, 99);
        assert!(matches!(result, Err(BurrowError::PageNotFound { .. })));
        // Failed load returns the frame to the free list
        assert_eq!(pool.free_count(), 4);
    }

    #[test]
    fn test_flush_file_writes_dirty_pages() {
        let pool = BufferManager::new(4);
        let file = MemFile::new(1);

        for _ in 0..3 {
            let (_page_no, guard) = pool.alloc_page(&file).unwrap();
            guard.data_mut()[0] = 0x7F;
            guard.mark_dirty();
        }

        pool.flush_file(file.file_id()).unwrap();
        assert_eq!(file.write_count(), 3);

        // Second flush has nothing dirty left
        pool.flush_file(file.file_id()).unwrap();
        assert_eq!(file.write_count(), 3);
    }

    #[test]
    fn test_flush_unknown_file_is_noop() {
        let pool = BufferManager::new(4);
        assert!(pool.flush_file(999).is_ok());
    }

    #[test]
    fn test_guard_unpins_on_drop() {
        let pool = BufferManager::new(4);
        let file = MemFile::new(1);

        let (page_no, guard) = pool.alloc_page(&file).unwrap();
        drop(guard);

        let frame = pool.fetch_page(&file, page_no).unwrap();
        assert_eq!(frame.pin_count(), 1);
        pool.unpin_page(file.file_id(), page_no, false);
    }

    #[test]
    fn test_pages_from_two_files_coexist() {
        let pool = BufferManager::new(4);
        let f1 = MemFile::new(1);
        let f2 = MemFile::new(2);

        let (p1, g1) = pool.alloc_page(&f1).unwrap();
        let (p2, g2) = pool.alloc_page(&f2).unwrap();
        g1.data_mut()[0] = 1;
        g1.mark_dirty();
        g2.data_mut()[0] = 2;
        g2.mark_dirty();
        drop(g1);
        drop(g2);

        assert_eq!(pool.read_page(&f1, p1).unwrap().data()[0], 1);
        assert_eq!(pool.read_page(&f2, p2).unwrap().data()[0], 2);
    }
}
