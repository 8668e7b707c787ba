//! B+-tree index over a single attribute of a heap relation.
//!
//! Inserts run top-down from the root to a leaf; splits propagate back up
//! on the unwind, one per level at most. A node is split the moment an
//! insert occupies its last slot, so no node is ever full when the next
//! entry or separator must land in it.

use super::key::IndexKey;
use super::meta::IndexMetadata;
use super::node::{LeafView, NonLeafView};
use super::scan::ScanState;
use crate::file::PagedFile;
use crate::heap::HeapFile;
use crate::record::RecordId;
use burrow_buffer::{BufferManager, PageGuard};
use burrow_common::page::INVALID_PAGE_NO;
use burrow_common::{BurrowError, Result};
use std::sync::Arc;
use tracing::{debug, info, trace};

/// A disk-backed B+-tree index for key type `K`.
///
/// Supports bulk build at open time, point inserts, and one range scan at
/// a time. Keys equal to the sentinel (`-1` numeric, all-zero string) are
/// not indexable.
pub struct BTreeIndex<K: IndexKey> {
    pub(crate) file: Arc<PagedFile>,
    pub(crate) pool: Arc<BufferManager>,
    pub(crate) index_name: String,
    pub(crate) header_page_no: u32,
    pub(crate) root_page_no: u32,
    pub(crate) root_level: i32,
    pub(crate) scan: Option<ScanState<K>>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Opens an index over `relation`'s attribute at `attr_byte_offset`.
    ///
    /// The index file is named `"{relation}.{offset}"` beside the relation
    /// file. Any previous index file of that name is removed and the index
    /// is rebuilt by scanning every record of the relation.
    pub fn open(
        relation: &HeapFile,
        attr_byte_offset: usize,
        pool: Arc<BufferManager>,
    ) -> Result<Self> {
        let index_name = format!("{}.{}", relation.path().display(), attr_byte_offset);

        match PagedFile::remove(&index_name) {
            Ok(()) | Err(BurrowError::FileNotFound(_)) => {}
            Err(e) => return Err(e),
        }
        let file = PagedFile::create(&index_name)?;

        let (header_page_no, guard) = pool.alloc_page(&file)?;
        let meta = IndexMetadata::new(relation.name(), attr_byte_offset as i32, K::ATTR_TYPE);
        meta.write_to(&mut guard.data_mut()[..]);
        guard.mark_dirty();
        drop(guard);

        let mut index = Self {
            file,
            pool,
            index_name,
            header_page_no,
            root_page_no: INVALID_PAGE_NO,
            root_level: 0,
            scan: None,
        };
        info!(index = %index.index_name, attr_type = %K::ATTR_TYPE, "index file created");

        let mut built = 0u64;
        let mut scan = relation.scan();
        loop {
            match scan.scan_next() {
                Ok((rid, record)) => {
                    let key = K::from_record(&record, attr_byte_offset);
                    index.insert_entry(key, rid)?;
                    built += 1;
                }
                Err(BurrowError::EndOfFile) => break,
                Err(e) => return Err(e),
            }
        }
        info!(index = %index.index_name, records = built, "bulk build complete");

        Ok(index)
    }

    /// Returns the derived index file name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Number of node layers, 0 for an empty tree.
    pub fn height(&self) -> u32 {
        if self.root_page_no == INVALID_PAGE_NO {
            0
        } else {
            self.root_level as u32 + 1
        }
    }

    /// Inserts a `(key, rid)` pair. Duplicate keys are admissible and read
    /// back in insertion order.
    pub fn insert_entry(&mut self, key: K, rid: RecordId) -> Result<()> {
        if self.root_page_no == INVALID_PAGE_NO {
            return self.plant_root(key, rid);
        }

        if self.root_level == 0 {
            let root_full = {
                let guard = self.pool.read_page(&self.file, self.root_page_no)?;
                let full;
                {
                    let mut page = guard.data_mut();
                    let mut leaf = LeafView::<_, K>::new(&mut page[..]);
                    leaf.insert_sorted(key, rid);
                    full = leaf.is_full();
                }
                guard.mark_dirty();
                full
            };
            if root_full {
                self.grow_root(true)?;
            }
            return Ok(());
        }

        self.insert_descend(self.root_page_no, self.root_level, key, rid)?;

        let root_full = {
            let guard = self.pool.read_page(&self.file, self.root_page_no)?;
            let page = guard.data();
            NonLeafView::<_, K>::new(&page[..]).is_full()
        };
        if root_full {
            self.grow_root(false)?;
        }
        Ok(())
    }

    /// First insert into an empty tree: allocate the singleton root leaf.
    fn plant_root(&mut self, key: K, rid: RecordId) -> Result<()> {
        let (page_no, guard) = self.pool.alloc_page(&self.file)?;
        {
            let mut page = guard.data_mut();
            let mut leaf = LeafView::<_, K>::new(&mut page[..]);
            leaf.init();
            leaf.set_key(0, key);
            leaf.set_rid(0, rid);
        }
        guard.mark_dirty();
        drop(guard);

        self.root_page_no = page_no;
        self.root_level = 0;
        self.write_metadata()?;
        debug!(index = %self.index_name, root = page_no, "root leaf allocated");
        Ok(())
    }

    /// Recursive top-down insert below a non-leaf at the given level.
    ///
    /// The node stays pinned across the recursion, so an insert holds at
    /// most one pin per tree level.
    fn insert_descend(&self, node_page: u32, level: i32, key: K, rid: RecordId) -> Result<()> {
        let node_guard = self.pool.read_page(&self.file, node_page)?;
        let child_page = {
            let page = node_guard.data();
            NonLeafView::<_, K>::new(&page[..]).route(&key)
        };
        if child_page == INVALID_PAGE_NO {
            return Err(BurrowError::Internal(format!(
                "non-leaf {node_page} routed to a null child"
            )));
        }

        if level > 1 {
            self.insert_descend(child_page, level - 1, key, rid)?;

            let child_full = {
                let guard = self.pool.read_page(&self.file, child_page)?;
                let page = guard.data();
                NonLeafView::<_, K>::new(&page[..]).is_full()
            };
            if child_full {
                self.split_child(&node_guard, child_page, false)?;
            }
        } else {
            let child_full = {
                let guard = self.pool.read_page(&self.file, child_page)?;
                let full;
                {
                    let mut page = guard.data_mut();
                    let mut leaf = LeafView::<_, K>::new(&mut page[..]);
                    leaf.insert_sorted(key, rid);
                    full = leaf.is_full();
                }
                guard.mark_dirty();
                full
            };
            if child_full {
                self.split_child(&node_guard, child_page, true)?;
            }
        }

        Ok(())
    }

    /// Splits a full child and threads the separator into its parent.
    fn split_child(
        &self,
        parent: &PageGuard<'_>,
        child_page: u32,
        child_is_leaf: bool,
    ) -> Result<()> {
        let (separator, new_page) = if child_is_leaf {
            self.split_leaf(child_page)?
        } else {
            self.split_nonleaf(child_page)?
        };

        {
            let mut page = parent.data_mut();
            let mut node = NonLeafView::<_, K>::new(&mut page[..]);
            node.insert_separator(separator, new_page);
        }
        parent.mark_dirty();
        Ok(())
    }

    /// Splits a full leaf, splicing the sibling chain. Returns the
    /// separator (the first key of the new right leaf) and the new page.
    fn split_leaf(&self, left_page: u32) -> Result<(K, u32)> {
        let left_guard = self.pool.read_page(&self.file, left_page)?;
        let (right_page, right_guard) = self.pool.alloc_page(&self.file)?;

        let mid = K::LEAF_CAPACITY / 2;
        let separator;
        {
            let mut left_data = left_guard.data_mut();
            let mut right_data = right_guard.data_mut();
            let mut left = LeafView::<_, K>::new(&mut left_data[..]);
            let mut right = LeafView::<_, K>::new(&mut right_data[..]);
            right.init();

            separator = left.key_at(mid);
            for (to, from) in (mid..K::LEAF_CAPACITY).enumerate() {
                right.set_key(to, left.key_at(from));
                right.set_rid(to, left.rid_at(from));
            }
            for slot in mid..K::LEAF_CAPACITY {
                left.set_key(slot, K::sentinel());
            }

            right.set_right_sibling(left.right_sibling());
            left.set_right_sibling(right_page);
        }
        left_guard.mark_dirty();
        right_guard.mark_dirty();

        trace!(left = left_page, right = right_page, "leaf split");
        Ok((separator, right_page))
    }

    /// Splits a full non-leaf. The right half receives slots `mid..` of
    /// both arrays, median key included, so the separator handed up is
    /// also the first key of the right node.
    fn split_nonleaf(&self, left_page: u32) -> Result<(K, u32)> {
        let left_guard = self.pool.read_page(&self.file, left_page)?;
        let (right_page, right_guard) = self.pool.alloc_page(&self.file)?;

        let mid = K::NONLEAF_CAPACITY / 2;
        let separator;
        {
            let mut left_data = left_guard.data_mut();
            let mut right_data = right_guard.data_mut();
            let mut left = NonLeafView::<_, K>::new(&mut left_data[..]);
            let mut right = NonLeafView::<_, K>::new(&mut right_data[..]);
            right.init(left.level());

            separator = left.key_at(mid);
            for (to, from) in (mid..K::NONLEAF_CAPACITY).enumerate() {
                right.set_key(to, left.key_at(from));
            }
            for (to, from) in (mid..=K::NONLEAF_CAPACITY).enumerate() {
                right.set_child(to, left.child_at(from));
            }
            for slot in mid..K::NONLEAF_CAPACITY {
                left.set_key(slot, K::sentinel());
            }
            for slot in (mid + 1)..=K::NONLEAF_CAPACITY {
                left.set_child(slot, INVALID_PAGE_NO);
            }
        }
        left_guard.mark_dirty();
        right_guard.mark_dirty();

        trace!(left = left_page, right = right_page, "non-leaf split");
        Ok((separator, right_page))
    }

    /// Splits the root and pushes a fresh non-leaf root above both halves.
    fn grow_root(&mut self, root_is_leaf: bool) -> Result<()> {
        let old_root = self.root_page_no;
        let old_level = self.root_level;

        let (separator, new_sibling) = if root_is_leaf {
            self.split_leaf(old_root)?
        } else {
            self.split_nonleaf(old_root)?
        };

        let (new_root, guard) = self.pool.alloc_page(&self.file)?;
        {
            let mut page = guard.data_mut();
            let mut node = NonLeafView::<_, K>::new(&mut page[..]);
            node.init(old_level + 1);
            node.set_child(0, old_root);
            node.insert_separator(separator, new_sibling);
        }
        guard.mark_dirty();
        drop(guard);

        self.root_page_no = new_root;
        self.root_level = old_level + 1;
        self.write_metadata()?;
        debug!(
            index = %self.index_name,
            root = new_root,
            level = self.root_level,
            "root split"
        );
        Ok(())
    }

    /// Rewrites the metadata page's root fields.
    fn write_metadata(&self) -> Result<()> {
        let guard = self.pool.read_page(&self.file, self.header_page_no)?;
        {
            let mut page = guard.data_mut();
            let mut meta = IndexMetadata::read_from(&page[..])?;
            meta.root_page_no = self.root_page_no;
            meta.root_level = self.root_level;
            meta.write_to(&mut page[..]);
        }
        guard.mark_dirty();
        Ok(())
    }
}

impl<K: IndexKey> Drop for BTreeIndex<K> {
    fn drop(&mut self) {
        // End any live scan and flush; destructors do not fail.
        let _ = self.end_scan();
        let _ = self.pool.flush_file(self.file.file_id());
    }
}
