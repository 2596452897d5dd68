use std::sync::Arc;

use crate::common::{PageId, Result};
use crate::storage::disk::Pager;
use crate::storage::heap::Heap;

/// Where a B+ tree keeps its serialized nodes and its metadata blob.
pub trait NodeStore: Send + Sync {
    /// Reserves room for one node of up to `size` bytes and returns its address.
    fn alloc_node(&self, size: usize) -> Result<u64>;

    fn read_node(&self, address: u64) -> Result<Vec<u8>>;

    fn write_node(&self, address: u64, data: &[u8]) -> Result<()>;

    /// Returns the metadata blob, or `None` for a store never written to.
    fn read_meta(&self) -> Result<Option<Vec<u8>>>;

    fn write_meta(&self, data: &[u8]) -> Result<()>;

    /// Upper bound on a node's encoded size.
    fn node_capacity(&self) -> usize;

    fn read_only(&self) -> bool;

    fn sync(&self) -> Result<()>;
}

/// Nodes stored one per page, metadata in a fixed page.
///
/// Used for the heap allocator's own freelist, which cannot allocate its
/// nodes from the heap it is tracking.
pub struct PageNodeStore {
    pager: Arc<Pager>,
    meta_page: PageId,
}

impl PageNodeStore {
    pub fn new(pager: Arc<Pager>, meta_page: PageId) -> Self {
        Self { pager, meta_page }
    }

    fn ensure_meta_page(&self) -> Result<()> {
        let count = self.pager.count();
        if count <= self.meta_page.as_u64() {
            self.pager.alloc(self.meta_page.as_u64() + 1 - count)?;
        }
        Ok(())
    }
}

impl NodeStore for PageNodeStore {
    fn alloc_node(&self, _size: usize) -> Result<u64> {
        self.ensure_meta_page()?;
        Ok(self.pager.alloc(1)?.as_u64())
    }

    fn read_node(&self, address: u64) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; self.pager.page_size()];
        self.pager.read_page(PageId::new(address), &mut buf)?;
        Ok(buf)
    }

    fn write_node(&self, address: u64, data: &[u8]) -> Result<()> {
        self.pager
            .write_at(data, PageId::new(address).offset(self.pager.page_size()))
    }

    fn read_meta(&self) -> Result<Option<Vec<u8>>> {
        if self.pager.count() <= self.meta_page.as_u64() {
            return Ok(None);
        }
        let mut buf = vec![0u8; self.pager.page_size()];
        self.pager.read_page(self.meta_page, &mut buf)?;
        if buf.iter().all(|&b| b == 0) {
            return Ok(None);
        }
        Ok(Some(buf))
    }

    fn write_meta(&self, data: &[u8]) -> Result<()> {
        self.ensure_meta_page()?;
        self.pager
            .write_at(data, self.meta_page.offset(self.pager.page_size()))
    }

    fn node_capacity(&self) -> usize {
        self.pager.page_size()
    }

    fn read_only(&self) -> bool {
        self.pager.read_only()
    }

    fn sync(&self) -> Result<()> {
        self.pager.sync()
    }
}

/// Nodes stored as heap blobs; the tree metadata sits at the heap's first
/// pointer.
pub struct HeapNodeStore {
    heap: Arc<Heap>,
}

/// Bytes reserved for tree metadata at the heap's first pointer.
pub const TREE_META_SIZE: u32 = 64;

impl HeapNodeStore {
    pub fn new(heap: Arc<Heap>) -> Self {
        Self { heap }
    }

    pub fn heap(&self) -> &Arc<Heap> {
        &self.heap
    }
}

impl NodeStore for HeapNodeStore {
    fn alloc_node(&self, size: usize) -> Result<u64> {
        Ok(self.heap.alloc(size as u64)?.address)
    }

    fn read_node(&self, address: u64) -> Result<Vec<u8>> {
        let ptr = self.heap.pointer_at(address)?;
        self.heap.read(&ptr)
    }

    fn write_node(&self, address: u64, data: &[u8]) -> Result<()> {
        let ptr = self.heap.pointer_at(address)?;
        self.heap.write(&ptr, data)
    }

    fn read_meta(&self) -> Result<Option<Vec<u8>>> {
        if self.heap.is_empty() {
            return Ok(None);
        }
        let ptr = self.heap.first_pointer(TREE_META_SIZE);
        self.heap.read(&ptr).map(Some)
    }

    fn write_meta(&self, data: &[u8]) -> Result<()> {
        if self.heap.is_empty() {
            self.heap.alloc(TREE_META_SIZE as u64)?;
        }
        let ptr = self.heap.first_pointer(TREE_META_SIZE);
        self.heap.write(&ptr, data)
    }

    fn node_capacity(&self) -> usize {
        self.heap.page_size()
    }

    fn read_only(&self) -> bool {
        self.heap.read_only()
    }

    fn sync(&self) -> Result<()> {
        self.heap.flush()
    }
}
