use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use log::debug;
use parking_lot::Mutex;

use crate::common::codec::{get_bytes, get_u16, get_u32, get_u64};
use crate::common::{DbConfig, DbError, Marshal, PageId, Result, HEADER_SIZE};
use crate::index::{BTree, BTreeConfig, Key, PageNodeStore, ScanOptions};
use crate::storage::disk::Pager;

use super::Pointer;

const HEAP_MAGIC: &[u8; 4] = b"THEP";
const HEAP_VERSION: u16 = 1;

/// Page of the freelist file holding [`HeapMeta`].
const HEAP_META_PAGE: PageId = PageId(0);
/// Page of the freelist file holding the freelist tree's metadata.
const FREELIST_META_PAGE: PageId = PageId(1);

/// Heap metadata, persisted in the first page of the freelist file.
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapMeta {
    page_size: u32,
    /// Offset just past the last region
    top: u64,
}

impl Marshal for HeapMeta {
    fn marshal_size(&self) -> usize {
        4 + 2 + 4 + 8
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_slice(HEAP_MAGIC);
        buf.put_u16(HEAP_VERSION);
        buf.put_u32(self.page_size);
        buf.put_u64(self.top);
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        if get_bytes(buf, 4)? != HEAP_MAGIC {
            return Err(DbError::corruption("bad heap magic"));
        }
        let version = get_u16(buf)?;
        if version != HEAP_VERSION {
            return Err(DbError::corruption(format!(
                "unsupported heap version {}",
                version
            )));
        }
        Ok(Self {
            page_size: get_u32(buf)?,
            top: get_u64(buf)?,
        })
    }
}

/// Freelist key: payload size then address, both big-endian, so the tree
/// orders free regions by size with an address tie-break.
fn free_key(size: u32, address: u64) -> Key {
    Key::new(vec![size.to_be_bytes().to_vec(), address.to_be_bytes().to_vec()])
}

fn decode_free_key(key: &Key) -> Result<Pointer> {
    match key.columns() {
        [size, address] => {
            let size = get_u32(&mut &size[..])?;
            let address = get_u64(&mut &address[..])?;
            Ok(Pointer {
                address,
                size,
                free: true,
            })
        }
        _ => Err(DbError::corruption("malformed freelist key")),
    }
}

/// Where [`Heap::place`] found a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// A free region of exactly the requested size
    Exact,
    /// The front of a larger free region; holds the free remainder
    Split(Pointer),
    /// Past the old top, which is kept here
    Grown(u64),
}

/// Heap hands out persistent, variable-size regions of a paged data file.
///
/// Every byte in `[0, top)` of the data file belongs to exactly one region:
/// a 5 byte header (free flag, payload size) followed by the payload. Freed
/// regions are tracked in a B+ tree keyed by `(size, address)` that lives in
/// a second, page-per-node file next to the data file.
pub struct Heap {
    /// Data file holding headers and payloads
    data: Arc<Pager>,
    /// Freelist file: heap metadata plus the freelist tree
    meta: Arc<Pager>,
    /// Free regions by (size, address)
    freelist: BTree<PageNodeStore>,
    /// Offset just past the last region; locked across alloc and free
    top: Mutex<u64>,
    /// Largest single allocation
    max_alloc: u64,
    /// Upper bound on `top`
    max_file_size: Option<u64>,
}

impl Heap {
    /// Opens the heap stored in `data_path` with its freelist in
    /// `freelist_path`, creating both when the freelist file is empty.
    pub fn open<P: AsRef<Path>, Q: AsRef<Path>>(
        data_path: P,
        freelist_path: Q,
        config: &DbConfig,
    ) -> Result<Self> {
        let meta = Arc::new(Pager::open(
            freelist_path.as_ref(),
            config.page_size,
            config.read_only,
        )?);
        let data = Arc::new(Pager::open(
            data_path.as_ref(),
            config.page_size,
            config.read_only,
        )?);

        let tree_config = BTreeConfig::new(2, 12, 0)
            .page_size(config.page_size)
            .cache_size(config.cache_size);

        let (top, freelist) = if meta.count() == 0 {
            if config.read_only {
                return Err(DbError::corruption(format!(
                    "{}: missing heap metadata",
                    freelist_path.as_ref().display()
                )));
            }
            meta.alloc(1)?;
            let heap_meta = HeapMeta {
                page_size: config.page_size as u32,
                top: 0,
            };
            meta.marshal(HEAP_META_PAGE, &heap_meta)?;
            let store = PageNodeStore::new(meta.clone(), FREELIST_META_PAGE);
            debug!("created heap {}", data_path.as_ref().display());
            (0, BTree::create(store, tree_config)?)
        } else {
            let heap_meta: HeapMeta = meta.unmarshal(HEAP_META_PAGE)?;
            if heap_meta.page_size as usize != config.page_size {
                return Err(DbError::corruption(format!(
                    "heap page size {} does not match configured {}",
                    heap_meta.page_size, config.page_size
                )));
            }
            let live = data.live_len();
            if heap_meta.top > live {
                return Err(DbError::corruption(format!(
                    "heap top {} beyond data file length {}",
                    heap_meta.top, live
                )));
            }
            let store = PageNodeStore::new(meta.clone(), FREELIST_META_PAGE);
            (heap_meta.top, BTree::open(store, tree_config)?)
        };

        Ok(Self {
            data,
            meta,
            freelist,
            top: Mutex::new(top),
            max_alloc: config.max_alloc.min(u32::MAX as u64),
            max_file_size: config.max_file_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.data.page_size()
    }

    pub fn read_only(&self) -> bool {
        self.data.read_only()
    }

    /// Offset just past the last region.
    pub fn top(&self) -> u64 {
        *self.top.lock()
    }

    /// True until the first allocation.
    pub fn is_empty(&self) -> bool {
        self.top() == 0
    }

    /// A pointer to the very first region, where layered structures keep
    /// their own metadata.
    pub fn first_pointer(&self, size: u32) -> Pointer {
        Pointer::new(0, size)
    }

    fn read_header(&self, address: u64, top: u64) -> Result<Pointer> {
        if address.saturating_add(HEADER_SIZE) > top {
            return Err(DbError::InvalidPointer(address));
        }
        let mut raw = [0u8; HEADER_SIZE as usize];
        self.data.read_at(&mut raw, address)?;
        let ptr = Pointer::from_header(address, &raw)?;
        if ptr.end() > top {
            return Err(DbError::corruption(format!(
                "region {} runs past heap top {}",
                ptr, top
            )));
        }
        Ok(ptr)
    }

    fn write_header(&self, ptr: &Pointer) -> Result<()> {
        self.data.write_at(&ptr.header(), ptr.address)
    }

    fn write_meta(&self, top: u64) -> Result<()> {
        let meta = HeapMeta {
            page_size: self.page_size() as u32,
            top,
        };
        self.meta.marshal(HEAP_META_PAGE, &meta)
    }

    /// Reads the header at `address`. The result may be a free region.
    pub fn pointer_at(&self, address: u64) -> Result<Pointer> {
        let top = self.top();
        self.read_header(address, top)
    }

    /// Checks that `ptr` names a live region exactly as recorded on disk.
    fn validate(&self, ptr: &Pointer, top: u64) -> Result<Pointer> {
        let stored = self.read_header(ptr.address, top)?;
        if stored.free || stored.size != ptr.size {
            return Err(DbError::InvalidPointer(ptr.address));
        }
        Ok(stored)
    }

    /// Allocates a region with a payload of `size` bytes.
    ///
    /// A freed region of exactly `size` bytes is reused first, then the
    /// smallest free region that can be split with room for a header, and
    /// only then does the heap grow.
    pub fn alloc(&self, size: u64) -> Result<Pointer> {
        self.place(size).map(|(ptr, _)| ptr)
    }

    /// Like [`Heap::alloc`], also reporting how the region was found so
    /// [`Heap::unplace`] can take the allocation back.
    pub fn place(&self, size: u64) -> Result<(Pointer, Placement)> {
        if self.read_only() {
            return Err(DbError::ReadOnly);
        }
        if size > self.max_alloc {
            return Err(DbError::AllocTooLarge {
                size,
                max: self.max_alloc,
            });
        }
        let size = size as u32;

        let mut top = self.top.lock();

        if let Some((key, _)) = self.freelist.ceiling(&free_key(size, 0))? {
            let region = decode_free_key(&key)?;
            if region.size == size {
                self.freelist.delete(&key)?;
                let ptr = Pointer::new(region.address, size);
                self.write_header(&ptr)?;
                return Ok((ptr, Placement::Exact));
            }
        }

        let wanted = size as u64 + HEADER_SIZE;
        if wanted <= u32::MAX as u64 {
            if let Some((key, _)) = self.freelist.ceiling(&free_key(wanted as u32, 0))? {
                let region = decode_free_key(&key)?;
                self.freelist.delete(&key)?;

                let ptr = Pointer::new(region.address, size);
                let rest = Pointer {
                    address: ptr.end(),
                    size: region.size - wanted as u32,
                    free: true,
                };
                self.write_header(&rest)?;
                self.freelist.insert(&free_key(rest.size, rest.address), &[])?;
                self.write_header(&ptr)?;
                return Ok((ptr, Placement::Split(rest)));
            }
        }

        let ptr = Pointer::new(*top, size);
        let new_top = ptr.end();
        if self.max_file_size.is_some_and(|max| new_top > max) {
            return Err(DbError::OutOfSpace);
        }

        let page_size = self.page_size() as u64;
        let pages = new_top.div_ceil(page_size);
        if pages > self.data.count() {
            self.data.alloc(pages - self.data.count())?;
        }
        self.write_header(&ptr)?;
        let old_top = *top;
        *top = new_top;
        self.write_meta(new_top)?;
        Ok((ptr, Placement::Grown(old_top)))
    }

    /// Takes back the latest allocation, leaving headers, freelist and top
    /// as they were before [`Heap::place`] returned `ptr`. Allocations must
    /// be taken back in reverse order.
    pub fn unplace(&self, ptr: &Pointer, placement: Placement) -> Result<()> {
        if self.read_only() {
            return Err(DbError::ReadOnly);
        }
        let mut top = self.top.lock();
        let ptr = self.validate(ptr, *top)?;

        match placement {
            Placement::Exact => {
                let region = Pointer { free: true, ..ptr };
                self.write_header(&region)?;
                self.freelist
                    .insert(&free_key(region.size, region.address), &[])?;
            }
            Placement::Split(rest) => {
                let stored = self.read_header(ptr.end(), *top)?;
                if !stored.free || stored.address != rest.address || stored.size != rest.size {
                    return Err(DbError::corruption(format!(
                        "split remainder {} changed to {}",
                        rest, stored
                    )));
                }
                self.freelist.delete(&free_key(rest.size, rest.address))?;
                let region = Pointer {
                    address: ptr.address,
                    size: (ptr.span() + rest.size as u64) as u32,
                    free: true,
                };
                self.write_header(&region)?;
                self.freelist
                    .insert(&free_key(region.size, region.address), &[])?;
            }
            Placement::Grown(old_top) => {
                if ptr.address != old_top || ptr.end() != *top {
                    return Err(DbError::InvalidPointer(ptr.address));
                }
                *top = old_top;
            }
        }
        self.write_meta(*top)
    }

    /// Frees a live region, merging it with the free regions that follow it.
    pub fn free(&self, ptr: &Pointer) -> Result<Pointer> {
        if self.read_only() {
            return Err(DbError::ReadOnly);
        }
        let top = self.top.lock();
        let mut region = self.validate(ptr, *top)?;

        while region.end() < *top {
            let next = self.read_header(region.end(), *top)?;
            let merged = region.size as u64 + next.span();
            if !next.free || merged > u32::MAX as u64 {
                break;
            }
            self.freelist.delete(&free_key(next.size, next.address))?;
            region.size = merged as u32;
        }

        region.free = true;
        self.write_header(&region)?;
        self.freelist
            .insert(&free_key(region.size, region.address), &[])?;
        self.write_meta(*top)?;
        Ok(region)
    }

    /// Reads the whole payload of a live region.
    pub fn read(&self, ptr: &Pointer) -> Result<Vec<u8>> {
        let stored = self.validate(ptr, self.top())?;
        let mut buf = vec![0u8; stored.size as usize];
        self.data.read_at(&mut buf, stored.payload_offset())?;
        Ok(buf)
    }

    /// Writes `data` at the start of a live region's payload.
    pub fn write(&self, ptr: &Pointer, data: &[u8]) -> Result<()> {
        if data.len() > ptr.size as usize {
            return Err(DbError::ValueTooLarge {
                size: data.len(),
                max: ptr.size as usize,
            });
        }
        let stored = self.validate(ptr, self.top())?;
        self.data.write_at(data, stored.payload_offset())
    }

    /// Visits every region, free ones included, in address order, starting
    /// after `from` (or at the first region).
    pub fn scan<F>(&self, from: Option<&Pointer>, mut f: F) -> Result<()>
    where
        F: FnMut(Pointer) -> Result<ControlFlow<()>>,
    {
        let top = self.top();
        let mut address = from.map_or(0, Pointer::end);
        while address < top {
            let ptr = self.read_header(address, top)?;
            if let ControlFlow::Break(()) = f(ptr)? {
                break;
            }
            address = ptr.end();
        }
        Ok(())
    }

    /// Free regions in freelist order: by size, then address.
    pub fn free_regions(&self) -> Result<Vec<Pointer>> {
        let mut out = Vec::new();
        self.freelist.scan(ScanOptions::all(), |key, _| {
            out.push(decode_free_key(key)?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(out)
    }

    /// Verifies that regions tile `[0, top)` and that the freelist holds
    /// exactly the regions flagged free.
    pub fn check(&self) -> Result<()> {
        let mut covered = 0u64;
        let mut flagged = Vec::new();
        self.scan(None, |ptr| {
            covered += ptr.span();
            if ptr.free {
                flagged.push(ptr.address);
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let top = self.top();
        if covered != top {
            return Err(DbError::corruption(format!(
                "regions cover {} bytes, heap top is {}",
                covered, top
            )));
        }

        let mut listed: Vec<u64> = self.free_regions()?.iter().map(|p| p.address).collect();
        listed.sort_unstable();
        if listed != flagged {
            return Err(DbError::corruption("freelist disagrees with free headers"));
        }
        self.freelist.check()
    }

    /// Writes the freelist cache and metadata, then syncs both files.
    pub fn flush(&self) -> Result<()> {
        if self.read_only() {
            return Ok(());
        }
        let top = self.top.lock();
        self.write_meta(*top)?;
        self.freelist.flush()?;
        self.data.sync()
    }

    pub fn data_pager(&self) -> &Arc<Pager> {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::TempDir;

    fn open_heap(dir: &TempDir) -> Heap {
        let config = DbConfig::new().page_size(1024).cache_size(32);
        Heap::open(dir.path().join("h.dat"), dir.path().join("h.bin"), &config).unwrap()
    }

    #[test]
    fn test_alloc_extends_top() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        assert!(heap.is_empty());

        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(2000).unwrap();
        assert_eq!(a.address, 0);
        assert_eq!(b.address, 15);
        assert_eq!(heap.top(), 15 + 5 + 2000);
        assert_eq!(heap.data_pager().count(), 2);
        heap.check().unwrap();
    }

    #[test]
    fn test_read_write() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let ptr = heap.alloc(8).unwrap();
        heap.write(&ptr, b"abc").unwrap();
        assert_eq!(&heap.read(&ptr).unwrap()[..3], b"abc");

        assert!(matches!(
            heap.write(&ptr, &[0u8; 9]),
            Err(DbError::ValueTooLarge { .. })
        ));
        assert!(matches!(
            heap.read(&Pointer::new(ptr.address, 7)),
            Err(DbError::InvalidPointer(_))
        ));
        assert!(matches!(
            heap.read(&Pointer::new(1000, 8)),
            Err(DbError::InvalidPointer(_))
        ));
    }

    #[test]
    fn test_exact_reuse() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let _a = heap.alloc(20).unwrap();
        let b = heap.alloc(20).unwrap();
        let _c = heap.alloc(20).unwrap();

        heap.free(&b).unwrap();
        let d = heap.alloc(20).unwrap();
        assert_eq!(d.address, b.address);
        assert!(heap.free_regions().unwrap().is_empty());
    }

    #[test]
    fn test_forward_coalesce() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(30).unwrap();
        let _c = heap.alloc(10).unwrap();

        heap.free(&b).unwrap();
        let merged = heap.free(&a).unwrap();
        assert_eq!(merged.address, a.address);
        assert_eq!(merged.size, 10 + 30 + HEADER_SIZE as u32);

        let free = heap.free_regions().unwrap();
        assert_eq!(free.len(), 1);
        assert_eq!(free[0].size, merged.size);
        heap.check().unwrap();
    }

    #[test]
    fn test_no_backward_coalesce() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(10).unwrap();
        let _c = heap.alloc(10).unwrap();

        heap.free(&a).unwrap();
        heap.free(&b).unwrap();
        assert_eq!(heap.free_regions().unwrap().len(), 2);
    }

    #[test]
    fn test_best_fit_split() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let big = heap.alloc(100).unwrap();
        let _sep1 = heap.alloc(1).unwrap();
        let small = heap.alloc(40).unwrap();
        let _sep2 = heap.alloc(1).unwrap();

        heap.free(&big).unwrap();
        heap.free(&small).unwrap();

        // 40 is the smallest region with room for 20 plus a header.
        let ptr = heap.alloc(20).unwrap();
        assert_eq!(ptr.address, small.address);
        let rest = heap.pointer_at(ptr.end()).unwrap();
        assert!(rest.free);
        assert_eq!(rest.size, 40 - 20 - HEADER_SIZE as u32);
        heap.check().unwrap();
    }

    #[test]
    fn test_unplace_restores_layout() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let a = heap.alloc(10).unwrap();
        let b = heap.alloc(60).unwrap();
        let c = heap.alloc(10).unwrap();
        let _d = heap.alloc(10).unwrap();
        heap.free(&a).unwrap();
        heap.free(&c).unwrap();
        heap.free(&b).unwrap();

        let regions = |heap: &Heap| -> Vec<(u64, u32)> {
            heap.free_regions()
                .unwrap()
                .iter()
                .map(|p| (p.address, p.size))
                .collect()
        };
        let top = heap.top();
        let free = regions(&heap);

        // Exact reuse, a split, then growth, taken back newest first.
        let (p1, exact) = heap.place(10).unwrap();
        assert_eq!(exact, Placement::Exact);
        let (p2, split) = heap.place(20).unwrap();
        assert!(matches!(split, Placement::Split(_)));
        let (p3, grown) = heap.place(500).unwrap();
        assert_eq!(grown, Placement::Grown(top));

        heap.unplace(&p3, grown).unwrap();
        heap.unplace(&p2, split).unwrap();
        heap.unplace(&p1, exact).unwrap();
        assert_eq!(heap.top(), top);
        assert_eq!(regions(&heap), free);
        heap.check().unwrap();
    }

    #[test]
    fn test_double_free() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let a = heap.alloc(10).unwrap();
        heap.free(&a).unwrap();
        assert!(matches!(heap.free(&a), Err(DbError::InvalidPointer(_))));
    }

    #[test]
    fn test_limits() {
        let dir = TempDir::new().unwrap();
        let config = DbConfig::new()
            .page_size(1024)
            .max_alloc(100)
            .max_file_size(200);
        let heap = Heap::open(dir.path().join("h.dat"), dir.path().join("h.bin"), &config).unwrap();
        assert!(matches!(heap.alloc(101), Err(DbError::AllocTooLarge { .. })));
        heap.alloc(100).unwrap();
        assert!(matches!(heap.alloc(100), Err(DbError::OutOfSpace)));
    }

    #[test]
    fn test_conservation_random() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let mut rng = StdRng::seed_from_u64(7);
        let mut live: Vec<Pointer> = Vec::new();

        for _ in 0..2000 {
            if live.is_empty() || rng.gen_bool(0.6) {
                live.push(heap.alloc(rng.gen_range(1..200)).unwrap());
            } else {
                let idx = rng.gen_range(0..live.len());
                let ptr = live.swap_remove(idx);
                heap.free(&ptr).unwrap();
            }
        }
        heap.check().unwrap();

        let mut used = 0u64;
        let mut free = 0u64;
        heap.scan(None, |ptr| {
            if ptr.free {
                free += ptr.span();
            } else {
                used += ptr.span();
            }
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        assert_eq!(used + free, heap.top());
        assert_eq!(used, live.iter().map(Pointer::span).sum::<u64>());
    }

    #[test]
    fn test_reopen() {
        let dir = TempDir::new().unwrap();
        let (kept, freed) = {
            let heap = open_heap(&dir);
            let kept = heap.alloc(16).unwrap();
            heap.write(&kept, b"persistent").unwrap();
            let freed = heap.alloc(16).unwrap();
            heap.alloc(4).unwrap();
            heap.free(&freed).unwrap();
            heap.flush().unwrap();
            (kept, freed)
        };

        let heap = open_heap(&dir);
        assert_eq!(&heap.read(&kept).unwrap()[..10], b"persistent");
        assert_eq!(heap.alloc(16).unwrap().address, freed.address);
        heap.check().unwrap();
    }

    #[test]
    fn test_scan_from() {
        let dir = TempDir::new().unwrap();
        let heap = open_heap(&dir);
        let a = heap.alloc(3).unwrap();
        let b = heap.alloc(4).unwrap();
        let c = heap.alloc(5).unwrap();

        let mut seen = Vec::new();
        heap.scan(Some(&a), |ptr| {
            seen.push(ptr);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        assert_eq!(seen, vec![b, c]);
    }
}
