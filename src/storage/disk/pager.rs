use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::BytesMut;
use log::debug;
use parking_lot::Mutex;

use crate::common::{DbError, Marshal, PageId, Result, MIN_PAGE_SIZE};

/// Pager owns a single file and divides it into equal, fixed-size pages.
/// Reads and writes are byte-addressed but must stay inside the allocated
/// pages; the file only grows through [`Pager::alloc`].
pub struct Pager {
    /// The backing file
    file: Mutex<File>,
    /// Path to the backing file
    path: PathBuf,
    /// Page size in bytes, a power of two
    page_size: usize,
    /// Number of pages currently allocated
    num_pages: AtomicU64,
    /// Whether writes are refused
    read_only: bool,
    /// Number of read operations performed
    num_reads: AtomicU64,
    /// Number of write operations performed
    num_writes: AtomicU64,
}

impl Pager {
    /// Opens (or creates, when writable) the file at `path`.
    /// An existing file must be a whole number of pages.
    pub fn open<P: AsRef<Path>>(path: P, page_size: usize, read_only: bool) -> Result<Self> {
        if !page_size.is_power_of_two() || page_size < MIN_PAGE_SIZE {
            return Err(DbError::corruption(format!(
                "page size {} is not a power of two >= {}",
                page_size, MIN_PAGE_SIZE
            )));
        }

        let file = if read_only {
            OpenOptions::new().read(true).open(path.as_ref())?
        } else {
            OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(path.as_ref())?
        };

        let file_size = file.metadata()?.len();
        if file_size % page_size as u64 != 0 {
            return Err(DbError::corruption(format!(
                "{}: size {} is not a multiple of page size {}",
                path.as_ref().display(),
                file_size,
                page_size
            )));
        }

        Ok(Self {
            file: Mutex::new(file),
            path: path.as_ref().to_path_buf(),
            page_size,
            num_pages: AtomicU64::new(file_size / page_size as u64),
            read_only,
            num_reads: AtomicU64::new(0),
            num_writes: AtomicU64::new(0),
        })
    }

    /// Extends the file by `n` zeroed pages and returns the first new page.
    pub fn alloc(&self, n: u64) -> Result<PageId> {
        if self.read_only {
            return Err(DbError::ReadOnly);
        }

        let file = self.file.lock();
        let first = self.num_pages.load(Ordering::Acquire);
        let new_len = (first + n)
            .checked_mul(self.page_size as u64)
            .ok_or(DbError::OutOfSpace)?;
        file.set_len(new_len)?;
        self.num_pages.store(first + n, Ordering::Release);

        debug!("{}: allocated {} page(s) at {}", self.path.display(), n, first);
        Ok(PageId::new(first))
    }

    fn check_range(&self, offset: u64, len: usize) -> Result<()> {
        let end = offset
            .checked_add(len as u64)
            .ok_or(DbError::InvalidPointer(offset))?;
        if end > self.live_len() {
            return Err(DbError::InvalidPointer(offset));
        }
        Ok(())
    }

    /// Reads `buf.len()` bytes starting at `offset`.
    pub fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        self.check_range(offset, buf.len())?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)?;

        self.num_reads.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Writes `data` starting at `offset`. The whole range must already be allocated.
    pub fn write_at(&self, data: &[u8], offset: u64) -> Result<()> {
        if self.read_only {
            return Err(DbError::ReadOnly);
        }
        self.check_range(offset, data.len())?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;

        self.num_writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Reads a whole page into `buf`, which must be exactly one page long.
    pub fn read_page(&self, page_id: PageId, buf: &mut [u8]) -> Result<()> {
        assert_eq!(buf.len(), self.page_size, "Buffer must be one page");
        self.read_at(buf, page_id.offset(self.page_size))
    }

    /// Writes a whole page from `data`, which must be exactly one page long.
    pub fn write_page(&self, page_id: PageId, data: &[u8]) -> Result<()> {
        assert_eq!(data.len(), self.page_size, "Buffer must be one page");
        self.write_at(data, page_id.offset(self.page_size))
    }

    /// Encodes `object` into the page `page_id`.
    pub fn marshal<T: Marshal>(&self, page_id: PageId, object: &T) -> Result<()> {
        let size = object.marshal_size();
        if size > self.page_size {
            return Err(DbError::AllocTooLarge {
                size: size as u64,
                max: self.page_size as u64,
            });
        }
        let mut buf = BytesMut::with_capacity(self.page_size);
        object.marshal(&mut buf);
        buf.resize(self.page_size, 0);
        self.write_page(page_id, &buf)
    }

    /// Decodes an object stored in the page `page_id`.
    pub fn unmarshal<T: Marshal>(&self, page_id: PageId) -> Result<T> {
        let mut buf = vec![0u8; self.page_size];
        self.read_page(page_id, &mut buf)?;
        T::unmarshal(&mut &buf[..])
    }

    /// Returns the number of pages currently allocated.
    pub fn count(&self) -> u64 {
        self.num_pages.load(Ordering::Acquire)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn read_only(&self) -> bool {
        self.read_only
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the allocated region in bytes.
    pub fn live_len(&self) -> u64 {
        self.count() * self.page_size as u64
    }

    /// Returns the number of read operations performed.
    pub fn num_reads(&self) -> u64 {
        self.num_reads.load(Ordering::Relaxed)
    }

    /// Returns the number of write operations performed.
    pub fn num_writes(&self) -> u64 {
        self.num_writes.load(Ordering::Relaxed)
    }

    /// Flushes buffered writes to stable storage.
    pub fn sync(&self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        let file = self.file.lock();
        file.sync_all()?;
        Ok(())
    }

    /// Flushes and releases the file.
    pub fn close(self) -> Result<()> {
        self.sync()
    }
}

impl Drop for Pager {
    fn drop(&mut self) {
        if !self.read_only {
            let _ = self.file.get_mut().sync_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::codec::{get_u32, get_u64};
    use bytes::BufMut;
    use tempfile::NamedTempFile;

    struct Sample {
        a: u32,
        b: u64,
    }

    impl Marshal for Sample {
        fn marshal_size(&self) -> usize {
            12
        }

        fn marshal(&self, buf: &mut BytesMut) {
            buf.put_u32(self.a);
            buf.put_u64(self.b);
        }

        fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
            Ok(Self {
                a: get_u32(buf)?,
                b: get_u64(buf)?,
            })
        }
    }

    #[test]
    fn test_pager_new() {
        let temp_file = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp_file.path(), 4096, false).unwrap();
        assert_eq!(pager.count(), 0);
        assert_eq!(pager.page_size(), 4096);
        assert!(!pager.read_only());
    }

    #[test]
    fn test_pager_alloc() {
        let temp_file = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp_file.path(), 4096, false).unwrap();

        assert_eq!(pager.alloc(1).unwrap(), PageId::new(0));
        assert_eq!(pager.alloc(3).unwrap(), PageId::new(1));
        assert_eq!(pager.count(), 4);

        let mut buf = vec![0xAAu8; 4096];
        pager.read_page(PageId::new(3), &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_pager_unaligned_io() {
        let temp_file = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp_file.path(), 256, false).unwrap();
        pager.alloc(4).unwrap();

        // Spans a page boundary
        let data: Vec<u8> = (0..300u32).map(|i| (i % 251) as u8).collect();
        pager.write_at(&data, 200).unwrap();

        let mut out = vec![0u8; 300];
        pager.read_at(&mut out, 200).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_pager_write_past_tail() {
        let temp_file = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp_file.path(), 256, false).unwrap();
        pager.alloc(1).unwrap();

        assert!(matches!(
            pager.write_at(&[1, 2, 3], 255),
            Err(DbError::InvalidPointer(255))
        ));
        let mut buf = [0u8; 1];
        assert!(pager.read_at(&mut buf, 256).is_err());
    }

    #[test]
    fn test_pager_rejects_bad_page_size() {
        let temp_file = NamedTempFile::new().unwrap();
        assert!(matches!(
            Pager::open(temp_file.path(), 1000, false),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn test_pager_misaligned_file() {
        let temp_file = NamedTempFile::new().unwrap();
        std::fs::write(temp_file.path(), vec![0u8; 100]).unwrap();
        assert!(matches!(
            Pager::open(temp_file.path(), 64, false),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn test_pager_marshal_roundtrip() {
        let temp_file = NamedTempFile::new().unwrap();
        let pager = Pager::open(temp_file.path(), 128, false).unwrap();
        let page = pager.alloc(2).unwrap();

        pager.marshal(page, &Sample { a: 7, b: 1 << 40 }).unwrap();
        let back: Sample = pager.unmarshal(page).unwrap();
        assert_eq!(back.a, 7);
        assert_eq!(back.b, 1 << 40);
    }

    #[test]
    fn test_pager_read_only() {
        let temp_file = NamedTempFile::new().unwrap();
        {
            let pager = Pager::open(temp_file.path(), 128, false).unwrap();
            pager.alloc(1).unwrap();
            pager.write_at(b"hello", 10).unwrap();
            pager.close().unwrap();
        }

        let pager = Pager::open(temp_file.path(), 128, true).unwrap();
        assert_eq!(pager.count(), 1);
        let mut buf = [0u8; 5];
        pager.read_at(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"hello");
        assert!(matches!(pager.write_at(b"x", 0), Err(DbError::ReadOnly)));
        assert!(matches!(pager.alloc(1), Err(DbError::ReadOnly)));
    }
}
