/// Default size of a page in bytes (4 KB)
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Smallest page size a pager accepts
pub const MIN_PAGE_SIZE: usize = 64;

/// Default number of decoded nodes kept per page cache
pub const DEFAULT_CACHE_SIZE: usize = 256;

/// Default number of items buffered by an execution stream
pub const DEFAULT_STREAM_CAPACITY: usize = 64;

/// Size of a heap pointer header: one flag byte plus a 32-bit payload size
pub const HEADER_SIZE: u64 = 5;

/// Sentinel stored on disk for an absent node or pointer address
pub const NULL_ADDRESS: u64 = u64::MAX;

/// Datafile pager file name inside a table directory
pub const DATA_FILE: &str = "data.dat";

/// Datafile heap freelist file name inside a table directory
pub const DATA_FREELIST_FILE: &str = "data.bin";

/// Sub-directory holding index files
pub const INDEX_DIR: &str = "indexes";

/// Extension of an index pager file
pub const INDEX_EXT: &str = "idx";

/// Extension of an index heap freelist file
pub const INDEX_FREELIST_EXT: &str = "bin";

/// Table metadata file name
pub const METADATA_FILE: &str = "metadata.json";

/// Runtime configuration shared by every table of a database.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Page size used when creating new files
    pub page_size: usize,
    /// Decoded nodes cached per B+ tree
    pub cache_size: usize,
    /// Items buffered between a scan and its consumer
    pub stream_capacity: usize,
    /// Open every file read-only
    pub read_only: bool,
    /// Largest single heap allocation in bytes
    pub max_alloc: u64,
    /// Upper bound on a heap file's size, if any
    pub max_file_size: Option<u64>,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            stream_capacity: DEFAULT_STREAM_CAPACITY,
            read_only: false,
            max_alloc: u32::MAX as u64,
            max_file_size: None,
        }
    }
}

impl DbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    pub fn cache_size(mut self, size: usize) -> Self {
        self.cache_size = size;
        self
    }

    pub fn stream_capacity(mut self, capacity: usize) -> Self {
        self.stream_capacity = capacity;
        self
    }

    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn max_alloc(mut self, max: u64) -> Self {
        self.max_alloc = max;
        self
    }

    pub fn max_file_size(mut self, max: u64) -> Self {
        self.max_file_size = Some(max);
        self
    }
}
