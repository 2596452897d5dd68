use std::cmp::Ordering;
use std::ops::ControlFlow;

use bytes::{BufMut, BytesMut};
use log::debug;
use parking_lot::RwLock;

use crate::buffer::{CacheBacking, PageCache, ReadHandle, WriteHandle};
use crate::common::codec::{get_bytes, get_u16, get_u32, get_u64, get_u8};
use crate::common::{DbError, Marshal, Result, DEFAULT_CACHE_SIZE, DEFAULT_PAGE_SIZE};

use super::btree_node::{BTreeNode, Entry};
use super::key::check_column_count;
use super::{Key, NodeStore};

const TREE_MAGIC: &[u8; 4] = b"TBPT";
const TREE_VERSION: u16 = 1;
const MIN_DEGREE: usize = 4;
const MAX_DEGREE: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeConfig {
    /// Maximum children per internal node; 0 derives the largest that fits a page
    pub degree: usize,
    /// Maximum total bytes of the key columns
    pub max_key_size: usize,
    pub max_value_size: usize,
    pub key_cols: usize,
    /// Maximum total bytes of the suffix columns appended by non-unique indexes
    pub max_suffix_size: usize,
    pub suffix_cols: usize,
    pub unique: bool,
    pub page_size: usize,
    pub cache_size: usize,
}

impl BTreeConfig {
    pub fn new(key_cols: usize, max_key_size: usize, max_value_size: usize) -> Self {
        Self {
            degree: 0,
            max_key_size,
            max_value_size,
            key_cols,
            max_suffix_size: 0,
            suffix_cols: 0,
            unique: true,
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
        }
    }

    pub fn degree(mut self, degree: usize) -> Self {
        self.degree = degree;
        self
    }

    pub fn suffix(mut self, cols: usize, max_size: usize) -> Self {
        self.suffix_cols = cols;
        self.max_suffix_size = max_size;
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn cache_size(mut self, cache_size: usize) -> Self {
        self.cache_size = cache_size;
        self
    }

    /// Columns of every stored key.
    pub fn total_cols(&self) -> usize {
        self.key_cols + self.suffix_cols
    }

    pub fn max_entries(&self) -> usize {
        self.degree - 1
    }

    fn max_entry_size(&self) -> usize {
        BTreeNode::max_entry_size(
            self.total_cols(),
            self.max_key_size + self.max_suffix_size,
            self.max_value_size,
        )
    }

    /// Largest encoded node under this configuration.
    pub fn max_node_size(&self) -> usize {
        BTreeNode::max_size(self.degree, self.max_entry_size())
    }

    /// Validates the configuration and derives the degree when unset.
    pub fn resolve(mut self) -> Result<Self> {
        if self.key_cols == 0 {
            return Err(DbError::EmptyKey);
        }
        check_column_count(self.total_cols())?;
        if self.max_value_size > u16::MAX as usize
            || self.max_key_size + self.max_suffix_size > u16::MAX as usize
        {
            return Err(DbError::schema("key or value bound exceeds 65535 bytes"));
        }

        if self.degree == 0 {
            let entry = self.max_entry_size();
            let room = (self.page_size + entry).saturating_sub(super::NODE_HEADER_SIZE);
            self.degree = (room / (entry + 8)).min(MAX_DEGREE);
        }
        if self.degree < MIN_DEGREE {
            return Err(DbError::schema(format!(
                "degree {} below minimum {} (keys too large for a {} byte page?)",
                self.degree, MIN_DEGREE, self.page_size
            )));
        }
        if self.max_node_size() > self.page_size {
            return Err(DbError::schema(format!(
                "node of degree {} needs {} bytes, page is {}",
                self.degree,
                self.max_node_size(),
                self.page_size
            )));
        }
        Ok(self)
    }
}

/// Tree metadata persisted through the node store.
#[derive(Debug, Clone, PartialEq, Eq)]
struct TreeMeta {
    root: u64,
    height: u32,
    len: u64,
    degree: u32,
    key_cols: u16,
    suffix_cols: u16,
    unique: bool,
}

impl TreeMeta {
    fn new(root: u64, config: &BTreeConfig) -> Self {
        Self {
            root,
            height: 1,
            len: 0,
            degree: config.degree as u32,
            key_cols: config.key_cols as u16,
            suffix_cols: config.suffix_cols as u16,
            unique: config.unique,
        }
    }

    fn check(&self, config: &BTreeConfig) -> Result<()> {
        if self.degree as usize != config.degree
            || self.key_cols as usize != config.key_cols
            || self.suffix_cols as usize != config.suffix_cols
            || self.unique != config.unique
        {
            return Err(DbError::corruption(format!(
                "tree layout mismatch: stored degree={} key_cols={} suffix_cols={} unique={}",
                self.degree, self.key_cols, self.suffix_cols, self.unique
            )));
        }
        Ok(())
    }
}

impl Marshal for TreeMeta {
    fn marshal_size(&self) -> usize {
        4 + 2 + 8 + 4 + 8 + 4 + 2 + 2 + 1
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_slice(TREE_MAGIC);
        buf.put_u16(TREE_VERSION);
        buf.put_u64(self.root);
        buf.put_u32(self.height);
        buf.put_u64(self.len);
        buf.put_u32(self.degree);
        buf.put_u16(self.key_cols);
        buf.put_u16(self.suffix_cols);
        buf.put_u8(self.unique as u8);
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        if get_bytes(buf, 4)? != TREE_MAGIC {
            return Err(DbError::corruption("bad B+ tree magic"));
        }
        let version = get_u16(buf)?;
        if version != TREE_VERSION {
            return Err(DbError::corruption(format!(
                "unsupported B+ tree version {}",
                version
            )));
        }
        Ok(Self {
            root: get_u64(buf)?,
            height: get_u32(buf)?,
            len: get_u64(buf)?,
            degree: get_u32(buf)?,
            key_cols: get_u16(buf)?,
            suffix_cols: get_u16(buf)?,
            unique: get_u8(buf)? != 0,
        })
    }
}

/// Where a range scan starts and which way it walks.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    /// Start key; `None` starts at the first (or last, if reversed) entry
    pub key: Option<Key>,
    pub reverse: bool,
    /// Whether entries equal to `key` are visited
    pub inclusive: bool,
}

impl ScanOptions {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn from(key: Key, inclusive: bool) -> Self {
        Self {
            key: Some(key),
            reverse: false,
            inclusive,
        }
    }

    pub fn reverse_from(key: Key, inclusive: bool) -> Self {
        Self {
            key: Some(key),
            reverse: true,
            inclusive,
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }
}

/// Adapts a node store to the page cache.
struct NodeIo<'a, S> {
    store: &'a S,
}

impl<S: NodeStore> CacheBacking<BTreeNode> for NodeIo<'_, S> {
    fn load(&self, key: u64) -> Result<BTreeNode> {
        let data = self.store.read_node(key)?;
        BTreeNode::unmarshal(&mut &data[..])
    }

    fn store(&self, key: u64, value: &BTreeNode) -> Result<()> {
        self.store.write_node(key, &value.to_bytes())
    }
}

/// B+ tree over multi-column keys with opaque values.
///
/// Inserts split full nodes eagerly on the way down, so a node is never
/// revisited after its child is chosen. Leaves are doubly linked for range
/// scans. Deletes never merge; sparse and empty leaves are tolerated.
///
/// The metadata lock is held for a whole operation: writes take it
/// exclusively and scans share it until their callback returns. Node
/// latches are never crabbed.
pub struct BTree<S: NodeStore> {
    config: BTreeConfig,
    store: S,
    cache: PageCache<BTreeNode>,
    /// Tree-level lock guarding the metadata and the tree shape
    meta: RwLock<TreeMeta>,
}

impl<S: NodeStore> BTree<S> {
    /// Creates an empty tree in a store that holds no tree yet.
    pub fn create(store: S, config: BTreeConfig) -> Result<Self> {
        let config = config.resolve()?;
        if config.max_node_size() > store.node_capacity() {
            return Err(DbError::schema("B+ tree node does not fit the store"));
        }
        if store.read_meta()?.is_some() {
            return Err(DbError::corruption("store already holds a B+ tree"));
        }

        // Metadata first: a heap-backed store puts it at the first pointer.
        let mut meta = TreeMeta::new(crate::common::NULL_ADDRESS, &config);
        store.write_meta(&meta.to_bytes())?;

        let root = store.alloc_node(config.max_node_size())?;
        store.write_node(root, &BTreeNode::new_leaf().to_bytes())?;
        meta.root = root;
        store.write_meta(&meta.to_bytes())?;

        debug!(
            "created B+ tree: degree={} key_cols={} suffix_cols={} unique={}",
            config.degree, config.key_cols, config.suffix_cols, config.unique
        );

        Ok(Self {
            cache: PageCache::new(config.cache_size),
            config,
            store,
            meta: RwLock::new(meta),
        })
    }

    /// Opens the tree persisted in `store`.
    pub fn open(store: S, config: BTreeConfig) -> Result<Self> {
        let config = config.resolve()?;
        let raw = store
            .read_meta()?
            .ok_or_else(|| DbError::corruption("missing B+ tree metadata"))?;
        let meta = TreeMeta::unmarshal(&mut &raw[..])?;
        meta.check(&config)?;

        Ok(Self {
            cache: PageCache::new(config.cache_size),
            config,
            store,
            meta: RwLock::new(meta),
        })
    }

    /// Opens the tree in `store`, creating it if the store is empty.
    pub fn open_or_create(store: S, config: BTreeConfig) -> Result<Self> {
        if store.read_meta()?.is_some() {
            Self::open(store, config)
        } else {
            Self::create(store, config)
        }
    }

    pub fn config(&self) -> &BTreeConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Number of entries.
    pub fn len(&self) -> u64 {
        self.meta.read_recursive().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Levels from root to leaf; a lone root leaf has height 1.
    pub fn height(&self) -> u32 {
        self.meta.read_recursive().height
    }

    pub fn cache(&self) -> &PageCache<BTreeNode> {
        &self.cache
    }

    fn io(&self) -> NodeIo<'_, S> {
        NodeIo { store: &self.store }
    }

    fn check_key(&self, key: &Key) -> Result<()> {
        if key.is_empty() {
            return Err(DbError::EmptyKey);
        }
        if key.len() != self.config.total_cols() {
            return Err(DbError::schema(format!(
                "key has {} columns, tree expects {}",
                key.len(),
                self.config.total_cols()
            )));
        }
        let max = self.config.max_key_size + self.config.max_suffix_size;
        if key.byte_len() > max {
            return Err(DbError::KeyTooLarge {
                size: key.byte_len(),
                max,
            });
        }
        Ok(())
    }

    fn check_probe(&self, probe: &Key) -> Result<()> {
        if probe.is_empty() {
            return Err(DbError::EmptyKey);
        }
        if probe.len() > self.config.total_cols() {
            return Err(DbError::schema(format!(
                "search key has {} columns, tree has {}",
                probe.len(),
                self.config.total_cols()
            )));
        }
        Ok(())
    }

    /// Inserts a new entry; an existing equal key is a `DuplicateKey`.
    pub fn insert(&self, key: &Key, value: &[u8]) -> Result<()> {
        self.put(key, value, false).map(|_| ())
    }

    /// Inserts or overwrites. Returns true if an existing entry was rewritten.
    pub fn upsert(&self, key: &Key, value: &[u8]) -> Result<bool> {
        self.put(key, value, true)
    }

    fn put(&self, key: &Key, value: &[u8], update: bool) -> Result<bool> {
        self.check_key(key)?;
        if value.len() > self.config.max_value_size {
            return Err(DbError::ValueTooLarge {
                size: value.len(),
                max: self.config.max_value_size,
            });
        }

        let mut meta = self.meta.write();
        let io = self.io();
        let max_entries = self.config.max_entries();

        let root_full = self.cache.read(meta.root, &io)?.is_full(max_entries);
        if root_full {
            self.split_root(&mut meta, &io)?;
        }

        let mut node = self.cache.write(meta.root, &io)?;
        while !node.is_leaf() {
            let idx = node.search(key).right;
            let child_addr = node.children[idx];
            let mut child = self.cache.write(child_addr, &io)?;
            if child.is_full(max_entries) {
                let (separator, sibling) = self.split_child(&mut node, idx, &mut child, &io)?;
                if *key >= separator {
                    drop(child);
                    child = sibling;
                }
            }
            // Child is not full: the parent can no longer change.
            node = child;
        }

        let found = node.search(key);
        if found.found {
            if !update {
                return Err(DbError::DuplicateKey);
            }
            for entry in &mut node.entries[found.left..found.right] {
                entry.value = value.to_vec();
            }
            return Ok(true);
        }

        node.entries
            .insert(found.left, Entry::new(key.clone(), value.to_vec()));
        meta.len += 1;
        Ok(false)
    }

    /// Grows the tree by one level: a new root adopts the old one and its
    /// freshly split sibling.
    fn split_root(&self, meta: &mut TreeMeta, io: &NodeIo<'_, S>) -> Result<()> {
        let old_root = meta.root;
        let new_root = self.store.alloc_node(self.config.max_node_size())?;

        let mut root_node = BTreeNode::new_internal();
        root_node.children.push(old_root);
        let mut parent = self.cache.install(new_root, root_node, io)?;

        let mut child = self.cache.write(old_root, io)?;
        child.parent = Some(new_root);
        self.split_child(&mut parent, 0, &mut child, io)?;

        meta.root = new_root;
        meta.height += 1;
        self.store.write_meta(&meta.to_bytes())?;
        debug!("B+ tree root split: new root {} height {}", new_root, meta.height);
        Ok(())
    }

    /// Splits the full `child` found at `parent.children[idx]`. The new right
    /// sibling is returned write-locked along with the separator pushed
    /// into the parent.
    fn split_child(
        &self,
        parent: &mut WriteHandle<BTreeNode>,
        idx: usize,
        child: &mut WriteHandle<BTreeNode>,
        io: &NodeIo<'_, S>,
    ) -> Result<(Key, WriteHandle<BTreeNode>)> {
        let sibling_addr = self.store.alloc_node(self.config.max_node_size())?;

        let (separator, sibling) = if child.is_leaf() {
            let right = child.split_leaf();
            let separator = right
                .first()
                .map(|e| e.key.clone())
                .ok_or_else(|| DbError::Internal("leaf split produced an empty half".into()))?;

            let mut sibling = BTreeNode::new_leaf();
            sibling.entries = right;
            sibling.parent = Some(parent.key());
            sibling.prev = Some(child.key());
            sibling.next = child.next;

            if let Some(next_addr) = child.next {
                let mut next = self.cache.write(next_addr, io)?;
                next.prev = Some(sibling_addr);
            }
            child.next = Some(sibling_addr);
            (separator, sibling)
        } else {
            let (median, right_entries, right_children) = child.split_internal()?;

            for &grandchild in &right_children {
                let mut node = self.cache.write(grandchild, io)?;
                node.parent = Some(sibling_addr);
            }

            let mut sibling = BTreeNode::new_internal();
            sibling.entries = right_entries;
            sibling.children = right_children;
            sibling.parent = Some(parent.key());
            (median.key, sibling)
        };

        parent
            .entries
            .insert(idx, Entry::separator(separator.clone()));
        parent.children.insert(idx + 1, sibling_addr);

        let sibling = self.cache.install(sibling_addr, sibling, io)?;
        Ok((separator, sibling))
    }

    /// Descends to the leaf that holds the first entry `>= probe`
    /// (or `> probe` when `upper`), crabbing read locks.
    fn descend(&self, root: u64, probe: &Key, upper: bool) -> Result<ReadHandle<BTreeNode>> {
        let io = self.io();
        let mut node = self.cache.read(root, &io)?;
        while !node.is_leaf() {
            let found = node.search(probe);
            let idx = if upper { found.right } else { found.left };
            let child = self.cache.read(node.children[idx], &io)?;
            node = child;
        }
        Ok(node)
    }

    /// Descends along the first or last child to an edge leaf.
    fn edge_leaf(&self, root: u64, rightmost: bool) -> Result<ReadHandle<BTreeNode>> {
        let io = self.io();
        let mut node = self.cache.read(root, &io)?;
        while !node.is_leaf() {
            let child_addr = if rightmost {
                node.children[node.children.len() - 1]
            } else {
                node.children[0]
            };
            let child = self.cache.read(child_addr, &io)?;
            node = child;
        }
        Ok(node)
    }

    /// Returns the value of the first entry matching `key`.
    pub fn get(&self, key: &Key) -> Result<Vec<u8>> {
        self.check_probe(key)?;
        let mut out = None;
        self.scan(ScanOptions::from(key.clone(), true), |k, v| {
            if k.cmp_prefix(key) == Ordering::Equal {
                out = Some(v.to_vec());
            }
            Ok(ControlFlow::Break(()))
        })?;
        out.ok_or(DbError::KeyNotFound)
    }

    pub fn contains(&self, key: &Key) -> Result<bool> {
        match self.get(key) {
            Ok(_) => Ok(true),
            Err(DbError::KeyNotFound) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Every entry whose key starts with `prefix`, in key order.
    pub fn get_all(&self, prefix: &Key) -> Result<Vec<(Key, Vec<u8>)>> {
        self.check_probe(prefix)?;
        let mut out = Vec::new();
        self.scan(ScanOptions::from(prefix.clone(), true), |k, v| {
            if k.cmp_prefix(prefix) != Ordering::Equal {
                return Ok(ControlFlow::Break(()));
            }
            out.push((k.clone(), v.to_vec()));
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(out)
    }

    /// Smallest entry `>= key`.
    pub fn ceiling(&self, key: &Key) -> Result<Option<(Key, Vec<u8>)>> {
        self.check_probe(key)?;
        let mut out = None;
        self.scan(ScanOptions::from(key.clone(), true), |k, v| {
            out = Some((k.clone(), v.to_vec()));
            Ok(ControlFlow::Break(()))
        })?;
        Ok(out)
    }

    pub fn first(&self) -> Result<Option<(Key, Vec<u8>)>> {
        self.edge(false)
    }

    pub fn last(&self) -> Result<Option<(Key, Vec<u8>)>> {
        self.edge(true)
    }

    fn edge(&self, reverse: bool) -> Result<Option<(Key, Vec<u8>)>> {
        let mut out = None;
        let opts = ScanOptions {
            reverse,
            ..ScanOptions::default()
        };
        self.scan(opts, |k, v| {
            out = Some((k.clone(), v.to_vec()));
            Ok(ControlFlow::Break(()))
        })?;
        Ok(out)
    }

    /// Walks entries in key order (or reverse) from the position `opts`
    /// selects, until `f` breaks or the leaves run out.
    ///
    /// Each leaf's entries are copied out before `f` runs, so `f` may read
    /// this tree again.
    pub fn scan<F>(&self, opts: ScanOptions, mut f: F) -> Result<()>
    where
        F: FnMut(&Key, &[u8]) -> Result<ControlFlow<()>>,
    {
        if let Some(key) = &opts.key {
            self.check_probe(key)?;
        }

        let meta = self.meta.read_recursive();
        let io = self.io();

        // Forward scans visit [pos, len) of the first leaf; reverse scans
        // visit [0, pos) backwards.
        let (leaf, mut pos) = match (&opts.key, opts.reverse) {
            (None, false) => (self.edge_leaf(meta.root, false)?, 0),
            (None, true) => (self.edge_leaf(meta.root, true)?, usize::MAX),
            (Some(key), false) => {
                let upper = !opts.inclusive;
                let leaf = self.descend(meta.root, key, upper)?;
                let found = leaf.search(key);
                let pos = if upper { found.right } else { found.left };
                (leaf, pos)
            }
            (Some(key), true) => {
                let upper = opts.inclusive;
                let leaf = self.descend(meta.root, key, upper)?;
                let found = leaf.search(key);
                let pos = if upper { found.right } else { found.left };
                (leaf, pos)
            }
        };

        let mut current = Some(leaf.key());
        drop(leaf);

        while let Some(addr) = current {
            let (chunk, link) = {
                let leaf = self.cache.read(addr, &io)?;
                if opts.reverse {
                    let end = pos.min(leaf.len());
                    let chunk: Vec<Entry> = leaf.entries[..end].iter().rev().cloned().collect();
                    (chunk, leaf.prev)
                } else {
                    let start = pos.min(leaf.len());
                    (leaf.entries[start..].to_vec(), leaf.next)
                }
            };

            for entry in &chunk {
                if let ControlFlow::Break(()) = f(&entry.key, &entry.value)? {
                    return Ok(());
                }
            }

            current = link;
            pos = if opts.reverse { usize::MAX } else { 0 };
        }
        Ok(())
    }

    /// Removes every entry matching `key` and returns how many were removed.
    pub fn delete(&self, key: &Key) -> Result<usize> {
        self.check_probe(key)?;
        let mut meta = self.meta.write();
        let io = self.io();

        let mut current = Some(self.descend(meta.root, key, false)?.key());
        let mut removed = 0;

        // A group of equals may continue into following leaves.
        while let Some(addr) = current {
            let mut leaf = self.cache.write(addr, &io)?;
            let len = leaf.len();
            let found = leaf.search(key);
            if found.found {
                leaf.entries.drain(found.left..found.right);
                removed += found.right - found.left;
            }
            if found.right < len {
                break;
            }
            current = leaf.next;
        }

        if removed == 0 {
            return Err(DbError::KeyNotFound);
        }
        meta.len -= removed as u64;
        Ok(removed)
    }

    /// Writes every dirty node and the metadata back to the store.
    pub fn flush(&self) -> Result<()> {
        if self.store.read_only() {
            return Ok(());
        }
        let meta = self.meta.write();
        self.cache.flush(&self.io())?;
        self.store.write_meta(&meta.to_bytes())?;
        self.store.sync()
    }

    pub fn close(self) -> Result<()> {
        self.flush()
    }

    /// Verifies the structural invariants: key order, separator bounds,
    /// uniform leaf depth, parent links, the leaf chain and the entry count.
    pub fn check(&self) -> Result<()> {
        let meta = self.meta.read_recursive();
        let mut leaves = Vec::new();
        let mut count = 0u64;
        self.check_node(meta.root, None, None, None, 1, meta.height, &mut leaves, &mut count)?;

        if count != meta.len {
            return Err(DbError::corruption(format!(
                "entry count {} does not match metadata {}",
                count, meta.len
            )));
        }

        let io = self.io();
        let mut prev: Option<u64> = None;
        let mut last_key: Option<Key> = None;
        for (i, &addr) in leaves.iter().enumerate() {
            let leaf = self.cache.read(addr, &io)?;
            if leaf.prev != prev {
                return Err(DbError::corruption(format!("leaf {} has a broken prev link", addr)));
            }
            let expected_next = leaves.get(i + 1).copied();
            if leaf.next != expected_next {
                return Err(DbError::corruption(format!("leaf {} has a broken next link", addr)));
            }
            for entry in &leaf.entries {
                if let Some(last) = &last_key {
                    if entry.key <= *last {
                        return Err(DbError::corruption("leaf chain out of order"));
                    }
                }
                last_key = Some(entry.key.clone());
            }
            prev = Some(addr);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn check_node(
        &self,
        addr: u64,
        parent: Option<u64>,
        low: Option<&Key>,
        high: Option<&Key>,
        depth: u32,
        height: u32,
        leaves: &mut Vec<u64>,
        count: &mut u64,
    ) -> Result<()> {
        let node = self.cache.read(addr, &self.io())?;
        if node.parent != parent {
            return Err(DbError::corruption(format!("node {} has a stale parent link", addr)));
        }
        for pair in node.entries.windows(2) {
            if pair[0].key >= pair[1].key {
                return Err(DbError::corruption(format!("node {} out of order", addr)));
            }
        }
        for entry in &node.entries {
            if low.is_some_and(|low| entry.key < *low) || high.is_some_and(|high| entry.key >= *high)
            {
                return Err(DbError::corruption(format!("node {} violates separator bounds", addr)));
            }
        }

        if node.is_leaf() {
            if depth != height {
                return Err(DbError::corruption(format!(
                    "leaf {} at depth {}, tree height {}",
                    addr, depth, height
                )));
            }
            *count += node.len() as u64;
            leaves.push(addr);
            return Ok(());
        }

        if node.children.len() != node.entries.len() + 1 {
            return Err(DbError::corruption(format!("node {} child count mismatch", addr)));
        }
        let node: BTreeNode = (*node).clone();
        for (i, &child) in node.children.iter().enumerate() {
            let child_low = if i == 0 { low } else { Some(&node.entries[i - 1].key) };
            let child_high = node.entries.get(i).map(|e| &e.key).or(high);
            self.check_node(child, Some(addr), child_low, child_high, depth + 1, height, leaves, count)?;
        }
        Ok(())
    }
}

impl<S: NodeStore> Drop for BTree<S> {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
