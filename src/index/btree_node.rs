use std::cmp::Ordering;

use bytes::{BufMut, BytesMut};

use crate::common::codec::{get_bytes, get_u16, get_u64, get_u8};
use crate::common::{DbError, Marshal, Result, NULL_ADDRESS};

use super::Key;

/// Node header layout:
/// ```text
/// | kind (1) | entry_count (2) | parent (8) | next (8) | prev (8) |
/// ```
/// followed by the entries and, for internal nodes, `entry_count + 1` child
/// addresses.
pub const NODE_HEADER_SIZE: usize = 27;

const KIND_LEAF: u8 = 1;
const KIND_INTERNAL: u8 = 2;

/// A key with its value bytes. Internal nodes carry empty values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub key: Key,
    pub value: Vec<u8>,
}

impl Entry {
    pub fn new(key: Key, value: Vec<u8>) -> Self {
        Self { key, value }
    }

    pub fn separator(key: Key) -> Self {
        Self {
            key,
            value: Vec::new(),
        }
    }
}

/// Bounds of the entries matching a probe key within one node.
/// `left..right` are the matching indices; when nothing matches both equal
/// the insertion point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    pub left: usize,
    pub right: usize,
    pub found: bool,
}

/// A decoded B+ tree node. Links to other nodes are addresses, never handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BTreeNode {
    leaf: bool,
    pub entries: Vec<Entry>,
    /// Child addresses, `entries.len() + 1` of them for internal nodes
    pub children: Vec<u64>,
    pub parent: Option<u64>,
    /// Next leaf in key order
    pub next: Option<u64>,
    /// Previous leaf in key order
    pub prev: Option<u64>,
}

impl BTreeNode {
    pub fn new_leaf() -> Self {
        Self {
            leaf: true,
            entries: Vec::new(),
            children: Vec::new(),
            parent: None,
            next: None,
            prev: None,
        }
    }

    pub fn new_internal() -> Self {
        Self {
            leaf: false,
            ..Self::new_leaf()
        }
    }

    pub fn is_leaf(&self) -> bool {
        self.leaf
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_full(&self, max_entries: usize) -> bool {
        self.entries.len() >= max_entries
    }

    /// Binary search by prefix: every entry whose key, truncated to the
    /// probe's column count, equals the probe is a match.
    pub fn search(&self, probe: &Key) -> SearchResult {
        let left = self
            .entries
            .partition_point(|e| e.key.cmp_prefix(probe) == Ordering::Less);
        let right = left
            + self.entries[left..]
                .partition_point(|e| e.key.cmp_prefix(probe) == Ordering::Equal);
        SearchResult {
            left,
            right,
            found: left < right,
        }
    }

    /// Moves the upper half of a leaf's entries out.
    pub fn split_leaf(&mut self) -> Vec<Entry> {
        let mid = self.entries.len() / 2;
        self.entries.split_off(mid)
    }

    /// Splits an internal node around its median, which is returned
    /// together with the right half's entries and children.
    pub fn split_internal(&mut self) -> Result<(Entry, Vec<Entry>, Vec<u64>)> {
        let mid = self.entries.len() / 2;
        let right_entries = self.entries.split_off(mid + 1);
        let median = self
            .entries
            .pop()
            .ok_or_else(|| DbError::Internal("split of an empty internal node".into()))?;
        let right_children = self.children.split_off(mid + 1);
        Ok((median, right_entries, right_children))
    }

    /// Encoded size of one entry with the given bounds.
    pub fn max_entry_size(columns: usize, max_key_bytes: usize, max_value: usize) -> usize {
        1 + 2 * columns + max_key_bytes + 2 + max_value
    }

    /// Largest encoding of a node holding `degree - 1` entries.
    pub fn max_size(degree: usize, max_entry: usize) -> usize {
        NODE_HEADER_SIZE + (degree - 1) * max_entry + degree * 8
    }
}

fn put_link(buf: &mut BytesMut, link: Option<u64>) {
    buf.put_u64(link.unwrap_or(NULL_ADDRESS));
}

fn get_link(buf: &mut &[u8]) -> Result<Option<u64>> {
    let raw = get_u64(buf)?;
    Ok(if raw == NULL_ADDRESS { None } else { Some(raw) })
}

impl Marshal for BTreeNode {
    fn marshal_size(&self) -> usize {
        let entries: usize = self
            .entries
            .iter()
            .map(|e| e.key.marshal_size() + 2 + e.value.len())
            .sum();
        NODE_HEADER_SIZE + entries + self.children.len() * 8
    }

    fn marshal(&self, buf: &mut BytesMut) {
        buf.put_u8(if self.leaf { KIND_LEAF } else { KIND_INTERNAL });
        buf.put_u16(self.entries.len() as u16);
        put_link(buf, self.parent);
        put_link(buf, self.next);
        put_link(buf, self.prev);
        for entry in &self.entries {
            entry.key.marshal(buf);
            buf.put_u16(entry.value.len() as u16);
            buf.put_slice(&entry.value);
        }
        for child in &self.children {
            buf.put_u64(*child);
        }
    }

    fn unmarshal(buf: &mut &[u8]) -> Result<Self> {
        let leaf = match get_u8(buf)? {
            KIND_LEAF => true,
            KIND_INTERNAL => false,
            other => {
                return Err(DbError::corruption(format!("invalid node kind {}", other)));
            }
        };
        let count = get_u16(buf)? as usize;
        let parent = get_link(buf)?;
        let next = get_link(buf)?;
        let prev = get_link(buf)?;

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let key = Key::unmarshal(buf)?;
            let len = get_u16(buf)? as usize;
            entries.push(Entry::new(key, get_bytes(buf, len)?));
        }

        let mut children = Vec::new();
        if !leaf {
            children.reserve(count + 1);
            for _ in 0..=count {
                children.push(get_u64(buf)?);
            }
        }

        Ok(Self {
            leaf,
            entries,
            children,
            parent,
            next,
            prev,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn k(v: u8) -> Key {
        Key::new(vec![vec![v]])
    }

    fn leaf_with(keys: &[u8]) -> BTreeNode {
        let mut node = BTreeNode::new_leaf();
        for &v in keys {
            node.entries.push(Entry::new(k(v), vec![v, v]));
        }
        node
    }

    #[test]
    fn test_search_groups() {
        let mut node = BTreeNode::new_leaf();
        for (a, b) in [(1u8, 1u8), (2, 1), (2, 2), (2, 3), (5, 0)] {
            node.entries
                .push(Entry::new(Key::new(vec![vec![a], vec![b]]), vec![]));
        }

        let r = node.search(&k(2));
        assert_eq!((r.left, r.right, r.found), (1, 4, true));

        let r = node.search(&k(3));
        assert_eq!((r.left, r.right, r.found), (4, 4, false));

        let r = node.search(&Key::new(vec![vec![2], vec![2]]));
        assert_eq!((r.left, r.right), (2, 3));
    }

    #[test]
    fn test_split_leaf() {
        let mut node = leaf_with(&[1, 2, 3, 4, 5]);
        let right = node.split_leaf();
        assert_eq!(node.len(), 2);
        assert_eq!(right.len(), 3);
        assert_eq!(right[0].key, k(3));
    }

    #[test]
    fn test_split_internal_promotes_median() {
        let mut node = BTreeNode::new_internal();
        for v in [10u8, 20, 30] {
            node.entries.push(Entry::separator(k(v)));
        }
        node.children = vec![100, 101, 102, 103];

        let (median, right, right_children) = node.split_internal().unwrap();
        assert_eq!(median.key, k(20));
        assert_eq!(node.entries.len(), 1);
        assert_eq!(node.children, vec![100, 101]);
        assert_eq!(right.len(), 1);
        assert_eq!(right_children, vec![102, 103]);
    }

    #[test]
    fn test_node_codec() {
        let mut leaf = leaf_with(&[3, 1, 4]);
        leaf.next = Some(77);
        leaf.parent = Some(5);
        let bytes = leaf.to_bytes();
        assert_eq!(bytes.len(), leaf.marshal_size());
        assert_eq!(BTreeNode::unmarshal(&mut &bytes[..]).unwrap(), leaf);

        let mut internal = BTreeNode::new_internal();
        internal.entries.push(Entry::separator(k(9)));
        internal.children = vec![1, 2];
        let bytes = internal.to_bytes();
        assert_eq!(BTreeNode::unmarshal(&mut &bytes[..]).unwrap(), internal);
    }

    #[test]
    fn test_corrupt_kind() {
        let mut bytes = leaf_with(&[1]).to_bytes();
        bytes[0] = 9;
        assert!(matches!(
            BTreeNode::unmarshal(&mut &bytes[..]),
            Err(DbError::Corruption(_))
        ));
    }
}
