mod btree;
mod btree_node;
mod column_index;
mod filter;
mod key;
mod node_store;

pub use btree::{BTree, BTreeConfig, ScanOptions};
pub use btree_node::{BTreeNode, Entry, SearchResult, NODE_HEADER_SIZE};
pub use column_index::{Index, IndexDef, IndexTree};
pub use filter::{Filter, Op};
pub use key::{Key, MAX_KEY_COLUMNS};
pub use node_store::{HeapNodeStore, NodeStore, PageNodeStore, TREE_META_SIZE};
