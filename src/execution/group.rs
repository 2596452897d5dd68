use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::ops::ControlFlow;

use crate::common::{DbError, Result};
use crate::tuple::Value;

use super::{AggFunc, Aggregator};

enum GroupNode {
    /// Children keyed by the encoded value of the next group column
    Branch(BTreeMap<Vec<u8>, (Value, GroupNode)>),
    Leaf(Vec<Aggregator>),
}

/// Aggregator state per distinct group, as a trie over the group columns.
///
/// Each level is keyed by the order-preserving encoding of one group value,
/// so a flush yields groups in ascending order of their values.
pub struct GroupTrie {
    depth: usize,
    funcs: Vec<AggFunc>,
    /// Created by the first row, so empty input has no groups
    root: Option<GroupNode>,
    groups: usize,
}

impl GroupTrie {
    /// A trie over `depth` group columns with one aggregator per `funcs`
    /// entry at every leaf. Depth zero folds every row into one group.
    pub fn new(depth: usize, funcs: Vec<AggFunc>) -> Self {
        Self {
            depth,
            funcs,
            root: None,
            groups: 0,
        }
    }

    /// Number of distinct groups seen.
    pub fn len(&self) -> usize {
        self.groups
    }

    pub fn is_empty(&self) -> bool {
        self.groups == 0
    }

    /// Folds one input row into its group. `inputs` holds one argument per
    /// aggregator.
    pub fn add(&mut self, group: &[Value], inputs: &[Value]) -> Result<()> {
        if group.len() != self.depth || inputs.len() != self.funcs.len() {
            return Err(DbError::Internal(format!(
                "group row has {} keys and {} inputs, expected {} and {}",
                group.len(),
                inputs.len(),
                self.depth,
                self.funcs.len()
            )));
        }

        let depth = self.depth;
        let funcs = &self.funcs;
        if self.root.is_none() && depth == 0 {
            self.groups = 1;
        }
        let mut node = self
            .root
            .get_or_insert_with(|| new_node(0, depth, funcs));
        for (level, value) in group.iter().enumerate() {
            let key = value.encode(value.data_type())?;
            node = match node {
                GroupNode::Branch(children) => match children.entry(key) {
                    Entry::Occupied(e) => &mut e.into_mut().1,
                    Entry::Vacant(e) => {
                        if level + 1 == depth {
                            self.groups += 1;
                        }
                        let child = new_node(level + 1, depth, funcs);
                        &mut e.insert((value.clone(), child)).1
                    }
                },
                GroupNode::Leaf(_) => {
                    return Err(DbError::Internal("group trie deeper than its key".into()))
                }
            };
        }

        match node {
            GroupNode::Leaf(aggs) => {
                for (agg, input) in aggs.iter_mut().zip(inputs) {
                    agg.update(input)?;
                }
                Ok(())
            }
            GroupNode::Branch(_) => Err(DbError::Internal("group trie leaf missing".into())),
        }
    }

    /// Drains the trie depth-first. `f` receives each group's values and
    /// its aggregate results, in ascending group order, and may stop early.
    pub fn flush<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(Vec<Value>, Vec<Value>) -> Result<ControlFlow<()>>,
    {
        let Some(root) = self.root else {
            return Ok(());
        };
        let mut path = Vec::with_capacity(self.depth);
        drain(root, &mut path, &mut f).map(|_| ())
    }
}

fn new_node(level: usize, depth: usize, funcs: &[AggFunc]) -> GroupNode {
    if level == depth {
        GroupNode::Leaf(funcs.iter().map(|f| Aggregator::new(*f)).collect())
    } else {
        GroupNode::Branch(BTreeMap::new())
    }
}

fn drain<F>(node: GroupNode, path: &mut Vec<Value>, f: &mut F) -> Result<ControlFlow<()>>
where
    F: FnMut(Vec<Value>, Vec<Value>) -> Result<ControlFlow<()>>,
{
    match node {
        GroupNode::Leaf(aggs) => f(path.clone(), aggs.iter().map(Aggregator::result).collect()),
        GroupNode::Branch(children) => {
            for (_, (value, child)) in children {
                path.push(value);
                let flow = drain(child, path, f)?;
                path.pop();
                if flow.is_break() {
                    return Ok(flow);
                }
            }
            Ok(ControlFlow::Continue(()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain_all(trie: GroupTrie) -> Vec<(Vec<Value>, Vec<Value>)> {
        let mut out = Vec::new();
        trie.flush(|group, aggs| {
            out.push((group, aggs));
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        out
    }

    #[test]
    fn test_groups_in_order() {
        let mut trie = GroupTrie::new(1, vec![AggFunc::Count, AggFunc::Max]);
        for (first, last) in [("bbbb", "aaaa"), ("aaaa", "zzzz"), ("aaaa", "yyyy")] {
            trie.add(&[first.into()], &[Value::Int64(0), last.into()]).unwrap();
        }
        assert_eq!(trie.len(), 2);
        let rows = drain_all(trie);
        assert_eq!(
            rows,
            vec![
                (vec![Value::from("aaaa")], vec![Value::Int64(2), Value::from("zzzz")]),
                (vec![Value::from("bbbb")], vec![Value::Int64(1), Value::from("aaaa")]),
            ]
        );
    }

    #[test]
    fn test_two_levels() {
        let mut trie = GroupTrie::new(2, vec![AggFunc::Sum]);
        let rows = [(1, -1, 10), (1, 2, 5), (1, -1, 1), (0, 9, 3)];
        for (a, b, v) in rows {
            trie.add(&[Value::Int32(a), Value::Int32(b)], &[Value::Int32(v)]).unwrap();
        }
        assert_eq!(trie.len(), 3);
        let groups: Vec<_> = drain_all(trie)
            .into_iter()
            .map(|(g, a)| (g[0].clone(), g[1].clone(), a[0].clone()))
            .collect();
        assert_eq!(
            groups,
            vec![
                (Value::Int32(0), Value::Int32(9), Value::Int64(3)),
                (Value::Int32(1), Value::Int32(-1), Value::Int64(11)),
                (Value::Int32(1), Value::Int32(2), Value::Int64(5)),
            ]
        );
    }

    #[test]
    fn test_single_group_and_empty() {
        let empty = GroupTrie::new(0, vec![AggFunc::Count]);
        assert!(empty.is_empty());
        assert!(drain_all(empty).is_empty());

        let mut trie = GroupTrie::new(0, vec![AggFunc::Avg]);
        trie.add(&[], &[Value::Float64(1.0)]).unwrap();
        trie.add(&[], &[Value::Float64(2.0)]).unwrap();
        assert_eq!(drain_all(trie), vec![(vec![], vec![Value::Float64(1.5)])]);
    }

    #[test]
    fn test_flush_stops_early() {
        let mut trie = GroupTrie::new(1, vec![AggFunc::Count]);
        for i in 0..5 {
            trie.add(&[Value::Int8(i)], &[Value::Int8(i)]).unwrap();
        }
        let mut seen = 0;
        trie.flush(|_, _| {
            seen += 1;
            Ok(if seen == 2 {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })
        .unwrap();
        assert_eq!(seen, 2);
    }
}
