use std::cmp::Ordering;
use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::thread;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::TempDir;

use tabula::common::DbError;
use tabula::index::{Filter, IndexDef, Op};
use tabula::table::{Selection, Table, TableDef};
use tabula::{Column, DataType, DbConfig, Row, Value};

fn accounts() -> TableDef {
    TableDef::new(
        "accounts",
        vec![
            Column::new("id", DataType::UInt32).auto_increment(),
            Column::new("owner", DataType::VarChar(6)),
            Column::new("branch", DataType::UInt8),
            Column::new("note", DataType::String),
        ],
        IndexDef::new("pk", vec!["id".into()], true),
    )
    .index(IndexDef::new("by_owner", vec!["owner".into()], true))
    .index(IndexDef::new("by_branch", vec!["branch".into()], false))
}

fn config() -> DbConfig {
    DbConfig::new().page_size(1024).cache_size(16)
}

fn rows_by_id(table: &Table) -> BTreeMap<u32, Row> {
    let mut out = BTreeMap::new();
    table
        .full_scan(|_, row| {
            let Value::UInt32(id) = row[0] else {
                panic!("id column holds {:?}", row[0]);
            };
            out.insert(id, row);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    out
}

fn by_id(id: u32) -> Selection {
    Selection::index("pk").start(Filter::eq("id", Value::UInt32(id)))
}

/// Random inserts, updates and deletes, checked against a model and the
/// index/datafile consistency check after every step.
#[test]
fn test_random_crud_keeps_indexes_consistent() {
    let dir = TempDir::new().unwrap();
    let table = Table::create(dir.path(), &accounts(), &config()).unwrap();
    let mut rng = StdRng::seed_from_u64(5);
    // id -> (owner, branch, note length)
    let mut model: BTreeMap<u32, (String, u8, usize)> = BTreeMap::new();
    let mut next_id = 1u32;

    for step in 0..300 {
        let owner = format!("o{}", rng.gen_range(0..80));
        let branch = rng.gen_range(0..6u8);
        let note_len = rng.gen_range(0..120);
        let taken = model.values().any(|(o, _, _)| *o == owner);

        match rng.gen_range(0..10) {
            0..=4 => {
                let values = vec![
                    ("owner".to_string(), Value::from(owner.as_str())),
                    ("branch".to_string(), Value::UInt8(branch)),
                    ("note".to_string(), Value::from("n".repeat(note_len))),
                ];
                match table.insert(&values) {
                    Ok(row) => {
                        assert!(!taken, "step {}: duplicate owner accepted", step);
                        assert_eq!(row[0], Value::UInt32(next_id));
                        model.insert(next_id, (owner, branch, note_len));
                        next_id += 1;
                    }
                    Err(DbError::Conflict(index)) => {
                        assert!(taken);
                        assert_eq!(index, "by_owner");
                    }
                    Err(e) => panic!("step {}: {}", step, e),
                }
            }
            5..=7 if !model.is_empty() => {
                let ids: Vec<u32> = model.keys().copied().collect();
                let id = ids[rng.gen_range(0..ids.len())];
                let changes = vec![
                    ("owner".to_string(), Value::from(owner.as_str())),
                    ("note".to_string(), Value::from("m".repeat(note_len))),
                ];
                let clash = model.iter().any(|(k, (o, _, _))| *k != id && *o == owner);
                match table.update(&by_id(id), &changes, |_| Ok(true)) {
                    Ok(n) => {
                        assert!(!clash);
                        assert_eq!(n, 1);
                        let entry = model.get_mut(&id).unwrap();
                        entry.0 = owner;
                        entry.2 = note_len;
                    }
                    Err(DbError::Conflict(_)) => assert!(clash),
                    Err(e) => panic!("step {}: {}", step, e),
                }
            }
            _ if !model.is_empty() => {
                let sel = Selection::index("by_branch").start(Filter::eq("branch", Value::UInt8(branch)));
                let n = table.delete(&sel, |_| Ok(true)).unwrap();
                let before = model.len();
                model.retain(|_, (_, b, _)| *b != branch);
                assert_eq!(n, before - model.len());
            }
            _ => {}
        }
        table.check().unwrap();
    }

    let rows = rows_by_id(&table);
    assert_eq!(rows.len(), model.len());
    let mut owners = HashSet::new();
    for (id, (owner, branch, note_len)) in &model {
        let row = &rows[id];
        assert_eq!(row[1], Value::from(owner.as_str()));
        assert_eq!(row[2], Value::UInt8(*branch));
        assert_eq!(row[3].as_str().map(str::len), Some(*note_len));
        assert!(owners.insert(owner.clone()));
    }
    assert_eq!(table.row_count(), model.len() as u64);
}

#[test]
fn test_range_selection_directions() {
    let dir = TempDir::new().unwrap();
    let table = Table::create(dir.path(), &accounts(), &config()).unwrap();
    for i in 0..30u8 {
        let values = vec![
            ("owner".to_string(), Value::from(format!("u{:02}", i))),
            ("branch".to_string(), Value::UInt8(i % 3)),
        ];
        table.insert(&values).unwrap();
    }

    let ids = |sel: &Selection| {
        let mut out = Vec::new();
        table
            .scan(sel, |row| {
                out.push(row[0].clone());
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
        out
    };

    let sel = Selection::index("pk")
        .start(Filter::new(Op::Gt, vec![("id".into(), Value::UInt32(10))]))
        .end(Filter::new(Op::Le, vec![("id".into(), Value::UInt32(13))]));
    assert_eq!(
        ids(&sel),
        (11..=13).map(Value::UInt32).collect::<Vec<_>>()
    );
    assert_eq!(
        ids(&sel.clone().reverse()),
        (11..=13).rev().map(Value::UInt32).collect::<Vec<_>>()
    );

    // Non-unique index: equal keys come back in primary key order.
    let branch = Selection::index("by_branch").start(Filter::eq("branch", Value::UInt8(1)));
    let found = ids(&branch);
    assert_eq!(found.len(), 10);
    assert_eq!(found.first(), Some(&Value::UInt32(2)));
    assert_eq!(found.last(), Some(&Value::UInt32(29)));
}

#[test]
fn test_indexes_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let before = {
        let table = Table::create(dir.path(), &accounts(), &config()).unwrap();
        for i in 0..40u8 {
            let values = vec![
                ("owner".to_string(), Value::from(format!("p{}", i))),
                ("branch".to_string(), Value::UInt8(i % 4)),
            ];
            table.insert(&values).unwrap();
        }
        table.delete(&by_id(7), |_| Ok(true)).unwrap();
        let rows = rows_by_id(&table);
        table.close().unwrap();
        rows
    };

    let table = Table::open(&dir.path().join("accounts"), &config()).unwrap();
    table.check().unwrap();
    assert_eq!(rows_by_id(&table), before);
    assert!(table.find_by_index("pk", &[Value::UInt32(7)]).unwrap().is_empty());
    assert_eq!(
        table.find_by_index("by_owner", &[Value::from("p8")]).unwrap()[0][0],
        Value::UInt32(9)
    );
    let dup = vec![("owner".to_string(), Value::from("p8"))];
    assert!(matches!(table.insert(&dup), Err(DbError::Conflict(_))));
}

/// Rows the writer below produces always carry a note of `branch * 10`
/// bytes, so a torn row shows up as a mismatch.
fn assert_row_whole(row: &Row) {
    let (Value::UInt8(branch), Value::String(note)) = (&row[2], &row[3]) else {
        panic!("unexpected row {:?}", row);
    };
    assert_eq!(note.len(), *branch as usize * 10, "torn row {:?}", row);
}

/// Checks one pass of every scan shape and returns how many rows it saw.
fn scan_once(table: &Table) -> usize {
    let mut ids = HashSet::new();
    table
        .full_scan(|_, row| {
            assert_row_whole(&row);
            let Value::UInt32(id) = row[0] else {
                panic!("id column holds {:?}", row[0]);
            };
            assert!(ids.insert(id), "row {:?} seen twice", row);
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();

    for reverse in [false, true] {
        let mut prev: Option<Value> = None;
        table
            .index_scan("pk", None, None, reverse, |_, row| {
                assert_row_whole(&row);
                if let Some(prev) = &prev {
                    let order = prev.compare(&row[0]).unwrap();
                    let expected = if reverse { Ordering::Greater } else { Ordering::Less };
                    assert_eq!(order, expected, "{:?} then {:?}", prev, row[0]);
                }
                prev = Some(row[0].clone());
                Ok(ControlFlow::Continue(()))
            })
            .unwrap();
    }

    let mut prev: Option<Value> = None;
    table
        .index_scan("by_owner", None, None, false, |_, row| {
            if let Some(prev) = &prev {
                assert_eq!(prev.compare(&row[1]).unwrap(), Ordering::Less);
            }
            prev = Some(row[1].clone());
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
    ids.len()
}

/// Readers scanning through shared handles while one writer inserts,
/// rewrites and deletes rows never see a torn row or a broken order.
#[test]
fn test_concurrent_readers_and_writer() {
    let dir = TempDir::new().unwrap();
    let table = Arc::new(Table::create(dir.path(), &accounts(), &config()).unwrap());
    let stop = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..3)
        .map(|_| {
            let table = table.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut passes = 0;
                loop {
                    scan_once(&table);
                    passes += 1;
                    if stop.load(AtomicOrdering::Acquire) {
                        return passes;
                    }
                }
            })
        })
        .collect();

    let mut rng = StdRng::seed_from_u64(23);
    let mut live: Vec<u32> = Vec::new();
    for n in 0..600 {
        let branch = rng.gen_range(0..8u8);
        let note = Value::from("n".repeat(branch as usize * 10));
        match rng.gen_range(0..10) {
            0..=4 => {
                let values = vec![
                    ("owner".to_string(), Value::from(format!("w{}", n))),
                    ("branch".to_string(), Value::UInt8(branch)),
                    ("note".to_string(), note),
                ];
                let row = table.insert(&values).unwrap();
                let Value::UInt32(id) = row[0] else {
                    panic!("id column holds {:?}", row[0]);
                };
                live.push(id);
            }
            5..=7 if !live.is_empty() => {
                let id = live[rng.gen_range(0..live.len())];
                let changes = vec![
                    ("branch".to_string(), Value::UInt8(branch)),
                    ("note".to_string(), note),
                ];
                assert_eq!(table.update(&by_id(id), &changes, |_| Ok(true)).unwrap(), 1);
            }
            _ if !live.is_empty() => {
                let id = live.swap_remove(rng.gen_range(0..live.len()));
                assert_eq!(table.delete(&by_id(id), |_| Ok(true)).unwrap(), 1);
            }
            _ => {}
        }
    }
    stop.store(true, AtomicOrdering::Release);

    for reader in readers {
        assert!(reader.join().unwrap() > 0);
    }
    assert_eq!(scan_once(&table), live.len());
    assert_eq!(table.row_count(), live.len() as u64);
    table.check().unwrap();
}
