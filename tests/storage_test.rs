use std::ops::ControlFlow;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tempfile::{NamedTempFile, TempDir};

use tabula::common::HEADER_SIZE;
use tabula::storage::disk::Pager;
use tabula::storage::heap::{Heap, Pointer};
use tabula::DbConfig;

#[test]
fn test_pager_round_trip_at_any_offset() {
    let temp = NamedTempFile::new().unwrap();
    let pager = Pager::open(temp.path(), 256, false).unwrap();
    pager.alloc(16).unwrap();

    let mut rng = StdRng::seed_from_u64(3);
    for _ in 0..200 {
        let len = rng.gen_range(1..=256);
        let offset = rng.gen_range(0..(16 * 256 - len) as u64);
        let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        pager.write_at(&data, offset).unwrap();

        let mut back = vec![0u8; len];
        pager.read_at(&mut back, offset).unwrap();
        assert_eq!(back, data, "offset {} len {}", offset, len);
    }
}

fn open_heap(dir: &TempDir) -> Heap {
    let config = DbConfig::new().page_size(512).cache_size(16);
    Heap::open(dir.path().join("h.dat"), dir.path().join("h.bin"), &config).unwrap()
}

fn assert_conserved(heap: &Heap, live: &[Pointer]) {
    let live_bytes: u64 = live.iter().map(|p| p.size as u64 + HEADER_SIZE).sum();
    let free_bytes: u64 = heap
        .free_regions()
        .unwrap()
        .iter()
        .map(|p| p.size as u64 + HEADER_SIZE)
        .sum();
    assert_eq!(live_bytes + free_bytes, heap.top());
    heap.check().unwrap();
}

#[test]
fn test_heap_conservation_across_reopen() {
    let dir = TempDir::new().unwrap();
    let mut rng = StdRng::seed_from_u64(42);
    let mut live: Vec<(Pointer, u8)> = Vec::new();

    {
        let heap = open_heap(&dir);
        for round in 0..600 {
            if live.is_empty() || rng.gen_bool(0.6) {
                let size = rng.gen_range(1..300);
                let ptr = heap.alloc(size).unwrap();
                let fill = (round % 251) as u8;
                heap.write(&ptr, &vec![fill; size as usize]).unwrap();
                live.push((ptr, fill));
            } else {
                let i = rng.gen_range(0..live.len());
                let (ptr, _) = live.swap_remove(i);
                heap.free(&ptr).unwrap();
            }
        }
        let ptrs: Vec<Pointer> = live.iter().map(|(p, _)| *p).collect();
        assert_conserved(&heap, &ptrs);
        heap.flush().unwrap();
    }

    let heap = open_heap(&dir);
    let ptrs: Vec<Pointer> = live.iter().map(|(p, _)| *p).collect();
    assert_conserved(&heap, &ptrs);
    for (ptr, fill) in &live {
        let data = heap.read(ptr).unwrap();
        assert!(data.iter().all(|b| b == fill));
    }

    let mut seen = 0;
    heap.scan(None, |p| {
        if !p.free {
            seen += 1;
        }
        Ok(ControlFlow::Continue(()))
    })
    .unwrap();
    assert_eq!(seen, live.len());
}

#[test]
fn test_heap_reuses_smallest_fitting_region() {
    let dir = TempDir::new().unwrap();
    let heap = open_heap(&dir);

    let a = heap.alloc(100).unwrap();
    let _guard_a = heap.alloc(1).unwrap();
    let b = heap.alloc(40).unwrap();
    let _guard_b = heap.alloc(1).unwrap();
    let c = heap.alloc(40).unwrap();
    let _guard_c = heap.alloc(1).unwrap();
    heap.free(&a).unwrap();
    heap.free(&c).unwrap();
    heap.free(&b).unwrap();

    // Two 40-byte candidates: the lower address wins.
    let exact = heap.alloc(40).unwrap();
    assert_eq!(exact.address, b.address);

    // No exact fit: the smallest region that can be split.
    let split = heap.alloc(20).unwrap();
    assert_eq!(split.address, c.address);
    heap.check().unwrap();
}
