//! Every table variant must produce the same results for the same sequence of
//! operations.

use ahash::RandomState;
use hatrack::{
    BucketLockTable, ConcurrentMap, GlobalLockTable, HashValue, LockFreeTable, OrderedTable,
    WaitFreeTable,
};

use std::collections::HashMap;

#[derive(Clone, Copy, Debug)]
enum Op {
    Put(u32, u32),
    Replace(u32, u32),
    Add(u32, u32),
    Remove(u32),
}

#[derive(Debug, PartialEq, Eq)]
enum Answer {
    Previous(Option<u32>),
    Added(bool),
}

/// A small xorshift generator, so every run sees the same trace.
struct Trace(u64);

impl Iterator for Trace {
    type Item = Op;

    fn next(&mut self) -> Option<Op> {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;

        let key = (self.0 >> 8) as u32 % 300;
        let item = (self.0 >> 32) as u32;
        Some(match self.0 % 8 {
            0..=2 => Op::Put(key, item),
            3 => Op::Replace(key, item),
            4 | 5 => Op::Add(key, item),
            _ => Op::Remove(key),
        })
    }
}

fn run<M: ConcurrentMap<u32>>(map: &M, hasher: &RandomState, ops: &[Op]) -> Vec<Answer> {
    let hv = |key: u32| HashValue::of(hasher, &key);

    ops.iter()
        .map(|op| match *op {
            Op::Put(k, v) => Answer::Previous(map.put(hv(k), v)),
            Op::Replace(k, v) => Answer::Previous(map.replace(hv(k), v)),
            Op::Add(k, v) => Answer::Added(map.add(hv(k), v)),
            Op::Remove(k) => Answer::Previous(map.remove(hv(k))),
        })
        .collect()
}

fn model(ops: &[Op]) -> (Vec<Answer>, HashMap<u32, u32>) {
    let mut map = HashMap::new();
    let answers = ops
        .iter()
        .map(|op| match *op {
            Op::Put(k, v) => Answer::Previous(map.insert(k, v)),
            Op::Replace(k, v) => Answer::Previous(match map.get_mut(&k) {
                Some(slot) => Some(std::mem::replace(slot, v)),
                None => None,
            }),
            Op::Add(k, v) => Answer::Added(match map.entry(k) {
                std::collections::hash_map::Entry::Occupied(_) => false,
                std::collections::hash_map::Entry::Vacant(e) => {
                    e.insert(v);
                    true
                }
            }),
            Op::Remove(k) => Answer::Previous(map.remove(&k)),
        })
        .collect();
    (answers, map)
}

fn check<M: ConcurrentMap<u32>>(map: M, name: &str) -> Vec<u32> {
    let hasher = RandomState::with_seeds(1, 2, 3, 4);
    let ops = Trace(0x2545_f491_4f6c_dd1d).take(20_000).collect::<Vec<_>>();

    let (expected_answers, expected) = model(&ops);
    assert_eq!(run(&map, &hasher, &ops), expected_answers, "{name}");

    assert_eq!(map.len(), expected.len() as u64, "{name}");
    for (k, v) in &expected {
        assert_eq!(map.get(HashValue::of(&hasher, k)), Some(*v), "{name}");
    }

    let mut unsorted = map.view(false);
    unsorted.sort_unstable();
    let mut items = expected.values().copied().collect::<Vec<_>>();
    items.sort_unstable();
    assert_eq!(unsorted, items, "{name}");

    map.view(true)
}

#[test]
fn sequential_traces_agree() {
    let views = [
        check(GlobalLockTable::new(), "global lock"),
        check(BucketLockTable::new(), "bucket lock"),
        check(LockFreeTable::new(), "lock free"),
        check(WaitFreeTable::new(), "wait free"),
        check(OrderedTable::new(), "ordered"),
    ];

    // Without concurrency every variant orders its view the same way.
    for view in &views[1..] {
        assert_eq!(view, &views[0]);
    }
}

#[test]
fn small_stores_agree() {
    let views = [
        check(GlobalLockTable::new_with_size(4), "global lock"),
        check(LockFreeTable::new_with_size(4), "lock free"),
        check(
            WaitFreeTable::builder().help_threshold(1).build(),
            "wait free",
        ),
        check(OrderedTable::builder().retire_frequency(1).build(), "ordered"),
    ];

    for view in &views[1..] {
        assert_eq!(view, &views[0]);
    }
}
