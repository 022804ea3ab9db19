#![cfg(feature = "logging")]

use hatrack::{ConcurrentMap, HashValue, LockFreeTable, OrderedTable};

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn migrations_with_logging_enabled() {
    init();

    let table = LockFreeTable::builder().retire_frequency(1).build();
    for i in 1..=1_000_u64 {
        table.put(HashValue::new(0, i), i);
    }
    for i in 1..=1_000_u64 {
        assert_eq!(table.remove(HashValue::new(0, i)), Some(i));
    }
    assert!(table.is_empty());

    let ordered = OrderedTable::new();
    for i in 1..=100_u64 {
        ordered.put(HashValue::new(1, i), i);
    }
    assert_eq!(ordered.view(true), (1..=100).collect::<Vec<_>>());
}
