#![allow(clippy::expect_used)]

//! Build a small index and dump its per-key row chains.
//!
//! Usage:
//!   cargo run --example dump_index -p strata-index

use strata_index::{IndexOptions, KvIndex};
use tempfile::TempDir;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let dir = TempDir::new().expect("temp dir");
    let base = dir.path().join("sym");

    let options = IndexOptions {
        key_count_hint: 8,
        record_count_hint: 64,
        ..IndexOptions::default()
    };
    let mut index = KvIndex::open(&base, &options).expect("open index");

    // Simulate a few ingest transactions: row ids arrive in order, keys
    // repeat with different frequencies.
    let mut row = 0u64;
    for tx in 0..3 {
        for _ in 0..40 {
            let key = (row % 5) as u32 * (row % 3) as u32;
            index.add(key, row).expect("add");
            row += 1;
        }
        index.commit().expect("commit");
        println!("committed transaction {tx}, generation at {}", index.tx_address());
    }

    println!(
        "\nindex size {} (rows 0..{}), {} rows per block\n",
        index.size(),
        index.size(),
        index.row_block_len()
    );

    for key in 0..9u32 {
        let count = index.value_count(key).expect("count");
        if count == 0 {
            continue;
        }
        let newest = index.last_value(key).expect("last value");
        println!("key {key:>2}: {count:>3} rows, newest {newest}");

        let preview: Vec<u64> = index
            .fwd_cursor(key)
            .expect("cursor")
            .take(8)
            .collect::<Result<_, _>>()
            .expect("walk chain");
        println!("        oldest first: {preview:?} ...");
    }
}
