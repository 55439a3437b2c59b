//! Quickstart example showing global-norm clipping and a noised average

use std::sync::Arc;

use dp_query::{run_round, GaussianAverageQuery, InMemoryLedger, Nested};
use ndarray::array;

fn main() {
    println!("dp-query Quickstart Demo\n");

    // Clip each gradient to norm 1.0, noise stddev 0.5 on the sum, expect 4 records
    let ledger = Arc::new(InMemoryLedger::new());
    let query = GaussianAverageQuery::new(1.0, 0.5, 4.0)
        .unwrap()
        .with_ledger(ledger.clone());

    println!("Simulating 4 per-example gradients (3 small, 1 huge)...\n");

    let mut records = vec![
        Nested::map([
            ("weights", Nested::leaf(array![0.1, 0.2, 0.1])),
            ("bias", Nested::scalar(0.05)),
        ]);
        3
    ];

    // One record dominates without clipping
    records.push(Nested::map([
        ("weights", Nested::leaf(array![100.0, 200.0, 300.0])),
        ("bias", Nested::scalar(50.0)),
    ]));

    let (avg, _) = run_round(&query, (), &records[0], &records).unwrap();

    println!("Noised average complete!");
    println!("   Result: {:?}", avg);
    println!("   The huge record contributed at most norm 1.0");
    println!("\nLedger entries: {}", ledger.to_json().unwrap());
}
