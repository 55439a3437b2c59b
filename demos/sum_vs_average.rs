//! Compare the sum and average queries over several rounds

use dp_query::{DpQuery, GaussianQueryConfig, Nested, SampleRound};
use ndarray::Array1;

fn main() {
    let config = GaussianQueryConfig::new(1.0, 1.1)
        .with_denominator(32.0)
        .with_seed(42);
    let sum = config.build_sum_query(None).unwrap();
    let avg = config.build_average_query(None).unwrap();

    // 32 honest records of norm ~0.5
    let records: Vec<Nested> = (0..32)
        .map(|i| Nested::leaf(Array1::from_elem(4, 0.25 + (i % 3) as f32 * 0.01)))
        .collect();

    println!("{:<8} {:>14} {:>14}", "Round", "Sum[0]", "Average[0]");
    println!("{}", "-".repeat(38));

    let mut sum_state = sum.initial_global_state();
    let mut avg_state = avg.initial_global_state();
    for round in 0..5 {
        let mut r = SampleRound::begin(&sum, &sum_state, &records[0]).unwrap();
        r.accumulate_par(&records).unwrap();
        let (noised_sum, next) = r.release(sum_state).unwrap();
        sum_state = next;

        let mut r = SampleRound::begin(&avg, &avg_state, &records[0]).unwrap();
        r.accumulate_all(&records).unwrap();
        let (noised_avg, next) = r.release(avg_state).unwrap();
        avg_state = next;

        println!(
            "{:<8} {:>14.4} {:>14.4}",
            round,
            noised_sum.as_leaf().unwrap()[[0]],
            noised_avg.as_leaf().unwrap()[[0]]
        );
    }
}
