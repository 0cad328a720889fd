//! Parallel histogram over synthetic data.
//!
//! Run with: cargo run --example histogram -- --buckets 16
//!
//! Demonstrates the builder with CLI overrides and a shared-state action
//! using atomics.

use std::sync::atomic::{AtomicU64, Ordering};

use clap::Parser;
use stride_rs::{StrideArgs, StrideBuilder};

#[derive(Parser)]
struct Args {
    /// Number of histogram buckets
    #[arg(long, default_value_t = 16)]
    buckets: usize,

    /// Number of samples to bucket
    #[arg(long, default_value_t = 10_000_000)]
    samples: i64,

    #[command(flatten)]
    stride: StrideArgs,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let runtime = StrideBuilder::new()
        .prefix("histogram")
        .env_prefix("STRIDE")
        .with_cli_args(&args.stride)
        .build()?;
    println!("{runtime}");

    let buckets: Vec<AtomicU64> = (0..args.buckets).map(|_| AtomicU64::new(0)).collect();
    let n = args.buckets as i64;

    runtime.for_each(0, args.samples, |i| {
        // Cheap deterministic pseudo-sample.
        let sample = (i.wrapping_mul(2654435761) >> 7).rem_euclid(n) as usize;
        buckets[sample].fetch_add(1, Ordering::Relaxed);
    })?;

    let total: u64 = buckets.iter().map(|b| b.load(Ordering::Relaxed)).sum();
    println!("bucketed {total} samples:");
    for (i, bucket) in buckets.iter().enumerate() {
        println!("  [{i:2}] {}", bucket.load(Ordering::Relaxed));
    }

    Ok(())
}
