//! Bench command - compare allocation throughput with and without tracking.

use alloc_track::{AllocTracker, GcHost};
use alloc_track_gc::{GcConfig, Runtime};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::Config;

#[derive(Args)]
pub struct BenchCommand {
    /// Rounds; every round ends with a collection
    #[arg(long, default_value_t = 100)]
    pub rounds: usize,

    /// Allocations per round
    #[arg(long, default_value_t = 100_000)]
    pub iterations: usize,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
pub struct BenchResult {
    pub label: &'static str,
    pub elapsed_ms: f64,
    pub allocations: u64,
    pub allocations_per_sec: f64,
}

impl BenchResult {
    fn new(label: &'static str, elapsed: Duration, allocations: u64) -> Self {
        let secs = elapsed.as_secs_f64();
        Self {
            label,
            elapsed_ms: secs * 1000.0,
            allocations,
            allocations_per_sec: if secs > 0.0 {
                allocations as f64 / secs
            } else {
                0.0
            },
        }
    }
}

impl BenchCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let gc_config = GcConfig {
            // Rounds collect explicitly
            collect_threshold: None,
        };
        let allocations = (self.rounds as u64)
            .checked_mul(self.iterations as u64)
            .ok_or_else(|| {
                anyhow::anyhow!(
                    "{} rounds of {} allocations is too many",
                    self.rounds,
                    self.iterations
                )
            })?;

        let untracked = Runtime::with_config(gc_config.clone());
        let none = BenchResult::new("none", self.churn(&untracked), allocations);

        let tracked = Runtime::with_config(gc_config);
        let tracker =
            AllocTracker::with_config(GcHost::new(Arc::clone(&tracked)), config.tracker.clone());
        tracker.start()?;
        let elapsed = self.churn(&tracked);
        let counted = tracker.alloc()?;
        tracker.stop()?;
        let tracking = BenchResult::new("tracking", elapsed, counted);

        let results = [none, tracking];
        if self.json {
            println!("{}", serde_json::to_string_pretty(&results)?);
        } else {
            println!("{:<10} {:>12} {:>14} {:>16}", "", "elapsed ms", "allocations", "allocs/sec");
            for r in &results {
                println!(
                    "{:<10} {:>12.2} {:>14} {:>16.0}",
                    format!("{}:", r.label),
                    r.elapsed_ms,
                    r.allocations,
                    r.allocations_per_sec
                );
            }
        }
        Ok(())
    }

    fn churn(&self, runtime: &Arc<Runtime>) -> Duration {
        let heap = runtime.heap();
        heap.collect();

        let start = Instant::now();
        for _ in 0..self.rounds {
            for i in 0..self.iterations {
                black_box(heap.alloc(i));
            }
            heap.collect();
        }
        start.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bench_counts_every_allocation() {
        let cmd = BenchCommand {
            rounds: 3,
            iterations: 50,
            json: true,
        };
        let runtime = Runtime::with_config(GcConfig {
            collect_threshold: None,
        });
        let tracker = AllocTracker::new(GcHost::new(Arc::clone(&runtime)));

        tracker.start().unwrap();
        cmd.churn(&runtime);
        assert_eq!(tracker.alloc().unwrap(), 150);
        assert_eq!(tracker.free().unwrap(), 150);
        tracker.stop().unwrap();
        assert_eq!(runtime.stats().collections, 4);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_bench_rejects_overflowing_size() {
        let cmd = BenchCommand {
            rounds: usize::MAX,
            iterations: usize::MAX,
            json: true,
        };
        let err = cmd.run(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("too many"));
    }

    #[test]
    fn test_bench_result_rate() {
        let result = BenchResult::new("none", Duration::from_millis(500), 1000);
        assert_eq!(result.elapsed_ms, 500.0);
        assert_eq!(result.allocations_per_sec, 2000.0);
    }
}
