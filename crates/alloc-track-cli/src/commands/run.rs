//! Run command - allocate a workload under tracking or a limit.

use alloc_track::{AllocTracker, GcHost, TrackError, TrackResult, TrackerConfig, TrackingPolicy};
use alloc_track_gc::{Gc, Heap, Runtime};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::sync::Arc;

use crate::config::Config;

#[derive(Args)]
pub struct RunCommand {
    /// Objects to allocate per thread
    #[arg(long, default_value_t = 1000)]
    pub objects: usize,

    /// Objects to keep alive per thread
    #[arg(long, default_value_t = 0)]
    pub retain: usize,

    /// Number of allocating threads
    #[arg(long, default_value_t = 1)]
    pub threads: usize,

    /// Maximum live tracked objects per thread
    #[arg(long)]
    pub limit: Option<String>,

    /// Track every thread independently (implied by --threads > 1)
    #[arg(long = "per-thread")]
    pub per_thread: bool,

    /// Raise as soon as the limit is exceeded, without a collection first
    #[arg(long = "no-reprieve")]
    pub no_reprieve: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

/// Counters of one thread at the end of its workload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub allocated: u64,
    pub freed: u64,
    pub delta: i64,
    pub max_delta: i64,
}

/// Result of one workload thread
#[derive(Debug, Serialize)]
pub struct ThreadReport {
    pub thread: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Counts>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
struct RunReport<'a> {
    threads: &'a [ThreadReport],
    tracker: alloc_track::TrackerStats,
    collections: u64,
    objects_allocated: u64,
    objects_freed: u64,
}

impl RunCommand {
    pub fn run(&self, config: &Config) -> Result<()> {
        let limit = self.limit.as_deref().map(parse_limit).transpose()?;
        let tracker_config = self.tracker_config(&config.tracker);

        let runtime = Runtime::with_config(config.heap.gc_config());
        let tracker = AllocTracker::with_config(GcHost::new(Arc::clone(&runtime)), tracker_config);
        let workload = Workload {
            objects: self.objects,
            retain: self.retain.min(self.objects),
            limit,
        };

        tracing::info!(
            threads = self.threads,
            objects = workload.objects,
            retain = workload.retain,
            limit = ?limit,
            "running workload"
        );

        let reports: Vec<ThreadReport> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..self.threads.max(1))
                .map(|index| {
                    let (runtime, tracker) = (&runtime, &tracker);
                    s.spawn(move || workload.report(index, runtime, tracker))
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(index, handle)| {
                    handle.join().unwrap_or_else(|_| ThreadReport {
                        thread: index,
                        counts: None,
                        error: Some("workload thread panicked".to_string()),
                    })
                })
                .collect()
        });

        if self.json {
            let stats = runtime.stats();
            let report = RunReport {
                threads: &reports,
                tracker: tracker.stats(),
                collections: stats.collections,
                objects_allocated: stats.objects_allocated,
                objects_freed: stats.objects_freed,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            print_human_readable(&reports);
        }

        let failed = reports.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            anyhow::bail!("{} of {} threads failed", failed, reports.len());
        }
        Ok(())
    }

    fn tracker_config(&self, base: &TrackerConfig) -> TrackerConfig {
        let mut config = base.clone();
        if self.per_thread {
            config.policy = TrackingPolicy::PerThread;
        } else if self.threads > 1 && config.is_exclusive() {
            // Exclusive tracking would admit whichever thread starts first
            tracing::info!(threads = self.threads, "tracking each workload thread independently");
            config.policy = TrackingPolicy::PerThread;
        }
        if self.no_reprieve {
            config.reprieve = false;
        }
        config
    }
}

/// Parse a `--limit` value
pub fn parse_limit(value: &str) -> TrackResult<i64> {
    let limit: i64 = value
        .trim()
        .parse()
        .map_err(|_| TrackError::invalid_argument(format!("limit must be an integer, got {value:?}")))?;
    if limit <= 0 {
        return Err(TrackError::invalid_argument(format!(
            "limit must be positive, got {limit}"
        )));
    }
    Ok(limit)
}

#[derive(Debug, Clone, Copy)]
struct Workload {
    objects: usize,
    retain: usize,
    limit: Option<i64>,
}

impl Workload {
    fn report(self, thread: usize, runtime: &Arc<Runtime>, tracker: &AllocTracker<GcHost>) -> ThreadReport {
        let heap = runtime.heap();
        let outcome = match self.limit {
            Some(cap) => tracker.limit(cap, || self.allocate(&heap, tracker)),
            None => self.tracked(&heap, tracker),
        };
        match outcome {
            Ok(counts) => ThreadReport {
                thread,
                counts: Some(counts),
                error: None,
            },
            Err(err) => {
                tracing::debug!(thread, error = %err, "workload failed");
                ThreadReport {
                    thread,
                    counts: None,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn tracked(&self, heap: &Heap, tracker: &AllocTracker<GcHost>) -> TrackResult<Counts> {
        tracker.start()?;
        let counts = self.allocate(heap, tracker);
        match tracker.stop() {
            Ok(()) | Err(TrackError::NotStarted) => counts,
            Err(err) => counts.and(Err(err)),
        }
    }

    /// Allocate the workload, reaching a safe point after every allocation
    fn allocate(&self, heap: &Heap, tracker: &AllocTracker<GcHost>) -> TrackResult<Counts> {
        let mut kept: Vec<Gc<usize>> = Vec::with_capacity(self.retain);
        for i in 0..self.objects {
            let object = heap.alloc(i);
            if i < self.retain {
                kept.push(object);
            }
            heap.safepoint()?;
        }
        Ok(Counts {
            allocated: tracker.alloc()?,
            freed: tracker.free()?,
            delta: tracker.delta()?,
            max_delta: tracker.max_delta()?,
        })
    }
}

fn print_human_readable(reports: &[ThreadReport]) {
    for report in reports {
        match (&report.counts, &report.error) {
            (Some(c), _) => println!(
                "thread {}: allocated {}, freed {}, delta {}, max delta {}",
                report.thread, c.allocated, c.freed, c.delta, c.max_delta
            ),
            (None, Some(err)) => println!("thread {}: {}", report.thread, err),
            (None, None) => println!("thread {}: no result", report.thread),
        }
    }
}
