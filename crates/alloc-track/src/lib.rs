//! # alloc-track
//!
//! Per-thread object allocation accounting for managed runtimes.
//!
//! ## Design
//!
//! - **Per-thread collectors**: counters are owned by the tracked thread and
//!   updated from the host's allocation / free events
//! - **Tagged objects**: allocations are marked with the id of the counting
//!   collector so only frees of objects that collector counted are credited
//! - **Deferred violations**: lifecycle hooks cannot raise, so a limit
//!   breach is flagged there and raised at the next safe point
//! - **Host boundary**: everything runtime specific sits behind
//!   [`HostRuntime`]; the `gc-host` feature provides [`GcHost`] for
//!   `alloc-track-gc`

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod collector;
pub mod config;
pub mod dispatch;
pub mod error;
#[cfg(feature = "gc-host")]
pub mod gc_host;
pub mod host;
mod limit;
pub mod registry;
pub mod signal;
pub mod stats;
pub mod tracker;

pub use collector::{Collector, CollectorId};
pub use config::{TrackerConfig, TrackingPolicy};
pub use error::{TrackError, TrackResult};
#[cfg(feature = "gc-host")]
pub use gc_host::{GcHost, GcSubscription};
pub use host::{
    HostRuntime, LifecycleEvent, LifecycleHook, SafepointHook, Subscription, TaggedObject,
};
pub use registry::Registry;
pub use signal::DeferredSignal;
pub use stats::{CollectorSnapshot, TrackerStats};
pub use tracker::AllocTracker;
