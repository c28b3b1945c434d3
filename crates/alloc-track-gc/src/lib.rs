//! # alloc-track GC
//!
//! Minimal managed heap used as the host runtime for alloc-track.
//!
//! ## Design
//!
//! - **Per-thread heaps**: a [`Runtime`] hands out one [`Heap`] per thread
//! - **Handle liveness**: an object is garbage once its last [`Gc`] handle drops
//! - **Lifecycle tracepoints**: `NewObj` / `FreeObj` fire inside the
//!   allocator and the sweeper, `Safepoint` fires where hooks may raise
//! - **Reserved header bits**: [`flags::USER0`]..[`flags::USER3`] belong to embedders

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod error;
pub mod heap;
pub mod object;
pub mod runtime;
pub mod tracepoint;

pub use error::{GcError, GcResult};
pub use heap::{GcConfig, Heap, HeapStats};
pub use object::{Gc, GcHeader, flags, tags};
pub use runtime::{Runtime, RuntimeStats};
pub use tracepoint::{Event, Hook, Raised, TraceArg, TracePoint};
