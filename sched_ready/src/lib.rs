//! Readiness tracking for pages built from many asynchronous steps
//!
//! A page load creates one [`ReadinessBarrier`]. Every fetch or render step
//! [registers][ReadinessBarrier::register] with it before starting and
//! [releases][Registration::release] its registration when it finishes,
//! whether it succeeded or not. Once work has been registered and every
//! registration has been released, the barrier fires: completion callbacks run
//! exactly once and [`ready()`][ReadinessBarrier::ready] resolves.
//!
//! ```
//! use std::sync::{
//!     atomic::{AtomicBool, Ordering},
//!     Arc,
//! };
//!
//! use sched_ready::ReadinessBarrier;
//!
//! let barrier = ReadinessBarrier::new();
//! let done = Arc::new(AtomicBool::new(false));
//!
//! let flag = done.clone();
//! barrier.on_complete(move || flag.store(true, Ordering::SeqCst));
//!
//! let tasks = barrier.register(Some("load-tasks"), 2);
//! let schedules = barrier.register(Some("load-schedules"), 1);
//!
//! tasks.release().unwrap();
//! schedules.release().unwrap();
//! assert!(!done.load(Ordering::SeqCst));
//!
//! tasks.release().unwrap();
//! assert!(done.load(Ordering::SeqCst));
//! ```
//!
//! A barrier never fires while any registration is outstanding, and it has
//! no timeout. Work that is registered and never released keeps the barrier
//! from firing for its whole lifetime; prefer
//! [`Registration::guard()`] where an early return could skip the release.

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

mod barrier;
mod error;

pub use barrier::{BarrierKey, ReadinessBarrier, Registration, ReleaseGuard};
pub use error::BarrierError;
