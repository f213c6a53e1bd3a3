//! # threadbare-core
//!
//! Threads, mutexes, and condition variables built from a minimal host
//! contract: native execution units, one binary wait channel per unit, and
//! a plain mutual-exclusion primitive. Everything else (join, condition
//! variables, timed waits, thread identity) is synthesized on top.
//!
//! ## Architecture
//!
//! A [`ThreadSystem`] owns a registry of live thread records behind a
//! single lock, the subsystem's only lock. Joins and condition waits park
//! the caller on its own wait channel after marking, under that lock, what
//! it waits for; exit scans, signal, and broadcast resolve the marks and
//! post wake tokens under the same lock. The lock is never held while a
//! thread is parked, so wakers never contend with sleepers.
//!
//! Condition variables are bare identifiers. Every piece of waiting state
//! lives in the thread records, which keeps signal delivery a linear scan
//! in registration order: the longest-registered waiter wakes first.
//!
//! ## Misuse
//!
//! The layer checks nothing it does not have to. Operations whose misuse
//! cannot be detected without defeating the point of the layer (unlocking
//! a mutex that is not held, waiting without holding the mutex, forced
//! destroy) are `unsafe fn` and document their contracts.

mod host;
mod registry;
mod thread;

pub mod cond;
pub mod error;
pub mod mutex;
pub mod system;

pub use cond::WaitOutcome;
pub use error::{Error, Result};
pub use mutex::Mutex;
pub use registry::{CondId, ThreadId};
pub use system::{DEFAULT_STACK_SIZE, SystemConfig, ThreadSystem};
