//! Opaque mutex handles over the host's mutual-exclusion primitive.
//!
//! No owner tracking, no recursion, no misuse detection. A thread that
//! locks twice deadlocks itself, and unlocking from a thread that does not
//! hold the lock is undefined, exactly as the handle contract documents.

use parking_lot::RawMutex;
use parking_lot::lock_api::RawMutex as _;

use crate::error::Result;

/// An opaque, non-reentrant mutual-exclusion handle.
///
/// The host primitive is heap-allocated so the handle stays valid at a
/// stable address for as long as it exists. Dropping the handle releases
/// the primitive; dropping it while some thread holds the lock is undefined
/// behavior and is not checked.
pub struct Mutex {
    raw: Box<RawMutex>,
}

impl Mutex {
    /// Allocates and initializes one host primitive, unlocked.
    pub fn new() -> Result<Self> {
        Ok(Self { raw: Box::new(RawMutex::INIT) })
    }

    /// Blocks until the primitive is acquired.
    pub fn lock(&self) {
        self.raw.lock();
    }

    /// Releases the primitive, letting one blocked locker through.
    ///
    /// # Safety
    ///
    /// The calling thread must hold the lock. Unlocking a mutex held by
    /// another thread, or held by nobody, is undefined behavior.
    pub unsafe fn unlock(&self) {
        // SAFETY: contract forwarded to the caller.
        unsafe { self.raw.unlock() };
    }
}
