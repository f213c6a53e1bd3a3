//! Condition variables resolved through the thread registry.
//!
//! A condition variable is nothing but an identifier. Parked threads are
//! found by scanning the registry for records whose wait-for mark carries
//! the identifier, so signal and broadcast are registry scans, oldest
//! record first. All the waiting state lives in the registry; there is
//! nothing to allocate and nothing to destroy.

use std::time::Duration;

use crate::host;
use crate::mutex::Mutex;
use crate::registry::{CondId, ThreadId, TimedWaitStatus};
use crate::system::SystemInner;
use crate::thread;

/// How a condition wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// A signal or broadcast woke the waiter.
    Signaled,
    /// The requested timeout elapsed first.
    TimedOut,
}

pub(crate) fn create(system: &SystemInner) -> CondId {
    let cond = system.registry.alloc_cond_id();
    tracing::trace!(cond = %cond, "condition variable created");
    cond
}

/// Parks the caller on `cond`, releasing `mutex` while parked.
///
/// # Safety
///
/// The caller must hold `mutex`. It is released here and reacquired before
/// returning, on every path.
pub(crate) unsafe fn wait(
    system: &SystemInner,
    cond: CondId,
    mutex: &Mutex,
    timeout: Option<Duration>,
) -> WaitOutcome {
    let caller = thread::current_id();
    let channel = system.registry.begin_cond_wait(caller, cond);
    // Mark first, then unlock: a signaler that takes the registry lock the
    // instant the mutex is free already sees this waiter and posts its
    // token, which the wait below consumes.
    // SAFETY: the caller holds `mutex` per this function's contract.
    unsafe { mutex.unlock() };
    let outcome = match timeout {
        None => {
            channel.wait();
            WaitOutcome::Signaled
        }
        Some(timeout) => {
            if channel.wait_timeout(timeout) {
                WaitOutcome::Signaled
            } else {
                resolve_expiry(system, caller, cond, &channel)
            }
        }
    };
    mutex.lock();
    outcome
}

/// The deadline passed without a consumed token. A signaler may still have
/// claimed this waiter in the window before the registry lock is retaken;
/// in that case its token is already pending and the wait counts as
/// signaled.
fn resolve_expiry(
    system: &SystemInner,
    caller: ThreadId,
    cond: CondId,
    channel: &host::WaitChannel,
) -> WaitOutcome {
    match system.registry.finish_timed_wait(caller, cond) {
        TimedWaitStatus::Expired => WaitOutcome::TimedOut,
        TimedWaitStatus::Claimed => {
            // The claim and the token post happen under the registry lock,
            // so the token is guaranteed pending by now.
            let consumed = channel.try_consume();
            debug_assert!(consumed, "claimed waiter must hold a pending token");
            let _ = consumed;
            WaitOutcome::Signaled
        }
        // A forced destroy removed the record mid-wait. No token is coming
        // and there is nobody left to account to.
        TimedWaitStatus::Gone => WaitOutcome::TimedOut,
    }
}

/// Wakes the longest-waiting thread parked on `cond`, if any. Signals are
/// not buffered: with no waiter parked, nothing happens.
pub(crate) fn signal(system: &SystemInner, cond: CondId) {
    let woke = system.registry.wake_one(cond);
    tracing::trace!(cond = %cond, woke, "condition signaled");
}

/// Wakes every thread currently parked on `cond`.
pub(crate) fn broadcast(system: &SystemInner, cond: CondId) {
    let woken = system.registry.wake_all(cond);
    tracing::trace!(cond = %cond, woken, "condition broadcast");
}
