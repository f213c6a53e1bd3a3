//! Linux backend: futex wait channels and detached pthread units.
//!
//! The wait channel is a single futex word holding at most one token.
//! Repeated signals collapse into one pending token and a wait consumes
//! exactly one, which is the binary shape the join and condvar paths are
//! written against.

use std::io;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use libc::{FUTEX_PRIVATE_FLAG, FUTEX_WAIT, FUTEX_WAKE};

use crate::error::Result;

/// Identifies a native execution unit; used only for forced termination.
pub(crate) type NativeHandle = libc::pthread_t;

/// Entry signature the host hands to a new unit.
pub(crate) type UnitEntry = extern "C" fn(*mut libc::c_void) -> *mut libc::c_void;

/// Smallest stack this backend will request from the host.
const MIN_STACK_SIZE: usize = 16 * 1024;

const EMPTY: u32 = 0;
const TOKEN: u32 = 1;

// ---------------------------------------------------------------------------
// Futex plumbing
// ---------------------------------------------------------------------------

fn futex_wait(word: &AtomicU32, expected: u32, timeout: Option<&libc::timespec>) -> io::Result<()> {
    let timeout_ptr = timeout.map_or(ptr::null(), |ts| ts as *const libc::timespec);
    // SAFETY: the word outlives the call and is a valid aligned futex word;
    // the timeout pointer is null or points at a live timespec.
    let rc = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            FUTEX_WAIT | FUTEX_PRIVATE_FLAG,
            expected,
            timeout_ptr,
            ptr::null::<u32>(),
            0u32,
        )
    };
    if rc < 0 { Err(io::Error::last_os_error()) } else { Ok(()) }
}

fn futex_wake(word: &AtomicU32, count: i32) {
    // SAFETY: the word is a valid aligned futex word.
    let _ = unsafe {
        libc::syscall(
            libc::SYS_futex,
            word.as_ptr(),
            FUTEX_WAKE | FUTEX_PRIVATE_FLAG,
            count,
            ptr::null::<libc::timespec>(),
            ptr::null::<u32>(),
            0u32,
        )
    };
}

// ---------------------------------------------------------------------------
// Wait channel
// ---------------------------------------------------------------------------

/// One binary wait channel, signalable from any unit.
pub(crate) struct WaitChannel {
    state: AtomicU32,
}

impl WaitChannel {
    /// Obtains one channel from the host. This backend can always satisfy
    /// the request; the fallible signature is the host contract, which other
    /// hosts bound.
    pub(crate) fn allocate() -> Result<Self> {
        Ok(Self { state: AtomicU32::new(EMPTY) })
    }

    /// Blocks until a token is pending, then consumes it.
    pub(crate) fn wait(&self) {
        loop {
            if self.state.swap(EMPTY, Ordering::Acquire) == TOKEN {
                return;
            }
            // EAGAIN means the token landed first and EINTR is a spurious
            // kick; the swap at the top of the loop resolves every case.
            let _ = futex_wait(&self.state, EMPTY, None);
        }
    }

    /// Blocks until a token is pending or `timeout` elapses. Returns `true`
    /// when a token was consumed.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            // Unrepresentable deadline; treat it as the unbounded wait.
            self.wait();
            return true;
        };
        loop {
            if self.state.swap(EMPTY, Ordering::Acquire) == TOKEN {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                // Final grab: a signal may have landed after the swap above.
                return self.state.swap(EMPTY, Ordering::Acquire) == TOKEN;
            }
            let remaining = deadline - now;
            let ts = libc::timespec {
                tv_sec: remaining.as_secs() as libc::time_t,
                tv_nsec: remaining.subsec_nanos() as libc::c_long,
            };
            let _ = futex_wait(&self.state, EMPTY, Some(&ts));
        }
    }

    /// Posts the token and wakes the channel's sleeper, if any. A token
    /// already pending is left alone: the channel is binary, not counting.
    pub(crate) fn signal(&self) {
        if self.state.swap(TOKEN, Ordering::Release) == EMPTY {
            futex_wake(&self.state, 1);
        }
    }

    /// Consumes a pending token without blocking. Returns `true` when one
    /// was present.
    pub(crate) fn try_consume(&self) -> bool {
        self.state.swap(EMPTY, Ordering::Acquire) == TOKEN
    }
}

// ---------------------------------------------------------------------------
// Native units
// ---------------------------------------------------------------------------

/// Requests a detached native execution unit running `entry(arg)`. Returns
/// the host errno on failure.
///
/// # Safety
///
/// `arg` must stay valid until the new unit takes ownership of it. On
/// failure ownership stays with the caller.
pub(crate) unsafe fn spawn_unit(
    stack_size: usize,
    entry: UnitEntry,
    arg: *mut libc::c_void,
) -> std::result::Result<NativeHandle, i32> {
    // SAFETY: attr is plain storage, initialized before use and destroyed on
    // every path out.
    unsafe {
        let mut attr: libc::pthread_attr_t = mem::zeroed();
        let rc = libc::pthread_attr_init(&mut attr);
        if rc != 0 {
            return Err(rc);
        }
        let rc = libc::pthread_attr_setstacksize(&mut attr, stack_size.max(MIN_STACK_SIZE));
        if rc != 0 {
            libc::pthread_attr_destroy(&mut attr);
            return Err(rc);
        }
        // Exit wakeups run through wait channels, never a native join, so
        // every unit starts detached and the host reclaims it on return.
        let rc = libc::pthread_attr_setdetachstate(&mut attr, libc::PTHREAD_CREATE_DETACHED);
        if rc != 0 {
            libc::pthread_attr_destroy(&mut attr);
            return Err(rc);
        }
        let mut handle: libc::pthread_t = mem::zeroed();
        let rc = libc::pthread_create(&mut handle, &attr, entry, arg);
        libc::pthread_attr_destroy(&mut attr);
        if rc != 0 { Err(rc) } else { Ok(handle) }
    }
}

/// Forcibly terminates a unit. The target stops at its next cancellation
/// point, with no cleanup of anything it holds.
///
/// # Safety
///
/// Inherits every hazard of stopping a thread mid-flight; the caller owns
/// the consequences for resources the target held.
pub(crate) unsafe fn cancel_unit(handle: NativeHandle) {
    // SAFETY: contract passed through from the caller. ESRCH from an
    // already-gone unit is ignored.
    let _ = unsafe { libc::pthread_cancel(handle) };
}

/// The calling thread's own native handle.
pub(crate) fn current_unit() -> NativeHandle {
    // SAFETY: pthread_self has no preconditions.
    unsafe { libc::pthread_self() }
}

/// Number of schedulable units the host reports, floored at one.
pub(crate) fn cpu_count() -> usize {
    // SAFETY: sysconf has no memory preconditions.
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 { 1 } else { n as usize }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn pending_token_makes_wait_return_immediately() {
        let chan = WaitChannel::allocate().unwrap();
        chan.signal();
        chan.wait();
    }

    #[test]
    fn signal_wakes_sleeping_waiter() {
        let chan = Arc::new(WaitChannel::allocate().unwrap());
        let waiter = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || chan.wait())
        };
        thread::sleep(Duration::from_millis(50));
        chan.signal();
        waiter.join().unwrap();
    }

    #[test]
    fn repeated_signals_collapse_into_one_token() {
        let chan = WaitChannel::allocate().unwrap();
        chan.signal();
        chan.signal();
        assert!(chan.try_consume());
        assert!(!chan.try_consume());
    }

    #[test]
    fn wait_timeout_expires_without_signal() {
        let chan = WaitChannel::allocate().unwrap();
        let start = Instant::now();
        assert!(!chan.wait_timeout(Duration::from_millis(60)));
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[test]
    fn wait_timeout_consumes_early_signal() {
        let chan = Arc::new(WaitChannel::allocate().unwrap());
        let poster = {
            let chan = Arc::clone(&chan);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(30));
                chan.signal();
            })
        };
        assert!(chan.wait_timeout(Duration::from_secs(5)));
        poster.join().unwrap();
    }

    #[test]
    fn cpu_count_is_positive() {
        assert!(cpu_count() >= 1);
    }
}
