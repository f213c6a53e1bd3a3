//! Thread lifecycle: spawn, trampoline, join, forced destroy.
//!
//! A spawned closure runs inside a fixed trampoline on a detached native
//! unit. The trampoline establishes the calling-thread association for
//! `current_id`, consumes the entry closure out of the record, runs it, and
//! retires the record, waking every joiner. Taking the entry blocks on the
//! registry lock until the spawner has finished registering the record, so
//! a unit that starts instantly still finds itself registered.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::host;
use crate::registry::ThreadId;
use crate::system::{SystemInner, ThreadSystem};

/// User-supplied thread body, consumed exactly once by the trampoline.
pub(crate) type Entry = Box<dyn FnOnce(&ThreadSystem) + Send + 'static>;

thread_local! {
    /// Which logical thread this native unit runs, if any.
    static CURRENT: Cell<Option<ThreadId>> = const { Cell::new(None) };
}

pub(crate) fn set_current(id: ThreadId) {
    CURRENT.set(Some(id));
}

pub(crate) fn clear_current() {
    CURRENT.set(None);
}

/// Id of the calling thread's record.
///
/// Panics on a thread this layer does not manage. Only spawned threads and
/// the thread that initialized the system carry the association.
pub(crate) fn current_id() -> ThreadId {
    match CURRENT.get() {
        Some(id) => id,
        None => panic!("current_id called on a thread the system does not manage"),
    }
}

// ---------------------------------------------------------------------------
// Spawn and trampoline
// ---------------------------------------------------------------------------

struct TrampolineArg {
    system: Arc<SystemInner>,
    id: ThreadId,
}

extern "C" fn trampoline(raw: *mut libc::c_void) -> *mut libc::c_void {
    // SAFETY: raw is the box built in spawn, handed to exactly this unit.
    // Destructuring frees the box up front, so a forced termination that
    // unwinds this frame has nothing left to clean up here.
    let TrampolineArg { system, id } = *unsafe { Box::from_raw(raw.cast::<TrampolineArg>()) };
    run(system, id);
    ptr::null_mut()
}

fn run(system: Arc<SystemInner>, id: ThreadId) {
    set_current(id);
    if let Some(entry) = system.registry.take_entry(id) {
        let view = ThreadSystem::view(Arc::clone(&system));
        if panic::catch_unwind(AssertUnwindSafe(|| entry(&view))).is_err() {
            // A panicking body still retires below and wakes its joiners.
            tracing::error!(thread_id = %id, "thread body panicked");
        }
    }
    let woken = system.registry.retire(id);
    tracing::trace!(thread_id = %id, woken, "thread exited");
}

/// Spawns a new logical thread running `entry` and returns its id.
pub(crate) fn spawn(system: &Arc<SystemInner>, entry: Entry) -> Result<ThreadId> {
    let channel = Arc::new(host::WaitChannel::allocate()?);
    let stack_size = system.config.stack_size;
    let registered = system.registry.register_spawn(channel, entry, |id| {
        let arg = Box::into_raw(Box::new(TrampolineArg {
            system: Arc::clone(system),
            id,
        }));
        // SAFETY: the trampoline reclaims the box exactly once.
        match unsafe { host::spawn_unit(stack_size, trampoline, arg.cast()) } {
            Ok(native) => Ok(native),
            Err(errno) => {
                // SAFETY: the unit was never created, so the box is still
                // ours to reclaim.
                drop(unsafe { Box::from_raw(arg) });
                Err(errno)
            }
        }
    });
    match registered {
        Ok(id) => {
            tracing::trace!(thread_id = %id, "thread spawned");
            Ok(id)
        }
        Err(errno) => Err(Error::exhausted("native execution unit", errno)),
    }
}

// ---------------------------------------------------------------------------
// Join and destroy
// ---------------------------------------------------------------------------

/// Blocks the caller until `target` has exited. A target that no longer
/// exists joins immediately.
pub(crate) fn join(system: &SystemInner, target: ThreadId) {
    let caller = current_id();
    if let Some(channel) = system.registry.begin_join(caller, target) {
        channel.wait();
    }
}

/// Non-blocking join probe: `true` once `target` has exited or was never
/// registered, `false` while it still runs.
pub(crate) fn try_join(system: &SystemInner, target: ThreadId) -> bool {
    !system.registry.contains(target)
}

/// Force-terminates `target`; see `ThreadSystem::destroy` for the contract.
pub(crate) unsafe fn destroy(system: &SystemInner, target: ThreadId) {
    let removed = system.registry.remove_forced(target, |native| {
        // SAFETY: the caller accepted the forced-termination contract.
        unsafe { host::cancel_unit(native) };
    });
    if removed {
        tracing::debug!(thread_id = %target, "thread force destroyed");
    }
}

pub(crate) fn cpu_count() -> usize {
    host::cpu_count()
}
