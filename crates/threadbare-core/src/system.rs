//! The explicitly constructed context every operation runs against.
//!
//! One `ThreadSystem` owns one registry. There is no process-global state
//! beyond the per-thread association behind `current_id`; two systems in
//! one process stay fully independent. Spawned bodies receive a borrowed
//! view of their own system, so anything the spawner can do, code inside a
//! thread can do too. Teardown is explicit: `shutdown` force-terminates
//! stragglers and releases the main thread's record.

use std::sync::Arc;
use std::time::Duration;

use crate::cond::{self, WaitOutcome};
use crate::error::Result;
use crate::host;
use crate::mutex::Mutex;
use crate::registry::{CondId, Registry, ThreadId};
use crate::thread;

/// Stack size given to spawned threads unless configured otherwise.
pub const DEFAULT_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Knobs for one system, consumed at construction.
#[derive(Debug, Clone)]
pub struct SystemConfig {
    /// Stack size requested for every spawned native unit.
    pub stack_size: usize,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self { stack_size: DEFAULT_STACK_SIZE }
    }
}

pub(crate) struct SystemInner {
    pub(crate) registry: Registry,
    pub(crate) config: SystemConfig,
}

/// Handle to one threading subsystem.
///
/// Construct with [`ThreadSystem::init`]; tear down with
/// [`ThreadSystem::shutdown`]. Dropping the handle without a shutdown leaks
/// the registry but breaks nothing.
pub struct ThreadSystem {
    inner: Arc<SystemInner>,
}

impl ThreadSystem {
    /// Brings the subsystem up with default configuration. The calling
    /// thread becomes the main thread and takes id 0.
    pub fn init() -> Result<Self> {
        Self::with_config(SystemConfig::default())
    }

    /// Brings the subsystem up with explicit configuration.
    pub fn with_config(config: SystemConfig) -> Result<Self> {
        let registry = Registry::new();
        let channel = Arc::new(host::WaitChannel::allocate()?);
        let main = registry.register_main(channel, host::current_unit());
        thread::set_current(main);
        tracing::debug!(thread_id = %main, "thread system initialized");
        Ok(Self { inner: Arc::new(SystemInner { registry, config }) })
    }

    /// Borrowed view handed to spawned bodies; shares the same inner state.
    pub(crate) fn view(inner: Arc<SystemInner>) -> Self {
        Self { inner }
    }

    // -----------------------------------------------------------------------
    // Thread lifecycle
    // -----------------------------------------------------------------------

    /// Spawns a thread running `body` and returns its id. The body receives
    /// a view of this system so it can spawn, join, and wait itself.
    ///
    /// Fails with [`crate::Error::ResourceExhausted`] when the host cannot
    /// supply another execution unit or wait channel.
    pub fn spawn<F>(&self, body: F) -> Result<ThreadId>
    where
        F: FnOnce(&ThreadSystem) + Send + 'static,
    {
        thread::spawn(&self.inner, Box::new(body))
    }

    /// Blocks until `id` has exited. An id that has already exited, or that
    /// this system never issued, joins immediately.
    pub fn join(&self, id: ThreadId) {
        thread::join(&self.inner, id);
    }

    /// Non-blocking probe: `true` once `id` has exited or never existed,
    /// `false` while it still runs.
    #[must_use]
    pub fn try_join(&self, id: ThreadId) -> bool {
        thread::try_join(&self.inner, id)
    }

    /// Force-terminates `id` immediately, bypassing all cleanup. The record
    /// is removed and joiners wake exactly as on a normal exit, but the
    /// unit itself stops wherever it happens to be.
    ///
    /// # Safety
    ///
    /// Everything the target holds is left as-is: mutexes it owns stay
    /// locked forever, data it was mutating stays half-written, its wait
    /// channel is never reclaimed. The caller must guarantee nothing else
    /// depends on any of it.
    pub unsafe fn destroy(&self, id: ThreadId) {
        // SAFETY: contract forwarded to the caller.
        unsafe { thread::destroy(&self.inner, id) }
    }

    /// Id of the calling thread.
    ///
    /// Panics on a thread this system does not manage; only spawned threads
    /// and the thread that called [`ThreadSystem::init`] are managed.
    #[must_use]
    pub fn current_id(&self) -> ThreadId {
        thread::current_id()
    }

    /// Number of processors the host reports, floored at 1.
    #[must_use]
    pub fn cpu_count(&self) -> usize {
        thread::cpu_count()
    }

    // -----------------------------------------------------------------------
    // Condition variables
    // -----------------------------------------------------------------------

    /// Allocates a fresh condition-variable identifier.
    #[must_use]
    pub fn create_cond(&self) -> CondId {
        cond::create(&self.inner)
    }

    /// Identifiers are never reused or reclaimed, so destruction has
    /// nothing to free. Kept for call-site symmetry with [`Self::create_cond`].
    pub fn destroy_cond(&self, _cond: CondId) {}

    /// Parks the caller on `cond`, releasing `mutex` while parked and
    /// reacquiring it before returning. `None` waits forever; `Some`
    /// bounds the park and reports [`WaitOutcome::TimedOut`] on expiry.
    ///
    /// The release and the parking are atomic against signalers: a signal
    /// sent after `wait` begins is never missed.
    ///
    /// # Safety
    ///
    /// The caller must hold `mutex`. Waiting with it unlocked, or parking
    /// the only thread that could ever signal, is undefined behavior this
    /// layer does not detect.
    pub unsafe fn wait(&self, cond: CondId, mutex: &Mutex, timeout: Option<Duration>) -> WaitOutcome {
        // SAFETY: contract forwarded to the caller.
        unsafe { cond::wait(&self.inner, cond, mutex, timeout) }
    }

    /// Wakes the longest-waiting thread parked on `cond`, if any. Signals
    /// are not buffered: with nobody parked this is a no-op.
    pub fn signal(&self, cond: CondId) {
        cond::signal(&self.inner, cond);
    }

    /// Wakes every thread currently parked on `cond`.
    pub fn broadcast(&self, cond: CondId) {
        cond::broadcast(&self.inner, cond);
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    /// Tears the subsystem down. Every thread still registered is forcibly
    /// terminated as by [`Self::destroy`], with the same hazards; join
    /// everything first for a clean shutdown. Must run on the thread that
    /// called [`ThreadSystem::init`].
    pub fn shutdown(self) {
        debug_assert_eq!(
            thread::current_id(),
            ThreadId::MAIN,
            "shutdown must run on the main thread",
        );
        let killed = self.inner.registry.clear(ThreadId::MAIN, |native| {
            // SAFETY: teardown owns the forced-termination hazard for
            // stragglers that were never joined.
            unsafe { host::cancel_unit(native) };
        });
        thread::clear_current();
        tracing::debug!(killed, "thread system shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn init_installs_main_as_id_zero() {
        let system = ThreadSystem::init().unwrap();
        assert_eq!(system.current_id(), ThreadId::MAIN);
        system.shutdown();
    }

    #[test]
    fn spawned_body_sees_its_own_id() {
        let system = ThreadSystem::init().unwrap();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_in_thread = Arc::clone(&seen);
        let id = system
            .spawn(move |sys| {
                *seen_in_thread.lock().unwrap() = Some(sys.current_id());
            })
            .unwrap();
        system.join(id);
        assert_eq!(*seen.lock().unwrap(), Some(id));
        system.shutdown();
    }

    #[test]
    fn join_after_exit_returns_immediately() {
        let system = ThreadSystem::init().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_in_thread = Arc::clone(&counter);
        let id = system
            .spawn(move |_| {
                counter_in_thread.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        system.join(id);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        // The record is gone; joining again must not block.
        system.join(id);
        assert!(system.try_join(id));
        system.shutdown();
    }

    #[test]
    fn cpu_count_reports_at_least_one() {
        let system = ThreadSystem::init().unwrap();
        assert!(system.cpu_count() >= 1);
        system.shutdown();
    }
}
