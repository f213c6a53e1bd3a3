//! Thread registry: the single source of truth for live logical threads.
//!
//! One lock guards every record, both id counters, and the wait-for
//! relation; it is the only lock in the subsystem. The lock never escapes
//! this module: callers get compound operations whose multi-step contracts
//! (find-then-mark, remove-then-wake) hold under one acquisition.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::host;
use crate::thread::Entry;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Identity of a logical thread. Ids are assigned monotonically starting at
/// the main thread's `0` and are never reused within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId(u64);

impl ThreadId {
    /// The thread that constructed the system.
    pub const MAIN: ThreadId = ThreadId(0);
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a condition variable, allocated from its own space counting
/// down from the top so it can never be confused with a thread id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondId(u64);

impl fmt::Display for CondId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a parked thread is waiting for. Read and written only under the
/// registry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitTarget {
    None,
    Thread(ThreadId),
    Cond(CondId),
}

/// How a timed condition wait ended, resolved under the registry lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimedWaitStatus {
    /// The deadline passed with the record still marked as waiting.
    Expired,
    /// A signaler already claimed the waiter; its wake token is pending.
    Claimed,
    /// The record is gone; a forced destroy landed mid-wait.
    Gone,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Bookkeeping for one logical thread.
struct ThreadRecord {
    id: ThreadId,
    native: host::NativeHandle,
    channel: Arc<host::WaitChannel>,
    wait_for: WaitTarget,
    entry: Option<Entry>,
}

struct State {
    /// Insertion-ordered; wake scans rely on oldest-first iteration.
    records: Vec<ThreadRecord>,
    next_thread_id: u64,
    next_cond_id: u64,
}

impl State {
    fn position(&self, id: ThreadId) -> Option<usize> {
        self.records.iter().position(|record| record.id == id)
    }

    fn find_mut(&mut self, id: ThreadId) -> Option<&mut ThreadRecord> {
        self.records.iter_mut().find(|record| record.id == id)
    }

    /// Wakes records waiting on `target` in registration order, clearing
    /// each one's mark; stops after the first when `first_only`. Returns how
    /// many woke.
    fn wake_waiters(&mut self, target: WaitTarget, first_only: bool) -> usize {
        let mut woken = 0;
        for record in &mut self.records {
            if record.wait_for == target {
                record.wait_for = WaitTarget::None;
                record.channel.signal();
                woken += 1;
                if first_only {
                    break;
                }
            }
        }
        woken
    }
}

/// Registry of live threads plus both id counters, behind the one lock the
/// whole subsystem shares.
pub(crate) struct Registry {
    state: Mutex<State>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                records: Vec::new(),
                next_thread_id: 0,
                next_cond_id: u64::MAX,
            }),
        }
    }

    /// Installs the initial thread's record. Must be the first registration
    /// so the main thread takes id 0.
    pub(crate) fn register_main(
        &self,
        channel: Arc<host::WaitChannel>,
        native: host::NativeHandle,
    ) -> ThreadId {
        let mut state = self.state.lock();
        debug_assert!(state.records.is_empty());
        let id = ThreadId(state.next_thread_id);
        state.next_thread_id += 1;
        state.records.push(ThreadRecord {
            id,
            native,
            channel,
            wait_for: WaitTarget::None,
            entry: None,
        });
        id
    }

    /// Allocates the next thread id, creates the native unit through
    /// `create`, and registers the record, all under one acquisition so the
    /// new unit's first registry access observes its own record. On creation
    /// failure nothing is registered; the channel and entry are dropped
    /// here. The errno from `create` is passed back out.
    pub(crate) fn register_spawn(
        &self,
        channel: Arc<host::WaitChannel>,
        entry: Entry,
        create: impl FnOnce(ThreadId) -> std::result::Result<host::NativeHandle, i32>,
    ) -> std::result::Result<ThreadId, i32> {
        let mut state = self.state.lock();
        let id = ThreadId(state.next_thread_id);
        state.next_thread_id += 1;
        let native = create(id)?;
        state.records.push(ThreadRecord {
            id,
            native,
            channel,
            wait_for: WaitTarget::None,
            entry: Some(entry),
        });
        Ok(id)
    }

    /// Takes the one-shot entry closure out of `id`'s record.
    pub(crate) fn take_entry(&self, id: ThreadId) -> Option<Entry> {
        self.state.lock().find_mut(id).and_then(|record| record.entry.take())
    }

    pub(crate) fn contains(&self, id: ThreadId) -> bool {
        self.state.lock().position(id).is_some()
    }

    /// Live records, main included.
    #[cfg(test)]
    pub(crate) fn live_count(&self) -> usize {
        self.state.lock().records.len()
    }

    /// Next value from the decrementing condition-id space.
    pub(crate) fn alloc_cond_id(&self) -> CondId {
        let mut state = self.state.lock();
        let id = CondId(state.next_cond_id);
        state.next_cond_id -= 1;
        id
    }

    /// Atomic lookup-or-park step for join. `None` means the target is
    /// already gone and the join succeeds now; otherwise the caller's record
    /// is marked waiting and its own channel is returned to block on. Both
    /// halves happen under one acquisition, so an exit scan can never slip
    /// between them and miss the new waiter.
    pub(crate) fn begin_join(
        &self,
        caller: ThreadId,
        target: ThreadId,
    ) -> Option<Arc<host::WaitChannel>> {
        let mut state = self.state.lock();
        state.position(target)?;
        let Some(record) = state.find_mut(caller) else {
            panic!("joining thread {caller} has no record");
        };
        record.wait_for = WaitTarget::Thread(target);
        Some(Arc::clone(&record.channel))
    }

    /// Marks the caller as waiting on `cond` and returns its channel.
    pub(crate) fn begin_cond_wait(&self, caller: ThreadId, cond: CondId) -> Arc<host::WaitChannel> {
        let mut state = self.state.lock();
        let Some(record) = state.find_mut(caller) else {
            panic!("waiting thread {caller} has no record");
        };
        record.wait_for = WaitTarget::Cond(cond);
        Arc::clone(&record.channel)
    }

    /// Resolves the race between a timed wait expiring and a concurrent
    /// signaler claiming the waiter.
    pub(crate) fn finish_timed_wait(&self, caller: ThreadId, cond: CondId) -> TimedWaitStatus {
        let mut state = self.state.lock();
        match state.find_mut(caller) {
            Some(record) if record.wait_for == WaitTarget::Cond(cond) => {
                record.wait_for = WaitTarget::None;
                TimedWaitStatus::Expired
            }
            Some(_) => TimedWaitStatus::Claimed,
            None => TimedWaitStatus::Gone,
        }
    }

    /// Normal-exit retirement: drops `id`'s record and wakes every thread
    /// joining it. The channel is released with the record, once any late
    /// joiner's borrowed clone is gone too. Returns how many joiners woke.
    pub(crate) fn retire(&self, id: ThreadId) -> usize {
        let mut state = self.state.lock();
        if let Some(index) = state.position(id) {
            state.records.remove(index);
        }
        state.wake_waiters(WaitTarget::Thread(id), false)
    }

    /// Forced-removal path: terminates the native unit through `terminate`,
    /// drops the record, and runs the same join wakeup as a normal exit, all
    /// under one acquisition. Returns `false` when `id` is already gone.
    pub(crate) fn remove_forced(
        &self,
        id: ThreadId,
        terminate: impl FnOnce(host::NativeHandle),
    ) -> bool {
        let mut state = self.state.lock();
        let Some(index) = state.position(id) else {
            return false;
        };
        let native = state.records[index].native;
        terminate(native);
        state.records.remove(index);
        state.wake_waiters(WaitTarget::Thread(id), false);
        true
    }

    /// First-match wakeup for signal. Returns `true` when a waiter woke.
    pub(crate) fn wake_one(&self, cond: CondId) -> bool {
        self.state.lock().wake_waiters(WaitTarget::Cond(cond), true) == 1
    }

    /// Every-match wakeup for broadcast. Returns how many waiters woke.
    pub(crate) fn wake_all(&self, cond: CondId) -> usize {
        self.state.lock().wake_waiters(WaitTarget::Cond(cond), false)
    }

    /// Teardown sweep: force-terminates every record except `main` through
    /// `terminate`, then drops the main record itself, releasing its
    /// channel. Returns how many stragglers were terminated.
    pub(crate) fn clear(&self, main: ThreadId, mut terminate: impl FnMut(host::NativeHandle)) -> usize {
        let mut state = self.state.lock();
        let mut killed = 0;
        state.records.retain(|record| {
            if record.id == main {
                return true;
            }
            terminate(record.native);
            killed += 1;
            false
        });
        if let Some(index) = state.position(main) {
            state.records.remove(index);
        }
        killed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::WaitChannel;
    use crate::system::ThreadSystem;

    fn channel() -> Arc<WaitChannel> {
        Arc::new(WaitChannel::allocate().unwrap())
    }

    fn noop_entry() -> Entry {
        Box::new(|_: &ThreadSystem| {})
    }

    // pthread_t is an integer on some libcs and a pointer on others.
    fn fake_native(value: usize) -> host::NativeHandle {
        value as host::NativeHandle
    }

    fn registry_with_main() -> (Registry, ThreadId) {
        let registry = Registry::new();
        let main = registry.register_main(channel(), fake_native(0));
        (registry, main)
    }

    #[test]
    fn main_thread_gets_id_zero() {
        let (_, main) = registry_with_main();
        assert_eq!(main, ThreadId::MAIN);
    }

    #[test]
    fn thread_ids_are_monotonic_and_not_reused() {
        let (registry, _main) = registry_with_main();
        let a = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let b = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        assert!(a < b);
        registry.retire(a);
        let c = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        assert!(b < c);
    }

    #[test]
    fn cond_ids_descend_from_the_top() {
        let (registry, _main) = registry_with_main();
        assert_eq!(registry.alloc_cond_id(), CondId(u64::MAX));
        assert_eq!(registry.alloc_cond_id(), CondId(u64::MAX - 1));
    }

    #[test]
    fn failed_native_creation_registers_nothing() {
        let (registry, _main) = registry_with_main();
        let err = registry.register_spawn(channel(), noop_entry(), |_| Err(libc::EAGAIN));
        assert_eq!(err.unwrap_err(), libc::EAGAIN);
        assert_eq!(registry.live_count(), 1);
    }

    #[test]
    fn take_entry_consumes_the_closure_once() {
        let (registry, _main) = registry_with_main();
        let id = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        assert!(registry.take_entry(id).is_some());
        assert!(registry.take_entry(id).is_none());
    }

    #[test]
    fn begin_join_on_dead_target_reports_already_exited() {
        let (registry, main) = registry_with_main();
        let target = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        registry.retire(target);
        assert!(registry.begin_join(main, target).is_none());
    }

    #[test]
    fn exit_scan_wakes_and_clears_joiner() {
        let (registry, main) = registry_with_main();
        let target = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let chan = registry.begin_join(main, target).unwrap();
        assert!(!chan.try_consume());
        assert_eq!(registry.retire(target), 1);
        assert!(chan.try_consume());
        // The wakeup cleared the mark, so retiring again wakes nobody.
        assert_eq!(registry.retire(target), 0);
    }

    #[test]
    fn signal_wakes_oldest_waiter_first() {
        let (registry, _main) = registry_with_main();
        let a = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let b = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let cond = registry.alloc_cond_id();
        let chan_a = registry.begin_cond_wait(a, cond);
        let chan_b = registry.begin_cond_wait(b, cond);
        assert!(registry.wake_one(cond));
        assert!(chan_a.try_consume());
        assert!(!chan_b.try_consume());
        assert!(registry.wake_one(cond));
        assert!(chan_b.try_consume());
        assert!(!registry.wake_one(cond));
    }

    #[test]
    fn broadcast_wakes_every_waiter_exactly_once() {
        let (registry, _main) = registry_with_main();
        let cond = registry.alloc_cond_id();
        let mut channels = Vec::new();
        for _ in 0..3 {
            let id = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
            channels.push(registry.begin_cond_wait(id, cond));
        }
        assert_eq!(registry.wake_all(cond), 3);
        for chan in &channels {
            assert!(chan.try_consume());
        }
        assert_eq!(registry.wake_all(cond), 0);
    }

    #[test]
    fn waiters_on_other_conditions_are_left_alone() {
        let (registry, _main) = registry_with_main();
        let a = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let this_cond = registry.alloc_cond_id();
        let other_cond = registry.alloc_cond_id();
        let chan = registry.begin_cond_wait(a, other_cond);
        assert!(!registry.wake_one(this_cond));
        assert_eq!(registry.wake_all(this_cond), 0);
        assert!(!chan.try_consume());
    }

    #[test]
    fn timed_wait_resolution_distinguishes_expiry_from_claim() {
        let (registry, _main) = registry_with_main();
        let a = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(0))).unwrap();
        let cond = registry.alloc_cond_id();

        // Nobody signaled: the waiter clears its own mark.
        registry.begin_cond_wait(a, cond);
        assert_eq!(registry.finish_timed_wait(a, cond), TimedWaitStatus::Expired);

        // Signaled first: the mark is gone and the token is pending.
        let chan = registry.begin_cond_wait(a, cond);
        assert!(registry.wake_one(cond));
        assert_eq!(registry.finish_timed_wait(a, cond), TimedWaitStatus::Claimed);
        assert!(chan.try_consume());

        // Record removed mid-wait: nothing left to resolve.
        registry.retire(a);
        assert_eq!(registry.finish_timed_wait(a, cond), TimedWaitStatus::Gone);
    }

    #[test]
    fn forced_removal_terminates_and_wakes_joiners() {
        let (registry, main) = registry_with_main();
        let target = registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(7))).unwrap();
        let joiner_chan = registry.begin_join(main, target).unwrap();
        let mut terminated = Vec::new();
        assert!(registry.remove_forced(target, |native| terminated.push(native)));
        assert_eq!(terminated, vec![fake_native(7)]);
        assert!(joiner_chan.try_consume());
        assert!(!registry.remove_forced(target, |_| unreachable!()));
    }

    #[test]
    fn clear_kills_stragglers_and_drops_main() {
        let (registry, main) = registry_with_main();
        registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(1))).unwrap();
        registry.register_spawn(channel(), noop_entry(), |_| Ok(fake_native(2))).unwrap();
        let mut killed = Vec::new();
        assert_eq!(registry.clear(main, |native| killed.push(native)), 2);
        killed.sort_unstable();
        assert_eq!(killed, vec![fake_native(1), fake_native(2)]);
        assert_eq!(registry.live_count(), 0);
    }
}
