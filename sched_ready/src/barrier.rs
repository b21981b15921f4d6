use std::{
    collections::HashMap,
    fmt,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use tokio::sync::watch;

use crate::BarrierError;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Identifies the work a registration stands for
///
/// Generated keys come from a counter internal to the barrier and can never
/// equal a caller-supplied name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BarrierKey {
    /// A caller-supplied name
    Named(String),
    /// A key generated for an anonymous registration
    Generated(u64),
}

impl fmt::Display for BarrierKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "`{name}`"),
            Self::Generated(id) => write!(f, "#{id}"),
        }
    }
}

#[derive(Default)]
struct State {
    counts: HashMap<BarrierKey, u32>,
    ever_non_zero: bool,
    fired: bool,
    callbacks: Vec<Callback>,
    next_key: u64,
}

impl State {
    fn outstanding(&self) -> u64 {
        self.counts.values().map(|&c| u64::from(c)).sum()
    }

    /// Takes the callbacks to run if this mutation completed the barrier
    fn take_if_complete(&mut self) -> Option<Vec<Callback>> {
        if self.ever_non_zero && self.counts.is_empty() && !self.fired {
            self.fired = true;
            Some(std::mem::take(&mut self.callbacks))
        } else {
            None
        }
    }
}

struct Shared {
    state: Mutex<State>,
    fired: watch::Sender<bool>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so a poisoned state is still
        // internally consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fire(&self, callbacks: Vec<Callback>) {
        tracing::debug!(callbacks = callbacks.len(), "all registered work settled");
        self.fired.send_replace(true);
        for callback in callbacks {
            callback();
        }
    }
}

/// A dynamic, keyed join-counter that fires once
///
/// Work is [registered][Self::register] under a key with a count of units,
/// and each unit is later released. After at least one unit has been
/// registered, the first moment no units remain fires the barrier: every
/// [completion callback][Self::on_complete] runs once, synchronously, on the
/// thread that made the final release, and [`ready()`][Self::ready]
/// resolves. From then on the barrier is inert. Registrations and releases
/// are still accepted but never fire it again; a new readiness signal needs a
/// new barrier.
///
/// Registrations sharing a key accumulate. A barrier with no registrations
/// never fires.
///
/// # Liveness
///
/// There is no timeout and no way to cancel a registration. A unit that is
/// registered and never released prevents the barrier from firing for as
/// long as it exists. [`ReleaseGuard`] releases on drop and covers early
/// returns and panics.
///
/// Cloning a barrier yields another handle to the same state.
#[derive(Clone)]
pub struct ReadinessBarrier {
    shared: Arc<Shared>,
}

impl ReadinessBarrier {
    /// Constructs a barrier with nothing registered
    pub fn new() -> Self {
        let (fired, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(State::default()),
                fired,
            }),
        }
    }

    /// Registers `count` units of work under `key`
    ///
    /// Without a key, a fresh one is generated. The returned registration
    /// must be released `count` times.
    ///
    /// A count of zero records nothing and does not arm the barrier.
    pub fn register(&self, key: Option<&str>, count: u32) -> Registration {
        let mut state = self.shared.state();

        let key = match key {
            Some(name) => BarrierKey::Named(name.to_owned()),
            None => {
                let id = state.next_key;
                state.next_key += 1;
                BarrierKey::Generated(id)
            }
        };

        if count > 0 {
            let entry = state.counts.entry(key.clone()).or_default();
            *entry = entry.saturating_add(count);
            state.ever_non_zero = true;
            tracing::trace!(%key, count, after_fired = state.fired, "registered work");
        }

        Registration {
            barrier: self.clone(),
            key,
            registered: count,
            remaining: AtomicU32::new(count),
        }
    }

    /// Runs `callback` once the barrier fires
    ///
    /// If the barrier has already fired, `callback` runs immediately, before
    /// this call returns.
    pub fn on_complete<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state();
        if state.fired {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// Waits until the barrier fires
    pub async fn ready(&self) {
        let mut fired = self.shared.fired.subscribe();
        // The sender lives as long as `self`, so this can only end by firing.
        let _ = fired.wait_for(|fired| *fired).await;
    }

    /// Whether the barrier has fired
    pub fn is_fired(&self) -> bool {
        self.shared.state().fired
    }

    /// The number of registered units not yet released
    pub fn outstanding(&self) -> u64 {
        self.shared.state().outstanding()
    }

    /// The keys with units outstanding, in order
    pub fn pending_keys(&self) -> Vec<BarrierKey> {
        let mut keys: Vec<_> = self.shared.state().counts.keys().cloned().collect();
        keys.sort();
        keys
    }

    fn release_one(&self, key: &BarrierKey) {
        let mut state = self.shared.state();

        if let Some(count) = state.counts.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                state.counts.remove(key);
            }
        }
        tracing::trace!(%key, outstanding = state.outstanding(), "released work");

        let callbacks = state.take_if_complete();
        drop(state);

        if let Some(callbacks) = callbacks {
            self.shared.fire(callbacks);
        }
    }
}

impl Default for ReadinessBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ReadinessBarrier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let state = self.shared.state();
        f.debug_struct("ReadinessBarrier")
            .field("fired", &state.fired)
            .field("outstanding", &state.outstanding())
            .field("callbacks", &state.callbacks.len())
            .finish()
    }
}

/// One registration against a [`ReadinessBarrier`]
///
/// Release it once per unit of work it was registered with, whether or not
/// that work succeeded.
#[must_use = "registered work keeps the barrier from firing until it is released"]
pub struct Registration {
    barrier: ReadinessBarrier,
    key: BarrierKey,
    registered: u32,
    remaining: AtomicU32,
}

impl Registration {
    /// Releases one unit of this registration
    ///
    /// Releasing more units than were registered is an error, even after the
    /// barrier has fired.
    pub fn release(&self) -> Result<(), BarrierError> {
        let released = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| r.checked_sub(1));

        if released.is_err() {
            let err = BarrierError::OverRelease {
                key: self.key.clone(),
                registered: self.registered,
            };
            tracing::error!(key = %self.key, registered = self.registered, "{err}");
            return Err(err);
        }

        self.barrier.release_one(&self.key);
        Ok(())
    }

    /// Wraps this registration in a guard that releases one unit on drop
    pub fn guard(self) -> ReleaseGuard {
        ReleaseGuard {
            registration: Some(self),
        }
    }

    /// The key this registration counts against
    pub fn key(&self) -> &BarrierKey {
        &self.key
    }

    /// The units not yet released
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Registration")
            .field("key", &self.key)
            .field("registered", &self.registered)
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Releases one unit of a [`Registration`] when dropped
#[must_use = "the unit is released as soon as the guard is dropped"]
#[derive(Debug)]
pub struct ReleaseGuard {
    registration: Option<Registration>,
}

impl ReleaseGuard {
    /// Releases the unit now rather than on drop
    pub fn release(mut self) -> Result<(), BarrierError> {
        match self.registration.take() {
            Some(registration) => registration.release(),
            None => Ok(()),
        }
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.take() {
            let result = registration.release();
            debug_assert!(
                result.is_ok() || std::thread::panicking(),
                "release guard dropped over an exhausted registration: {result:?}"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::AtomicUsize,
        time::Duration,
    };

    use tracing_test::traced_test;

    use super::*;

    fn counting_callback(barrier: &ReadinessBarrier) -> Arc<AtomicUsize> {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = fired.clone();
        barrier.on_complete(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        fired
    }

    mod when_nothing_is_registered {
        use super::*;

        #[test]
        fn barrier_never_fires() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            assert!(!barrier.is_fired());
            assert_eq!(barrier.outstanding(), 0);
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn ready_does_not_resolve() {
            let barrier = ReadinessBarrier::new();

            let waited = tokio::time::timeout(Duration::from_millis(20), barrier.ready()).await;

            assert!(waited.is_err());
        }

        #[test]
        fn zero_count_registration_does_not_arm_the_barrier() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            let registration = barrier.register(Some("empty"), 0);

            assert!(matches!(
                registration.release(),
                Err(BarrierError::OverRelease { registered: 0, .. })
            ));
            assert!(!barrier.is_fired());
            assert_eq!(fired.load(Ordering::SeqCst), 0);
        }
    }

    mod when_distinct_keys_are_registered {
        use super::*;

        #[test]
        fn barrier_fires_exactly_once_after_all_release() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            let registrations: Vec<_> = ["tasks", "schedules", "user"]
                .into_iter()
                .map(|key| barrier.register(Some(key), 1))
                .collect();

            for (i, registration) in registrations.iter().enumerate() {
                assert_eq!(fired.load(Ordering::SeqCst), 0, "fired before release {i}");
                registration.release().unwrap();
            }

            assert!(barrier.is_fired());
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }

        #[test]
        #[traced_test]
        fn extra_release_is_an_error() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);
            let registration = barrier.register(Some("tasks"), 1);

            registration.release().unwrap();
            let err = registration.release().unwrap_err();

            assert_eq!(
                err,
                BarrierError::OverRelease {
                    key: BarrierKey::Named("tasks".to_owned()),
                    registered: 1,
                }
            );
            assert_eq!(fired.load(Ordering::SeqCst), 1);
            assert!(logs_contain("released more than the 1 time(s)"));
        }

        #[test]
        fn generated_keys_never_collide_with_names() {
            let barrier = ReadinessBarrier::new();

            let first = barrier.register(None, 1);
            let second = barrier.register(None, 1);
            let named = barrier.register(Some("0"), 1);

            assert_eq!(first.key(), &BarrierKey::Generated(0));
            assert_eq!(second.key(), &BarrierKey::Generated(1));
            assert_ne!(first.key(), named.key());
            assert_eq!(barrier.pending_keys().len(), 3);
        }
    }

    mod when_registrations_share_a_key {
        use super::*;

        #[test]
        fn counts_accumulate() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            let first = barrier.register(Some("tasks"), 1);
            let second = barrier.register(Some("tasks"), 2);
            assert_eq!(barrier.outstanding(), 3);
            assert_eq!(barrier.pending_keys(), [BarrierKey::Named("tasks".to_owned())]);

            first.release().unwrap();
            second.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 0);

            second.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1);
            assert!(second.release().is_err());
        }
    }

    mod when_work_is_registered_up_front {
        use super::*;

        #[test]
        fn fires_only_after_the_last_release() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            let tasks = barrier.register(Some("load-tasks"), 2);
            let schedules = barrier.register(Some("load-schedules"), 1);

            tasks.release().unwrap();
            tasks.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 0);
            assert_eq!(barrier.outstanding(), 1);

            schedules.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn work_registered_after_draining_does_not_refire() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);

            let tasks = barrier.register(Some("load-tasks"), 2);
            tasks.release().unwrap();
            tasks.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1);

            let schedules = barrier.register(Some("load-schedules"), 1);
            assert_eq!(barrier.outstanding(), 1);
            schedules.release().unwrap();

            assert_eq!(fired.load(Ordering::SeqCst), 1);
            assert!(barrier.is_fired());
        }
    }

    mod when_the_barrier_has_fired {
        use super::*;

        #[test]
        fn late_subscriber_runs_immediately() {
            let barrier = ReadinessBarrier::new();
            barrier.register(None, 1).release().unwrap();

            let fired = counting_callback(&barrier);

            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }

        #[tokio::test]
        async fn ready_resolves() {
            let barrier = ReadinessBarrier::new();
            let registration = barrier.register(Some("tasks"), 1);

            let waiter = tokio::spawn({
                let barrier = barrier.clone();
                async move { barrier.ready().await }
            });
            tokio::task::yield_now().await;

            registration.release().unwrap();

            tokio::time::timeout(Duration::from_secs(1), waiter)
                .await
                .expect("ready() did not resolve")
                .unwrap();
            barrier.ready().await;
        }

        #[test]
        fn callback_may_call_back_into_the_barrier() {
            let barrier = ReadinessBarrier::new();
            let observed = Arc::new(AtomicUsize::new(usize::MAX));

            let inner = barrier.clone();
            let seen = observed.clone();
            barrier.on_complete(move || {
                seen.store(inner.outstanding() as usize, Ordering::SeqCst);
                inner.register(Some("after"), 1).release().unwrap();
            });

            barrier.register(None, 1).release().unwrap();

            assert_eq!(observed.load(Ordering::SeqCst), 0);
            assert_eq!(barrier.outstanding(), 0);
        }
    }

    mod release_guard {
        use super::*;

        fn load(barrier: &ReadinessBarrier, fail: bool) -> Result<(), &'static str> {
            let _guard = barrier.register(Some("load"), 1).guard();
            if fail {
                return Err("fetch failed");
            }
            Ok(())
        }

        #[test]
        fn releases_on_early_return() {
            let barrier = ReadinessBarrier::new();
            let fired = counting_callback(&barrier);
            let other = barrier.register(Some("other"), 1);

            assert!(load(&barrier, true).is_err());
            assert_eq!(barrier.pending_keys(), [BarrierKey::Named("other".to_owned())]);

            other.release().unwrap();
            assert_eq!(fired.load(Ordering::SeqCst), 1);
        }

        #[test]
        fn explicit_release_does_not_release_twice() {
            let barrier = ReadinessBarrier::new();
            let registration = barrier.register(Some("load"), 2);
            let remaining = barrier.register(Some("other"), 1);

            registration.guard().release().unwrap();

            assert_eq!(barrier.outstanding(), 2);
            drop(remaining);
        }

        #[cfg(debug_assertions)]
        #[test]
        #[should_panic(expected = "exhausted registration")]
        fn dropping_over_an_exhausted_registration_panics_in_debug_builds() {
            let barrier = ReadinessBarrier::new();
            let _guard = barrier.register(Some("empty"), 0).guard();
        }
    }
}
