use std::{
    collections::HashMap,
    sync::{Arc, OnceLock, Weak},
    time::{Duration, Instant},
};

use crate::{
    clock::Clock,
    error::{Error, Result},
    sync::Mutex,
};

use super::{
    queue::{ActiveQueue, QueueEntry},
    reason::{Handler, TimeoutId, TimeoutReason},
    timer::Timer,
};

/// How a single request in an [`Multiplexer::enable_batch`] call should be
/// interpreted.
#[derive(Debug, Clone, Copy)]
pub enum Activation {
    /// Fire `delay` after the clock reading taken for this batch.
    After(Duration),
    /// Fire at an absolute deadline.
    At(Instant),
}

/// How [`Multiplexer::register`] should pick an id.
#[derive(Debug, Clone, Copy)]
pub enum RegisterRequest {
    /// Caller-chosen id; must lie outside the user-allocatable range and
    /// must not already be registered.
    Predefined(TimeoutId),
    /// Allocate the smallest free id in the user-allocatable range.
    User,
}

struct Inner {
    reasons: HashMap<TimeoutId, TimeoutReason>,
    queue: ActiveQueue,
    enabled: bool,
}

impl Inner {
    fn new() -> Self {
        Inner { reasons: HashMap::new(), queue: ActiveQueue::new(), enabled: false }
    }
}

/// Multiplexes one process-wide one-shot timer across many named timeout
/// reasons (§4.1).
///
/// Single-threaded in spirit — the source's "mainline" code — but this
/// crate runs the dispatch pass on a dedicated waiter thread rather than
/// inside a real Unix signal handler (§9 redesign flag), so the shared
/// state is protected by an ordinary mutex instead of relying on
/// signal-safety discipline. Handlers are always invoked with the lock
/// released, so they may freely call back into `enable`/`disable`.
pub struct Multiplexer {
    inner: Mutex<Inner>,
    timer: OnceLock<Arc<dyn Timer>>,
    clock: Arc<dyn Clock>,
    max_user_timeouts: TimeoutId,
    min_timer_interval: Duration,
}

impl Multiplexer {
    /// Creates a multiplexer with no timer attached yet. Call
    /// [`Multiplexer::attach_timer`] before enabling anything.
    pub fn new(clock: Arc<dyn Clock>, max_user_timeouts: usize, min_timer_interval: Duration) -> Arc<Self> {
        Arc::new(Multiplexer {
            inner: Mutex::new(Inner::new()),
            timer: OnceLock::new(),
            clock,
            max_user_timeouts: max_user_timeouts as TimeoutId,
            min_timer_interval,
        })
    }

    /// Attaches the timer implementation. `make_timer` receives a [`Weak`]
    /// handle to this multiplexer so a thread-backed timer can call
    /// [`Multiplexer::dispatch_expiry`] without keeping the multiplexer
    /// alive on its own.
    ///
    /// Panics if called more than once.
    pub fn attach_timer(self: &Arc<Self>, make_timer: impl FnOnce(Weak<Self>) -> Arc<dyn Timer>) {
        let timer = make_timer(Arc::downgrade(self));
        self.timer
            .set(timer)
            .unwrap_or_else(|_| panic!("timer already attached"));
    }

    fn timer(&self) -> &Arc<dyn Timer> {
        self.timer.get().expect("Multiplexer::attach_timer was never called")
    }

    /// Resets all reason slots and the active queue, and leaves the
    /// enabled flag false. Mirrors `InitializeTimeouts`: call this in every
    /// forked process before relying on the multiplexer again.
    pub fn initialize(&self) {
        let mut inner = self.inner.lock();
        inner.reasons.clear();
        inner.queue.clear();
        inner.enabled = false;
        self.timer().disarm();
    }

    /// Registers a new timeout reason (§4.1 `register`).
    pub fn register(&self, request: RegisterRequest, handler: Handler) -> Result<TimeoutId> {
        let mut inner = self.inner.lock();
        match request {
            RegisterRequest::Predefined(id) => {
                if id < self.max_user_timeouts {
                    return Err(Error::BadArgument(
                        "predefined timeout id must lie outside the user-allocatable range",
                    ));
                }
                if inner.reasons.contains_key(&id) {
                    return Err(Error::BadArgument("timeout id is already registered"));
                }
                inner.reasons.insert(id, TimeoutReason::new(id, handler));
                Ok(id)
            }
            RegisterRequest::User => {
                // Scan for the smallest free id in the user range. Kept as a
                // clearly separate `allocated` local rather than reusing the
                // scan variable as the output (see design notes on the
                // original's loop-variable reuse).
                let mut allocated: Option<TimeoutId> = None;
                for candidate in 0..self.max_user_timeouts {
                    if !inner.reasons.contains_key(&candidate) {
                        allocated = Some(candidate);
                        break;
                    }
                }
                let id = allocated
                    .ok_or(Error::ConfigLimitExceeded("user timeout id range exhausted"))?;
                inner.reasons.insert(id, TimeoutReason::new(id, handler));
                Ok(id)
            }
        }
    }

    /// Activates a single reason, firing `delay` from now (§4.1
    /// `enable_after`).
    pub fn enable_after(&self, id: TimeoutId, delay: Duration) -> Result<()> {
        self.enable_batch(&[(id, Activation::After(delay))])
    }

    /// Activates a single reason, firing at the absolute instant `at`
    /// (§4.1 `enable_at`).
    pub fn enable_at(&self, id: TimeoutId, at: Instant) -> Result<()> {
        self.enable_batch(&[(id, Activation::At(at))])
    }

    /// Activates multiple reasons under one clock reading and one timer
    /// re-arm (§4.1 `enable_batch`, scheduling algorithm in §4.1.2).
    pub fn enable_batch(&self, requests: &[(TimeoutId, Activation)]) -> Result<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock();
        // Step 1: clear the enabled flag so no dispatch pass interleaves.
        inner.enabled = false;

        for (id, activation) in requests {
            let fin_time = match activation {
                Activation::After(delay) => now + *delay,
                Activation::At(at) => *at,
            };
            let reason = inner
                .reasons
                .get_mut(id)
                .ok_or(Error::BadArgument("enable of unregistered timeout id"))?;
            if reason.active {
                let removed = inner.queue.remove(*id);
                debug_assert!(removed, "I-T1 violated: active reason missing from queue");
            }
            inner.queue.insert_sorted(QueueEntry { fin_time, id: *id });
            let reason = inner.reasons.get_mut(id).expect("checked above");
            reason.active = true;
            reason.indicator = false;
            reason.start_time = Some(now);
            reason.fin_time = Some(fin_time);
        }

        self.reschedule_locked(&mut inner);
        Ok(())
    }

    /// Deactivates a single reason (§4.1 `disable`). Disabling a
    /// non-active id is not an error.
    pub fn disable(&self, id: TimeoutId, keep_indicator: bool) -> Result<()> {
        self.disable_batch(&[id], keep_indicator)
    }

    /// Deactivates multiple reasons (§4.1 `disable_batch`).
    pub fn disable_batch(&self, ids: &[TimeoutId], keep_indicator: bool) -> Result<()> {
        let mut inner = self.inner.lock();
        for &id in ids {
            let Some(reason) = inner.reasons.get_mut(&id) else {
                return Err(Error::BadArgument("disable of unregistered timeout id"));
            };
            if reason.active {
                inner.queue.remove(id);
                reason.active = false;
            }
            if !keep_indicator {
                reason.indicator = false;
            }
        }
        self.reschedule_locked(&mut inner);
        Ok(())
    }

    /// Deactivates every reason and explicitly disarms the timer (§4.1
    /// `disable_all`).
    pub fn disable_all(&self, keep_indicators: bool) {
        let mut inner = self.inner.lock();
        for reason in inner.reasons.values_mut() {
            reason.active = false;
            if !keep_indicators {
                reason.indicator = false;
            }
        }
        inner.queue.clear();
        inner.enabled = false;
        self.timer().disarm();
    }

    /// Recomputes the timer from the current queue head (§4.1
    /// `reschedule`). Callers use this after an exceptional control
    /// transfer that may have swallowed an expiry.
    pub fn reschedule(&self) {
        let mut inner = self.inner.lock();
        self.reschedule_locked(&mut inner);
    }

    fn reschedule_locked(&self, inner: &mut Inner) {
        match inner.queue.peek_head() {
            Some(head) => {
                let now = self.clock.now();
                let delta = head.fin_time.saturating_duration_since(now).max(self.min_timer_interval);
                // Enabled flag set *before* arming: an early fire must be
                // observable, never silently swallowed.
                inner.enabled = true;
                self.timer().arm(now + delta);
            }
            None => {
                inner.enabled = false;
                self.timer().disarm();
            }
        }
    }

    /// The asynchronous expiry entry point (§4.1 "Expiry dispatch").
    ///
    /// In this crate this runs on the waiter thread started by
    /// [`super::timer::ThreadTimer`], not inside a real signal handler;
    /// callers embedding their own timer source call this directly when
    /// they observe the armed deadline has passed.
    pub fn dispatch_expiry(&self) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        // Defensive against reentrant delivery: cleared before we start
        // firing handlers, so a concurrent dispatch pass is a no-op.
        inner.enabled = false;

        let mut now = self.clock.now();
        loop {
            let due = match inner.queue.peek_head() {
                Some(head) if head.fin_time <= now => inner.queue.pop_head().expect("peeked"),
                _ => break,
            };
            let reason = inner
                .reasons
                .get_mut(&due.id)
                .expect("active queue referenced an unregistered reason");
            reason.active = false;
            reason.indicator = true;
            let mut handler = reason
                .handler_slot
                .take()
                .expect("reason handler missing during dispatch");

            drop(inner);
            trace!("invoking expiry handler for timeout {}", due.id);
            handler();
            inner = self.inner.lock();

            if let Some(reason) = inner.reasons.get_mut(&due.id) {
                if reason.handler_slot.is_none() {
                    reason.handler_slot = Some(handler);
                }
            }
            now = self.clock.now();
        }

        self.reschedule_locked(&mut inner);
    }

    pub fn is_active(&self, id: TimeoutId) -> Option<bool> {
        self.inner.lock().reasons.get(&id).map(|r| r.active)
    }

    /// Reads and optionally clears the indicator. Never clears on a false
    /// return, so a racing expiry is never lost (§4.1 `indicator`).
    pub fn indicator(&self, id: TimeoutId, reset: bool) -> Option<bool> {
        let mut inner = self.inner.lock();
        let reason = inner.reasons.get_mut(&id)?;
        let was_set = reason.indicator;
        if was_set && reset {
            reason.indicator = false;
        }
        Some(was_set)
    }

    pub fn start_time(&self, id: TimeoutId) -> Option<Option<Instant>> {
        self.inner.lock().reasons.get(&id).map(|r| r.start_time)
    }

    pub fn finish_time(&self, id: TimeoutId) -> Option<Option<Instant>> {
        self.inner.lock().reasons.get(&id).map(|r| r.fin_time)
    }

    /// Invariant checker for tests: the active queue is sorted and every
    /// entry corresponds to exactly one `active` reason (I-T1, I-T2).
    #[cfg(test)]
    fn check_invariants(&self) {
        let inner = self.inner.lock();
        assert!(inner.queue.is_sorted(), "I-T2 violated");
        let active_in_table = inner.reasons.values().filter(|r| r.active).count();
        assert_eq!(active_in_table, inner.queue.len(), "I-T1 violated");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex as StdMutex,
    };

    use super::{timer::ManualTimer, *};
    use crate::clock::ManualClock;

    fn new_test_mux(clock: ManualClock) -> Arc<Multiplexer> {
        let clock: Arc<dyn Clock> = Arc::new(clock);
        let mux = Multiplexer::new(clock, 8, Duration::from_micros(1));
        mux.attach_timer(|_weak| Arc::new(ManualTimer::new()) as Arc<dyn Timer>);
        mux
    }

    fn noop_handler() -> Handler {
        Box::new(|| {})
    }

    #[test]
    fn register_user_allocates_smallest_free_id() {
        let mux = new_test_mux(ManualClock::new(Instant::now()));
        let a = mux.register(RegisterRequest::User, noop_handler()).unwrap();
        let b = mux.register(RegisterRequest::User, noop_handler()).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 1);
        mux.disable(a, false).unwrap();
        // id 0 is still "registered", just inactive; register(User) must
        // not reuse it since it's occupied, not free.
        let c = mux.register(RegisterRequest::User, noop_handler()).unwrap();
        assert_eq!(c, 2);
    }

    #[test]
    fn register_user_exhaustion_is_config_limit_exceeded() {
        let mux = new_test_mux(ManualClock::new(Instant::now()));
        for _ in 0..8 {
            mux.register(RegisterRequest::User, noop_handler()).unwrap();
        }
        let err = mux.register(RegisterRequest::User, noop_handler()).unwrap_err();
        assert!(matches!(err, Error::ConfigLimitExceeded(_)));
    }

    #[test]
    fn predefined_id_inside_user_range_is_rejected() {
        let mux = new_test_mux(ManualClock::new(Instant::now()));
        let err = mux
            .register(RegisterRequest::Predefined(3), noop_handler())
            .unwrap_err();
        assert!(matches!(err, Error::BadArgument(_)));
    }

    #[test]
    fn two_deadline_race_fires_in_deadline_order() {
        // End-to-end scenario 1, compressed onto a manual clock.
        let base = Instant::now();
        let clock = ManualClock::new(base);
        let mux = new_test_mux(clock.clone());

        let order = Arc::new(StdMutex::new(Vec::new()));
        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);
        let a = mux
            .register(RegisterRequest::Predefined(100), Box::new(move || order_a.lock().unwrap().push("H1")))
            .unwrap();
        let b = mux
            .register(RegisterRequest::Predefined(101), Box::new(move || order_b.lock().unwrap().push("H2")))
            .unwrap();

        mux.enable_after(a, Duration::from_millis(100)).unwrap();
        clock.advance(Duration::from_millis(10));
        mux.enable_after(b, Duration::from_millis(50)).unwrap();
        mux.check_invariants();

        clock.advance(Duration::from_millis(50)); // t = 60ms: B due
        mux.dispatch_expiry();
        assert_eq!(*order.lock().unwrap(), vec!["H2"]);

        clock.advance(Duration::from_millis(40)); // t = 100ms: A due
        mux.dispatch_expiry();
        assert_eq!(*order.lock().unwrap(), vec!["H2", "H1"]);
        mux.check_invariants();
    }

    #[test]
    fn reschedule_replaces_pending_deadline() {
        // End-to-end scenario 2.
        let base = Instant::now();
        let clock = ManualClock::new(base);
        let mux = new_test_mux(clock.clone());
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);
        let id = mux
            .register(RegisterRequest::Predefined(100), Box::new(move || {
                fired2.fetch_add(1, Ordering::SeqCst);
            }))
            .unwrap();

        mux.enable_after(id, Duration::from_millis(1000)).unwrap();
        clock.advance(Duration::from_millis(100));
        mux.enable_after(id, Duration::from_millis(10)).unwrap();

        clock.advance(Duration::from_millis(5));
        mux.dispatch_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_millis(10));
        mux.dispatch_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn indicator_sticky_across_disable_with_keep() {
        // End-to-end scenario 3.
        let base = Instant::now();
        let clock = ManualClock::new(base);
        let mux = new_test_mux(clock.clone());
        let id = mux
            .register(RegisterRequest::Predefined(100), noop_handler())
            .unwrap();

        mux.enable_after(id, Duration::from_millis(1)).unwrap();
        clock.advance(Duration::from_millis(10));
        mux.dispatch_expiry();

        mux.disable(id, true).unwrap();
        assert_eq!(mux.indicator(id, true), Some(true));
        assert_eq!(mux.indicator(id, true), Some(false));
    }

    #[test]
    fn disable_all_clears_everything() {
        let clock = ManualClock::new(Instant::now());
        let mux = new_test_mux(clock.clone());
        let a = mux.register(RegisterRequest::Predefined(100), noop_handler()).unwrap();
        let b = mux.register(RegisterRequest::Predefined(101), noop_handler()).unwrap();
        mux.enable_after(a, Duration::from_millis(10)).unwrap();
        mux.enable_after(b, Duration::from_millis(20)).unwrap();

        mux.disable_all(false);

        assert_eq!(mux.is_active(a), Some(false));
        assert_eq!(mux.is_active(b), Some(false));
        assert_eq!(mux.indicator(a, false), Some(false));
        mux.check_invariants();
    }

    #[test]
    fn ties_broken_by_ascending_id_in_one_dispatch_pass() {
        // T5.
        let base = Instant::now();
        let clock = ManualClock::new(base);
        let mux = new_test_mux(clock.clone());
        let order = Arc::new(StdMutex::new(Vec::new()));
        let order_a = Arc::clone(&order);
        let order_b = Arc::clone(&order);
        let a = mux
            .register(RegisterRequest::Predefined(100), Box::new(move || order_a.lock().unwrap().push(100)))
            .unwrap();
        let b = mux
            .register(RegisterRequest::Predefined(101), Box::new(move || order_b.lock().unwrap().push(101)))
            .unwrap();

        let deadline = clock.now() + Duration::from_millis(10);
        mux.enable_at(b, deadline).unwrap();
        mux.enable_at(a, deadline).unwrap();

        clock.advance(Duration::from_millis(10));
        mux.dispatch_expiry();
        assert_eq!(*order.lock().unwrap(), vec![100, 101]);
    }

    #[test]
    fn handler_may_reenable_itself() {
        let base = Instant::now();
        let clock = ManualClock::new(base);
        let mux = new_test_mux(clock.clone());
        let mux_for_handler = Arc::clone(&mux);
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = Arc::clone(&fired);

        let id = mux
            .register(
                RegisterRequest::Predefined(100),
                Box::new(move || {
                    fired2.fetch_add(1, Ordering::SeqCst);
                    let _ = mux_for_handler.enable_after(100, Duration::from_millis(5));
                }),
            )
            .unwrap();

        mux.enable_after(id, Duration::from_millis(1)).unwrap();
        clock.advance(Duration::from_millis(2));
        mux.dispatch_expiry();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(mux.is_active(id), Some(true));
        mux.check_invariants();
    }
}
