use std::{
    sync::Arc,
    thread::JoinHandle,
    time::Instant,
};

use parking_lot::{Condvar, Mutex};

/// The one-shot "OS timer" the multiplexer arms and disarms.
///
/// Mirrors `setitimer(ITIMER_REAL, ...)` plus the `SIGALRM` handler
/// installation from the source, generalized the way this codebase
/// generalizes `core::rt::{Sleep, Timer}`: a single slot, armed with an
/// absolute deadline, that eventually calls back once.
pub trait Timer: Send + Sync + std::fmt::Debug {
    /// Arms the timer to fire at `deadline`, replacing any pending arm.
    fn arm(&self, deadline: Instant);
    /// Cancels any pending arm. A no-op if nothing was armed.
    fn disarm(&self);
}

struct Slot {
    deadline: Option<Instant>,
    generation: u64,
    shutdown: bool,
}

/// A [`Timer`] backed by a dedicated waiter thread parked on a condvar.
///
/// Stands in for the real interval timer + signal handler (§9 redesign
/// flag: this crate's concurrency model is cooperative, not a Unix signal
/// handler). `on_fire` is invoked from the waiter thread once the armed
/// deadline has passed; it is expected to call
/// [`super::Multiplexer::dispatch_expiry`].
pub struct ThreadTimer {
    state: Arc<(Mutex<Slot>, Condvar)>,
    join: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadTimer {
    pub fn spawn<F>(on_fire: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let state = Arc::new((
            Mutex::new(Slot { deadline: None, generation: 0, shutdown: false }),
            Condvar::new(),
        ));
        let worker_state = Arc::clone(&state);
        let join = std::thread::Builder::new()
            .name("timeout-waiter".into())
            .spawn(move || Self::run(worker_state, on_fire))
            .expect("failed to spawn timeout waiter thread");
        ThreadTimer { state, join: Mutex::new(Some(join)) }
    }

    fn run(state: Arc<(Mutex<Slot>, Condvar)>, on_fire: impl Fn() + Send + Sync + 'static) {
        let (mutex, condvar) = &*state;
        let mut guard = mutex.lock();
        loop {
            if guard.shutdown {
                return;
            }
            match guard.deadline {
                None => condvar.wait(&mut guard),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        let generation = guard.generation;
                        drop(guard);
                        trace!("timeout waiter firing");
                        on_fire();
                        guard = mutex.lock();
                        if guard.generation == generation {
                            guard.deadline = None;
                        }
                    } else {
                        let remaining = deadline - now;
                        condvar.wait_for(&mut guard, remaining);
                    }
                }
            }
        }
    }
}

impl Timer for ThreadTimer {
    fn arm(&self, deadline: Instant) {
        let (mutex, condvar) = &*self.state;
        let mut guard = mutex.lock();
        guard.deadline = Some(deadline);
        guard.generation += 1;
        condvar.notify_one();
    }

    fn disarm(&self) {
        let (mutex, condvar) = &*self.state;
        let mut guard = mutex.lock();
        guard.deadline = None;
        guard.generation += 1;
        condvar.notify_one();
    }
}

impl std::fmt::Debug for ThreadTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadTimer").finish_non_exhaustive()
    }
}

impl Drop for ThreadTimer {
    fn drop(&mut self) {
        {
            let (mutex, condvar) = &*self.state;
            let mut guard = mutex.lock();
            guard.shutdown = true;
            condvar.notify_one();
        }
        if let Some(join) = self.join.lock().take() {
            let _ = join.join();
        }
    }
}

/// A [`Timer`] that only records the armed deadline; used in tests to
/// assert I-T3 ("at most one timer armed, at the active queue's head")
/// without depending on real time or a background thread. Firing is
/// driven explicitly via `Multiplexer::dispatch_expiry` in tests.
#[derive(Debug, Default)]
pub struct ManualTimer {
    deadline: Mutex<Option<Instant>>,
}

impl ManualTimer {
    pub fn new() -> Self {
        ManualTimer::default()
    }

    pub fn armed_deadline(&self) -> Option<Instant> {
        *self.deadline.lock()
    }
}

impl Timer for ManualTimer {
    fn arm(&self, deadline: Instant) {
        *self.deadline.lock() = Some(deadline);
    }

    fn disarm(&self) {
        *self.deadline.lock() = None;
    }
}
