use std::sync::Arc;

use crate::{
    clock::{Clock, SystemClock},
    config::KernelConfig,
    portal::{ArenaFactory, HoldPersister, PortalRegistry, ResourceOwnerFactory, TupleStoreFactory},
    sync::Mutex,
    timeout::{Multiplexer, ThreadTimer, Timer},
};

static CURRENT: Mutex<Option<Arc<Kernel>>> = Mutex::new(None);

/// The process-wide facade over one [`Multiplexer`] and one
/// [`PortalRegistry`] (§2 System Overview).
///
/// A real backend has exactly one of these per backend process; tests
/// build their own with [`Kernel::build`] rather than going through the
/// process-wide singleton.
pub struct Kernel {
    timeouts: Arc<Multiplexer>,
    portals: PortalRegistry,
}

impl Kernel {
    /// Assembles a kernel from its parts without touching the process-wide
    /// singleton. The production path wires a real [`ThreadTimer`] in;
    /// tests pass a `ManualTimer` via `make_timer` instead.
    #[allow(clippy::too_many_arguments)]
    pub fn build(
        config: KernelConfig,
        clock: Arc<dyn Clock>,
        arena_factory: Box<dyn ArenaFactory>,
        resource_owner_factory: Box<dyn ResourceOwnerFactory>,
        tuple_store_factory: Box<dyn TupleStoreFactory>,
        hold_persister: Box<dyn HoldPersister>,
        make_timer: impl FnOnce(std::sync::Weak<Multiplexer>) -> Arc<dyn Timer>,
    ) -> Arc<Kernel> {
        let timeouts = Multiplexer::new(Arc::clone(&clock), config.max_user_timeouts, config.min_timer_interval);
        timeouts.attach_timer(make_timer);
        let portals =
            PortalRegistry::new(arena_factory, resource_owner_factory, clock, config, tuple_store_factory, hold_persister);
        Arc::new(Kernel { timeouts, portals })
    }

    /// Builds a kernel with the production clock and a real
    /// [`ThreadTimer`] backing its multiplexer, installs it as the
    /// process-wide singleton, and returns it. Mirrors
    /// `EnablePortalManager`/`InitializeTimeouts` being called once at
    /// backend startup.
    ///
    /// # Panics
    /// Panics if a kernel is already installed; call [`Kernel::reinitialize`]
    /// first if one needs replacing.
    pub fn initialize(
        config: KernelConfig,
        arena_factory: Box<dyn ArenaFactory>,
        resource_owner_factory: Box<dyn ResourceOwnerFactory>,
        tuple_store_factory: Box<dyn TupleStoreFactory>,
        hold_persister: Box<dyn HoldPersister>,
    ) -> Arc<Kernel> {
        let kernel = Kernel::build(
            config,
            Arc::new(SystemClock),
            arena_factory,
            resource_owner_factory,
            tuple_store_factory,
            hold_persister,
            |weak| {
                Arc::new(ThreadTimer::spawn(move || {
                    if let Some(mux) = weak.upgrade() {
                        mux.dispatch_expiry();
                    }
                }))
            },
        );
        Kernel::install(Arc::clone(&kernel));
        kernel
    }

    /// Installs `kernel` as the process-wide singleton. Panics if one is
    /// already installed (`InitializeTimeouts`/postmaster-fork semantics
    /// assume a single kernel per running backend, reset only by
    /// [`Kernel::reinitialize`]).
    pub fn install(kernel: Arc<Kernel>) {
        let mut current = CURRENT.lock();
        if current.is_some() {
            panic!("Kernel already installed");
        }
        *current = Some(kernel);
    }

    /// Clears the process-wide singleton, modeling a backend being
    /// reinitialized after a `fork()`: the parent's kernel (and its
    /// threads, locks, and timer) doesn't survive into the child, so the
    /// child must install a fresh one before calling [`Kernel::current`]
    /// again.
    pub fn reinitialize() {
        *CURRENT.lock() = None;
    }

    /// The installed process-wide kernel.
    ///
    /// # Panics
    /// Panics if no kernel is currently installed.
    pub fn current() -> Arc<Kernel> {
        Arc::clone(CURRENT.lock().as_ref().expect("no Kernel installed: call Kernel::initialize first"))
    }

    pub fn timeouts(&self) -> &Arc<Multiplexer> {
        &self.timeouts
    }

    pub fn portals(&self) -> &PortalRegistry {
        &self.portals
    }
}

impl std::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Kernel").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::ManualClock,
        portal::external::testing::{NullArenaFactory, NullHoldPersister, NullResourceOwnerFactory, VecTupleStoreFactory},
        timeout::ManualTimer,
    };
    use std::time::Instant;

    fn test_kernel() -> Arc<Kernel> {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Instant::now()));
        Kernel::build(
            KernelConfig::default(),
            clock,
            Box::new(NullArenaFactory),
            Box::new(NullResourceOwnerFactory),
            Box::new(VecTupleStoreFactory),
            Box::new(NullHoldPersister),
            |_weak| Arc::new(ManualTimer::new()) as Arc<dyn Timer>,
        )
    }

    #[test]
    fn build_wires_timeouts_and_portals_independently() {
        let kernel = test_kernel();
        assert!(kernel.timeouts().is_active(0).is_none());
        assert!(kernel.portals().is_empty());
    }

    #[test]
    fn install_then_current_round_trips_and_reinitialize_allows_a_fresh_install() {
        // Only one test in this process may touch the process-wide
        // singleton; keep this the sole caller, and leave it cleared on
        // exit so it doesn't leak into other tests' process state.
        let first = test_kernel();
        Kernel::install(Arc::clone(&first));
        assert!(Arc::ptr_eq(&Kernel::current(), &first));

        Kernel::reinitialize();
        let second = test_kernel();
        Kernel::install(Arc::clone(&second));
        assert!(Arc::ptr_eq(&Kernel::current(), &second));

        Kernel::reinitialize();
    }
}
