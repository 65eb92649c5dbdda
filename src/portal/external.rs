//! Seams onto the collaborators the registry doesn't reimplement (§6):
//! memory arenas, resource owners, and tuple stores. The registry only
//! calls the narrow operations listed in §6; everything else about these
//! subsystems is out of scope.

use std::fmt;

/// A scoped memory region. The registry creates one per portal
/// (`heap_memory`) and, for holdable cursors, a second cross-transaction
/// one (`hold_context`).
pub trait MemoryArena: fmt::Debug + Send {
    /// Deletes only this arena's descendants, keeping the arena itself
    /// alive. Used at `AtAbort`/`AtSubAbort` to free executor state while
    /// keeping the portal struct around for later cleanup.
    fn delete_children(&mut self);
}

/// Creates [`MemoryArena`] instances. The registry holds one to mint a
/// fresh arena per portal rather than depending on a concrete allocator.
pub trait ArenaFactory: fmt::Debug + Send + Sync {
    fn create_child(&self, name: &'static str) -> Box<dyn MemoryArena>;
}

/// The three phases resource-owner release happens in (§4.2 drop
/// algorithm step 5). Order is mandatory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleasePhase {
    BeforeLocks,
    Locks,
    AfterLocks,
}

/// An opaque scope accumulating locks and buffer pins, released as a unit.
pub trait ResourceOwner: fmt::Debug + Send {
    /// Runs one release phase. `is_commit` is `status != FAILED` per the
    /// drop algorithm.
    fn release(&mut self, phase: ReleasePhase, is_commit: bool);
    /// Called once all three phases have run.
    fn delete(&mut self);
    /// Moves this owner up one level, from the sub-transaction owner it was
    /// created under to that sub-transaction's parent owner. Called at
    /// `AtSubCommit` for every portal created in the committing
    /// sub-transaction.
    fn reparent_to_parent(&mut self);
}

/// Creates [`ResourceOwner`] instances. The registry holds one to give a
/// fresh portal a resource owner parented under the current transaction's
/// owner, mirroring [`ArenaFactory`]: the factory already knows which scope
/// is "current", so the registry never needs to pass one in.
pub trait ResourceOwnerFactory: fmt::Debug + Send + Sync {
    fn create_child(&self) -> Box<dyn ResourceOwner>;
}

/// A materialized result set backing a holdable cursor after commit.
pub trait TupleStore: fmt::Debug + Send {
    fn put_values(&mut self, row: Vec<String>);
    fn end(&mut self);
}

/// Creates [`TupleStore`] instances. `scroll` mirrors the cursor's
/// `SCROLL` option, since a backing store only needs random access when
/// the cursor does.
pub trait TupleStoreFactory: fmt::Debug + Send + Sync {
    fn create(&self, scroll: bool) -> Box<dyn TupleStore>;
}

/// `PersistHoldablePortal`: materializes a holdable cursor's remaining
/// tuples into its hold-store at commit time, ahead of the executor
/// context that produced them being torn down.
pub trait HoldPersister: fmt::Debug + Send + Sync {
    fn persist(&self, portal_name: &str, store: &mut dyn TupleStore);
}

/// In-memory stand-ins used by tests and by callers that don't need a real
/// executor/memory-context backend wired in.
pub mod testing {
    use super::*;

    #[derive(Debug, Default)]
    pub struct NullArena {
        deleted_children: bool,
    }

    impl MemoryArena for NullArena {
        fn delete_children(&mut self) {
            self.deleted_children = true;
        }
    }

    impl NullArena {
        pub fn deleted_children(&self) -> bool {
            self.deleted_children
        }
    }

    #[derive(Debug, Default)]
    pub struct NullArenaFactory;

    impl ArenaFactory for NullArenaFactory {
        fn create_child(&self, _name: &'static str) -> Box<dyn MemoryArena> {
            Box::new(NullArena::default())
        }
    }

    #[derive(Debug, Default)]
    pub struct NullResourceOwner {
        released_phases: Vec<(ReleasePhase, bool)>,
        deleted: bool,
        reparent_count: u32,
    }

    impl NullResourceOwner {
        pub fn released_phases(&self) -> &[(ReleasePhase, bool)] {
            &self.released_phases
        }

        pub fn is_deleted(&self) -> bool {
            self.deleted
        }

        pub fn reparent_count(&self) -> u32 {
            self.reparent_count
        }
    }

    impl ResourceOwner for NullResourceOwner {
        fn release(&mut self, phase: ReleasePhase, is_commit: bool) {
            self.released_phases.push((phase, is_commit));
        }

        fn delete(&mut self) {
            self.deleted = true;
        }

        fn reparent_to_parent(&mut self) {
            self.reparent_count += 1;
        }
    }

    #[derive(Debug, Default)]
    pub struct NullResourceOwnerFactory;

    impl ResourceOwnerFactory for NullResourceOwnerFactory {
        fn create_child(&self) -> Box<dyn ResourceOwner> {
            Box::new(NullResourceOwner::default())
        }
    }

    #[derive(Debug, Default)]
    pub struct VecTupleStore {
        rows: Vec<Vec<String>>,
        ended: bool,
    }

    impl VecTupleStore {
        pub fn rows(&self) -> &[Vec<String>] {
            &self.rows
        }

        pub fn is_ended(&self) -> bool {
            self.ended
        }
    }

    impl TupleStore for VecTupleStore {
        fn put_values(&mut self, row: Vec<String>) {
            self.rows.push(row);
        }

        fn end(&mut self) {
            self.ended = true;
        }
    }

    #[derive(Debug, Default)]
    pub struct VecTupleStoreFactory;

    impl TupleStoreFactory for VecTupleStoreFactory {
        fn create(&self, _scroll: bool) -> Box<dyn TupleStore> {
            Box::new(VecTupleStore::default())
        }
    }

    /// A persister that materializes nothing; used where tests only care
    /// about the hold-store's existence and lifecycle, not its contents.
    #[derive(Debug, Default)]
    pub struct NullHoldPersister;

    impl HoldPersister for NullHoldPersister {
        fn persist(&self, _portal_name: &str, _store: &mut dyn TupleStore) {}
    }
}
