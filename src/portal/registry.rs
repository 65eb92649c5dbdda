use std::sync::Arc;

use crate::{
    clock::Clock,
    config::KernelConfig,
    error::{Error, Result},
    sync::Mutex,
};

use super::{
    external::{ArenaFactory, HoldPersister, ReleasePhase, ResourceOwner, ResourceOwnerFactory, TupleStoreFactory},
    portal::Portal,
    table::{PortalScanAction, PortalTable},
    types::{CursorOptions, PortalMetadata, PortalStatus, SubTransactionId},
};

/// A name, statement text, and a handful of introspection flags, enough
/// to answer `pg_cursor`-style queries without exposing the portal itself.
#[derive(Debug, Clone)]
pub struct PortalSummary {
    pub name: String,
    pub statement: String,
    pub is_holdable: bool,
    pub is_binary: bool,
    pub is_scrollable: bool,
    pub creation_time: std::time::Instant,
}

/// Registry of named handles to in-progress or materialized query
/// executions (§3.2, §4.2).
///
/// Owns one [`PortalTable`] behind a lock plus the collaborators used to
/// mint and tear down a portal's resources. Methods that need to run
/// caller-supplied code (cleanup hooks, resource-owner release) collect
/// the work to do under the lock and run it after releasing the lock,
/// matching the multiplexer's "collect under lock, dispatch outside"
/// style.
pub struct PortalRegistry {
    arena_factory: Box<dyn ArenaFactory>,
    resource_owner_factory: Box<dyn ResourceOwnerFactory>,
    clock: Arc<dyn Clock>,
    config: KernelConfig,
    table: Mutex<PortalTable>,
    tuple_store_factory: Box<dyn TupleStoreFactory>,
    hold_persister: Box<dyn HoldPersister>,
}

impl std::fmt::Debug for PortalRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalRegistry").finish_non_exhaustive()
    }
}

impl PortalRegistry {
    pub fn new(
        arena_factory: Box<dyn ArenaFactory>,
        resource_owner_factory: Box<dyn ResourceOwnerFactory>,
        clock: Arc<dyn Clock>,
        config: KernelConfig,
        tuple_store_factory: Box<dyn TupleStoreFactory>,
        hold_persister: Box<dyn HoldPersister>,
    ) -> Self {
        PortalRegistry {
            arena_factory,
            resource_owner_factory,
            clock,
            config,
            table: Mutex::new(PortalTable::new()),
            tuple_store_factory,
            hold_persister,
        }
    }

    pub fn len(&self) -> usize {
        self.table.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.lock().is_empty()
    }

    /// `CreatePortal`/`CreateNewPortal`: allocates a NEW portal, named or
    /// anonymous. Fails on a duplicate name or if `max_portals` is
    /// already at capacity. `source_text` isn't known until `define_query`
    /// (§4.2's `create` takes no query text at all); the metadata starts
    /// empty and is filled in there. The new portal's resource owner is
    /// created as a child of the current-transaction owner via
    /// `resource_owner_factory`.
    pub fn create(
        &self,
        name: Option<String>,
        cursor_options: CursorOptions,
        current_sub_id: SubTransactionId,
    ) -> Result<String> {
        let mut table = self.table.lock();
        if self.config.portal_cap_reached(table.len()) {
            return Err(Error::config_limit_exceeded("portal"));
        }
        let name = match name {
            Some(name) => {
                if table.contains(&name) {
                    return Err(Error::duplicate_cursor(name));
                }
                name
            }
            None => table.next_unnamed_name(&self.config.unnamed_portal_prefix),
        };

        let is_parallel_retrieve_cursor = cursor_options.contains(CursorOptions::HOLD)
            && cursor_options.contains(CursorOptions::SCROLL)
            && !cursor_options.contains(CursorOptions::NO_SCROLL);

        let portal = Portal {
            name: name.clone(),
            status: PortalStatus::New,
            cursor_options,
            pinned: false,
            visible: true,
            create_sub_id: current_sub_id,
            active_sub_id: SubTransactionId::INVALID,
            metadata: PortalMetadata {
                prep_stmt_name: None,
                source_text: String::new(),
                source_tag: None,
                command_tag: None,
                creation_time: self.clock.now(),
            },
            stmts: None,
            cached_plan: None,
            heap_memory: self.arena_factory.create_child("portal heap"),
            hold_context: None,
            hold_store: None,
            resource_owner: Some(self.resource_owner_factory.create_child()),
            cleanup: None,
            at_start: true,
            at_end: true,
            is_parallel_retrieve_cursor,
        };
        table.insert(portal);
        debug!("created portal \"{name}\"");
        Ok(name)
    }

    /// Runs `f` against the named portal while holding the table lock.
    /// The closure must not itself call back into the registry.
    pub fn with_portal_mut<R>(&self, name: &str, f: impl FnOnce(&mut Portal) -> Result<R>) -> Result<R> {
        let mut table = self.table.lock();
        let portal = table
            .get_mut(name)
            .ok_or_else(|| Error::bad_argument("no such portal"))?;
        f(portal)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn define_query(
        &self,
        name: &str,
        prep_stmt_name: Option<String>,
        source_text: impl Into<String>,
        source_tag: Option<String>,
        command_tag: Option<String>,
        stmts: super::types::StatementList,
        cached_plan: Option<super::types::CachedPlan>,
    ) -> Result<()> {
        self.with_portal_mut(name, |portal| {
            portal.define_query(prep_stmt_name, source_text, source_tag, command_tag, stmts, cached_plan)
        })
    }

    pub fn mark_ready(&self, name: &str) -> Result<()> {
        self.with_portal_mut(name, |portal| portal.mark_ready())
    }

    pub fn mark_active(&self, name: &str, current_sub_id: SubTransactionId) -> Result<()> {
        self.with_portal_mut(name, |portal| portal.mark_active(current_sub_id))
    }

    pub fn mark_done(&self, name: &str) -> Result<()> {
        self.with_portal_mut(name, |portal| {
            portal.mark_done();
            Ok(())
        })
    }

    pub fn mark_failed(&self, name: &str) -> Result<()> {
        self.with_portal_mut(name, |portal| {
            portal.mark_failed();
            Ok(())
        })
    }

    pub fn pin(&self, name: &str) -> Result<()> {
        self.with_portal_mut(name, |portal| portal.pin())
    }

    pub fn unpin(&self, name: &str) -> Result<()> {
        self.with_portal_mut(name, |portal| portal.unpin())
    }

    pub fn status(&self, name: &str) -> Result<PortalStatus> {
        let table = self.table.lock();
        table
            .get(name)
            .map(Portal::status)
            .ok_or_else(|| Error::bad_argument("no such portal"))
    }

    pub fn active_sub_id(&self, name: &str) -> Result<SubTransactionId> {
        let table = self.table.lock();
        table
            .get(name)
            .map(Portal::active_sub_id)
            .ok_or_else(|| Error::bad_argument("no such portal"))
    }

    /// `PortalDrop`: the 8-step teardown (§4.2). `is_top_commit` selects
    /// whether this drop happens as part of a normal top-level commit
    /// (resources already released by the commit path, so the explicit
    /// resource-owner release below is skipped unless the portal failed)
    /// or any other case (abort, sub-transaction cleanup, explicit
    /// `close`), where resources are always released here.
    pub fn drop(&self, name: &str, is_top_commit: bool) -> Result<()> {
        // A pinned or still-ACTIVE portal can't be torn down through the
        // caller-facing path; the transaction hooks force-unpin and
        // MarkFailed before ever reaching here, so this only ever rejects
        // an explicit close attempt.
        {
            let table = self.table.lock();
            let portal = table.get(name).ok_or_else(|| Error::bad_argument("no such portal"))?;
            if portal.is_pinned() || portal.status() == PortalStatus::Active {
                return Err(Error::invalid_cursor_state(name.to_string()));
            }
        }

        // Step 2 first: remove from the table before running any
        // caller-supplied code, so a cleanup hook that re-enters the
        // registry (e.g. looks the portal up again) sees it gone rather
        // than looping back into its own teardown.
        let mut portal = {
            let mut table = self.table.lock();
            table.remove(name).ok_or_else(|| Error::bad_argument("no such portal"))?
        };

        let is_commit = portal.status != PortalStatus::Failed;

        // Step 1: cleanup hook.
        portal.run_cleanup();

        // Step 4: cached plan + statement list.
        portal.release_cached_plan(is_commit);

        // Step 5: resource-owner release, three phases, conditioned on
        // not being a top-commit drop of a successfully DONE portal.
        let must_release_here = !is_top_commit || !is_commit;
        if let Some(owner) = portal.resource_owner.as_mut() {
            if must_release_here {
                release_all_phases(owner.as_mut(), is_commit);
            }
            owner.delete();
        }

        // Step 6: hold-store teardown.
        if let Some(mut store) = portal.hold_store.take() {
            store.end();
        }
        portal.hold_context = None;

        // Step 7: heap memory. `delete_children` first so any arena-owned
        // state is torn down deterministically before the box itself
        // drops at the end of this function.
        portal.heap_memory.delete_children();

        debug!("dropped portal \"{name}\"");
        // Step 8: `portal` goes out of scope here.
        Ok(())
    }

    /// Drops every portal unconditionally, in no particular order. Used
    /// at session teardown (`AtExitCleanup_ResPortals`).
    pub fn drop_all(&self) {
        loop {
            let name = {
                let table = self.table.lock();
                match table.names().next() {
                    Some(name) => name.to_string(),
                    None => break,
                }
            };
            // Force out of any pinned/active state first; an exiting
            // session doesn't honor cursor holds.
            let _ = self.with_portal_mut(&name, |portal| {
                portal.force_unpin();
                if portal.status == PortalStatus::Active {
                    portal.mark_failed();
                }
                Ok(())
            });
            let _ = self.drop(&name, false);
        }
    }

    pub fn there_are_no_ready_portals(&self) -> bool {
        let table = self.table.lock();
        !table.iter().any(|p| p.status() == PortalStatus::Ready)
    }

    pub fn list_visible(&self) -> Vec<PortalSummary> {
        let table = self.table.lock();
        table
            .iter()
            .filter(|p| p.is_visible())
            .map(|p| PortalSummary {
                name: p.name().to_string(),
                statement: p.source_text().to_string(),
                is_holdable: p.cursor_options().contains(CursorOptions::HOLD),
                is_binary: p.cursor_options().contains(CursorOptions::BINARY),
                is_scrollable: p.cursor_options().contains(CursorOptions::SCROLL),
                creation_time: p.metadata().creation_time,
            })
            .collect()
    }

    pub fn list_parallel_retrieve_cursors(&self) -> Vec<String> {
        let table = self.table.lock();
        table
            .iter()
            .filter(|p| p.is_parallel_retrieve_cursor())
            .map(|p| p.name().to_string())
            .collect()
    }

    /// `PreCommit_Portals` (§4.2): pinned portals abort the commit; ACTIVE
    /// portals are left running with their resource owner detached;
    /// holdable portals abort a `PREPARE TRANSACTION` outright (a
    /// holdable cursor can't survive into a prepared transaction's
    /// disconnected session); otherwise they're materialized into their
    /// hold-store and kept; everything else is dropped as a top-level
    /// commit.
    pub fn pre_commit(&self, is_prepare: bool) -> Result<()> {
        let mut abort_error = None;
        let mut to_drop = Vec::new();
        let mut to_materialize = Vec::new();

        self.table.lock().retain_scan(|portal| {
            if abort_error.is_some() {
                return PortalScanAction::Keep;
            }
            if portal.is_pinned() {
                abort_error = Some(Error::portal_pinned_at_commit(portal.name().to_string()));
                return PortalScanAction::Keep;
            }
            match portal.status() {
                PortalStatus::Active => {
                    portal.resource_owner = None;
                    PortalScanAction::Keep
                }
                PortalStatus::Ready
                    if portal.cursor_options().contains(CursorOptions::HOLD)
                        && !portal.create_sub_id().is_invalid() =>
                {
                    if is_prepare {
                        abort_error = Some(Error::feature_not_supported(
                            "cannot PREPARE a transaction with a WITH HOLD cursor",
                        ));
                    } else {
                        to_materialize.push(portal.name().to_string());
                    }
                    PortalScanAction::Keep
                }
                _ if portal.create_sub_id().is_invalid() => PortalScanAction::Keep,
                _ => {
                    to_drop.push(portal.name().to_string());
                    PortalScanAction::Remove
                }
            }
        });

        if let Some(err) = abort_error {
            return Err(err);
        }

        for name in to_materialize {
            self.with_portal_mut(&name, |portal| {
                let scroll = portal.cursor_options().contains(CursorOptions::SCROLL);
                let mut store = self.tuple_store_factory.create(scroll);
                self.hold_persister.persist(&name, store.as_mut());
                store.end();
                portal.hold_context = Some(self.arena_factory.create_child("portal hold"));
                portal.hold_store = Some(store);
                portal.release_cached_plan(true);
                portal.resource_owner = None;
                portal.create_sub_id = SubTransactionId::INVALID;
                portal.active_sub_id = SubTransactionId::INVALID;
                Ok(())
            })?;
        }

        for name in to_drop {
            self.drop(&name, true)?;
        }
        Ok(())
    }

    /// `AtAbort_Portals`: ACTIVE portals fail in place; survivors (portals
    /// not created in the failing transaction) are skipped; everything
    /// else has its cleanup hook fired and its cached plan released, but
    /// keeps its struct around (for `at_cleanup`) with only its
    /// descendant memory freed.
    pub fn at_abort(&self) {
        let mut to_settle = Vec::new();
        self.table.lock().retain_scan(|portal| {
            if portal.create_sub_id().is_invalid() {
                return PortalScanAction::Keep;
            }
            if portal.status() == PortalStatus::Active {
                portal.mark_failed();
            }
            to_settle.push(portal.name().to_string());
            PortalScanAction::Keep
        });

        for name in to_settle {
            let _ = self.with_portal_mut(&name, |portal| {
                portal.run_cleanup();
                portal.release_cached_plan(false);
                if let Some(owner) = portal.resource_owner.take() {
                    let mut owner = owner;
                    release_all_phases(owner.as_mut(), false);
                    owner.delete();
                }
                portal.heap_memory.delete_children();
                Ok(())
            });
        }
    }

    /// `AtCleanup_Portals`: survivors are skipped; everything else is
    /// force-unpinned (an abandoned pin holder doesn't get to keep it)
    /// and dropped. A portal whose cleanup hook is still set here (it
    /// should have fired at `at_abort`) is discarded with a warning
    /// rather than run, since cleanup-phase code must not execute
    /// arbitrary user callbacks.
    pub fn at_cleanup(&self) {
        let mut to_drop = Vec::new();
        self.table.lock().retain_scan(|portal| {
            if portal.create_sub_id().is_invalid() {
                return PortalScanAction::Keep;
            }
            portal.force_unpin();
            portal.discard_cleanup_with_warning();
            to_drop.push(portal.name().to_string());
            PortalScanAction::Keep
        });

        for name in to_drop {
            let _ = self.drop(&name, false);
        }
    }

    /// `AtSubCommit_Portals`: reparents `create_sub_id`/`active_sub_id`
    /// values matching the committing sub-transaction up to its parent, and
    /// reparents the resource owner of every portal created there to the
    /// parent-transaction owner.
    pub fn at_sub_commit(&self, child_sub_id: SubTransactionId, parent_sub_id: SubTransactionId) {
        let mut table = self.table.lock();
        for portal in reparent_iter(&mut table) {
            if portal.create_sub_id == child_sub_id {
                portal.create_sub_id = parent_sub_id;
                if let Some(owner) = portal.resource_owner.as_mut() {
                    owner.reparent_to_parent();
                }
            }
            if portal.active_sub_id == child_sub_id {
                portal.active_sub_id = parent_sub_id;
            }
        }
    }

    /// `AtSubAbort_Portals`: a portal active in, but not created in, the
    /// failing sub-transaction is rewound to its parent scope and failed
    /// if it was ACTIVE; one created in the failing sub-transaction is
    /// failed and torn down in place (struct kept for `at_sub_cleanup`).
    pub fn at_sub_abort(&self, my_sub_id: SubTransactionId, parent_sub_id: SubTransactionId) {
        let mut used_not_created = Vec::new();
        let mut created_here = Vec::new();

        {
            let mut table = self.table.lock();
            for portal in reparent_iter(&mut table) {
                if portal.create_sub_id != my_sub_id && portal.active_sub_id == my_sub_id {
                    used_not_created.push(portal.name.clone());
                } else if portal.create_sub_id == my_sub_id {
                    created_here.push(portal.name.clone());
                }
            }
        }

        for name in used_not_created {
            let _ = self.with_portal_mut(&name, |portal| {
                portal.active_sub_id = parent_sub_id;
                if portal.status() == PortalStatus::Active {
                    portal.mark_failed();
                }
                // `ResourceOwner::reparent_to_parent` only models moving an
                // owner up one level (its creating sub-transaction's
                // parent), which is what AtSubCommit needs. Handing this
                // owner instead to a sibling — the aborting sub-
                // transaction's own owner, as the algorithm calls for — has
                // no counterpart in that seam, so it's released in place.
                if portal.status() == PortalStatus::Failed {
                    if let Some(mut owner) = portal.resource_owner.take() {
                        release_all_phases(owner.as_mut(), false);
                        owner.delete();
                    }
                }
                Ok(())
            });
        }

        for name in created_here {
            let _ = self.with_portal_mut(&name, |portal| {
                if portal.status() == PortalStatus::Active {
                    portal.mark_failed();
                }
                portal.run_cleanup();
                portal.release_cached_plan(false);
                if let Some(owner) = portal.resource_owner.take() {
                    let mut owner = owner;
                    release_all_phases(owner.as_mut(), false);
                    owner.delete();
                }
                portal.heap_memory.delete_children();
                Ok(())
            });
        }
    }

    /// `AtSubCleanup_Portals`: force-unpin anything created in the
    /// sub-transaction, discard any still-pending cleanup with a
    /// warning, and drop.
    pub fn at_sub_cleanup(&self, my_sub_id: SubTransactionId) {
        let mut to_drop = Vec::new();
        self.table.lock().retain_scan(|portal| {
            if portal.create_sub_id() != my_sub_id {
                return PortalScanAction::Keep;
            }
            portal.force_unpin();
            portal.discard_cleanup_with_warning();
            to_drop.push(portal.name().to_string());
            PortalScanAction::Keep
        });

        for name in to_drop {
            let _ = self.drop(&name, false);
        }
    }
}

fn release_all_phases(owner: &mut dyn ResourceOwner, is_commit: bool) {
    owner.release(ReleasePhase::BeforeLocks, is_commit);
    owner.release(ReleasePhase::Locks, is_commit);
    owner.release(ReleasePhase::AfterLocks, is_commit);
}

/// Plain mutable iteration for the sub-transaction hooks, which only
/// rewrite fields and never remove entries mid-pass.
fn reparent_iter(table: &mut PortalTable) -> impl Iterator<Item = &mut Portal> {
    table.iter_mut()
}
