use crate::error::{Error, Result};

use super::{
    external::{MemoryArena, ResourceOwner, TupleStore},
    types::{CachedPlan, Cleanup, CursorOptions, PortalMetadata, PortalStatus, StatementList, SubTransactionId},
};

/// A named handle to an in-progress or materialized query (§3.2).
pub struct Portal {
    pub(crate) name: String,
    pub(crate) status: PortalStatus,
    pub(crate) cursor_options: CursorOptions,
    pub(crate) pinned: bool,
    pub(crate) visible: bool,
    pub(crate) create_sub_id: SubTransactionId,
    pub(crate) active_sub_id: SubTransactionId,
    pub(crate) metadata: PortalMetadata,
    pub(crate) stmts: Option<StatementList>,
    pub(crate) cached_plan: Option<CachedPlan>,
    pub(crate) heap_memory: Box<dyn MemoryArena>,
    pub(crate) hold_context: Option<Box<dyn MemoryArena>>,
    pub(crate) hold_store: Option<Box<dyn TupleStore>>,
    pub(crate) resource_owner: Option<Box<dyn ResourceOwner>>,
    pub(crate) cleanup: Option<Cleanup>,
    pub(crate) at_start: bool,
    pub(crate) at_end: bool,
    pub(crate) is_parallel_retrieve_cursor: bool,
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("name", &self.name)
            .field("status", &self.status)
            .field("pinned", &self.pinned)
            .field("visible", &self.visible)
            .field("create_sub_id", &self.create_sub_id)
            .field("active_sub_id", &self.active_sub_id)
            .finish_non_exhaustive()
    }
}

impl Portal {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> PortalStatus {
        self.status
    }

    pub fn cursor_options(&self) -> CursorOptions {
        self.cursor_options
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn create_sub_id(&self) -> SubTransactionId {
        self.create_sub_id
    }

    pub fn active_sub_id(&self) -> SubTransactionId {
        self.active_sub_id
    }

    pub fn source_text(&self) -> &str {
        &self.metadata.source_text
    }

    pub fn metadata(&self) -> &PortalMetadata {
        &self.metadata
    }

    pub fn is_parallel_retrieve_cursor(&self) -> bool {
        self.is_parallel_retrieve_cursor
    }

    /// §4.2 `define_query`: requires NEW, stores the provided references,
    /// transitions to DEFINED. Must not fail after `cached_plan` is
    /// stored, or its refcount would leak.
    #[allow(clippy::too_many_arguments)]
    pub fn define_query(
        &mut self,
        prep_stmt_name: Option<String>,
        source_text: impl Into<String>,
        source_tag: Option<String>,
        command_tag: Option<String>,
        stmts: StatementList,
        cached_plan: Option<CachedPlan>,
    ) -> Result<()> {
        if self.status != PortalStatus::New {
            return Err(Error::invalid_cursor_state(self.name.clone()));
        }
        self.metadata.prep_stmt_name = prep_stmt_name;
        self.metadata.source_text = source_text.into();
        self.metadata.source_tag = source_tag;
        self.metadata.command_tag = command_tag;
        self.stmts = Some(stmts);
        self.cached_plan = cached_plan;
        self.status = PortalStatus::Defined;
        Ok(())
    }

    /// Marks a DEFINED portal as prepared for execution. Not named in the
    /// original source as a distinct externally-visible call (it folds
    /// into the executor's own bookkeeping there), but kept explicit here
    /// so the READY state in §4.2's diagram is reachable through the
    /// public API rather than only by direct field assignment.
    pub fn mark_ready(&mut self) -> Result<()> {
        if self.status != PortalStatus::Defined {
            return Err(Error::invalid_cursor_state(self.name.clone()));
        }
        self.status = PortalStatus::Ready;
        Ok(())
    }

    /// `MarkActive`: READY → ACTIVE (§4.2). Any other source state fails.
    pub fn mark_active(&mut self, current_sub_id: SubTransactionId) -> Result<()> {
        if self.status != PortalStatus::Ready {
            return Err(Error::invalid_cursor_state(self.name.clone()));
        }
        self.status = PortalStatus::Active;
        self.active_sub_id = current_sub_id;
        Ok(())
    }

    /// `MarkDone`: ACTIVE → DONE. Fires `cleanup` if still set.
    pub fn mark_done(&mut self) {
        debug_assert_eq!(self.status, PortalStatus::Active);
        self.status = PortalStatus::Done;
        self.run_cleanup();
    }

    /// `MarkFailed`: any state != DONE → FAILED. Fires `cleanup` if still
    /// set. Calling on DONE is a contract violation (debug-asserted).
    pub fn mark_failed(&mut self) {
        debug_assert_ne!(self.status, PortalStatus::Done);
        self.status = PortalStatus::Failed;
        self.run_cleanup();
    }

    /// Runs `cleanup` if still set, then clears it (I-P3: at most once).
    pub(crate) fn run_cleanup(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }

    /// Drops `cleanup` without running it, for the cleanup-phase hooks
    /// that must never execute user code (AtCleanup, AtSubCleanup).
    pub(crate) fn discard_cleanup_with_warning(&mut self) {
        if self.cleanup.take().is_some() {
            warn!("skipping cleanup for portal \"{}\"", self.name);
        }
    }

    /// Attaches (or replaces) the resource owner this portal's drop
    /// algorithm will release. External callers use this to wire in a
    /// real executor-side resource owner once one exists for the portal.
    pub fn attach_resource_owner(&mut self, owner: Box<dyn ResourceOwner>) {
        self.resource_owner = Some(owner);
    }

    pub fn has_resource_owner(&self) -> bool {
        self.resource_owner.is_some()
    }

    pub fn pin(&mut self) -> Result<()> {
        if self.pinned {
            return Err(Error::invalid_cursor_state(self.name.clone()));
        }
        self.pinned = true;
        Ok(())
    }

    pub fn unpin(&mut self) -> Result<()> {
        if !self.pinned {
            return Err(Error::invalid_cursor_state(self.name.clone()));
        }
        self.pinned = false;
        Ok(())
    }

    /// Forcibly unpins without checking current state, used by abort-time
    /// cleanup hooks on behalf of an interrupted pin holder (§4.2
    /// AtCleanup/AtSubCleanup).
    pub(crate) fn force_unpin(&mut self) {
        self.pinned = false;
    }

    /// Releases the cached plan reference if present and nulls `stmts`
    /// (§4.2 `PortalReleaseCachedPlan`; the "both valid or both empty"
    /// invariant from the design notes). `ok` is forwarded to
    /// [`CachedPlan::release`].
    pub(crate) fn release_cached_plan(&mut self, ok: bool) {
        if let Some(mut plan) = self.cached_plan.take() {
            plan.release(ok);
        }
        self.stmts = None;
    }
}
