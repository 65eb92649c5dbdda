use std::{
    ops::{BitOr, BitOrAssign},
    time::Instant,
};

/// A portal's position in the state machine of §4.2.
///
/// Transitions are driven exclusively by [`super::portal::Portal::mark_active`],
/// [`super::portal::Portal::mark_done`], and
/// [`super::portal::Portal::mark_failed`] — external code never assigns this
/// directly (I-P2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalStatus {
    New,
    Defined,
    Ready,
    Active,
    Done,
    Failed,
}

/// Cursor option bits (§3.2). A plain bitset rather than an external crate,
/// since the set is small, fixed, and never serialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CursorOptions(u8);

impl CursorOptions {
    pub const NONE: CursorOptions = CursorOptions(0);
    pub const HOLD: CursorOptions = CursorOptions(1 << 0);
    pub const SCROLL: CursorOptions = CursorOptions(1 << 1);
    pub const BINARY: CursorOptions = CursorOptions(1 << 2);
    pub const NO_SCROLL: CursorOptions = CursorOptions(1 << 3);

    pub const fn contains(self, other: CursorOptions) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for CursorOptions {
    type Output = CursorOptions;
    fn bitor(self, rhs: CursorOptions) -> CursorOptions {
        CursorOptions(self.0 | rhs.0)
    }
}

impl BitOrAssign for CursorOptions {
    fn bitor_assign(&mut self, rhs: CursorOptions) {
        self.0 |= rhs.0;
    }
}

/// Identifies a (sub)transaction scope. The sentinel [`SubTransactionId::INVALID`]
/// means "not tied to any live (sub)transaction" — see §3.2 I-P6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubTransactionId(u64);

impl SubTransactionId {
    pub const INVALID: SubTransactionId = SubTransactionId(0);

    pub const fn new(id: u64) -> Self {
        SubTransactionId(id)
    }

    pub const fn is_invalid(self) -> bool {
        self.0 == Self::INVALID.0
    }
}

/// Opaque statement list a portal was defined with. The registry never
/// inspects this; it only stores and hands back the reference (§4.2
/// `define_query`: "stores the provided references, no copying").
#[derive(Debug, Clone, Default)]
pub struct StatementList(pub Vec<String>);

/// A reference-counted, externally managed plan tree (§3.2, I-P5: exactly
/// one reference is held for the portal's lifetime).
#[derive(Debug)]
pub struct CachedPlan {
    released: bool,
}

impl CachedPlan {
    pub fn new() -> Self {
        CachedPlan { released: false }
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Releases the held reference. `ok` mirrors whether the releasing
    /// transaction is committing or aborting, for implementations that
    /// distinguish "cache this plan for reuse" from "discard it".
    /// Idempotent in debug builds only via assertion — callers must
    /// follow I-P5 and call this at most once.
    pub(crate) fn release(&mut self, ok: bool) {
        let _ = ok;
        debug_assert!(!self.released, "I-P5 violated: cached plan released twice");
        self.released = true;
    }
}

impl Default for CachedPlan {
    fn default() -> Self {
        Self::new()
    }
}

/// A one-shot cleanup callback (§3.2 `cleanup`, I-P3: runs at most once).
pub type Cleanup = Box<dyn FnOnce() + Send>;

/// Portal metadata. `creation_time` is set at `create()`; the rest is
/// filled in by `define_query` when the portal leaves NEW, and never
/// mutated afterward.
#[derive(Debug, Clone)]
pub struct PortalMetadata {
    pub prep_stmt_name: Option<String>,
    pub source_text: String,
    pub source_tag: Option<String>,
    pub command_tag: Option<String>,
    pub creation_time: Instant,
}
