use std::time::Instant;

/// Identifies a registered timeout reason.
///
/// IDs below [`crate::config::KernelConfig::max_user_timeouts`] are the
/// dynamically-allocated *user range*; any other value is a caller-chosen
/// *predefined* id (see [`super::Multiplexer::register`]).
pub type TimeoutId = u32;

/// A parameterless callback invoked when a timeout reason expires.
///
/// Handlers run synchronously inside the dispatch pass (§4.1 "Expiry
/// dispatch"); they may call back into the multiplexer (`enable`/`disable`)
/// but must not block indefinitely, since they delay the rest of the pass.
pub type Handler = Box<dyn FnMut() + Send>;

/// A single registered timeout slot.
pub(crate) struct TimeoutReason {
    pub(crate) id: TimeoutId,
    /// `None` only while a dispatch pass is invoking this reason's handler
    /// (it is moved out so it can be called without holding the lock);
    /// otherwise always `Some` for a registered reason.
    pub(crate) handler_slot: Option<Handler>,
    pub(crate) active: bool,
    pub(crate) indicator: bool,
    pub(crate) start_time: Option<Instant>,
    pub(crate) fin_time: Option<Instant>,
}

impl TimeoutReason {
    pub(crate) fn new(id: TimeoutId, handler: Handler) -> Self {
        TimeoutReason {
            id,
            handler_slot: Some(handler),
            active: false,
            indicator: false,
            start_time: None,
            fin_time: None,
        }
    }
}

impl std::fmt::Debug for TimeoutReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutReason")
            .field("id", &self.id)
            .field("active", &self.active)
            .field("indicator", &self.indicator)
            .field("start_time", &self.start_time)
            .field("fin_time", &self.fin_time)
            .finish_non_exhaustive()
    }
}
