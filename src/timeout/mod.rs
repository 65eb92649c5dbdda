//! The timeout multiplexer (§4.1): one process-wide one-shot timer,
//! multiplexed across many named timeout reasons.

mod multiplexer;
mod queue;
mod reason;
mod timer;

pub use multiplexer::{Activation, Multiplexer, RegisterRequest};
pub use reason::{Handler, TimeoutId};
pub use timer::{ManualTimer, ThreadTimer, Timer};
