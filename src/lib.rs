//! A signal-driven timeout multiplexer and a portal registry for a
//! single-process database backend (§2 System Overview).
//!
//! [`timeout`] multiplexes one process-wide one-shot timer across many
//! named timeout reasons. [`portal`] tracks named handles to
//! in-progress query executions through their lifecycle and the
//! transaction boundaries that commit, abort, or hold them open. Both
//! are exposed as standalone building blocks; [`Kernel`] wires one of
//! each together the way a backend process would.

#[macro_use]
mod macros;

mod clock;
mod config;
mod error;
mod kernel;
pub mod portal;
mod sync;
pub mod timeout;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::KernelConfig;
pub use error::{Error, Result};
pub use kernel::Kernel;
