//! Crate-wide logging macros.
//!
//! These forward to `tracing`, but are defined here (rather than importing
//! `tracing::{trace, debug, ...}` at every call site) so every module can
//! use bare `trace!`/`debug!`/`warn!`/`error!` the same way.

macro_rules! trace {
    ($($arg:tt)*) => {
        tracing::trace!($($arg)*)
    };
}

// Compiled out entirely unless `tracing-verbose` is on: per-portal/per-reason
// chatter (created/dropped, rearmed, hook sweeps) that's too noisy for a
// default build but useful when chasing a specific test failure.
macro_rules! debug {
    ($($arg:tt)*) => {
        #[cfg(feature = "tracing-verbose")]
        tracing::debug!($($arg)*);
    };
}

macro_rules! warn {
    ($($arg:tt)*) => {
        tracing::warn!($($arg)*)
    };
}

macro_rules! error {
    ($($arg:tt)*) => {
        tracing::error!($($arg)*)
    };
}
