use std::{error::Error as StdError, fmt};

/// Errors surfaced by the kernel's public API.
///
/// Variants map onto the domain error table: the timeout multiplexer and
/// the portal registry each raise a subset of these, plus the ambient
/// `Config`/`Poisoned` kinds that come from wiring the crate up rather than
/// from the database domain itself.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// `register()` exhausted the user-allocatable id range.
    ConfigLimitExceeded(&'static str),
    /// A batch request carried a tag the multiplexer doesn't recognize.
    BadArgument(&'static str),
    /// `create()` found an existing portal with the same name and
    /// `allow_dup` was false.
    DuplicateCursor(String),
    /// An operation (typically `drop`) was attempted on a portal that
    /// cannot perform it in its current state.
    InvalidCursorState(String),
    /// A requested combination of options isn't supported (e.g. preparing a
    /// transaction that holds a `WITH HOLD` cursor).
    FeatureNotSupported(&'static str),
    /// `PreCommit` found a still-pinned portal.
    PortalPinnedAtCommit(String),
    /// A malformed `KernelConfig`.
    Config(String),
    /// An internal lock was poisoned by a panicking critical section.
    Poisoned(&'static str),
    /// Timer-arm failure or active-queue index corruption: the table says
    /// "terminates process", not "returns an error". Kept as a variant so
    /// the condition is nameable in logs and tests before the caller
    /// `panic!`s on it, never as a recoverable path.
    Fatal(&'static str),
}

impl Error {
    pub(crate) fn config_limit_exceeded(what: &'static str) -> Self {
        Error::ConfigLimitExceeded(what)
    }

    pub(crate) fn bad_argument(what: &'static str) -> Self {
        Error::BadArgument(what)
    }

    pub(crate) fn duplicate_cursor(name: impl Into<String>) -> Self {
        Error::DuplicateCursor(name.into())
    }

    pub(crate) fn invalid_cursor_state(name: impl Into<String>) -> Self {
        Error::InvalidCursorState(name.into())
    }

    pub(crate) fn portal_pinned_at_commit(name: impl Into<String>) -> Self {
        Error::PortalPinnedAtCommit(name.into())
    }

    pub(crate) fn feature_not_supported(what: &'static str) -> Self {
        Error::FeatureNotSupported(what)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigLimitExceeded(what) => write!(f, "configured limit exceeded: {what}"),
            Error::BadArgument(what) => write!(f, "bad argument: {what}"),
            Error::DuplicateCursor(name) => write!(f, "cursor \"{name}\" already exists"),
            Error::InvalidCursorState(name) => {
                write!(f, "portal \"{name}\" is not in a valid state for this operation")
            }
            Error::FeatureNotSupported(what) => write!(f, "feature not supported: {what}"),
            Error::PortalPinnedAtCommit(name) => {
                write!(f, "cannot commit while portal \"{name}\" is pinned")
            }
            Error::Config(msg) => write!(f, "invalid configuration: {msg}"),
            Error::Poisoned(where_) => write!(f, "internal lock poisoned in {where_}"),
            Error::Fatal(what) => write!(f, "fatal: {what}"),
        }
    }
}

impl StdError for Error {}

/// A convenience alias for fallible kernel operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_cursor_message_includes_name() {
        let err = Error::duplicate_cursor("my_cursor");
        assert_eq!(err.to_string(), "cursor \"my_cursor\" already exists");
    }

    #[test]
    fn error_is_std_error() {
        fn assert_std_error<E: StdError>(_: &E) {}
        assert_std_error(&Error::BadArgument("tag"));
    }
}
