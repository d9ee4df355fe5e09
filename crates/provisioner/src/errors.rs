//! Error types for dependency provisioning.
//!
//! Every fallible provisioning step maps onto one [`Error`] variant. When a
//! rollback fails on top of an earlier failure both errors are kept in an
//! [`ErrorList`], in the order they happened, so callers can inspect every
//! cause with [`Error::contains`] instead of matching on message text.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[cfg(test)]
#[path = "errors_tests.rs"]
mod tests;

/// Errors that can occur while provisioning a test dependency.
#[derive(Error, Debug)]
pub enum Error {
    /// The container control plane could not be reached.
    ///
    /// This is an environment problem (daemon not running, wrong socket) and
    /// is never retried.
    #[error("Could not connect to the container runtime: {reason}")]
    Connection { reason: String },

    /// A fixture asset was not found by the upward directory search.
    #[error("'{name}' was not found within {levels} directories above {}", start.display())]
    NotFound {
        name: String,
        start: PathBuf,
        levels: usize,
    },

    /// A filesystem probe failed for a reason other than "does not exist".
    #[error("Could not access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The image could not be built or pulled, or the container could not be
    /// created, started or configured.
    #[error("Could not start container '{container}': {reason}")]
    Start { container: String, reason: String },

    /// The readiness window was exhausted before the dependency answered.
    #[error(
        "'{target}' was not ready after {attempts} attempt(s) in {elapsed:?}. Last error: {last_error}"
    )]
    Timeout {
        target: String,
        attempts: u32,
        elapsed: Duration,
        last_error: String,
    },

    /// The readiness wait was cancelled by its caller.
    #[error("Readiness check for '{target}' was cancelled after {attempts} attempt(s)")]
    Cancelled { target: String, attempts: u32 },

    /// A typed client could not be built for a dependency that was already
    /// confirmed ready.
    #[error("Could not create {kind} client: {reason}")]
    Connect { kind: String, reason: String },

    /// Purging a container failed.
    #[error("Could not purge container '{container}': {reason}")]
    Cleanup { container: String, reason: String },

    /// A configuration value could not be parsed.
    #[error("Invalid configuration value for {key}: {reason}")]
    Config { key: String, reason: String },

    /// Several errors occurred, typically a failure followed by a failed
    /// rollback.
    #[error("{0}")]
    Aggregate(ErrorList),
}

/// The category of an [`Error`], used to query aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connection,
    NotFound,
    Io,
    Start,
    Timeout,
    Cancelled,
    Connect,
    Cleanup,
    Config,
    Aggregate,
}

impl Error {
    /// Returns the category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Connection { .. } => ErrorKind::Connection,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Io { .. } => ErrorKind::Io,
            Error::Start { .. } => ErrorKind::Start,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::Connect { .. } => ErrorKind::Connect,
            Error::Cleanup { .. } => ErrorKind::Cleanup,
            Error::Config { .. } => ErrorKind::Config,
            Error::Aggregate(_) => ErrorKind::Aggregate,
        }
    }

    /// Returns true if this error is, or an aggregate that holds, an error of
    /// the given kind.
    pub fn contains(&self, kind: ErrorKind) -> bool {
        match self {
            Error::Aggregate(list) => kind == ErrorKind::Aggregate || list.contains(kind),
            other => other.kind() == kind,
        }
    }

    /// Returns the individual causes in the order they occurred.
    ///
    /// A plain error yields itself; an aggregate yields its members.
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Error::Aggregate(list) => list.iter().collect(),
            other => vec![other],
        }
    }

    /// Combines two errors, keeping `self` as the primary cause.
    pub fn and(self, other: Error) -> Error {
        let mut list = ErrorList::new();
        list.push(self);
        list.push(other);
        Error::Aggregate(list)
    }

    /// Folds the outcome of a rollback into this error.
    ///
    /// A successful cleanup leaves the error untouched; a failed cleanup is
    /// appended after it.
    pub fn with_cleanup(self, cleanup: Result<()>) -> Error {
        match cleanup {
            Ok(()) => self,
            Err(cleanup_err) => self.and(cleanup_err),
        }
    }
}

/// An ordered collection of errors.
///
/// Nested aggregates are flattened on insertion so the list always holds
/// leaf causes.
#[derive(Debug, Default)]
pub struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an error, flattening it if it is itself an aggregate.
    pub fn push(&mut self, error: Error) {
        match error {
            Error::Aggregate(inner) => self.errors.extend(inner.errors),
            other => self.errors.push(other),
        }
    }

    /// Appends the error of a failed result, ignoring successes.
    pub fn push_result(&mut self, result: Result<()>) {
        if let Err(e) = result {
            self.push(e);
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn contains(&self, kind: ErrorKind) -> bool {
        self.errors.iter().any(|e| e.kind() == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.errors.iter()
    }

    /// Converts the collected errors into a single result.
    ///
    /// No errors is `Ok`, one error is returned as-is and anything more
    /// becomes an [`Error::Aggregate`].
    pub fn into_result(mut self) -> Result<()> {
        match self.errors.len() {
            0 => Ok(()),
            1 => Err(self.errors.remove(0)),
            _ => Err(Error::Aggregate(self)),
        }
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for (i, error) in self.errors.iter().enumerate() {
            write!(f, " [{}] {}", i + 1, error)?;
            if i + 1 < self.errors.len() {
                write!(f, ";")?;
            }
        }
        Ok(())
    }
}

impl IntoIterator for ErrorList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

/// Result type alias for provisioning operations.
pub type Result<T> = std::result::Result<T, Error>;
