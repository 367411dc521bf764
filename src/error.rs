use std::fmt;
use std::sync::Arc;

use crate::dispatch::{LocalityId, ObjectId};

/// Errors stored in, and raised from, async handles.
///
/// Errors are `Clone`: a settled handle may be observed by
/// any number of holders, and each of them reads the same
/// error.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// An error raised by user code (an algorithm, a task).
    #[error("{0}")]
    Failed(Arc<dyn std::error::Error + Send + Sync>),

    /// A failure described only by a message.
    #[error("{0}")]
    Message(String),

    /// Several failures bundled into one composite error.
    #[error("{0}")]
    List(ExceptionList),

    /// The producing side went away without settling.
    #[error("broken promise: the handle was abandoned before it was settled")]
    BrokenPromise,

    /// The task producing the value panicked.
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The colocation policy does not know the object.
    #[error("no locality hosts object {0}")]
    UnknownObject(ObjectId),

    /// The transport could not reach the locality.
    #[error("{0} is unavailable")]
    LocalityUnavailable(LocalityId),

    /// An internal invariant was violated.
    #[error("internal consistency fault: {0}")]
    Inconsistent(&'static str),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap an arbitrary error.
    pub fn new<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Error::Failed(Arc::new(e))
    }

    /// A plain message error.
    pub fn msg<M: Into<String>>(m: M) -> Self {
        Error::Message(m.into())
    }

    /// Push the underlying failures of `self` onto `out`,
    /// expanding nested lists in order.
    pub fn flatten_into(self, out: &mut Vec<Error>) {
        match self {
            Error::List(list) => {
                for e in list.errors {
                    e.flatten_into(out);
                }
            }
            e => out.push(e),
        }
    }
}

impl From<ExceptionList> for Error {
    fn from(list: ExceptionList) -> Self {
        Error::List(list)
    }
}

/// An ordered list of failures from several
/// sub-invocations.
#[derive(Debug, Clone, Default)]
pub struct ExceptionList {
    errors: Vec<Error>,
}

impl ExceptionList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect errors, flattening any nested lists.
    pub fn flattened<I: IntoIterator<Item = Error>>(errors: I) -> Self {
        let mut out = Vec::new();
        for e in errors {
            e.flatten_into(&mut out);
        }
        ExceptionList { errors: out }
    }

    pub fn push(&mut self, e: Error) {
        e.flatten_into(&mut self.errors);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Error> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<Error> {
        self.errors
    }
}

impl fmt::Display for ExceptionList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failure(s)", self.errors.len())?;
        for (i, e) in self.errors.iter().enumerate() {
            write!(f, "{}{}", if i == 0 { ": " } else { "; " }, e)?;
        }
        Ok(())
    }
}

impl IntoIterator for ExceptionList {
    type Item = Error;
    type IntoIter = std::vec::IntoIter<Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.into_iter()
    }
}

impl<'a> IntoIterator for &'a ExceptionList {
    type Item = &'a Error;
    type IntoIter = std::slice::Iter<'a, Error>;

    fn into_iter(self) -> Self::IntoIter {
        self.errors.iter()
    }
}
