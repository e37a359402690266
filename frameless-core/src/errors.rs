use crate::Error;
use std::fmt::{self, Display};

/// Sentinel error kinds exported by the runtime.
///
/// They travel inside [`anyhow::Error`] (possibly wrapped in several layers of context or
/// merged through [`Errors`]); use [`ErrorExt::is_kind`] to compare.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    #[error("entity already exists")]
    AlreadyExists,
    #[error("entity not found")]
    NotFound,
    #[error("the context does not hold the lock")]
    NoLock,
    #[error("the transaction has already been committed or rolled back")]
    TxDone,
    #[error("the context does not carry a transaction")]
    NoContext,
    #[error("no rows in result set")]
    NoRows,
    #[error("the entity has no identifier")]
    MissingId,
    #[error("context canceled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded,
    #[error("a migration step was applied after a missing earlier step")]
    MigrationGap,
    #[error("a migration step is dirty and needs manual recovery")]
    MigrationDirty,
    #[error("invalid argument")]
    Validation,
}

impl ErrorKind {
    pub fn is_context_error(&self) -> bool {
        matches!(self, ErrorKind::Cancelled | ErrorKind::DeadlineExceeded)
    }
}

/// Classification of native driver errors, produced by [`crate::Driver::classify_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverErrorKind {
    UniqueViolation,
    LockNotAvailable,
    BadConnection,
}

/// Several errors merged into one. Every constituent stays reachable through
/// [`ErrorExt::is_kind`] and [`Errors::iter`].
#[derive(Debug)]
pub struct Errors(Vec<Error>);

impl Errors {
    pub fn iter(&self) -> impl Iterator<Item = &Error> {
        self.0.iter()
    }
    pub fn len(&self) -> usize {
        self.0.len()
    }
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Display for Errors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for error in &self.0 {
            if !first {
                f.write_str("\n")?;
            }
            first = false;
            write!(f, "{:#}", error)?;
        }
        Ok(())
    }
}

impl std::error::Error for Errors {}

/// Merge the errors that are present. `None` when there is no error at all, the error itself
/// when there is only one, an [`Errors`] otherwise (nested merges are flattened).
pub fn merge_errors(errors: impl IntoIterator<Item = Option<Error>>) -> Option<Error> {
    let mut result = Vec::new();
    for error in errors.into_iter().flatten() {
        match error.downcast::<Errors>() {
            Ok(Errors(nested)) => result.extend(nested),
            Err(error) => result.push(error),
        }
    }
    match result.len() {
        0 => None,
        1 => result.pop(),
        _ => Some(Error::new(Errors(result))),
    }
}

/// Merge two results keeping both causes when both failed. The value of `first` wins.
pub fn merge_results<T>(first: crate::Result<T>, second: crate::Result<()>) -> crate::Result<T> {
    match (first, second) {
        (Ok(v), Ok(())) => Ok(v),
        (Ok(_), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        (Err(a), Err(b)) => Err(merge_error(a, Some(b))),
    }
}

/// `first`, merged with `second` when present.
pub fn merge_error(first: Error, second: Option<Error>) -> Error {
    match second {
        Some(second) => {
            let mut result = Vec::new();
            for error in [first, second] {
                match error.downcast::<Errors>() {
                    Ok(Errors(nested)) => result.extend(nested),
                    Err(error) => result.push(error),
                }
            }
            Error::new(Errors(result))
        }
        None => first,
    }
}

pub trait ErrorExt {
    /// First sentinel kind found in the chain, descending into merged errors.
    fn kind(&self) -> Option<ErrorKind>;
    /// Whether `kind` appears anywhere in the chain or in any merged constituent.
    fn is_kind(&self, kind: ErrorKind) -> bool;
}

impl ErrorExt for Error {
    fn kind(&self) -> Option<ErrorKind> {
        if let Some(kind) = self.downcast_ref::<ErrorKind>() {
            return Some(*kind);
        }
        for cause in self.chain() {
            if let Some(kind) = cause.downcast_ref::<ErrorKind>() {
                return Some(*kind);
            }
            if let Some(errors) = cause.downcast_ref::<Errors>() {
                if let Some(kind) = errors.iter().find_map(|e| e.kind()) {
                    return Some(kind);
                }
            }
        }
        None
    }

    fn is_kind(&self, kind: ErrorKind) -> bool {
        if self.downcast_ref::<ErrorKind>() == Some(&kind) {
            return true;
        }
        self.chain().any(|cause| {
            cause.downcast_ref::<ErrorKind>() == Some(&kind)
                || cause
                    .downcast_ref::<Errors>()
                    .is_some_and(|errors| errors.iter().any(|e| e.is_kind(kind)))
        })
    }
}

impl<T> ErrorExt for crate::Result<T> {
    fn kind(&self) -> Option<ErrorKind> {
        self.as_ref().err().and_then(ErrorExt::kind)
    }
    fn is_kind(&self, kind: ErrorKind) -> bool {
        self.as_ref().err().is_some_and(|e| e.is_kind(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn kind_survives_context() {
        let error = Error::new(ErrorKind::NotFound).context("While deleting `users` 42");
        assert!(error.is_kind(ErrorKind::NotFound));
        assert_eq!(error.kind(), Some(ErrorKind::NotFound));
        assert!(!error.is_kind(ErrorKind::AlreadyExists));
    }

    #[test]
    fn merged_errors_keep_every_cause() {
        let lock = Error::new(ErrorKind::Cancelled);
        let unlock = Error::new(ErrorKind::NoLock).context("While unlocking");
        let merged = merge_errors([Some(lock), None, Some(unlock)]).expect("Expected an error");
        assert!(merged.is_kind(ErrorKind::Cancelled));
        assert!(merged.is_kind(ErrorKind::NoLock));
        let errors = merged.downcast_ref::<Errors>().expect("Expected merged errors");
        assert_eq!(errors.len(), 2);
    }

    #[test]
    fn merge_flattens_and_unwraps_single() {
        assert!(merge_errors([None, None]).is_none());
        let single = merge_errors([None, Some(Error::new(ErrorKind::TxDone))]).unwrap();
        assert!(single.downcast_ref::<Errors>().is_none());
        let a = merge_errors([
            Some(Error::new(ErrorKind::TxDone)),
            Some(Error::new(ErrorKind::NotFound)),
        ]);
        let b = merge_errors([a, Some(Error::new(ErrorKind::NoRows))]).unwrap();
        assert_eq!(b.downcast_ref::<Errors>().unwrap().len(), 3);
    }

    #[test]
    fn merge_results_first_error_wins_but_keeps_second() {
        let result: crate::Result<()> = merge_results(
            Err(Error::new(ErrorKind::NotFound)),
            Err(Error::new(ErrorKind::TxDone)),
        );
        assert!(result.is_kind(ErrorKind::NotFound));
        assert!(result.is_kind(ErrorKind::TxDone));
        let result = merge_results(Ok(5), Ok(()));
        assert_eq!(result.unwrap(), 5);
        let result = merge_results(Err::<(), _>(Error::msg("boom")), Ok(()))
            .context("outer");
        assert!(result.is_err());
    }
}
