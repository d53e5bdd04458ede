//! Optional extension trait, analogous to `rusqlite::OptionalExtension`.

use entsync_error::{Result, SyncError};

/// Convert a `NotFound` error into `Ok(None)`.
///
/// # Examples
///
/// ```ignore
/// use entsync_core::store::OptionalExt;
///
/// let maybe_row = store.read_normalized_entity(42).optional()?;
/// assert!(maybe_row.is_none());
/// ```
pub trait OptionalExt<T> {
    /// If the result is `Err(NotFound)`, convert to `Ok(None)`.
    /// All other errors pass through unchanged.
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for Result<T> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(SyncError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_becomes_some() {
        let result: Result<i32> = Ok(42);
        assert_eq!(result.optional().unwrap(), Some(42));
    }

    #[test]
    fn not_found_becomes_none() {
        let result: Result<i32> = Err(SyncError::NotFound { id: 7 });
        assert_eq!(result.optional().unwrap(), None);
    }

    #[test]
    fn other_error_passes_through() {
        let result: Result<i32> = Err(SyncError::unavailable("database is locked"));
        let err = result.optional().unwrap_err();
        assert!(matches!(err, SyncError::StoreUnavailable { .. }));
    }
}
