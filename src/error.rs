// Error taxonomy for store operations

use thiserror::Error;

/// Errors returned by [`crate::Store`] operations.
#[derive(Error, Debug)]
pub enum Error {
    /// A guard, duplicate check or conflict check refused the operation.
    /// Nothing was mutated.
    #[error("refused: {0}")]
    Refused(#[from] Refusal),

    /// Incoming data failed structural validation.
    #[error("invalid data: {0}")]
    Invalid(#[from] ValidationError),

    /// The storage backend failed to read or write.
    #[error("storage error: {0:#}")]
    Storage(#[from] eyre::Report),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Why a mutation was refused.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// The record is still referenced by dependent data.
    #[error("{collection} record {id} is in use: {reason}")]
    InUse {
        collection: String,
        id: String,
        reason: String,
    },

    /// A record with the same normalized key already exists.
    #[error("duplicate {collection} entry '{key}' (existing id {existing_id})")]
    Duplicate {
        collection: String,
        key: String,
        existing_id: String,
    },

    /// The candidate clashes with an existing record (e.g. overlapping schedule).
    #[error("{collection} conflicts with {existing_id}: {reason}")]
    Conflict {
        collection: String,
        existing_id: String,
        reason: String,
    },

    /// The record exists but is not in a state that allows the operation.
    #[error("{collection} record {id} unavailable: {reason}")]
    Unavailable {
        collection: String,
        id: String,
        reason: String,
    },
}

/// Structural validation failures at the load and import boundaries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("not valid JSON: {0}")]
    NotJson(String),

    #[error("top-level value must be an object")]
    NotAnObject,

    #[error("missing collection '{0}'")]
    MissingCollection(String),

    #[error("collection '{0}' must be an array")]
    NotACollection(String),

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("missing anchor record: {0}")]
    MissingAnchor(String),

    #[error("patch for {collection}/{id} rejected: {reason}")]
    BadPatch {
        collection: String,
        id: String,
        reason: String,
    },

    #[error("invalid period '{0}' (expected YYYY-MM)")]
    BadPeriod(String),

    #[error("{0} is required")]
    Required(String),

    #[error("{field} must be {expected}")]
    OutOfRange { field: String, expected: String },
}

impl Error {
    /// The refusal reason, if this error is a refusal.
    pub fn refusal(&self) -> Option<&Refusal> {
        match self {
            Error::Refused(r) => Some(r),
            _ => None,
        }
    }

    /// True when the operation was refused rather than failed.
    pub fn is_refusal(&self) -> bool {
        matches!(self, Error::Refused(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refusal_display() {
        let r = Refusal::Duplicate {
            collection: "members".to_string(),
            key: "ada lovelace".to_string(),
            existing_id: "m1".to_string(),
        };
        assert_eq!(r.to_string(), "duplicate members entry 'ada lovelace' (existing id m1)");
    }

    #[test]
    fn test_error_from_refusal() {
        let err: Error = Refusal::InUse {
            collection: "books".to_string(),
            id: "b1".to_string(),
            reason: "borrowed".to_string(),
        }
        .into();
        assert!(err.is_refusal());
        assert!(matches!(err.refusal(), Some(Refusal::InUse { .. })));
    }

    #[test]
    fn test_validation_is_not_refusal() {
        let err: Error = ValidationError::MissingCollection("books".to_string()).into();
        assert!(!err.is_refusal());
        assert_eq!(err.to_string(), "invalid data: missing collection 'books'");
    }
}
