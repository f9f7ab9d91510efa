//! Error taxonomy for reconciliation operations.
//!
//! "Missing" is a first-class expected outcome for check-style operations,
//! not an exceptional one; callers branch on [`ReconcileError::NotFound`]
//! explicitly rather than catching a generic failure.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconcileError {
    /// The managed entity does not exist.
    #[error("{name}: does not exist")]
    NotFound { name: String },

    /// The desired state already holds; surfaces as a skip, never a failure.
    #[error("{reason}")]
    AlreadySatisfied { reason: String },

    /// The desired property name is not recognized. Recoverable, isolated
    /// to that key.
    #[error("{key}: Invalid key!")]
    InvalidKey { key: String },

    /// The desired value cannot be coerced to the property's type.
    #[error("{key}: invalid value ({detail})")]
    InvalidValue { key: String, detail: String },

    /// The mutation raced or collided with existing state, e.g. a device
    /// already attached with matching options.
    #[error("{reason}")]
    Conflict { reason: String },

    /// The underlying command or admin call failed for a reason outside
    /// this crate's control. The message is surfaced verbatim.
    #[error("{message}")]
    External { message: String },
}

impl ReconcileError {
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    pub fn invalid_key(key: impl Into<String>) -> Self {
        Self::InvalidKey { key: key.into() }
    }

    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    pub fn external(message: impl Into<String>) -> Self {
        Self::External {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_key_display() {
        let err = ReconcileError::invalid_key("maxmen");
        assert_eq!(err.to_string(), "maxmen: Invalid key!");
    }

    #[test]
    fn test_external_surfaces_message_verbatim() {
        let err = ReconcileError::external("qrexec daemon not running");
        assert_eq!(err.to_string(), "qrexec daemon not running");
    }
}
