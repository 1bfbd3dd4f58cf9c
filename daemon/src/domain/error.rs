//! Error taxonomy shared by every mirroring run.
//!
//! Runs fail with exactly one [`MirrorError`]. The variant says which part of
//! the pipeline gave up, and [`MirrorError::kind`] collapses the two trust
//! failures so the scheduler can log and count errors by category.

use std::fmt;

use thiserror::Error;

use super::ports::{
    DatabaseHandlerError, NrtmStreamError, PublicationError, RetrievalError, RpslParseError,
};

/// Coarse category of a [`MirrorError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorErrorKind {
    /// Fetching remote data failed.
    Transport,
    /// Downloaded data did not match its advertised hash or recorded history.
    Integrity,
    /// The remote violated the protocol.
    Protocol,
    /// Signature verification or key trust failed.
    Trust,
    /// The local database or filesystem failed.
    Storage,
}

impl MirrorErrorKind {
    /// Stable lowercase label for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Integrity => "integrity",
            Self::Protocol => "protocol",
            Self::Trust => "trust",
            Self::Storage => "storage",
        }
    }
}

impl fmt::Display for MirrorErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single import or export run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MirrorError {
    /// A remote file or stream could not be retrieved.
    #[error("transport error: {message}")]
    Transport {
        /// Diagnostic text.
        message: String,
    },
    /// A hash mismatch or an attempt to rewrite published history.
    #[error("integrity error: {message}")]
    Integrity {
        /// Diagnostic text.
        message: String,
    },
    /// Malformed or out-of-order protocol data.
    #[error("protocol error: {message}")]
    Protocol {
        /// Diagnostic text.
        message: String,
    },
    /// The payload verified only under a key that is no longer trusted.
    #[error("untrusted signing key: {message}")]
    UntrustedSigningKey {
        /// Diagnostic text, including the operator remedy.
        message: String,
    },
    /// No trusted key verifies the signature.
    #[error("signature verification failed: {message}")]
    SignatureInvalid {
        /// Diagnostic text.
        message: String,
    },
    /// The database or local filesystem failed.
    #[error("storage error: {message}")]
    Storage {
        /// Diagnostic text.
        message: String,
    },
}

impl MirrorError {
    /// Build a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Build an integrity error.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Build a protocol error.
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Build an untrusted-key error.
    pub fn untrusted_signing_key(message: impl Into<String>) -> Self {
        Self::UntrustedSigningKey {
            message: message.into(),
        }
    }

    /// Build a signature error.
    pub fn signature_invalid(message: impl Into<String>) -> Self {
        Self::SignatureInvalid {
            message: message.into(),
        }
    }

    /// Build a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Category of this error.
    #[must_use]
    pub const fn kind(&self) -> MirrorErrorKind {
        match self {
            Self::Transport { .. } => MirrorErrorKind::Transport,
            Self::Integrity { .. } => MirrorErrorKind::Integrity,
            Self::Protocol { .. } => MirrorErrorKind::Protocol,
            Self::UntrustedSigningKey { .. } | Self::SignatureInvalid { .. } => {
                MirrorErrorKind::Trust
            }
            Self::Storage { .. } => MirrorErrorKind::Storage,
        }
    }

    /// Whether the next scheduled run may succeed without operator action.
    ///
    /// Integrity, protocol and trust failures repeat until the remote or the
    /// local configuration changes.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            MirrorErrorKind::Transport | MirrorErrorKind::Storage
        )
    }
}

impl From<DatabaseHandlerError> for MirrorError {
    fn from(err: DatabaseHandlerError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<PublicationError> for MirrorError {
    fn from(err: PublicationError) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<RetrievalError> for MirrorError {
    fn from(err: RetrievalError) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<NrtmStreamError> for MirrorError {
    fn from(err: NrtmStreamError) -> Self {
        Self::transport(err.to_string())
    }
}

impl From<RpslParseError> for MirrorError {
    fn from(err: RpslParseError) -> Self {
        Self::protocol(err.to_string())
    }
}
