//! # Error Types
//!
//! Errors raised while constructing foundational types. Domain crates
//! define their own error enums and wrap these where needed.

use thiserror::Error;

/// Error constructing an identifier newtype.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    /// Identifiers must contain at least one non-whitespace character.
    #[error("{kind} must not be empty")]
    Empty {
        /// Name of the identifier type being constructed.
        kind: &'static str,
    },

    /// A DID did not start with the `did:` scheme.
    #[error("issuer id must be a DID (did:<method>:<id>), got {0:?}")]
    NotADid(String),
}
