//! # Identifier Newtypes
//!
//! Newtype wrappers for every identifier the issuer handles. These prevent
//! accidental identifier confusion: a `ConnectionId` cannot be passed where
//! an `OutOfBandId` is expected, and a schema id cannot be used as a
//! credential-definition id.
//!
//! All identifiers are opaque strings minted either by the agent runtime
//! (connection, out-of-band, schema and credential-definition ids) or by the
//! issuer itself (record ids). Construction rejects empty strings.

use serde::{Deserialize, Serialize};

use crate::error::IdentifierError;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create an identifier, rejecting empty or whitespace-only input.
            pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
                let value = value.into();
                if value.trim().is_empty() {
                    return Err(IdentifierError::Empty { kind: $kind });
                }
                Ok(Self(value))
            }

            /// Wrap a compile-time constant. The constant must be non-empty.
            pub fn from_static(value: &'static str) -> Self {
                debug_assert!(!value.trim().is_empty(), "empty {}", $kind);
                Self(value.to_owned())
            }

            /// Borrow the identifier as a string slice.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume the identifier, returning the inner string.
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_id!(
    /// Identifier of a persisted record in the record store.
    RecordId,
    "record id"
);

string_id!(
    /// Ledger identifier of a registered schema.
    SchemaId,
    "schema id"
);

string_id!(
    /// Ledger identifier of a registered credential definition.
    CredentialDefinitionId,
    "credential definition id"
);

string_id!(
    /// Identifier of a peer connection, assigned once an invitation is matched.
    ConnectionId,
    "connection id"
);

string_id!(
    /// Identifier of an out-of-band invitation.
    ///
    /// The issuer holds one of these as the "active" invitation; the
    /// connection it eventually produces is looked up by this id.
    OutOfBandId,
    "out-of-band id"
);

string_id!(
    /// Identifier of a credential exchange started by an offer.
    CredentialExchangeId,
    "credential exchange id"
);

string_id!(
    /// Identifier of a proof exchange started by a proof request.
    ProofExchangeId,
    "proof exchange id"
);

/// The issuer's decentralized identifier (`did:<method>:<method-specific-id>`).
///
/// Used as the `issuerId` of every schema and credential definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IssuerId(String);

impl IssuerId {
    /// Parse a DID. Must have the `did:` scheme and a non-empty method.
    pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(IdentifierError::Empty { kind: "issuer id" });
        }
        let mut parts = value.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(rest)) if !method.is_empty() && !rest.is_empty() => {
                Ok(Self(value))
            }
            _ => Err(IdentifierError::NotADid(value)),
        }
    }

    /// The DID method, e.g. `indy` for `did:indy:abc`.
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Borrow the DID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for IssuerId {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<IssuerId> for String {
    fn from(id: IssuerId) -> Self {
        id.0
    }
}

impl std::fmt::Display for IssuerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
