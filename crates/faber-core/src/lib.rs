//! # faber-core — Foundational Types for the Faber Issuer
//!
//! Every other crate in the workspace depends on `faber-core`; it depends on
//! nothing internal.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `IssuerId`, `SchemaId`,
//!    `CredentialDefinitionId`, `ConnectionId`, `OutOfBandId`, `RecordId`.
//!    You cannot pass a connection id where an out-of-band id is expected.
//!
//! 2. **UTC-only timestamps.** `Timestamp` is UTC, seconds precision.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `faber-*` crates (this is the leaf of the DAG).
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

pub use error::IdentifierError;
pub use identity::{
    ConnectionId, CredentialDefinitionId, CredentialExchangeId, IssuerId, OutOfBandId,
    ProofExchangeId, RecordId, SchemaId,
};
pub use temporal::Timestamp;
