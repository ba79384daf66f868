//! Issuer configuration.
//!
//! Carries the issuer identity, the public domain invitation links are
//! built on, the endorser used for ledger writes, and the two connection
//! deadlines. Load from the environment with [`IssuerConfig::from_env`] or
//! build directly with [`IssuerConfig::new`].

use std::time::Duration;

use faber_agent::{EndorserMode, RegistrationOptions};
use faber_core::{IdentifierError, IssuerId};
use url::Url;

/// Default deadline for an invitation to be matched to a connection.
pub const DEFAULT_CONNECTION_MATCH_TIMEOUT: Duration = Duration::from_secs(200);

/// Default deadline for a matched connection to finish its handshake.
pub const DEFAULT_CONNECTION_CONFIRM_TIMEOUT: Duration = Duration::from_secs(2000);

/// Attributes of the issuer's schema unless configured otherwise.
pub const DEFAULT_SCHEMA_ATTRIBUTES: &[&str] = &["name", "email"];

/// Configuration for an [`IssuanceOrchestrator`](crate::IssuanceOrchestrator).
#[derive(Debug, Clone)]
pub struct IssuerConfig {
    /// Issuer DID. When unset, the first `indy` DID the runtime holds is used.
    pub issuer_id: Option<IssuerId>,
    /// Public URL invitation links are built on.
    pub invitation_domain: Url,
    /// Endorser for schema and credential-definition writes.
    pub endorser_did: Option<String>,
    /// How long to wait for an invitation to be matched.
    pub connection_match_timeout: Duration,
    /// How long to wait for a matched connection to complete.
    pub connection_confirm_timeout: Duration,
    /// Attribute names of the issuer's schema.
    pub schema_attributes: Vec<String>,
}

impl IssuerConfig {
    /// Configuration with defaults for everything but the invitation domain.
    pub fn new(invitation_domain: Url) -> Self {
        Self {
            issuer_id: None,
            invitation_domain,
            endorser_did: None,
            connection_match_timeout: DEFAULT_CONNECTION_MATCH_TIMEOUT,
            connection_confirm_timeout: DEFAULT_CONNECTION_CONFIRM_TIMEOUT,
            schema_attributes: DEFAULT_SCHEMA_ATTRIBUTES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    /// Load configuration from environment variables.
    ///
    /// Variables:
    /// - `FABER_INVITATION_DOMAIN` (required)
    /// - `FABER_ISSUER_DID` (optional)
    /// - `FABER_ENDORSER_DID` (optional)
    /// - `FABER_CONNECTION_MATCH_TIMEOUT_SECS` (default: 200)
    /// - `FABER_CONNECTION_CONFIRM_TIMEOUT_SECS` (default: 2000)
    /// - `FABER_SCHEMA_ATTRIBUTES` (comma-separated, default: `name,email`)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let domain = lookup("FABER_INVITATION_DOMAIN")
            .ok_or(ConfigError::MissingVar("FABER_INVITATION_DOMAIN"))?;
        let invitation_domain = Url::parse(&domain)
            .map_err(|e| ConfigError::InvalidUrl("FABER_INVITATION_DOMAIN".into(), e.to_string()))?;

        let mut config = Self::new(invitation_domain);
        config.issuer_id = lookup("FABER_ISSUER_DID")
            .filter(|s| !s.trim().is_empty())
            .map(IssuerId::new)
            .transpose()?;
        config.endorser_did = lookup("FABER_ENDORSER_DID").filter(|s| !s.trim().is_empty());
        if let Some(secs) = secs_var(&lookup, "FABER_CONNECTION_MATCH_TIMEOUT_SECS")? {
            config.connection_match_timeout = secs;
        }
        if let Some(secs) = secs_var(&lookup, "FABER_CONNECTION_CONFIRM_TIMEOUT_SECS")? {
            config.connection_confirm_timeout = secs;
        }
        if let Some(raw) = lookup("FABER_SCHEMA_ATTRIBUTES") {
            let attributes: Vec<String> = raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
            if attributes.is_empty() {
                return Err(ConfigError::EmptySchemaAttributes);
            }
            config.schema_attributes = attributes;
        }
        Ok(config)
    }

    /// Ledger-write options derived from the endorser setting.
    pub fn registration_options(&self) -> RegistrationOptions {
        RegistrationOptions {
            endorser_mode: EndorserMode::Internal,
            endorser_did: self.endorser_did.clone(),
        }
    }
}

fn secs_var(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &str,
) -> Result<Option<Duration>, ConfigError> {
    lookup(var)
        .map(|raw| {
            raw.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|e| ConfigError::InvalidNumber(var.to_string(), e.to_string()))
        })
        .transpose()
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required variable is unset.
    #[error("{0} environment variable is required")]
    MissingVar(&'static str),
    /// A URL variable did not parse (variable, parser message).
    #[error("invalid URL for {0}: {1}")]
    InvalidUrl(String, String),
    /// A numeric variable did not parse (variable, parser message).
    #[error("invalid number for {0}: {1}")]
    InvalidNumber(String, String),
    /// `FABER_ISSUER_DID` is not a DID.
    #[error("invalid issuer DID: {0}")]
    InvalidIssuer(#[from] IdentifierError),
    /// `FABER_SCHEMA_ATTRIBUTES` was set but listed no attribute.
    #[error("FABER_SCHEMA_ATTRIBUTES must name at least one attribute")]
    EmptySchemaAttributes,
}
