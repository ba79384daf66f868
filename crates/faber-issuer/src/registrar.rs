//! # Resource Registrar
//!
//! Registers the issuer's ledger resources exactly as often as they should
//! be registered:
//!
//! - **Schema**: once per deployment. The `user-schema` record is checked
//!   before registering and written after, so later calls return the stored
//!   schema without contacting the runtime.
//! - **Credential definitions**: once per call, tagged with the durable
//!   `vc-count` counter. The counter is read, used as the tag, and advanced
//!   by one only after the runtime reports the definition finished.
//!
//! Both read-register-write sequences run under an async mutex, so
//! concurrent callers cannot register the schema twice or mint the same
//! tag twice.

use std::sync::Arc;

use faber_agent::{
    AgentRuntime, CredentialDefinitionTemplate, RegistrationOptions, SchemaTemplate,
};
use faber_core::{CredentialDefinitionId, IssuerId, RecordId, SchemaId};
use faber_store::{Lookup, Record, RecordStore};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::IssuerError;

/// Record id of the persisted schema.
pub const SCHEMA_RECORD_ID: &str = "user-schema";

/// Record id of the credential-definition version counter.
pub const VERSION_COUNTER_RECORD_ID: &str = "vc-count";

/// Version every issuer schema is registered with.
pub const SCHEMA_VERSION: &str = "1.0.0";

/// Prefix of generated schema names.
const SCHEMA_NAME_PREFIX: &str = "DIDI";

/// Counter attribute key.
const COUNTER_KEY: &str = "key";

/// The issuer's registered schema, as persisted under `user-schema`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaResource {
    /// Ledger id of the schema.
    pub schema_id: SchemaId,
    /// Generated schema name.
    pub name: String,
    /// Schema version.
    pub version: String,
    /// Attribute names.
    pub attr_names: Vec<String>,
    /// Issuer that registered the schema.
    pub issuer_id: IssuerId,
}

impl SchemaResource {
    fn to_record(&self, id: RecordId) -> Record {
        Record::new(id)
            .with_value("schemaId", self.schema_id.as_str())
            .with_value("name", self.name.as_str())
            .with_value("version", self.version.as_str())
            .with_value("attrNames", self.attr_names.clone())
            .with_value("issuerId", self.issuer_id.as_str())
    }

    fn from_record(record: &Record) -> Result<Self, IssuerError> {
        let malformed = |field| IssuerError::MalformedRecord {
            id: record.id.clone(),
            field,
        };
        let schema_id = record
            .first_str("schemaId")
            .and_then(|s| SchemaId::new(s).ok())
            .ok_or_else(|| malformed("schemaId"))?;
        let issuer_id = record
            .first_str("issuerId")
            .and_then(|s| IssuerId::new(s).ok())
            .ok_or_else(|| malformed("issuerId"))?;
        let attr_names = record
            .first("attrNames")
            .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
            .ok_or_else(|| malformed("attrNames"))?;
        Ok(Self {
            schema_id,
            name: record.first_str("name").unwrap_or_default().to_string(),
            version: record.first_str("version").unwrap_or(SCHEMA_VERSION).to_string(),
            attr_names,
            issuer_id,
        })
    }
}

/// A credential definition minted by [`ResourceRegistrar::register_credential_definition`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialDefinition {
    /// Schema the definition is for.
    pub schema_id: SchemaId,
    /// Issuer that registered it.
    pub issuer_id: IssuerId,
    /// Counter value at registration time.
    pub tag: String,
    /// Ledger id of the definition.
    pub credential_definition_id: CredentialDefinitionId,
}

/// Idempotent schema and versioned credential-definition registration.
pub struct ResourceRegistrar {
    runtime: Arc<dyn AgentRuntime>,
    store: Arc<dyn RecordStore>,
    options: RegistrationOptions,
    schema_lock: Mutex<()>,
    counter_lock: Mutex<()>,
}

impl std::fmt::Debug for ResourceRegistrar {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceRegistrar")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl ResourceRegistrar {
    /// Create a registrar writing through `runtime` and persisting to `store`.
    pub fn new(
        runtime: Arc<dyn AgentRuntime>,
        store: Arc<dyn RecordStore>,
        options: RegistrationOptions,
    ) -> Self {
        Self {
            runtime,
            store,
            options,
            schema_lock: Mutex::new(()),
            counter_lock: Mutex::new(()),
        }
    }

    /// The persisted schema, if registered.
    pub async fn schema(&self) -> Result<Option<SchemaResource>, IssuerError> {
        let id = RecordId::from_static(SCHEMA_RECORD_ID);
        match self.store.get_by_id(&id).await.into_result()? {
            Some(record) => SchemaResource::from_record(&record).map(Some),
            None => Ok(None),
        }
    }

    /// Register the issuer schema unless it is already persisted.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::IssuerIdMissing`] if registration is needed and no
    ///   issuer is set.
    /// - [`IssuerError::RegistrationFailed`] if the runtime does not finish.
    /// - [`IssuerError::Store`] if the schema record cannot be read or written.
    pub async fn ensure_schema(
        &self,
        issuer_id: Option<&IssuerId>,
        attribute_names: &[String],
    ) -> Result<SchemaResource, IssuerError> {
        let _serial = self.schema_lock.lock().await;

        if let Some(existing) = self.schema().await? {
            tracing::debug!(schema_id = %existing.schema_id, "schema already registered");
            return Ok(existing);
        }

        let issuer_id = issuer_id.ok_or(IssuerError::IssuerIdMissing)?;
        let template = SchemaTemplate {
            name: format!("{SCHEMA_NAME_PREFIX}{}", uuid::Uuid::new_v4()),
            version: SCHEMA_VERSION.to_string(),
            attr_names: attribute_names.to_vec(),
            issuer_id: issuer_id.clone(),
        };
        tracing::info!(
            name = %template.name,
            version = %template.version,
            attributes = ?template.attr_names,
            "registering schema"
        );

        let schema_id = self
            .runtime
            .register_schema(&template, &self.options)
            .await?
            .into_finished()
            .map_err(|reason| IssuerError::RegistrationFailed {
                resource: "schema",
                reason,
            })?;

        let resource = SchemaResource {
            schema_id,
            name: template.name,
            version: template.version,
            attr_names: template.attr_names,
            issuer_id: template.issuer_id,
        };
        self.store
            .save(resource.to_record(RecordId::from_static(SCHEMA_RECORD_ID)))
            .await?;
        tracing::info!(schema_id = %resource.schema_id, "schema registered");
        Ok(resource)
    }

    /// Current counter value, if the counter exists.
    pub async fn version_counter(&self) -> Result<Option<u64>, IssuerError> {
        let id = RecordId::from_static(VERSION_COUNTER_RECORD_ID);
        match self.store.get_by_id(&id).await {
            Lookup::Found(record) => record
                .first_u64(COUNTER_KEY)
                .map(Some)
                .ok_or(IssuerError::MalformedRecord {
                    id,
                    field: COUNTER_KEY,
                }),
            Lookup::Absent => Ok(None),
            Lookup::Failed(e) => Err(e.into()),
        }
    }

    /// Create the counter at zero unless it exists. Returns its value.
    pub async fn ensure_version_counter(&self) -> Result<u64, IssuerError> {
        let _serial = self.counter_lock.lock().await;
        self.counter_or_init().await
    }

    async fn counter_or_init(&self) -> Result<u64, IssuerError> {
        if let Some(value) = self.version_counter().await? {
            return Ok(value);
        }
        let counter = Record::new(RecordId::from_static(VERSION_COUNTER_RECORD_ID))
            .with_value(COUNTER_KEY, 0);
        self.store.save(counter).await?;
        tracing::info!("credential definition counter initialized");
        Ok(0)
    }

    /// Register a new credential definition tagged with the current counter
    /// value, then advance the counter.
    ///
    /// The counter only advances when the runtime reports the definition
    /// finished; a failed registration leaves it unchanged so the tag is
    /// retried by the next call.
    ///
    /// # Errors
    ///
    /// - [`IssuerError::IssuerIdMissing`] if no issuer is set.
    /// - [`IssuerError::RegistrationFailed`] if the runtime does not finish.
    /// - [`IssuerError::Store`] if the counter cannot be read or advanced.
    pub async fn register_credential_definition(
        &self,
        schema_id: &SchemaId,
        issuer_id: Option<&IssuerId>,
    ) -> Result<CredentialDefinition, IssuerError> {
        let issuer_id = issuer_id.ok_or(IssuerError::IssuerIdMissing)?;
        let _serial = self.counter_lock.lock().await;

        let count = self.counter_or_init().await?;
        let template = CredentialDefinitionTemplate {
            schema_id: schema_id.clone(),
            issuer_id: issuer_id.clone(),
            tag: count.to_string(),
        };
        tracing::debug!(
            schema_id = %schema_id,
            tag = %template.tag,
            "registering credential definition"
        );

        let credential_definition_id = self
            .runtime
            .register_credential_definition(&template, &self.options)
            .await?
            .into_finished()
            .map_err(|reason| {
                tracing::warn!(
                    tag = %template.tag,
                    %reason,
                    "credential definition registration failed"
                );
                IssuerError::RegistrationFailed {
                    resource: "credential definition",
                    reason,
                }
            })?;

        let advanced = Record::new(RecordId::from_static(VERSION_COUNTER_RECORD_ID))
            .with_value(COUNTER_KEY, count + 1);
        self.store.update(advanced).await?;
        tracing::info!(
            credential_definition_id = %credential_definition_id,
            tag = %template.tag,
            "credential definition registered"
        );

        Ok(CredentialDefinition {
            schema_id: template.schema_id,
            issuer_id: template.issuer_id,
            tag: template.tag,
            credential_definition_id,
        })
    }
}
