use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, EntityTrait};
use uuid::Uuid;

use crate::db::entities::principal;

/// IMAP login for one principal's mailbox.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub principal: Uuid,
    pub address: String,
    pub secret: String,
    pub imap_host: String,
    pub imap_port: u16,
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("address", &self.address)
            .field("secret", &"<redacted>")
            .field("imap_host", &self.imap_host)
            .field("imap_port", &self.imap_port)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    #[error("no valid credential for principal {0}")]
    Unauthenticated(Uuid),
    #[error("credential store error: {0}")]
    Store(String),
}

/// Resolves the credential a search runs with.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_credential(&self, principal: Uuid) -> Result<Credential, CredentialError>;
}

/// Credentials read from the `principals` table.
pub struct DbCredentialProvider {
    db: DatabaseConnection,
}

impl DbCredentialProvider {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl CredentialProvider for DbCredentialProvider {
    async fn get_credential(&self, principal: Uuid) -> Result<Credential, CredentialError> {
        let record = principal::Entity::find_by_id(principal)
            .one(&self.db)
            .await
            .map_err(|e| CredentialError::Store(e.to_string()))?
            .filter(|p| p.active)
            .ok_or(CredentialError::Unauthenticated(principal))?;

        let imap_port = u16::try_from(record.imap_port).map_err(|_| {
            CredentialError::Store(format!(
                "principal {} has invalid IMAP port {}",
                principal, record.imap_port
            ))
        })?;

        Ok(Credential {
            principal,
            address: record.email,
            secret: record.app_password,
            imap_host: record.imap_host,
            imap_port,
        })
    }
}

/// Fixed set of credentials, for embedding and tests.
#[derive(Debug, Default)]
pub struct StaticCredentialProvider {
    credentials: HashMap<Uuid, Credential>,
}

impl StaticCredentialProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, credential: Credential) -> Self {
        self.credentials.insert(credential.principal, credential);
        self
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn get_credential(&self, principal: Uuid) -> Result<Credential, CredentialError> {
        self.credentials
            .get(&principal)
            .cloned()
            .ok_or(CredentialError::Unauthenticated(principal))
    }
}
