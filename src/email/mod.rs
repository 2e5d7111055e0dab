pub mod credentials;
pub mod gmail;
pub mod provider;
pub mod transform;

pub use credentials::{Credential, CredentialError, CredentialProvider, DbCredentialProvider, StaticCredentialProvider};
pub use gmail::GmailImapClient;
pub use provider::{RawMessage, UpstreamClient, UpstreamError, UpstreamPage};
