use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::filter::ValidationError;

const TOKEN_VERSION: u32 = 1;
/// Hex characters of the query digest carried in a token.
const DIGEST_PREFIX_LEN: usize = 16;

/// Continuation token handed to callers: the upstream cursor plus the query
/// it belongs to, base64url-encoded JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageToken {
    /// Schema version for forward compatibility
    pub v: u32,
    /// Prefix of the query digest this cursor was issued for
    pub q: String,
    /// Upstream cursor
    pub c: String,
}

impl PageToken {
    pub fn new(query_digest: &str, upstream_cursor: impl Into<String>) -> Self {
        Self {
            v: TOKEN_VERSION,
            q: digest_prefix(query_digest).to_string(),
            c: upstream_cursor.into(),
        }
    }

    pub fn encode(&self) -> String {
        // Serializing three plain fields cannot fail.
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, ValidationError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| ValidationError::InvalidPageToken("not base64url".to_string()))?;
        let decoded: Self = serde_json::from_slice(&bytes)
            .map_err(|_| ValidationError::InvalidPageToken("malformed payload".to_string()))?;
        if decoded.v != TOKEN_VERSION {
            return Err(ValidationError::InvalidPageToken(format!(
                "unsupported version {}",
                decoded.v
            )));
        }
        Ok(decoded)
    }

    /// Decode and check the token was issued for this query.
    pub fn decode_for(token: &str, query_digest: &str) -> Result<Self, ValidationError> {
        let decoded = Self::decode(token)?;
        if decoded.q != digest_prefix(query_digest) {
            return Err(ValidationError::InvalidPageToken(
                "token belongs to a different search".to_string(),
            ));
        }
        Ok(decoded)
    }
}

fn digest_prefix(digest: &str) -> &str {
    digest.get(..DIGEST_PREFIX_LEN).unwrap_or(digest)
}
