//! Single-use bridge authorization.
//!
//! A [`Token`] is consumed by [`Token::redeem`], so one transfer can present
//! a given token value to the bridge at most once. Retrying a transfer means
//! requesting a new token.

use std::fmt;
use tracing::{debug, warn};

use crate::error::BridgeCryptError;
use crate::key_manager::KeyMaterial;
use crate::metadata::{Direction, TokenResponse};
use crate::session::Session;

pub struct Token {
    value: String,
    bucket_id: String,
    direction: Direction,
    encryption_key: Option<KeyMaterial>,
    file_id: Option<String>,
    mimetype: Option<String>,
}

impl Token {
    fn from_response(
        bucket_id: &str,
        direction: Direction,
        resp: TokenResponse,
    ) -> Result<Self, BridgeCryptError> {
        if resp.token.is_empty() {
            return Err(BridgeCryptError::token_denied("bridge returned an empty token"));
        }
        if let Some(op) = resp.operation {
            if op != direction {
                return Err(BridgeCryptError::token_denied(format!(
                    "requested a {direction} token, bridge issued {op}"
                )));
            }
        }
        if let Some(bucket) = resp.bucket.as_deref() {
            if bucket != bucket_id {
                return Err(BridgeCryptError::token_denied(format!(
                    "token scoped to bucket {bucket}, not {bucket_id}"
                )));
            }
        }

        Ok(Self {
            value: resp.token,
            bucket_id: bucket_id.to_string(),
            direction,
            encryption_key: resp
                .encryption_key
                .as_deref()
                .and_then(KeyMaterial::from_bridge_key),
            file_id: resp.id,
            mimetype: resp.mimetype,
        })
    }

    pub fn bucket_id(&self) -> &str {
        &self.bucket_id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Key the bridge published for a public bucket; `None` for private buckets
    pub fn encryption_key(&self) -> Option<&KeyMaterial> {
        self.encryption_key.as_ref()
    }

    pub fn file_id(&self) -> Option<&str> {
        self.file_id.as_deref()
    }

    pub fn mimetype(&self) -> Option<&str> {
        self.mimetype.as_deref()
    }

    /// Give up the token value for presentation to the bridge
    pub fn redeem(self) -> String {
        self.value
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("bucket_id", &self.bucket_id)
            .field("direction", &self.direction)
            .field("encryption_key", &self.encryption_key)
            .field("file_id", &self.file_id)
            .field("mimetype", &self.mimetype)
            .finish()
    }
}

/// Requests tokens through a session's bridge
#[derive(Debug, Clone, Copy)]
pub struct TokenManager<'a> {
    session: &'a Session,
}

impl<'a> TokenManager<'a> {
    pub fn new(session: &'a Session) -> Self {
        Self { session }
    }

    /// One bridge round trip, never retried. Refusals surface as `TokenDenied`.
    pub async fn request(
        &self,
        bucket_id: &str,
        direction: Direction,
    ) -> Result<Token, BridgeCryptError> {
        debug!(bucket = bucket_id, %direction, "requesting token");
        let resp = self
            .session
            .call(
                self.session.bridge().create_token(bucket_id, direction),
                BridgeCryptError::token_denied,
            )
            .await
            .map_err(|e| {
                warn!(bucket = bucket_id, %direction, error = %e, "token request failed");
                e
            })?;
        Token::from_response(bucket_id, direction, resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(token: &str, operation: Option<Direction>, key: Option<&str>) -> TokenResponse {
        TokenResponse {
            token: token.into(),
            bucket: Some("b1".into()),
            operation,
            encryption_key: key.map(str::to_string),
            id: Some("file-1".into()),
            mimetype: Some("text/plain".into()),
        }
    }

    #[test]
    fn test_empty_key_means_private() {
        let token =
            Token::from_response("b1", Direction::Pull, response("t", None, Some(""))).unwrap();
        assert!(token.encryption_key().is_none());
        assert_eq!(token.file_id(), Some("file-1"));
        assert_eq!(token.redeem(), "t");
    }

    #[test]
    fn test_public_key_is_carried() {
        let token = Token::from_response(
            "b1",
            Direction::Push,
            response("t", Some(Direction::Push), Some("shared")),
        )
        .unwrap();
        assert_eq!(token.encryption_key().unwrap().as_bytes(), b"shared");
    }

    #[test]
    fn test_wrong_operation_is_denied() {
        let err = Token::from_response("b1", Direction::Pull, response("t", Some(Direction::Push), None))
            .unwrap_err();
        assert!(matches!(err, BridgeCryptError::TokenDenied(_)));
    }

    #[test]
    fn test_empty_token_is_denied() {
        let err = Token::from_response("b1", Direction::Pull, response("", None, None)).unwrap_err();
        assert!(matches!(err, BridgeCryptError::TokenDenied(_)));
    }

    #[test]
    fn test_debug_hides_value() {
        let token = Token::from_response(
            "b1",
            Direction::Pull,
            response("super-secret-token", None, Some("k")),
        )
        .unwrap();
        let dbg = format!("{:?}", token);
        assert!(!dbg.contains("super-secret-token"));
    }
}
