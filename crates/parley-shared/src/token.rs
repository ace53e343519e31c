use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::constants::PUBKEY_SIZE;
use crate::error::AuthError;
use crate::types::UserId;

// Token signed by the credential issuer, presented on the WebSocket handshake
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionToken {
    pub user_id: UserId,
    pub valid_until: DateTime<Utc>,
    pub signature: Vec<u8>,
}

impl SessionToken {
    /// Encode as URL-safe base64 of the JSON form, suitable for a query
    /// parameter.
    pub fn encode(&self) -> Result<String, AuthError> {
        let json = serde_json::to_vec(self).map_err(|e| AuthError::Malformed(e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(raw: &str) -> Result<Self, AuthError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthError::MissingToken);
        }
        let json = URL_SAFE_NO_PAD
            .decode(raw)
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        serde_json::from_slice(&json).map_err(|e| AuthError::Malformed(e.to_string()))
    }

    fn signed_payload(user_id: &UserId, valid_until: &DateTime<Utc>) -> Vec<u8> {
        // payload = user_id bytes || valid_until (rfc3339)
        let mut payload = Vec::new();
        payload.extend_from_slice(user_id.0.as_bytes());
        payload.extend_from_slice(valid_until.to_rfc3339().as_bytes());
        payload
    }
}

/// Verify a token against the issuer key and return the identity it binds.
pub fn verify_session_token(
    token: &SessionToken,
    issuer_pubkey: &[u8; PUBKEY_SIZE],
) -> Result<UserId, AuthError> {
    if Utc::now() > token.valid_until {
        return Err(AuthError::Expired);
    }

    let verifying_key =
        VerifyingKey::from_bytes(issuer_pubkey).map_err(|_| AuthError::InvalidIssuerKey)?;

    let signature =
        Signature::from_slice(&token.signature).map_err(|_| AuthError::BadSignature)?;

    let payload = SessionToken::signed_payload(&token.user_id, &token.valid_until);
    verifying_key
        .verify(&payload, &signature)
        .map_err(|_| AuthError::BadSignature)?;

    Ok(token.user_id)
}

pub fn create_session_token(
    user_id: UserId,
    valid_until: DateTime<Utc>,
    issuer_signing_key: &ed25519_dalek::SigningKey,
) -> SessionToken {
    use ed25519_dalek::Signer;

    let payload = SessionToken::signed_payload(&user_id, &valid_until);
    let signature = issuer_signing_key.sign(&payload);

    SessionToken {
        user_id,
        valid_until,
        signature: signature.to_bytes().to_vec(),
    }
}

/// Parse a 64-character hex string into an Ed25519 public key.
pub fn parse_issuer_key(hex_key: &str) -> Result<[u8; PUBKEY_SIZE], AuthError> {
    let bytes = hex::decode(hex_key.trim()).map_err(|_| AuthError::InvalidIssuerKey)?;
    bytes.try_into().map_err(|_| AuthError::InvalidIssuerKey)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use rand::rngs::OsRng;

    #[test]
    fn test_session_token_valid() {
        let issuer = SigningKey::generate(&mut OsRng);
        let issuer_pubkey = issuer.verifying_key().to_bytes();
        let user = UserId::new();

        let token = create_session_token(user, Utc::now() + Duration::days(1), &issuer);
        let raw = token.encode().unwrap();
        let decoded = SessionToken::decode(&raw).unwrap();

        assert_eq!(verify_session_token(&decoded, &issuer_pubkey), Ok(user));
    }

    #[test]
    fn test_session_token_expired() {
        let issuer = SigningKey::generate(&mut OsRng);
        let issuer_pubkey = issuer.verifying_key().to_bytes();

        let token = create_session_token(UserId::new(), Utc::now() - Duration::hours(1), &issuer);

        assert_eq!(
            verify_session_token(&token, &issuer_pubkey),
            Err(AuthError::Expired)
        );
    }

    #[test]
    fn test_session_token_wrong_issuer() {
        let issuer = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);

        let token = create_session_token(UserId::new(), Utc::now() + Duration::days(1), &issuer);

        assert_eq!(
            verify_session_token(&token, &other.verifying_key().to_bytes()),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_session_token_tampered_user() {
        let issuer = SigningKey::generate(&mut OsRng);
        let issuer_pubkey = issuer.verifying_key().to_bytes();

        let mut token =
            create_session_token(UserId::new(), Utc::now() + Duration::days(1), &issuer);
        token.user_id = UserId::new();

        assert_eq!(
            verify_session_token(&token, &issuer_pubkey),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn test_decode_garbage() {
        assert_eq!(SessionToken::decode("  "), Err(AuthError::MissingToken));
        assert!(matches!(
            SessionToken::decode("%%%"),
            Err(AuthError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_issuer_key() {
        assert_eq!(parse_issuer_key(&"ab".repeat(32)), Ok([0xab; 32]));
        assert_eq!(parse_issuer_key("abcd"), Err(AuthError::InvalidIssuerKey));
    }
}
