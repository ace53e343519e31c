//! Session token verification and caching.
//!
//! Connections present a `SessionToken` signed by the credential issuer.
//! Successful verifications are cached by raw token until the token
//! expires, so reconnecting tabs skip the signature check.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use tokio::sync::RwLock;
use tracing::debug;

use parley_shared::constants::PUBKEY_SIZE;
use parley_shared::error::AuthError;
use parley_shared::token::{verify_session_token, SessionToken};
use parley_shared::types::UserId;

/// Maps a credential presented at connect time to an identity.
pub trait IdentityResolver: Send + Sync {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<UserId, AuthError>>;
}

#[derive(Debug, Clone)]
struct CachedIdentity {
    user_id: UserId,
    valid_until: DateTime<Utc>,
}

impl CachedIdentity {
    fn is_fresh(&self) -> bool {
        Utc::now() < self.valid_until
    }
}

/// Verifies issuer-signed session tokens.
#[derive(Clone)]
pub struct TokenResolver {
    issuer_pubkey: [u8; PUBKEY_SIZE],
    /// Cache: raw token -> verified identity.
    cache: Arc<RwLock<HashMap<String, CachedIdentity>>>,
}

impl TokenResolver {
    pub fn new(issuer_pubkey: [u8; PUBKEY_SIZE]) -> Self {
        Self {
            issuer_pubkey,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn verify(&self, raw: &str) -> Result<UserId, AuthError> {
        {
            let cache = self.cache.read().await;
            if let Some(entry) = cache.get(raw) {
                if entry.is_fresh() {
                    debug!(user_id = %entry.user_id, "Session token served from cache");
                    return Ok(entry.user_id);
                }
            }
        }

        let token = SessionToken::decode(raw)?;
        let user_id = verify_session_token(&token, &self.issuer_pubkey)?;

        self.cache.write().await.insert(
            raw.to_string(),
            CachedIdentity {
                user_id,
                valid_until: token.valid_until,
            },
        );

        debug!(user_id = %user_id, until = %token.valid_until, "Session token verified");
        Ok(user_id)
    }

    /// Drop cache entries whose token has expired.
    pub async fn purge_expired(&self) {
        let mut cache = self.cache.write().await;
        let before = cache.len();
        cache.retain(|_, entry| entry.is_fresh());
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "Purged expired session tokens");
        }
    }

    pub async fn cache_size(&self) -> usize {
        self.cache.read().await.len()
    }
}

impl IdentityResolver for TokenResolver {
    fn resolve<'a>(&'a self, token: &'a str) -> BoxFuture<'a, Result<UserId, AuthError>> {
        Box::pin(self.verify(token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use ed25519_dalek::SigningKey;
    use parley_shared::token::create_session_token;
    use rand::rngs::OsRng;

    fn issue(key: &SigningKey, user: UserId, valid_until: DateTime<Utc>) -> String {
        create_session_token(user, valid_until, key).encode().unwrap()
    }

    #[tokio::test]
    async fn test_valid_token_resolves_and_is_cached() {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new(issuer.verifying_key().to_bytes());
        let user = UserId::new();
        let raw = issue(&issuer, user, Utc::now() + Duration::hours(1));

        assert_eq!(resolver.resolve(&raw).await, Ok(user));
        assert_eq!(resolver.cache_size().await, 1);
        assert_eq!(resolver.resolve(&raw).await, Ok(user));
        assert_eq!(resolver.cache_size().await, 1);
    }

    #[tokio::test]
    async fn test_foreign_issuer_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let forger = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new(issuer.verifying_key().to_bytes());
        let raw = issue(&forger, UserId::new(), Utc::now() + Duration::hours(1));

        assert_eq!(resolver.resolve(&raw).await, Err(AuthError::BadSignature));
        assert_eq!(resolver.cache_size().await, 0);
    }

    #[tokio::test]
    async fn test_expired_token_rejected() {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new(issuer.verifying_key().to_bytes());
        let raw = issue(&issuer, UserId::new(), Utc::now() - Duration::minutes(1));

        assert_eq!(resolver.resolve(&raw).await, Err(AuthError::Expired));
    }

    #[tokio::test]
    async fn test_garbage_and_blank_tokens() {
        let resolver = TokenResolver::new([0u8; PUBKEY_SIZE]);
        assert_eq!(resolver.resolve("").await, Err(AuthError::MissingToken));
        assert!(matches!(
            resolver.resolve("not-a-token").await,
            Err(AuthError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn test_purge_expired_entries() {
        let issuer = SigningKey::generate(&mut OsRng);
        let resolver = TokenResolver::new(issuer.verifying_key().to_bytes());
        let raw = issue(&issuer, UserId::new(), Utc::now() + Duration::hours(1));
        resolver.resolve(&raw).await.unwrap();

        resolver.cache.write().await.values_mut().for_each(|entry| {
            entry.valid_until = Utc::now() - Duration::seconds(1);
        });
        resolver.purge_expired().await;
        assert_eq!(resolver.cache_size().await, 0);
    }
}
