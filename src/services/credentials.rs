use std::time::Duration;

use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    db::users::UserStore,
    error::ApiError,
    models::{
        auth::{AccessClaims, AuthenticatedUser, RefreshClaims},
        user::User,
    },
};

/// Signing secrets, lifetimes and hashing cost, injected at construction.
#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub access_secret: String,
    pub refresh_secret: String,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
    pub bcrypt_cost: u32,
}

/// Verification failed. Bad signature, malformed payload and expiry are
/// deliberately indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid or expired token")]
pub struct InvalidToken;

/// Verify signature and expiry of an HS256 token and decode its claims.
pub fn verify_token<C: DeserializeOwned>(token: &str, secret: &str) -> Result<C, InvalidToken> {
    let key = DecodingKey::from_secret(secret.as_bytes());
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;

    decode::<C>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|_| InvalidToken)
}

/// Hex SHA-256 of a token, the form in which refresh tokens are persisted.
pub fn token_digest(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

pub struct CredentialService {
    settings: TokenSettings,
}

impl CredentialService {
    pub fn new(settings: TokenSettings) -> Self {
        Self { settings }
    }

    pub fn hash_password(&self, plaintext: &str) -> Result<String, ApiError> {
        bcrypt::hash(plaintext, self.settings.bcrypt_cost).map_err(ApiError::internal)
    }

    pub fn verify_password(&self, plaintext: &str, hash: &str) -> bool {
        match bcrypt::verify(plaintext, hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::warn!(error = %e, "stored password hash is unreadable");
                false
            }
        }
    }

    pub fn issue_access_token(&self, user: &AuthenticatedUser) -> Result<String, ApiError> {
        let now = Utc::now().timestamp() as usize;
        let claims = AccessClaims {
            sub: user.user_id.to_string(),
            username: Some(user.username.clone()),
            email: Some(user.email.clone()),
            iat: now,
            exp: now + self.settings.access_ttl.as_secs() as usize,
        };
        sign(&claims, &self.settings.access_secret)
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AccessClaims, InvalidToken> {
        verify_token(token, &self.settings.access_secret)
    }

    fn sign_refresh_token(&self, user_id: Uuid) -> Result<String, ApiError> {
        let now = Utc::now().timestamp() as usize;
        let claims = RefreshClaims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + self.settings.refresh_ttl.as_secs() as usize,
        };
        sign(&claims, &self.settings.refresh_secret)
    }

    /// Sign a new refresh token and make it the principal's only valid one.
    pub async fn issue_refresh_token(
        &self,
        store: &dyn UserStore,
        user_id: Uuid,
    ) -> Result<String, ApiError> {
        let token = self.sign_refresh_token(user_id)?;
        store
            .set_refresh_token_hash(user_id, Some(token_digest(&token)))
            .await?;
        Ok(token)
    }

    /// Check signature and expiry, then that the token is still the one
    /// persisted for its principal.
    pub async fn verify_refresh_token(
        &self,
        store: &dyn UserStore,
        token: &str,
    ) -> Result<User, ApiError> {
        let invalid = || ApiError::Unauthorized("Invalid or expired refresh token".to_string());

        let claims: RefreshClaims =
            verify_token(token, &self.settings.refresh_secret).map_err(|_| invalid())?;
        let user_id: Uuid = claims.sub.parse().map_err(|_| invalid())?;

        let user = store.find_by_id(user_id).await?.ok_or_else(invalid)?;
        match user.refresh_token_hash.as_deref() {
            Some(stored) if stored == token_digest(token) => Ok(user),
            _ => Err(ApiError::Unauthorized(
                "Refresh token is expired or already used".to_string(),
            )),
        }
    }

    pub async fn revoke_refresh_token(
        &self,
        store: &dyn UserStore,
        user_id: Uuid,
    ) -> Result<(), ApiError> {
        store.set_refresh_token_hash(user_id, None).await
    }
}

fn sign<C: Serialize>(claims: &C, secret: &str) -> Result<String, ApiError> {
    if secret.is_empty() {
        return Err(ApiError::Internal("token signing secret is not configured".to_string()));
    }
    encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(ApiError::internal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{db::memory::MemoryUserStore, models::user::NewUser};

    fn settings() -> TokenSettings {
        TokenSettings {
            access_secret: "access-secret".into(),
            refresh_secret: "refresh-secret".into(),
            access_ttl: Duration::from_secs(900),
            refresh_ttl: Duration::from_secs(10 * 86_400),
            bcrypt_cost: 4,
        }
    }

    async fn seeded_user(store: &MemoryUserStore, svc: &CredentialService) -> User {
        store
            .create(NewUser {
                username: "alice".into(),
                email: "Alice@Example.com".into(),
                password_hash: svc.hash_password("correct horse").unwrap(),
                profile_picture_url: None,
                bio: None,
            })
            .await
            .unwrap()
    }

    #[test]
    fn password_hash_round_trip() {
        let svc = CredentialService::new(settings());
        let hash = svc.hash_password("hunter22").unwrap();
        assert_ne!(hash, "hunter22");
        assert!(svc.verify_password("hunter22", &hash));
        assert!(!svc.verify_password("hunter23", &hash));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let svc = CredentialService::new(settings());
        assert!(!svc.verify_password("anything", "not-a-bcrypt-hash"));
    }

    #[test]
    fn access_token_carries_principal() {
        let svc = CredentialService::new(settings());
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "bob".into(),
            email: "bob@example.com".into(),
        };
        let token = svc.issue_access_token(&user).unwrap();
        let claims = svc.verify_access_token(&token).unwrap();
        assert_eq!(claims.sub, user.user_id.to_string());
        assert_eq!(claims.username.as_deref(), Some("bob"));
        assert_eq!(claims.email.as_deref(), Some("bob@example.com"));
    }

    #[test]
    fn expired_access_token_is_invalid() {
        let svc = CredentialService::new(settings());
        let now = Utc::now().timestamp() as usize;
        let claims = AccessClaims {
            sub: Uuid::new_v4().to_string(),
            username: None,
            email: None,
            iat: now - 7200,
            exp: now - 3600,
        };
        let token = sign(&claims, "access-secret").unwrap();
        assert_eq!(svc.verify_access_token(&token).unwrap_err(), InvalidToken);
    }

    #[test]
    fn wrong_secret_and_garbage_collapse_to_invalid() {
        let svc = CredentialService::new(settings());
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "carol".into(),
            email: "carol@example.com".into(),
        };
        let token = svc.issue_access_token(&user).unwrap();
        assert_eq!(verify_token::<AccessClaims>(&token, "other").unwrap_err(), InvalidToken);
        assert_eq!(svc.verify_access_token("not.a.jwt").unwrap_err(), InvalidToken);

        let mut tampered = token.clone();
        tampered.push('x');
        assert_eq!(svc.verify_access_token(&tampered).unwrap_err(), InvalidToken);
    }

    #[test]
    fn empty_secret_is_internal_error() {
        let mut s = settings();
        s.access_secret.clear();
        let svc = CredentialService::new(s);
        let user = AuthenticatedUser {
            user_id: Uuid::new_v4(),
            username: "dave".into(),
            email: "dave@example.com".into(),
        };
        assert!(matches!(svc.issue_access_token(&user), Err(ApiError::Internal(_))));
    }

    #[tokio::test]
    async fn second_refresh_token_invalidates_first() {
        let svc = CredentialService::new(settings());
        let store = MemoryUserStore::new();
        let user = seeded_user(&store, &svc).await;

        let first = svc.issue_refresh_token(&store, user.id).await.unwrap();
        assert_eq!(svc.verify_refresh_token(&store, &first).await.unwrap().id, user.id);

        let second = svc.issue_refresh_token(&store, user.id).await.unwrap();
        assert_ne!(first, second);
        assert!(matches!(
            svc.verify_refresh_token(&store, &first).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert_eq!(svc.verify_refresh_token(&store, &second).await.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn revoked_refresh_token_is_rejected() {
        let svc = CredentialService::new(settings());
        let store = MemoryUserStore::new();
        let user = seeded_user(&store, &svc).await;

        let token = svc.issue_refresh_token(&store, user.id).await.unwrap();
        svc.revoke_refresh_token(&store, user.id).await.unwrap();
        assert!(svc.verify_refresh_token(&store, &token).await.is_err());
    }

    #[tokio::test]
    async fn access_token_is_not_a_refresh_token() {
        let svc = CredentialService::new(settings());
        let store = MemoryUserStore::new();
        let user = seeded_user(&store, &svc).await;

        let access = svc.issue_access_token(&AuthenticatedUser::from(&user)).unwrap();
        assert!(matches!(
            svc.verify_refresh_token(&store, &access).await,
            Err(ApiError::Unauthorized(_))
        ));
    }
}
