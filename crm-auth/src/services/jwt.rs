use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{
    decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation,
};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::config::JwtConfig;
use crate::models::{User, UserRole};

/// Why a token was refused. Callers refresh on `Expired` and force a new
/// login on `Invalid`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token expired")]
    Expired,
    #[error("token invalid")]
    Invalid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Claims carried by both token kinds. Access and refresh tokens of one login
/// share everything except `tokenType`, `jti` and the time fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    pub organization_id: String,
    pub session_id: String,
    pub device_id: String,
    pub is_onboarding_completed: bool,
    pub token_type: TokenType,
    /// JWT ID (for revocation)
    pub jti: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

/// Identity fields embedded into tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenIdentity {
    pub user_id: String,
    pub email: String,
    pub role: UserRole,
    pub organization_id: String,
    pub device_id: String,
    pub is_onboarding_completed: bool,
}

impl TokenIdentity {
    pub fn for_user(user: &User, device_id: impl Into<String>) -> Self {
        Self {
            user_id: user.id.clone(),
            email: user.email.clone(),
            role: user.role,
            organization_id: user.organization_id.clone(),
            device_id: device_id.into(),
            is_onboarding_completed: user.is_onboarding_completed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub access_claims: TokenClaims,
    pub refresh_claims: TokenClaims,
    /// Access token lifetime in seconds.
    pub expires_in: i64,
}

impl IssuedTokens {
    pub fn session_id(&self) -> &str {
        &self.access_claims.session_id
    }
}

#[derive(Debug, Clone)]
pub struct RefreshedAccess {
    pub access_token: String,
    pub claims: TokenClaims,
    pub expires_in: i64,
}

struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl KeyPair {
    fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }
}

/// HS256 token service with one secret per token kind.
#[derive(Clone)]
pub struct JwtService {
    access_keys: Arc<KeyPair>,
    refresh_keys: Arc<KeyPair>,
    issuer: String,
    audience: String,
    access_token_expiry_minutes: i64,
    refresh_token_expiry_days: i64,
    /// Revoked token ids mapped to their `exp`, dropped once they would have
    /// expired anyway.
    revoked: Arc<DashMap<String, i64>>,
}

impl JwtService {
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        let access_secret = config.access_secret.expose_secret().as_bytes();
        let refresh_secret = config.refresh_secret.expose_secret().as_bytes();

        if access_secret.is_empty() || refresh_secret.is_empty() {
            anyhow::bail!("JWT secrets must not be empty");
        }
        if access_secret == refresh_secret {
            anyhow::bail!("Access and refresh tokens must use distinct secrets");
        }

        tracing::info!("JWT service initialized with HS256 keys");

        Ok(Self {
            access_keys: Arc::new(KeyPair::from_secret(access_secret)),
            refresh_keys: Arc::new(KeyPair::from_secret(refresh_secret)),
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_expiry_minutes: config.access_token_ttl_minutes,
            refresh_token_expiry_days: config.refresh_token_ttl_days,
            revoked: Arc::new(DashMap::new()),
        })
    }

    fn keys(&self, token_type: TokenType) -> &KeyPair {
        match token_type {
            TokenType::Access => &self.access_keys,
            TokenType::Refresh => &self.refresh_keys,
        }
    }

    fn claims(
        &self,
        identity: &TokenIdentity,
        session_id: &str,
        token_type: TokenType,
    ) -> TokenClaims {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => Duration::minutes(self.access_token_expiry_minutes),
            TokenType::Refresh => Duration::days(self.refresh_token_expiry_days),
        };

        TokenClaims {
            user_id: identity.user_id.clone(),
            email: identity.email.clone(),
            role: identity.role,
            organization_id: identity.organization_id.clone(),
            session_id: session_id.to_string(),
            device_id: identity.device_id.clone(),
            is_onboarding_completed: identity.is_onboarding_completed,
            token_type,
            jti: Uuid::new_v4().to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        }
    }

    pub(crate) fn sign(&self, claims: &TokenClaims) -> Result<String, anyhow::Error> {
        let header = Header::new(Algorithm::HS256);
        encode(&header, claims, &self.keys(claims.token_type).encoding)
            .map_err(|e| anyhow::anyhow!("Failed to encode {:?} token: {}", claims.token_type, e))
    }

    /// Issue an access/refresh pair for a brand new session.
    pub fn issue_tokens(&self, identity: &TokenIdentity) -> Result<IssuedTokens, anyhow::Error> {
        let session_id = Uuid::new_v4().to_string();
        self.issue_tokens_for_session(identity, &session_id)
    }

    pub fn issue_tokens_for_session(
        &self,
        identity: &TokenIdentity,
        session_id: &str,
    ) -> Result<IssuedTokens, anyhow::Error> {
        let access_claims = self.claims(identity, session_id, TokenType::Access);
        let refresh_claims = self.claims(identity, session_id, TokenType::Refresh);

        Ok(IssuedTokens {
            access_token: self.sign(&access_claims)?,
            refresh_token: self.sign(&refresh_claims)?,
            access_claims,
            refresh_claims,
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    /// Mint a new access token for the session a verified refresh token
    /// belongs to. The refresh token itself is left untouched.
    pub fn refresh_access(
        &self,
        refresh_claims: &TokenClaims,
        identity: &TokenIdentity,
    ) -> Result<RefreshedAccess, anyhow::Error> {
        let claims = self.claims(identity, &refresh_claims.session_id, TokenType::Access);
        Ok(RefreshedAccess {
            access_token: self.sign(&claims)?,
            claims,
            expires_in: self.access_token_expiry_seconds(),
        })
    }

    fn validation(&self, validate_exp: bool) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = validate_exp;
        validation.leeway = 0;
        validation.set_issuer(&[self.issuer.as_str()]);
        validation.set_audience(&[self.audience.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation
    }

    fn verify(
        &self,
        token: &str,
        token_type: TokenType,
        validate_exp: bool,
    ) -> Result<TokenClaims, TokenError> {
        let data = decode::<TokenClaims>(
            token,
            &self.keys(token_type).decoding,
            &self.validation(validate_exp),
        )
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => TokenError::Expired,
            _ => TokenError::Invalid,
        })?;

        let claims = data.claims;
        if claims.token_type != token_type {
            return Err(TokenError::Invalid);
        }
        if self.is_revoked(&claims.jti) {
            return Err(TokenError::Invalid);
        }

        Ok(claims)
    }

    pub fn verify_access(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify(token, TokenType::Access, true)
    }

    pub fn verify_refresh(&self, token: &str) -> Result<TokenClaims, TokenError> {
        self.verify(token, TokenType::Refresh, true)
    }

    /// Signature-checked but expiry-tolerant decode, for logout attribution.
    pub fn inspect(&self, token: &str, token_type: TokenType) -> Option<TokenClaims> {
        self.verify(token, token_type, false).ok()
    }

    /// Reject this token id until its natural expiry.
    pub fn revoke(&self, claims: &TokenClaims) {
        self.revoked.insert(claims.jti.clone(), claims.exp);
    }

    pub fn is_revoked(&self, jti: &str) -> bool {
        self.revoked.contains_key(jti)
    }

    /// Drop revocations whose tokens have expired. Returns how many were removed.
    pub fn purge_revoked(&self) -> usize {
        let now = Utc::now().timestamp();
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp >= now);
        before.saturating_sub(self.revoked.len())
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_minutes * 60
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn config() -> JwtConfig {
        JwtConfig {
            access_secret: SecretString::new("access-secret-for-tests-0123456789".to_string()),
            refresh_secret: SecretString::new("refresh-secret-for-tests-0123456789".to_string()),
            issuer: "crm-auth".to_string(),
            audience: "crm-app".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
        }
    }

    fn identity() -> TokenIdentity {
        TokenIdentity {
            user_id: "user_123".to_string(),
            email: "a@b.com".to_string(),
            role: UserRole::Manager,
            organization_id: "org_1".to_string(),
            device_id: "device_1".to_string(),
            is_onboarding_completed: true,
        }
    }

    #[test]
    fn test_token_pair_round_trip() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let issued = service.issue_tokens(&identity())?;

        let access = service.verify_access(&issued.access_token).unwrap();
        assert_eq!(access.user_id, "user_123");
        assert_eq!(access.role, UserRole::Manager);
        assert_eq!(access.session_id, issued.session_id());
        assert_eq!(issued.expires_in, 900);

        let refresh = service.verify_refresh(&issued.refresh_token).unwrap();
        assert_eq!(refresh.session_id, access.session_id);
        assert_ne!(refresh.jti, access.jti);
        Ok(())
    }

    #[test]
    fn each_pair_gets_a_fresh_session() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let first = service.issue_tokens(&identity())?;
        let second = service.issue_tokens(&identity())?;
        assert_ne!(first.session_id(), second.session_id());
        Ok(())
    }

    #[test]
    fn secrets_are_not_interchangeable() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let issued = service.issue_tokens(&identity())?;

        assert_eq!(
            service.verify_refresh(&issued.access_token),
            Err(TokenError::Invalid)
        );
        assert_eq!(
            service.verify_access(&issued.refresh_token),
            Err(TokenError::Invalid)
        );
        Ok(())
    }

    #[test]
    fn same_secret_but_wrong_type_is_invalid() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let claims = service.claims(&identity(), "sess", TokenType::Access);
        // Signed with the refresh secret but labelled access.
        let forged = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &service.refresh_keys.encoding,
        )?;
        assert_eq!(service.verify_refresh(&forged), Err(TokenError::Invalid));
        Ok(())
    }

    #[test]
    fn expired_token_reports_expired() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let mut claims = service.claims(&identity(), "sess", TokenType::Access);
        claims.iat -= 3600;
        claims.exp = Utc::now().timestamp() - 60;
        let token = service.sign(&claims)?;

        assert_eq!(service.verify_access(&token), Err(TokenError::Expired));
        assert!(service.inspect(&token, TokenType::Access).is_some());
        Ok(())
    }

    #[test]
    fn wrong_audience_is_invalid() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let mut claims = service.claims(&identity(), "sess", TokenType::Access);
        claims.aud = "someone-else".to_string();
        let token = service.sign(&claims)?;
        assert_eq!(service.verify_access(&token), Err(TokenError::Invalid));
        Ok(())
    }

    #[test]
    fn garbage_is_invalid() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        assert_eq!(service.verify_access("not.a.jwt"), Err(TokenError::Invalid));
        Ok(())
    }

    #[test]
    fn refresh_keeps_session_and_mints_new_access() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let issued = service.issue_tokens(&identity())?;
        let refresh = service.verify_refresh(&issued.refresh_token).unwrap();

        let refreshed = service.refresh_access(&refresh, &identity())?;
        let claims = service.verify_access(&refreshed.access_token).unwrap();
        assert_eq!(claims.session_id, issued.session_id());
        assert_ne!(claims.jti, issued.access_claims.jti);
        // Refresh token still valid and unchanged.
        assert!(service.verify_refresh(&issued.refresh_token).is_ok());
        Ok(())
    }

    #[test]
    fn revoked_tokens_fail_and_are_purged_after_expiry() -> Result<(), anyhow::Error> {
        let service = JwtService::new(&config())?;
        let issued = service.issue_tokens(&identity())?;

        service.revoke(&issued.access_claims);
        assert_eq!(
            service.verify_access(&issued.access_token),
            Err(TokenError::Invalid)
        );
        assert_eq!(service.purge_revoked(), 0);

        let mut stale = issued.refresh_claims.clone();
        stale.exp = Utc::now().timestamp() - 1;
        service.revoke(&stale);
        assert_eq!(service.purge_revoked(), 1);
        Ok(())
    }

    #[test]
    fn identical_secrets_are_refused() {
        let mut config = config();
        config.refresh_secret = SecretString::new("access-secret-for-tests-0123456789".to_string());
        assert!(JwtService::new(&config).is_err());
    }
}
