use chrono::Utc;
use serde_json::json;
use service_core::envelope::FieldError;
use std::{future::Future, sync::Arc, time::Duration};
use uuid::Uuid;

use crate::{
    config::AuthConfig,
    models::{
        AuditEvent, AuditEventType, ClientContext, NewUser, Session, SessionStatus,
        TwoFactorConfig, TwoFactorStatus, User, UserRole, UserUpdate,
    },
    services::{
        jwt::{IssuedTokens, JwtService, RefreshedAccess, TokenClaims, TokenIdentity, TokenType},
        two_factor::{TwoFactorService, TwoFactorSetup, TwoFactorVerification},
        user_store::StoreError,
        AuditLogger, RateLimitDecision, RateLimiter, ServiceError, SessionRegistry, UserStore,
    },
    utils::{CredentialHasher, Password, PasswordHashString, PasswordPolicy},
};

#[derive(Debug, Clone)]
pub struct LoginCommand {
    pub email: String,
    pub password: Password,
    pub two_factor_code: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: IssuedTokens,
    pub session: Session,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub access: RefreshedAccess,
    pub session: Session,
}

/// Result of checking an access token against the user store and registry.
#[derive(Debug, Clone)]
pub struct VerifiedSession {
    pub claims: TokenClaims,
    pub user: User,
    pub session: Session,
    pub active_sessions: usize,
}

#[derive(Debug, Clone)]
pub struct RegisterCommand {
    pub email: String,
    pub name: Option<String>,
    pub password: Password,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondFactor {
    Totp,
    BackupCode,
}

impl SecondFactor {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecondFactor::Totp => "totp",
            SecondFactor::BackupCode => "backup_code",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TwoFactorCheck {
    pub status: TwoFactorStatus,
    pub method: SecondFactor,
    pub backup_codes_remaining: usize,
}

/// Auth flows over the user store, token service, session registry, second
/// factor, login limiter and audit trail.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionRegistry>,
    hasher: CredentialHasher,
    jwt: JwtService,
    two_factor: TwoFactorService,
    login_limiter: RateLimiter,
    audit: AuditLogger,
    password_policy: PasswordPolicy,
    store_timeout: Duration,
    strict_sessions: bool,
}

impl AuthService {
    pub fn new(
        config: &AuthConfig,
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionRegistry>,
        login_limiter: RateLimiter,
        audit: AuditLogger,
    ) -> Result<Self, anyhow::Error> {
        Ok(Self {
            users,
            sessions,
            hasher: CredentialHasher::new(&config.password)?,
            jwt: JwtService::new(&config.jwt)?,
            two_factor: TwoFactorService::new(&config.totp.issuer, config.totp.backup_code_count),
            login_limiter,
            audit,
            password_policy: PasswordPolicy::default(),
            store_timeout: Duration::from_millis(config.store.timeout_ms),
            strict_sessions: config.session.strict,
        })
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    pub fn sessions(&self) -> &Arc<dyn SessionRegistry> {
        &self.sessions
    }

    pub fn two_factor(&self) -> &TwoFactorService {
        &self.two_factor
    }

    /// Bound a user-store call by the configured timeout.
    async fn store<T, F>(&self, call: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(ServiceError::from),
            Err(_) => Err(ServiceError::StoreUnavailable(anyhow::anyhow!(
                "user store did not answer within {}ms",
                self.store_timeout.as_millis()
            ))),
        }
    }

    async fn load_user(&self, user_id: &str) -> Result<User, ServiceError> {
        self.store(self.users.find_by_id(user_id))
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    async fn update_user(&self, user_id: &str, update: UserUpdate) -> Result<User, ServiceError> {
        self.store(self.users.update_by_id(user_id, update))
            .await?
            .ok_or_else(|| ServiceError::NotFound("User".to_string()))
    }

    async fn login_failed(
        &self,
        email: &str,
        user_id: Option<&str>,
        client: &ClientContext,
        reason: &str,
    ) {
        tracing::warn!(ip = %client.ip_address, reason = reason, "Login failed");
        let mut event = AuditEvent::failure(AuditEventType::LoginFailure)
            .email(email)
            .client(client)
            .details(json!({ "reason": reason }));
        if let Some(user_id) = user_id {
            event = event.user(user_id);
        }
        self.audit.record(event).await;
    }

    /// Password login with an optional second factor.
    pub async fn login(
        &self,
        cmd: LoginCommand,
        client: &ClientContext,
    ) -> Result<LoginOutcome, ServiceError> {
        let email = cmd.email.trim().to_string();

        let decision = self
            .login_limiter
            .check(client)
            .await
            .map_err(ServiceError::StoreUnavailable)?;
        if let RateLimitDecision::Blocked { retry_after } = decision {
            self.login_failed(&email, None, client, "rate_limited").await;
            return Err(ServiceError::RateLimited { retry_after });
        }

        let user = match self.store(self.users.find_by_email(&email)).await? {
            Some(user) => user,
            None => {
                self.hasher.verify_against_dummy(&cmd.password).await;
                self.login_failed(&email, None, client, "unknown_email").await;
                return Err(ServiceError::InvalidCredentials);
            }
        };

        let stored_hash = PasswordHashString::new(user.password_hash.clone());
        if !self.hasher.verify(&cmd.password, &stored_hash).await {
            self.login_failed(&email, Some(&user.id), client, "invalid_password")
                .await;
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.is_active {
            self.login_failed(&email, Some(&user.id), client, "account_inactive")
                .await;
            return Err(ServiceError::AccountInactive);
        }

        let mut factor = None;
        let mut user = user;
        if user.two_factor_enabled() {
            let code = cmd
                .two_factor_code
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty());
            let Some(code) = code else {
                self.login_failed(&email, Some(&user.id), client, "two_factor_required")
                    .await;
                return Err(ServiceError::TwoFactorRequired);
            };

            let (method, updated) = self.check_second_factor(&user, code, client).await?;
            factor = Some(method);
            user = updated;
        }

        let user = self
            .update_user(
                &user.id,
                UserUpdate {
                    last_login_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;

        let identity = TokenIdentity::for_user(&user, client.device_fingerprint());
        let tokens = self.jwt.issue_tokens(&identity)?;
        let session = self
            .sessions
            .record_session(&user.id, tokens.session_id(), client.device_info())
            .await;

        if let Err(e) = self.login_limiter.reset(client).await {
            tracing::warn!(error = %e, "Failed to reset login rate limit");
        }

        self.audit
            .record(
                AuditEvent::success(AuditEventType::LoginSuccess)
                    .user(&user.id)
                    .email(&user.email)
                    .client(client)
                    .details(json!({
                        "sessionId": session.session_id,
                        "deviceId": session.device_id,
                        "secondFactor": factor.map(|f| f.as_str()),
                    })),
            )
            .await;

        tracing::info!(
            user_id = %user.id,
            session_id = %session.session_id,
            ip = %client.ip_address,
            "User logged in"
        );

        Ok(LoginOutcome {
            user,
            tokens,
            session,
        })
    }

    /// Verify a code against an enforced or suspended config, consuming a
    /// matched backup code. Returns the user as stored afterwards.
    async fn check_second_factor(
        &self,
        user: &User,
        code: &str,
        client: &ClientContext,
    ) -> Result<(SecondFactor, User), ServiceError> {
        let secret = user
            .two_factor
            .secret()
            .ok_or(ServiceError::TwoFactorNotEnabled)?;

        match self
            .two_factor
            .verify_token(secret, code, user.two_factor.backup_codes())
        {
            TwoFactorVerification::Totp => Ok((SecondFactor::Totp, user.clone())),
            TwoFactorVerification::BackupCode(used) => {
                let remaining = self
                    .two_factor
                    .remove_used_backup_code(user.two_factor.backup_codes(), &used);
                let left = remaining.len();
                let updated = self
                    .update_user(
                        &user.id,
                        UserUpdate {
                            two_factor: Some(user.two_factor.clone().with_backup_codes(remaining)),
                            ..Default::default()
                        },
                    )
                    .await?;

                self.audit
                    .record(
                        AuditEvent::success(AuditEventType::BackupCodeUsed)
                            .user(&user.id)
                            .email(&user.email)
                            .client(client)
                            .details(json!({ "backupCodesRemaining": left })),
                    )
                    .await;

                Ok((SecondFactor::BackupCode, updated))
            }
            TwoFactorVerification::Invalid => {
                self.audit
                    .record(
                        AuditEvent::failure(AuditEventType::TwoFactorFailed)
                            .user(&user.id)
                            .email(&user.email)
                            .client(client),
                    )
                    .await;
                Err(ServiceError::TwoFactorInvalidCode)
            }
        }
    }

    /// Ends the presented session. Never fails: whatever can be attributed is
    /// revoked and audited, the rest is ignored.
    pub async fn logout(
        &self,
        access_token: Option<&str>,
        refresh_token: Option<&str>,
        client: &ClientContext,
    ) {
        let access = access_token.and_then(|t| self.jwt.inspect(t, TokenType::Access));
        let refresh = refresh_token.and_then(|t| self.jwt.inspect(t, TokenType::Refresh));

        let mut session_ids: Vec<&str> = Vec::new();
        for claims in [access.as_ref(), refresh.as_ref()].into_iter().flatten() {
            self.jwt.revoke(claims);
            if !session_ids.contains(&claims.session_id.as_str()) {
                session_ids.push(&claims.session_id);
            }
        }
        for session_id in &session_ids {
            self.sessions.revoke(session_id).await;
        }

        let actor = access.as_ref().or(refresh.as_ref());
        let mut event = AuditEvent::success(AuditEventType::Logout)
            .client(client)
            .details(json!({ "sessionIds": session_ids }));
        if let Some(claims) = actor {
            event = event.user(&claims.user_id).email(&claims.email);
            tracing::info!(user_id = %claims.user_id, "User logged out");
        } else {
            tracing::info!(ip = %client.ip_address, "Logout without a valid token");
        }
        self.audit.record(event).await;
    }

    /// Revoke every session of the caller. Returns how many were ended.
    pub async fn logout_all(
        &self,
        claims: &TokenClaims,
        client: &ClientContext,
    ) -> Result<usize, ServiceError> {
        let terminated = self.sessions.revoke_all(&claims.user_id).await;
        self.jwt.revoke(claims);

        self.audit
            .record(
                AuditEvent::success(AuditEventType::LogoutAll)
                    .user(&claims.user_id)
                    .email(&claims.email)
                    .client(client)
                    .details(json!({ "sessionsTerminated": terminated })),
            )
            .await;

        tracing::info!(
            user_id = %claims.user_id,
            sessions_terminated = terminated,
            "User logged out of all sessions"
        );
        Ok(terminated)
    }

    /// Registry check for a token's session. Unknown sessions are rebuilt from
    /// the token unless strict mode is on.
    async fn resolve_session(
        &self,
        claims: &TokenClaims,
        client: &ClientContext,
    ) -> Result<Session, ServiceError> {
        match self.sessions.status(&claims.session_id).await {
            SessionStatus::Active(_) => Ok(self
                .sessions
                .touch(&claims.session_id)
                .await
                .ok_or(ServiceError::SessionNotFound)?),
            SessionStatus::Revoked => Err(ServiceError::SessionRevoked),
            SessionStatus::Unknown if self.strict_sessions => Err(ServiceError::SessionNotFound),
            SessionStatus::Unknown => {
                tracing::warn!(
                    user_id = %claims.user_id,
                    session_id = %claims.session_id,
                    "Token references a session the registry does not know; restoring it"
                );
                let mut device = client.device_info();
                device.device_id = claims.device_id.clone();
                Ok(self
                    .sessions
                    .record_session(&claims.user_id, &claims.session_id, device)
                    .await)
            }
        }
    }

    async fn active_user(&self, claims: &TokenClaims) -> Result<User, ServiceError> {
        let user = self
            .store(self.users.find_by_id(&claims.user_id))
            .await?
            .ok_or(ServiceError::TokenInvalid)?;
        if !user.is_active {
            return Err(ServiceError::AccountInactive);
        }
        Ok(user)
    }

    /// Mint a new access token for the refresh token's session.
    pub async fn refresh(
        &self,
        refresh_token: &str,
        client: &ClientContext,
    ) -> Result<RefreshOutcome, ServiceError> {
        let claims = self.jwt.verify_refresh(refresh_token)?;
        let user = self.active_user(&claims).await?;
        let session = self.resolve_session(&claims, client).await?;

        let identity = TokenIdentity::for_user(&user, claims.device_id.clone());
        let access = self.jwt.refresh_access(&claims, &identity)?;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::TokenRefreshed)
                    .user(&user.id)
                    .client(client)
                    .details(json!({ "sessionId": claims.session_id })),
            )
            .await;

        tracing::info!(user_id = %user.id, session_id = %claims.session_id, "Token refreshed for user");
        Ok(RefreshOutcome { access, session })
    }

    /// Full access-token check: signature and expiry, live user, live session.
    pub async fn verify(
        &self,
        access_token: &str,
        client: &ClientContext,
    ) -> Result<VerifiedSession, ServiceError> {
        let claims = self.jwt.verify_access(access_token)?;
        let user = self.active_user(&claims).await?;
        let session = self.resolve_session(&claims, client).await?;
        let active_sessions = self.sessions.list_sessions(&user.id).await.len();

        Ok(VerifiedSession {
            claims,
            user,
            session,
            active_sessions,
        })
    }

    pub async fn touch_activity(&self, claims: &TokenClaims) -> Result<Session, ServiceError> {
        self.sessions
            .touch(&claims.session_id)
            .await
            .ok_or(ServiceError::SessionNotFound)
    }

    pub async fn list_sessions(&self, claims: &TokenClaims) -> Vec<Session> {
        self.sessions.list_sessions(&claims.user_id).await
    }

    /// Revoke one of the caller's own sessions.
    pub async fn revoke_session(
        &self,
        claims: &TokenClaims,
        session_id: &str,
        client: &ClientContext,
    ) -> Result<(), ServiceError> {
        match self.sessions.find(session_id).await {
            Some(session) if session.user_id == claims.user_id => {}
            _ => return Err(ServiceError::NotFound("Session".to_string())),
        }

        self.sessions.revoke(session_id).await;
        self.audit
            .record(
                AuditEvent::success(AuditEventType::SessionRevoked)
                    .user(&claims.user_id)
                    .client(client)
                    .details(json!({
                        "sessionId": session_id,
                        "current": session_id == claims.session_id,
                    })),
            )
            .await;
        Ok(())
    }

    fn check_strength(&self, field: &str, password: &Password) -> Result<(), ServiceError> {
        let strength = self.password_policy.validate_strength(password.as_str());
        if strength.is_valid {
            return Ok(());
        }
        Err(ServiceError::Validation(
            strength
                .errors
                .into_iter()
                .map(|message| FieldError::new(field, message))
                .collect(),
        ))
    }

    /// Create a user as admin of a new organization.
    pub async fn register(
        &self,
        cmd: RegisterCommand,
        client: &ClientContext,
    ) -> Result<User, ServiceError> {
        self.check_strength("password", &cmd.password)?;

        let password_hash = self.hasher.hash(&cmd.password).await?;
        let user = self
            .store(self.users.create(NewUser {
                email: cmd.email.trim().to_string(),
                name: cmd.name,
                password_hash: password_hash.into_string(),
                role: UserRole::Admin,
                organization_id: Uuid::new_v4().to_string(),
            }))
            .await?;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::UserRegistered)
                    .user(&user.id)
                    .email(&user.email)
                    .client(client)
                    .details(json!({ "organizationId": user.organization_id })),
            )
            .await;

        tracing::info!(user_id = %user.id, "User registered");
        Ok(user)
    }

    /// Returns how many other sessions were revoked.
    pub async fn change_password(
        &self,
        claims: &TokenClaims,
        current_password: &Password,
        new_password: &Password,
        client: &ClientContext,
    ) -> Result<usize, ServiceError> {
        let user = self.load_user(&claims.user_id).await?;
        let stored_hash = PasswordHashString::new(user.password_hash.clone());
        if !self.hasher.verify(current_password, &stored_hash).await {
            self.audit
                .record(
                    AuditEvent::failure(AuditEventType::PasswordChanged)
                        .user(&user.id)
                        .client(client)
                        .details(json!({ "reason": "invalid_current_password" })),
                )
                .await;
            return Err(ServiceError::InvalidCredentials);
        }
        self.check_strength("newPassword", new_password)?;

        let password_hash = self.hasher.hash(new_password).await?;
        self.update_user(
            &user.id,
            UserUpdate {
                password_hash: Some(password_hash.into_string()),
                ..Default::default()
            },
        )
        .await?;

        let revoked = self
            .sessions
            .revoke_all_except(&user.id, &claims.session_id)
            .await;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::PasswordChanged)
                    .user(&user.id)
                    .client(client)
                    .details(json!({ "sessionsRevoked": revoked })),
            )
            .await;

        tracing::info!(user_id = %user.id, sessions_revoked = revoked, "Password changed");
        Ok(revoked)
    }

    /// Mark onboarding done and re-issue the access token for the same session.
    pub async fn complete_onboarding(
        &self,
        claims: &TokenClaims,
        client: &ClientContext,
    ) -> Result<(User, RefreshedAccess), ServiceError> {
        let user = self
            .update_user(
                &claims.user_id,
                UserUpdate {
                    is_onboarding_completed: Some(true),
                    ..Default::default()
                },
            )
            .await?;

        let identity = TokenIdentity::for_user(&user, claims.device_id.clone());
        let access = self.jwt.refresh_access(claims, &identity)?;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::OnboardingCompleted)
                    .user(&user.id)
                    .client(client),
            )
            .await;

        Ok((user, access))
    }

    /// Start (or restart) enrolment. The config stays pending until a code is
    /// verified against the new secret.
    pub async fn setup_two_factor(
        &self,
        claims: &TokenClaims,
        client: &ClientContext,
    ) -> Result<TwoFactorSetup, ServiceError> {
        let user = self.load_user(&claims.user_id).await?;
        if user.two_factor.is_enforced() {
            return Err(ServiceError::TwoFactorAlreadyEnabled);
        }

        let setup = self.two_factor.generate_setup(&user.email, &user.id)?;
        self.update_user(
            &user.id,
            UserUpdate {
                two_factor: Some(TwoFactorConfig::pending(
                    setup.secret.clone(),
                    setup.backup_codes.clone(),
                )),
                ..Default::default()
            },
        )
        .await?;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::TwoFactorSetupStarted)
                    .user(&user.id)
                    .client(client),
            )
            .await;

        Ok(setup)
    }

    /// Completes a pending setup, resumes a suspended config, or step-up
    /// checks an enabled one.
    pub async fn verify_two_factor(
        &self,
        claims: &TokenClaims,
        code: &str,
        client: &ClientContext,
    ) -> Result<TwoFactorCheck, ServiceError> {
        let user = self.load_user(&claims.user_id).await?;

        let (method, user) = match &user.two_factor {
            TwoFactorConfig::Disabled => return Err(ServiceError::TwoFactorNotEnabled),
            TwoFactorConfig::PendingSetup { secret, .. } => {
                // Only the authenticator proves the secret was enrolled.
                if !self.two_factor.verify_totp(secret, code) {
                    self.audit
                        .record(
                            AuditEvent::failure(AuditEventType::TwoFactorFailed)
                                .user(&user.id)
                                .client(client)
                                .details(json!({ "stage": "setup" })),
                        )
                        .await;
                    return Err(ServiceError::TwoFactorInvalidCode);
                }
                (SecondFactor::Totp, user.clone())
            }
            TwoFactorConfig::TemporarilyDisabled { .. } | TwoFactorConfig::Enabled { .. } => {
                self.check_second_factor(&user, code, client).await?
            }
        };

        let user = if user.two_factor.is_enforced() {
            user
        } else {
            let activated = user.two_factor.clone().activate(Utc::now())?;
            let user = self
                .update_user(
                    &user.id,
                    UserUpdate {
                        two_factor: Some(activated),
                        ..Default::default()
                    },
                )
                .await?;

            self.audit
                .record(
                    AuditEvent::success(AuditEventType::TwoFactorEnabled)
                        .user(&user.id)
                        .client(client)
                        .details(json!({ "method": method.as_str() })),
                )
                .await;
            tracing::info!(user_id = %user.id, "Two-factor authentication enabled");
            user
        };

        Ok(TwoFactorCheck {
            status: user.two_factor.status(),
            method,
            backup_codes_remaining: user.two_factor.backup_codes().len(),
        })
    }

    /// Turn 2FA off for good, or suspend it keeping the secret.
    pub async fn disable_two_factor(
        &self,
        claims: &TokenClaims,
        code: &str,
        temporary: bool,
        client: &ClientContext,
    ) -> Result<TwoFactorStatus, ServiceError> {
        let user = self.load_user(&claims.user_id).await?;
        if temporary && !user.two_factor.is_enforced() {
            return Err(ServiceError::TwoFactorNotEnabled);
        }

        let (_, user) = self.check_second_factor(&user, code, client).await?;

        let (next, event_type) = if temporary {
            (
                user.two_factor.clone().suspend(Utc::now())?,
                AuditEventType::TwoFactorSuspended,
            )
        } else {
            (TwoFactorConfig::Disabled, AuditEventType::TwoFactorDisabled)
        };

        let user = self
            .update_user(
                &user.id,
                UserUpdate {
                    two_factor: Some(next),
                    ..Default::default()
                },
            )
            .await?;

        self.audit
            .record(AuditEvent::success(event_type).user(&user.id).client(client))
            .await;

        Ok(user.two_factor.status())
    }

    /// Replace the backup codes. Needs a current TOTP code.
    pub async fn regenerate_backup_codes(
        &self,
        claims: &TokenClaims,
        code: &str,
        client: &ClientContext,
    ) -> Result<Vec<String>, ServiceError> {
        let user = self.load_user(&claims.user_id).await?;
        let secret = match &user.two_factor {
            TwoFactorConfig::Enabled { secret, .. } => secret,
            _ => return Err(ServiceError::TwoFactorNotEnabled),
        };
        if !self.two_factor.verify_totp(secret, code) {
            return Err(ServiceError::TwoFactorInvalidCode);
        }

        let codes = self.two_factor.generate_backup_codes();
        self.update_user(
            &user.id,
            UserUpdate {
                two_factor: Some(user.two_factor.clone().with_backup_codes(codes.clone())),
                ..Default::default()
            },
        )
        .await?;

        self.audit
            .record(
                AuditEvent::success(AuditEventType::BackupCodesRegenerated)
                    .user(&user.id)
                    .client(client)
                    .details(json!({ "count": codes.len() })),
            )
            .await;

        Ok(codes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AuthConfig,
        services::{
            AuditLogger, InMemoryAttemptStore, InMemorySessionRegistry, InMemoryUserStore,
            MemoryAuditSink, RateLimitPolicy,
        },
    };
    use service_core::config::Config;
    use std::collections::HashMap;

    const PASSWORD: &str = "Sup3rSecret";

    struct Harness {
        service: AuthService,
        users: Arc<InMemoryUserStore>,
        audit: Arc<MemoryAuditSink>,
    }

    fn config(strict: bool) -> AuthConfig {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PASSWORD_HASH_MEMORY_KIB", "1024"),
            ("PASSWORD_HASH_ITERATIONS", "1"),
            ("SESSION_STRICT", if strict { "true" } else { "false" }),
        ]);
        AuthConfig::from_lookup(Config::default(), |key| vars.get(key).map(|v| v.to_string()))
            .unwrap()
    }

    async fn harness_with(strict: bool) -> Harness {
        let config = config(strict);
        let users = Arc::new(InMemoryUserStore::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let limiter = RateLimiter::new(
            "login",
            RateLimitPolicy::from(config.rate_limit.login),
            Arc::new(InMemoryAttemptStore::new()),
        );
        let service = AuthService::new(
            &config,
            users.clone(),
            Arc::new(InMemorySessionRegistry::new(chrono::Duration::days(7))),
            limiter,
            AuditLogger::new(audit.clone(), Duration::from_secs(1)),
        )
        .unwrap();

        Harness {
            service,
            users,
            audit,
        }
    }

    async fn harness() -> Harness {
        harness_with(false).await
    }

    fn client() -> ClientContext {
        ClientContext::new("10.0.0.1").with_user_agent("tests")
    }

    fn login_cmd(email: &str, password: &str) -> LoginCommand {
        LoginCommand {
            email: email.to_string(),
            password: Password::new(password.to_string()),
            two_factor_code: None,
        }
    }

    async fn register(h: &Harness, email: &str) -> User {
        h.service
            .register(
                RegisterCommand {
                    email: email.to_string(),
                    name: Some("Ada".to_string()),
                    password: Password::new(PASSWORD.to_string()),
                },
                &client(),
            )
            .await
            .unwrap()
    }

    async fn enable_two_factor(h: &Harness, login: &LoginOutcome) -> TwoFactorSetup {
        let claims = &login.tokens.access_claims;
        let setup = h.service.setup_two_factor(claims, &client()).await.unwrap();
        let code = h
            .service
            .two_factor()
            .generate_code(&setup.secret, Utc::now().timestamp() as u64)
            .unwrap();
        h.service
            .verify_two_factor(claims, &code, &client())
            .await
            .unwrap();
        setup
    }

    #[tokio::test]
    async fn successful_login_records_session_then_audit() {
        let h = harness().await;
        let user = register(&h, "a@b.com").await;

        let outcome = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        assert_eq!(outcome.user.id, user.id);
        assert!(outcome.user.last_login_at.is_some());
        let sessions = h.service.sessions().list_sessions(&user.id).await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].session_id, outcome.session.session_id);

        let successes = h.audit.events_of(AuditEventType::LoginSuccess);
        assert_eq!(successes.len(), 1);
        assert_eq!(successes[0].user_id.as_deref(), Some(user.id.as_str()));
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let h = harness().await;
        register(&h, "a@b.com").await;

        let unknown = h
            .service
            .login(login_cmd("nobody@b.com", PASSWORD), &client())
            .await
            .unwrap_err();
        let wrong = h
            .service
            .login(login_cmd("a@b.com", "Wr0ngPassword"), &client())
            .await
            .unwrap_err();

        assert!(matches!(unknown, ServiceError::InvalidCredentials));
        assert!(matches!(wrong, ServiceError::InvalidCredentials));

        let failures = h.audit.events_of(AuditEventType::LoginFailure);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].email.as_deref(), Some("nobody@b.com"));
        assert!(failures[0].user_id.is_none());
        assert!(failures[1].user_id.is_some());
    }

    #[tokio::test]
    async fn sixth_failure_is_rate_limited() {
        let h = harness().await;
        register(&h, "a@b.com").await;

        for _ in 0..5 {
            let err = h
                .service
                .login(login_cmd("a@b.com", "Wr0ngPassword"), &client())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidCredentials));
        }

        // Even the right password is refused while blocked.
        let err = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::RateLimited { retry_after: 1800 }));
    }

    #[tokio::test]
    async fn success_resets_the_failure_count() {
        let h = harness().await;
        register(&h, "a@b.com").await;

        for _ in 0..4 {
            let _ = h
                .service
                .login(login_cmd("a@b.com", "Wr0ngPassword"), &client())
                .await;
        }
        h.service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        for _ in 0..5 {
            let err = h
                .service
                .login(login_cmd("a@b.com", "Wr0ngPassword"), &client())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn inactive_account_is_refused_after_password_check() {
        let h = harness().await;
        let user = register(&h, "a@b.com").await;
        h.users
            .update_by_id(
                &user.id,
                UserUpdate {
                    is_active: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AccountInactive));

        let err = h
            .service
            .login(login_cmd("a@b.com", "Wr0ngPassword"), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCredentials));
    }

    #[tokio::test]
    async fn refresh_keeps_the_session() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        let refreshed = h
            .service
            .refresh(&login.tokens.refresh_token, &client())
            .await
            .unwrap();
        assert_eq!(refreshed.access.claims.session_id, login.session.session_id);
        assert!(refreshed.access.claims.exp >= login.tokens.access_claims.exp);
        assert_ne!(refreshed.access.access_token, login.tokens.access_token);
    }

    #[tokio::test]
    async fn access_token_cannot_refresh() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        let err = h
            .service
            .refresh(&login.tokens.access_token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TokenInvalid));
    }

    #[tokio::test]
    async fn logout_all_ends_every_session() {
        let h = harness().await;
        register(&h, "a@b.com").await;

        let mut logins = Vec::new();
        for _ in 0..3 {
            logins.push(
                h.service
                    .login(login_cmd("a@b.com", PASSWORD), &client())
                    .await
                    .unwrap(),
            );
        }

        let terminated = h
            .service
            .logout_all(&logins[0].tokens.access_claims, &client())
            .await
            .unwrap();
        assert_eq!(terminated, 3);

        for login in &logins[1..] {
            let err = h
                .service
                .verify(&login.tokens.access_token, &client())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::SessionRevoked));

            let err = h
                .service
                .refresh(&login.tokens.refresh_token, &client())
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::SessionRevoked));
        }
        let err = h
            .service
            .verify(&logins[0].tokens.access_token, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TokenInvalid));
    }

    #[tokio::test]
    async fn logout_revokes_tokens_and_session() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        h.service
            .logout(
                Some(&login.tokens.access_token),
                Some(&login.tokens.refresh_token),
                &client(),
            )
            .await;

        assert!(h
            .service
            .verify(&login.tokens.access_token, &client())
            .await
            .is_err());
        assert!(h
            .service
            .refresh(&login.tokens.refresh_token, &client())
            .await
            .is_err());
        assert_eq!(h.audit.events_of(AuditEventType::Logout).len(), 1);
    }

    #[tokio::test]
    async fn logout_with_garbage_still_audits() {
        let h = harness().await;
        h.service
            .logout(Some("garbage"), None, &client())
            .await;
        let events = h.audit.events_of(AuditEventType::Logout);
        assert_eq!(events.len(), 1);
        assert!(events[0].user_id.is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_restored_unless_strict() {
        for strict in [false, true] {
            let h = harness_with(strict).await;
            let user = register(&h, "a@b.com").await;
            // Tokens for a session the registry never recorded, as after a restart.
            let issued = h
                .service
                .jwt()
                .issue_tokens(&TokenIdentity::for_user(&user, "device-1"))
                .unwrap();

            let result = h.service.verify(&issued.access_token, &client()).await;
            if strict {
                assert!(matches!(result, Err(ServiceError::SessionNotFound)));
            } else {
                let verified = result.unwrap();
                assert_eq!(verified.session.session_id, issued.session_id());
                assert_eq!(verified.session.device_id, "device-1");
                assert_eq!(verified.active_sessions, 1);
            }
        }
    }

    #[tokio::test]
    async fn two_factor_stays_pending_until_verified() {
        let h = harness().await;
        let user = register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let claims = &login.tokens.access_claims;

        let setup = h.service.setup_two_factor(claims, &client()).await.unwrap();
        let stored = h.users.find_by_id(&user.id).await.unwrap().unwrap();
        assert_eq!(stored.two_factor.status(), TwoFactorStatus::PendingSetup);

        // Pending setup does not gate login.
        h.service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        // Backup codes cannot complete enrolment.
        let err = h
            .service
            .verify_two_factor(claims, &setup.backup_codes[0], &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorInvalidCode));

        let code = h
            .service
            .two_factor()
            .generate_code(&setup.secret, Utc::now().timestamp() as u64)
            .unwrap();
        let check = h
            .service
            .verify_two_factor(claims, &code, &client())
            .await
            .unwrap();
        assert_eq!(check.status, TwoFactorStatus::Enabled);

        let err = h
            .service
            .setup_two_factor(claims, &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorAlreadyEnabled));
    }

    #[tokio::test]
    async fn enabled_two_factor_gates_login() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let setup = enable_two_factor(&h, &login).await;

        let err = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorRequired));

        let mut cmd = login_cmd("a@b.com", PASSWORD);
        cmd.two_factor_code = Some("000000".to_string());
        let err = h.service.login(cmd, &client()).await.unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorInvalidCode));

        let mut cmd = login_cmd("a@b.com", PASSWORD);
        cmd.two_factor_code = Some(
            h.service
                .two_factor()
                .generate_code(&setup.secret, Utc::now().timestamp() as u64)
                .unwrap(),
        );
        h.service.login(cmd, &client()).await.unwrap();
    }

    #[tokio::test]
    async fn backup_code_works_once() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let setup = enable_two_factor(&h, &login).await;
        let backup = setup.backup_codes[0].clone();

        let mut cmd = login_cmd("a@b.com", PASSWORD);
        cmd.two_factor_code = Some(backup.clone());
        let outcome = h.service.login(cmd.clone(), &client()).await.unwrap();
        assert_eq!(outcome.user.two_factor.backup_codes().len(), 9);
        assert_eq!(h.audit.events_of(AuditEventType::BackupCodeUsed).len(), 1);

        let err = h.service.login(cmd, &client()).await.unwrap_err();
        assert!(matches!(err, ServiceError::TwoFactorInvalidCode));
    }

    #[tokio::test]
    async fn suspend_then_resume_two_factor() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let setup = enable_two_factor(&h, &login).await;
        let claims = &login.tokens.access_claims;

        let status = h
            .service
            .disable_two_factor(claims, &setup.backup_codes[1], true, &client())
            .await
            .unwrap();
        assert_eq!(status, TwoFactorStatus::TemporarilyDisabled);

        // Suspended: password alone is enough.
        h.service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        let code = h
            .service
            .two_factor()
            .generate_code(&setup.secret, Utc::now().timestamp() as u64)
            .unwrap();
        let check = h
            .service
            .verify_two_factor(claims, &code, &client())
            .await
            .unwrap();
        assert_eq!(check.status, TwoFactorStatus::Enabled);
        assert_eq!(check.backup_codes_remaining, 9);
    }

    #[tokio::test]
    async fn change_password_revokes_other_sessions() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let first = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let second = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();

        let weak = h
            .service
            .change_password(
                &first.tokens.access_claims,
                &Password::new(PASSWORD.to_string()),
                &Password::new("short".to_string()),
                &client(),
            )
            .await
            .unwrap_err();
        assert!(matches!(weak, ServiceError::Validation(ref errors) if errors.len() == 3));

        let revoked = h
            .service
            .change_password(
                &first.tokens.access_claims,
                &Password::new(PASSWORD.to_string()),
                &Password::new("N3wPassword".to_string()),
                &client(),
            )
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        assert!(h
            .service
            .verify(&second.tokens.access_token, &client())
            .await
            .is_err());
        h.service
            .login(login_cmd("a@b.com", "N3wPassword"), &client())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn sessions_of_others_cannot_be_revoked() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        register(&h, "c@d.com").await;
        let mine = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        let theirs = h
            .service
            .login(login_cmd("c@d.com", PASSWORD), &client())
            .await
            .unwrap();

        let err = h
            .service
            .revoke_session(
                &mine.tokens.access_claims,
                &theirs.session.session_id,
                &client(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn onboarding_reissues_access_for_same_session() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let login = h
            .service
            .login(login_cmd("a@b.com", PASSWORD), &client())
            .await
            .unwrap();
        assert!(!login.tokens.access_claims.is_onboarding_completed);

        let (user, access) = h
            .service
            .complete_onboarding(&login.tokens.access_claims, &client())
            .await
            .unwrap();
        assert!(user.is_onboarding_completed);
        assert!(access.claims.is_onboarding_completed);
        assert_eq!(access.claims.session_id, login.session.session_id);
    }

    #[tokio::test]
    async fn duplicate_registration_conflicts() {
        let h = harness().await;
        register(&h, "a@b.com").await;
        let err = h
            .service
            .register(
                RegisterCommand {
                    email: "A@B.com".to_string(),
                    name: None,
                    password: Password::new(PASSWORD.to_string()),
                },
                &client(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::AlreadyExists(_)));
    }
}
