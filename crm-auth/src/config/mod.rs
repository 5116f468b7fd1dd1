use secrecy::{ExposeSecret, SecretString};
use service_core::config as core_config;
use service_core::error::AppError;
use std::{env, str::FromStr};

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub otlp_endpoint: Option<String>,
    pub jwt: JwtConfig,
    pub rate_limit: RateLimitConfig,
    pub session: SessionConfig,
    pub cookies: CookieConfig,
    pub totp: TotpConfig,
    pub password: PasswordHashConfig,
    pub store: StoreConfig,
    pub security: SecurityConfig,
    pub swagger: SwaggerConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub access_secret: SecretString,
    pub refresh_secret: SecretString,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitPolicyConfig {
    pub max_attempts: u32,
    pub window_seconds: u64,
    pub block_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub login: LimitPolicyConfig,
    pub register: LimitPolicyConfig,
    pub sweep_interval_seconds: u64,
    pub backend: RateLimitBackend,
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Reject tokens whose session id the registry does not know.
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub secure: bool,
    pub domain: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TotpConfig {
    pub issuer: String,
    pub backup_code_count: usize,
}

/// Argon2id cost parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordHashConfig {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl PasswordHashConfig {
    /// OWASP floor for Argon2id (19 MiB, 2 passes, 1 lane).
    pub const MINIMUM: PasswordHashConfig = PasswordHashConfig {
        memory_kib: 19_456,
        iterations: 2,
        parallelism: 1,
    };
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwaggerMode {
    Public,
    Disabled,
}

/// Env-style key lookup; `from_env` uses the process environment.
struct Source<F> {
    lookup: F,
    is_prod: bool,
}

impl<F> Source<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str, default: &str) -> String {
        (self.lookup)(key).unwrap_or_else(|| default.to_string())
    }

    fn optional(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    /// Secrets have a throwaway default in dev and are mandatory in prod.
    fn secret(&self, key: &str, dev_default: &str) -> Result<SecretString, AppError> {
        match (self.lookup)(key) {
            Some(val) => Ok(SecretString::new(val)),
            None if self.is_prod => Err(AppError::ConfigError(anyhow::anyhow!(
                "{} is required in production but not set",
                key
            ))),
            None => Ok(SecretString::new(dev_default.to_string())),
        }
    }

    fn parse<T>(&self, key: &str, default: &str) -> Result<T, AppError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get(key, default);
        raw.trim().parse::<T>().map_err(|e| {
            AppError::ConfigError(anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e))
        })
    }

    fn policy(&self, prefix: &str, defaults: (u32, u64, u64)) -> Result<LimitPolicyConfig, AppError> {
        Ok(LimitPolicyConfig {
            max_attempts: self.parse(
                &format!("RATE_LIMIT_{}_MAX_ATTEMPTS", prefix),
                &defaults.0.to_string(),
            )?,
            window_seconds: self.parse(
                &format!("RATE_LIMIT_{}_WINDOW_SECONDS", prefix),
                &defaults.1.to_string(),
            )?,
            block_seconds: self.parse(
                &format!("RATE_LIMIT_{}_BLOCK_SECONDS", prefix),
                &defaults.2.to_string(),
            )?,
        })
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;
        Self::from_lookup(common_config, |key| env::var(key).ok())
    }

    pub fn from_lookup<F>(common: core_config::Config, lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let environment: Environment = lookup("ENVIRONMENT")
            .unwrap_or_else(|| "dev".to_string())
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;
        let src = Source { lookup, is_prod };

        let config = AuthConfig {
            common,
            environment,
            service_name: src.get("SERVICE_NAME", "crm-auth"),
            service_version: src.get("SERVICE_VERSION", env!("CARGO_PKG_VERSION")),
            log_level: src.get("LOG_LEVEL", "info"),
            otlp_endpoint: src.optional("OTLP_ENDPOINT"),
            jwt: JwtConfig {
                access_secret: src.secret(
                    "JWT_ACCESS_SECRET",
                    "dev-access-secret-change-me-0123456789",
                )?,
                refresh_secret: src.secret(
                    "JWT_REFRESH_SECRET",
                    "dev-refresh-secret-change-me-0123456789",
                )?,
                issuer: src.get("JWT_ISSUER", "crm-auth"),
                audience: src.get("JWT_AUDIENCE", "crm-app"),
                access_token_ttl_minutes: src.parse("JWT_ACCESS_TOKEN_TTL_MINUTES", "15")?,
                refresh_token_ttl_days: src.parse("JWT_REFRESH_TOKEN_TTL_DAYS", "7")?,
            },
            rate_limit: RateLimitConfig {
                login: src.policy("LOGIN", (5, 900, 1800))?,
                register: src.policy("REGISTER", (3, 3600, 3600))?,
                sweep_interval_seconds: src.parse("RATE_LIMIT_SWEEP_INTERVAL_SECONDS", "60")?,
                backend: src.parse("RATE_LIMIT_BACKEND", "memory")?,
                redis_url: src.optional("REDIS_URL"),
            },
            session: SessionConfig {
                strict: src.parse("SESSION_STRICT", "false")?,
            },
            cookies: CookieConfig {
                secure: is_prod,
                domain: src.optional("COOKIE_DOMAIN"),
            },
            totp: TotpConfig {
                issuer: src.get("TOTP_ISSUER", "CRM"),
                backup_code_count: src.parse("TOTP_BACKUP_CODE_COUNT", "10")?,
            },
            password: PasswordHashConfig {
                memory_kib: src.parse(
                    "PASSWORD_HASH_MEMORY_KIB",
                    &PasswordHashConfig::MINIMUM.memory_kib.to_string(),
                )?,
                iterations: src.parse(
                    "PASSWORD_HASH_ITERATIONS",
                    &PasswordHashConfig::MINIMUM.iterations.to_string(),
                )?,
                parallelism: src.parse(
                    "PASSWORD_HASH_PARALLELISM",
                    &PasswordHashConfig::MINIMUM.parallelism.to_string(),
                )?,
            },
            store: StoreConfig {
                timeout_ms: src.parse("STORE_TIMEOUT_MS", "5000")?,
            },
            security: SecurityConfig {
                allowed_origins: src
                    .get("ALLOWED_ORIGINS", "http://localhost:3000")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            },
            swagger: SwaggerConfig {
                enabled: src.parse("ENABLE_SWAGGER", if is_prod { "disabled" } else { "public" })?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn is_prod(&self) -> bool {
        self.environment == Environment::Prod
    }

    fn validate(&self) -> Result<(), AppError> {
        let fail = |msg: &str| Err(AppError::ConfigError(anyhow::anyhow!(msg.to_string())));

        if self.common.port == 0 {
            return fail("PORT must be greater than 0");
        }

        if self.jwt.access_token_ttl_minutes <= 0 {
            return fail("JWT_ACCESS_TOKEN_TTL_MINUTES must be positive");
        }

        if self.jwt.refresh_token_ttl_days <= 0 {
            return fail("JWT_REFRESH_TOKEN_TTL_DAYS must be positive");
        }

        if self.jwt.access_secret.expose_secret() == self.jwt.refresh_secret.expose_secret() {
            return fail("JWT_ACCESS_SECRET and JWT_REFRESH_SECRET must differ");
        }

        for (name, policy) in [
            ("LOGIN", &self.rate_limit.login),
            ("REGISTER", &self.rate_limit.register),
        ] {
            if policy.max_attempts == 0 || policy.window_seconds == 0 {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "RATE_LIMIT_{} attempts and window must be positive",
                    name
                )));
            }
            if policy.block_seconds < policy.window_seconds {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "RATE_LIMIT_{}_BLOCK_SECONDS must be at least the window",
                    name
                )));
            }
        }

        if self.rate_limit.sweep_interval_seconds == 0 {
            return fail("RATE_LIMIT_SWEEP_INTERVAL_SECONDS must be positive");
        }

        if self.rate_limit.backend == RateLimitBackend::Redis && self.rate_limit.redis_url.is_none()
        {
            return fail("REDIS_URL is required when RATE_LIMIT_BACKEND=redis");
        }

        if self.totp.issuer.contains(':') {
            return fail("TOTP_ISSUER must not contain ':'");
        }

        if self.totp.backup_code_count == 0 {
            return fail("TOTP_BACKUP_CODE_COUNT must be positive");
        }

        if self.store.timeout_ms == 0 {
            return fail("STORE_TIMEOUT_MS must be positive");
        }

        // In production, ensure stricter validation
        if self.is_prod() {
            if self.jwt.access_secret.expose_secret().len() < 32
                || self.jwt.refresh_secret.expose_secret().len() < 32
            {
                return fail("JWT secrets must be at least 32 bytes in production");
            }

            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return fail("Wildcard CORS origin not allowed in production");
            }

            let min = PasswordHashConfig::MINIMUM;
            if self.password.memory_kib < min.memory_kib
                || self.password.iterations < min.iterations
                || self.password.parallelism < min.parallelism
            {
                return fail("Password hashing cost is below the production minimum");
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger is publicly accessible in production");
            }
        }

        Ok(())
    }
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}

impl FromStr for RateLimitBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" => Ok(RateLimitBackend::Memory),
            "redis" => Ok(RateLimitBackend::Redis),
            _ => Err(format!("Invalid rate limit backend: {}", s)),
        }
    }
}
