//! Fixed-window attempt limiter with escalation to a hard block.
//!
//! Each key gets `max_attempts` per window. The attempt that exceeds the cap
//! puts the key in a block that lasts `block_duration` (never shorter than the
//! window), so waiting for the window to roll over does not lift it.
//!
//! Counters live behind [`AttemptStore`]: in process for a single instance,
//! in Redis when several instances share one budget.

use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Client};
use std::{sync::Arc, time::Duration};
use tokio::time::Instant;

use crate::config::LimitPolicyConfig;
use crate::models::ClientContext;

/// Window state after one increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub resets_in: Duration,
}

/// Storage contract for attempt counters and blocks. `increment` must be
/// atomic per key: two concurrent calls never observe the same count.
#[async_trait]
pub trait AttemptStore: Send + Sync {
    /// Count one attempt, opening a new window if none is live.
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, anyhow::Error>;
    async fn block(&self, key: &str, duration: Duration) -> Result<(), anyhow::Error>;
    /// Time left on an active block, if any.
    async fn block_remaining(&self, key: &str) -> Result<Option<Duration>, anyhow::Error>;
    /// Drop the window for `key`. Missing keys are fine.
    async fn reset(&self, key: &str) -> Result<(), anyhow::Error>;
    /// Remove expired windows and blocks. Returns how many entries went away.
    async fn purge_expired(&self) -> Result<usize, anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Debug, Clone, Copy)]
struct Window {
    count: u32,
    expires_at: Instant,
}

/// Process-local store. Per-key atomicity comes from the map's entry lock.
#[derive(Default)]
pub struct InMemoryAttemptStore {
    windows: DashMap<String, Window>,
    blocks: DashMap<String, Instant>,
}

impl InMemoryAttemptStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AttemptStore for InMemoryAttemptStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, anyhow::Error> {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });

        if entry.expires_at <= now {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count = entry.count.saturating_add(1);

        Ok(WindowState {
            count: entry.count,
            resets_in: entry.expires_at.saturating_duration_since(now),
        })
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), anyhow::Error> {
        self.blocks
            .insert(key.to_string(), Instant::now() + duration);
        Ok(())
    }

    async fn block_remaining(&self, key: &str) -> Result<Option<Duration>, anyhow::Error> {
        let now = Instant::now();
        let until = self.blocks.get(key).map(|entry| *entry);

        match until {
            Some(until) if until > now => Ok(Some(until - now)),
            Some(_) => {
                self.blocks.remove_if(key, |_, until| *until <= now);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn reset(&self, key: &str) -> Result<(), anyhow::Error> {
        self.windows.remove(key);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<usize, anyhow::Error> {
        let now = Instant::now();
        let before = self.windows.len() + self.blocks.len();
        self.windows.retain(|_, w| w.expires_at > now);
        self.blocks.retain(|_, until| *until > now);
        Ok(before.saturating_sub(self.windows.len() + self.blocks.len()))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}

/// INCR, arm the expiry on the first hit, report count and remaining ms.
const INCREMENT_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

/// Shared store for multi-instance deployments. Redis key expiry does the
/// sweeping.
#[derive(Clone)]
pub struct RedisAttemptStore {
    _client: Client,
    manager: ConnectionManager,
    script: Arc<redis::Script>,
}

impl RedisAttemptStore {
    pub async fn new(url: &str) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis for rate limiting");
        let client = Client::open(url)?;

        // Use ConnectionManager for automatic reconnection
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        Ok(Self {
            _client: client,
            manager,
            script: Arc::new(redis::Script::new(INCREMENT_SCRIPT)),
        })
    }

    fn window_key(key: &str) -> String {
        format!("rate_limit:window:{}", key)
    }

    fn block_key(key: &str) -> String {
        format!("rate_limit:block:{}", key)
    }
}

#[async_trait]
impl AttemptStore for RedisAttemptStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<WindowState, anyhow::Error> {
        let mut conn = self.manager.clone();
        let (count, ttl_ms): (u32, i64) = self
            .script
            .key(Self::window_key(key))
            .arg(window.as_millis() as u64)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment attempt counter: {}", e))?;

        Ok(WindowState {
            count,
            resets_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn block(&self, key: &str, duration: Duration) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(Self::block_key(key))
            .arg("blocked")
            .arg("PX")
            .arg(duration.as_millis() as u64)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set block: {}", e))
    }

    async fn block_remaining(&self, key: &str) -> Result<Option<Duration>, anyhow::Error> {
        let mut conn = self.manager.clone();
        let ttl_ms: i64 = redis::cmd("PTTL")
            .arg(Self::block_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to read block: {}", e))?;

        Ok((ttl_ms > 0).then(|| Duration::from_millis(ttl_ms as u64)))
    }

    async fn reset(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(Self::window_key(key))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to reset attempt counter: {}", e))
    }

    async fn purge_expired(&self) -> Result<usize, anyhow::Error> {
        Ok(0)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub max_attempts: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl From<LimitPolicyConfig> for RateLimitPolicy {
    fn from(config: LimitPolicyConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            window: Duration::from_secs(config.window_seconds),
            block_duration: Duration::from_secs(config.block_seconds.max(config.window_seconds)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    Allowed { remaining: u32 },
    Blocked { retry_after: u64 },
}

impl RateLimitDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitDecision::Allowed { .. })
    }
}

/// Derives the limiter key from the caller.
pub type KeyFn = Arc<dyn Fn(&ClientContext) -> String + Send + Sync>;

/// Whole seconds, rounded up, never zero.
fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

#[derive(Clone)]
pub struct RateLimiter {
    name: String,
    policy: RateLimitPolicy,
    store: Arc<dyn AttemptStore>,
    key_fn: KeyFn,
}

impl RateLimiter {
    /// Keyed by client IP unless [`RateLimiter::with_key_fn`] says otherwise.
    pub fn new(
        name: impl Into<String>,
        policy: RateLimitPolicy,
        store: Arc<dyn AttemptStore>,
    ) -> Self {
        Self {
            name: name.into(),
            policy,
            store,
            key_fn: Arc::new(|client: &ClientContext| client.ip_address.clone()),
        }
    }

    pub fn with_key_fn(mut self, key_fn: KeyFn) -> Self {
        self.key_fn = key_fn;
        self
    }

    pub fn policy(&self) -> RateLimitPolicy {
        self.policy
    }

    pub fn store(&self) -> &Arc<dyn AttemptStore> {
        &self.store
    }

    fn key(&self, client: &ClientContext) -> String {
        format!("{}:{}", self.name, (self.key_fn)(client))
    }

    /// Count one attempt for this caller and decide whether it may proceed.
    pub async fn check(&self, client: &ClientContext) -> Result<RateLimitDecision, anyhow::Error> {
        let key = self.key(client);

        if let Some(remaining) = self.store.block_remaining(&key).await? {
            return Ok(RateLimitDecision::Blocked {
                retry_after: retry_after_secs(remaining),
            });
        }

        // The window stays on escalation so an attempt racing it still counts over the cap.
        let state = self.store.increment(&key, self.policy.window).await?;
        if state.count > self.policy.max_attempts {
            if let Some(remaining) = self.store.block_remaining(&key).await? {
                return Ok(RateLimitDecision::Blocked {
                    retry_after: retry_after_secs(remaining),
                });
            }
            self.store.block(&key, self.policy.block_duration).await?;
            tracing::warn!(
                limiter = %self.name,
                ip = %client.ip_address,
                attempts = state.count,
                block_seconds = self.policy.block_duration.as_secs(),
                "Rate limit exceeded, key blocked"
            );
            return Ok(RateLimitDecision::Blocked {
                retry_after: retry_after_secs(self.policy.block_duration),
            });
        }

        Ok(RateLimitDecision::Allowed {
            remaining: self.policy.max_attempts - state.count,
        })
    }

    /// Forget prior attempts after a success. Active blocks stay in place.
    pub async fn reset(&self, client: &ClientContext) -> Result<(), anyhow::Error> {
        self.store.reset(&self.key(client)).await
    }
}
