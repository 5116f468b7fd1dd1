use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::collections::HashMap;

use crate::models::{DeviceInfo, Session, SessionStatus};

/// Live sessions per user.
///
/// Revoked session ids are remembered (tombstoned) until every token minted
/// for them has expired, which lets `status` tell an ended session apart from
/// one the registry never saw.
#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Insert or overwrite the entry for `session_id`, stamping activity now.
    async fn record_session(&self, user_id: &str, session_id: &str, device: DeviceInfo) -> Session;
    async fn list_sessions(&self, user_id: &str) -> Vec<Session>;
    async fn find(&self, session_id: &str) -> Option<Session>;
    /// Bump `last_activity_at`. Returns the updated entry, if it exists.
    async fn touch(&self, session_id: &str) -> Option<Session>;
    async fn revoke(&self, session_id: &str) -> bool;
    /// Returns how many sessions were removed.
    async fn revoke_all(&self, user_id: &str) -> usize;
    async fn revoke_all_except(&self, user_id: &str, keep_session_id: &str) -> usize;
    async fn status(&self, session_id: &str) -> SessionStatus;
    async fn purge_expired_tombstones(&self) -> usize;
}

pub struct InMemorySessionRegistry {
    by_user: DashMap<String, HashMap<String, Session>>,
    owners: DashMap<String, String>,
    tombstones: DashMap<String, DateTime<Utc>>,
    tombstone_ttl: Duration,
}

impl InMemorySessionRegistry {
    pub fn new(tombstone_ttl: Duration) -> Self {
        Self {
            by_user: DashMap::new(),
            owners: DashMap::new(),
            tombstones: DashMap::new(),
            tombstone_ttl,
        }
    }

    fn bury(&self, session_id: &str) {
        self.owners.remove(session_id);
        self.tombstones
            .insert(session_id.to_string(), Utc::now() + self.tombstone_ttl);
    }

    fn drain_user<F>(&self, user_id: &str, keep: F) -> usize
    where
        F: Fn(&str) -> bool,
    {
        let removed: Vec<String> = match self.by_user.get_mut(user_id) {
            Some(mut sessions) => {
                let ids: Vec<String> = sessions
                    .keys()
                    .filter(|id| !keep(id.as_str()))
                    .cloned()
                    .collect();
                for id in &ids {
                    sessions.remove(id);
                }
                ids
            }
            None => Vec::new(),
        };

        self.by_user.remove_if(user_id, |_, sessions| sessions.is_empty());
        for id in &removed {
            self.bury(id);
        }
        removed.len()
    }
}

#[async_trait]
impl SessionRegistry for InMemorySessionRegistry {
    async fn record_session(&self, user_id: &str, session_id: &str, device: DeviceInfo) -> Session {
        let now = Utc::now();
        let session = Session {
            session_id: session_id.to_string(),
            user_id: user_id.to_string(),
            device_id: device.device_id,
            ip_address: device.ip_address,
            user_agent: device.user_agent,
            created_at: now,
            last_activity_at: now,
        };

        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(session_id.to_string(), session.clone());
        self.owners
            .insert(session_id.to_string(), user_id.to_string());
        self.tombstones.remove(session_id);

        session
    }

    async fn list_sessions(&self, user_id: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .by_user
            .get(user_id)
            .map(|sessions| sessions.values().cloned().collect())
            .unwrap_or_default();
        sessions.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        sessions
    }

    async fn find(&self, session_id: &str) -> Option<Session> {
        let user_id = self.owners.get(session_id)?.clone();
        let sessions = self.by_user.get(&user_id)?;
        sessions.get(session_id).cloned()
    }

    async fn touch(&self, session_id: &str) -> Option<Session> {
        let user_id = self.owners.get(session_id)?.clone();
        let mut sessions = self.by_user.get_mut(&user_id)?;
        let session = sessions.get_mut(session_id)?;
        session.last_activity_at = Utc::now();
        Some(session.clone())
    }

    async fn revoke(&self, session_id: &str) -> bool {
        let owner = self.owners.get(session_id).map(|o| o.clone());
        let removed = match owner {
            Some(user_id) => {
                let removed = self
                    .by_user
                    .get_mut(&user_id)
                    .map(|mut sessions| sessions.remove(session_id).is_some())
                    .unwrap_or(false);
                self.by_user
                    .remove_if(&user_id, |_, sessions| sessions.is_empty());
                removed
            }
            None => false,
        };

        // Tombstone even unknown ids so tokens of a pre-restart session can
        // still be logged out for good.
        self.bury(session_id);
        removed
    }

    async fn revoke_all(&self, user_id: &str) -> usize {
        self.drain_user(user_id, |_| false)
    }

    async fn revoke_all_except(&self, user_id: &str, keep_session_id: &str) -> usize {
        self.drain_user(user_id, |id| id == keep_session_id)
    }

    async fn status(&self, session_id: &str) -> SessionStatus {
        if let Some(session) = self.find(session_id).await {
            return SessionStatus::Active(session);
        }

        let buried_until = self.tombstones.get(session_id).map(|t| *t);
        match buried_until {
            Some(until) if until > Utc::now() => SessionStatus::Revoked,
            _ => SessionStatus::Unknown,
        }
    }

    async fn purge_expired_tombstones(&self) -> usize {
        let now = Utc::now();
        let before = self.tombstones.len();
        self.tombstones.retain(|_, until| *until > now);
        before.saturating_sub(self.tombstones.len())
    }
}
