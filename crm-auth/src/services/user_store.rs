use async_trait::async_trait;
use dashmap::{mapref::entry::Entry, DashMap};
use thiserror::Error;

use crate::models::{NewUser, User, UserUpdate};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} already exists")]
    Duplicate(String),

    #[error("store unavailable: {0}")]
    Unavailable(#[from] anyhow::Error),
}

/// User persistence as the auth core needs it. Lookups return `Ok(None)` for
/// a missing record; `Err` is reserved for the store itself failing.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;
    /// Apply `update` and return the updated record, or `None` if there is no such user.
    async fn update_by_id(&self, id: &str, update: UserUpdate) -> Result<Option<User>, StoreError>;
    async fn create(&self, new_user: NewUser) -> Result<User, StoreError>;
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Process-local user store with a case-insensitive email index.
#[derive(Default)]
pub struct InMemoryUserStore {
    users: DashMap<String, User>,
    by_email: DashMap<String, String>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let id = match self.by_email.get(&email_key(email)) {
            Some(id) => id.clone(),
            None => return Ok(None),
        };
        Ok(self.users.get(&id).map(|user| user.clone()))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(id).map(|user| user.clone()))
    }

    async fn update_by_id(&self, id: &str, update: UserUpdate) -> Result<Option<User>, StoreError> {
        Ok(self.users.get_mut(id).map(|mut user| {
            update.apply(&mut user);
            user.clone()
        }))
    }

    async fn create(&self, mut new_user: NewUser) -> Result<User, StoreError> {
        new_user.email = new_user.email.trim().to_string();
        let key = email_key(&new_user.email);

        // The email slot is claimed first so two concurrent registrations of
        // one address cannot both succeed.
        match self.by_email.entry(key) {
            Entry::Occupied(_) => Err(StoreError::Duplicate("User".to_string())),
            Entry::Vacant(slot) => {
                let user = User::new(new_user);
                self.users.insert(user.id.clone(), user.clone());
                slot.insert(user.id.clone());
                Ok(user)
            }
        }
    }
}
