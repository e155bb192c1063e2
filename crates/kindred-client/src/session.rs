use std::sync::RwLock;

use async_trait::async_trait;

use kindred_shared::{SessionProvider, UserId};

/// Session provider holding the signed-in user in memory. Credential
/// issuance happens elsewhere; this only records its result.
#[derive(Debug, Default)]
pub struct StaticSession {
    user: RwLock<Option<UserId>>,
}

impl StaticSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(user: UserId) -> Self {
        Self {
            user: RwLock::new(Some(user)),
        }
    }

    pub fn set_user(&self, user: Option<UserId>) {
        *self.user.write().unwrap_or_else(|p| p.into_inner()) = user;
    }

    pub fn user(&self) -> Option<UserId> {
        *self.user.read().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl SessionProvider for StaticSession {
    async fn current_user(&self) -> Option<UserId> {
        self.user()
    }
}
