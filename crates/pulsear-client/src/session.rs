use std::sync::{Arc, RwLock};

use pulsear_types::{ClientRef, DashboardInfo, UserConfig};

/// Session context shared by the control channel, the worker pool and the
/// coordinator. Only the control channel writes to it.
#[derive(Clone)]
pub struct Session {
    inner: Arc<RwLock<SessionInner>>,
}

struct SessionInner {
    identity: ClientRef,
    config: UserConfig,
    dashboard: Option<DashboardInfo>,
}

impl Session {
    pub fn new(username: impl Into<String>, config: UserConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SessionInner {
                identity: ClientRef::new(username, ""),
                config,
                dashboard: None,
            })),
        }
    }

    /// Current identity; `user_ctx_hash` is empty until the server named us.
    pub fn identity(&self) -> ClientRef {
        self.inner.read().expect("session lock poisoned").identity.clone()
    }

    pub fn username(&self) -> String {
        self.inner.read().expect("session lock poisoned").identity.username.clone()
    }

    pub fn has_user(&self) -> bool {
        !self.inner.read().expect("session lock poisoned").identity.username.is_empty()
    }

    /// Record the server-assigned session hash.
    pub fn set_ctx_hash(&self, hash: impl Into<String>) {
        self.inner.write().expect("session lock poisoned").identity.user_ctx_hash = hash.into();
    }

    /// Whether `ctx_hash` names this session. `None` while it is still unknown.
    pub fn is_me(&self, ctx_hash: &str) -> Option<bool> {
        let inner = self.inner.read().expect("session lock poisoned");
        if inner.identity.user_ctx_hash.is_empty() {
            return None;
        }
        Some(inner.identity.user_ctx_hash == ctx_hash)
    }

    pub fn config(&self) -> UserConfig {
        self.inner.read().expect("session lock poisoned").config.clone()
    }

    pub fn set_dashboard(&self, dashboard: DashboardInfo) {
        self.inner.write().expect("session lock poisoned").dashboard = Some(dashboard);
    }

    pub fn dashboard(&self) -> Option<DashboardInfo> {
        self.inner.read().expect("session lock poisoned").dashboard.clone()
    }

    /// Forget who we are (after `Leave`).
    pub fn clear(&self) {
        let mut inner = self.inner.write().expect("session lock poisoned");
        inner.identity = ClientRef::default();
        inner.dashboard = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_lifecycle() {
        let session = Session::new("alice", UserConfig::default());
        assert!(session.has_user());
        assert_eq!(session.is_me("42"), None);

        session.set_ctx_hash("42");
        assert_eq!(session.is_me("42"), Some(true));
        assert_eq!(session.is_me("43"), Some(false));
        assert_eq!(session.identity(), ClientRef::new("alice", "42"));

        session.clear();
        assert!(!session.has_user());
        assert_eq!(session.is_me("42"), None);
    }
}
