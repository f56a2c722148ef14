//! Persistent maintenance and banner state.
//!
//! The admin API mutates a single small state document; the request path
//! only ever reads it. The document lives in memory behind a
//! [`RwLock`] and is flushed to a JSON file on every mutation, so a
//! restart picks up where the operator left off. A missing or unreadable
//! file degrades to the all-off default rather than blocking startup.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;

use crate::{GatewayError, Result};

/// The operator-controlled state document.
#[derive(Debug, Default, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayState {
    /// Maintenance applies to every host when set.
    pub global_maintenance: bool,
    /// Hostnames under maintenance individually.
    pub maintenance_subdomains: Vec<String>,
    /// First DNS labels of hosts that get the announcement banner.
    pub banner_subdomains: Vec<String>,
    /// The announcement banner text. `None` or empty disables the banner.
    pub banner_message: Option<String>,
}

impl GatewayState {
    /// Returns `true` if the given request host is under maintenance,
    /// either globally or by list membership.
    pub fn is_maintenance(&self, host: &str) -> bool {
        self.global_maintenance || self.maintenance_subdomains.iter().any(|h| h == host)
    }

    /// Returns the banner message applying to the given host, if any.
    /// Banner membership is keyed by the host's first DNS label.
    pub fn banner_for(&self, host: &str) -> Option<&str> {
        let message = self.banner_message.as_deref().filter(|m| !m.is_empty())?;
        let label = host.split('.').next().unwrap_or(host);
        self.banner_subdomains
            .iter()
            .any(|s| s == label)
            .then_some(message)
    }
}

/// File-backed store for [`GatewayState`].
#[derive(Debug)]
pub struct StateStore {
    path: PathBuf,
    state: RwLock<GatewayState>,
}

impl StateStore {
    /// Opens the store at `path`, loading existing state if the file is
    /// present and readable. Corrupt or missing state starts from the
    /// default document; the file is (re)created on the first mutation.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match std::fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "state file unreadable, starting fresh");
                GatewayState::default()
            }),
            Err(_) => GatewayState::default(),
        };

        Self {
            path,
            state: RwLock::new(state),
        }
    }

    /// Returns a copy of the current state.
    pub async fn snapshot(&self) -> GatewayState {
        self.state.read().await.clone()
    }

    /// Applies `mutate` to the state and persists the result before
    /// returning it. The write lock is held across the file write so
    /// concurrent admin calls serialize cleanly.
    pub async fn update<F>(&self, mutate: F) -> Result<GatewayState>
    where
        F: FnOnce(&mut GatewayState),
    {
        let mut guard = self.state.write().await;
        mutate(&mut guard);

        let serialized = serde_json::to_vec_pretty(&*guard)
            .map_err(|e| GatewayError::State(format!("failed to serialize state: {e}")))?;
        tokio::fs::write(&self.path, serialized).await.map_err(|e| {
            GatewayError::State(format!("failed to write {}: {e}", self.path.display()))
        })?;

        Ok(guard.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_state_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("edgegate-test");
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(format!("{name}-{}.json", std::process::id()))
    }

    #[test]
    fn maintenance_matches_global_or_listed_host() {
        let state = GatewayState {
            maintenance_subdomains: vec!["app.example.com".into()],
            ..Default::default()
        };
        assert!(state.is_maintenance("app.example.com"));
        assert!(!state.is_maintenance("other.example.com"));

        let global = GatewayState {
            global_maintenance: true,
            ..Default::default()
        };
        assert!(global.is_maintenance("anything.example.com"));
    }

    #[test]
    fn banner_matches_on_first_label() {
        let state = GatewayState {
            banner_subdomains: vec!["app".into()],
            banner_message: Some("deploy at noon".into()),
            ..Default::default()
        };
        assert_eq!(state.banner_for("app.example.com"), Some("deploy at noon"));
        assert_eq!(state.banner_for("other.example.com"), None);
    }

    #[test]
    fn empty_banner_message_disables_banner() {
        let state = GatewayState {
            banner_subdomains: vec!["app".into()],
            banner_message: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(state.banner_for("app.example.com"), None);

        let unset = GatewayState {
            banner_subdomains: vec!["app".into()],
            ..Default::default()
        };
        assert_eq!(unset.banner_for("app.example.com"), None);
    }

    #[tokio::test]
    async fn missing_file_starts_from_default_state() {
        let store = StateStore::open(temp_state_path("missing-start"));
        assert_eq!(store.snapshot().await, GatewayState::default());
    }

    #[tokio::test]
    async fn corrupt_file_starts_from_default_state() {
        let path = temp_state_path("corrupt-start");
        std::fs::write(&path, "{ not json").unwrap();
        let store = StateStore::open(&path);
        assert_eq!(store.snapshot().await, GatewayState::default());
    }

    #[tokio::test]
    async fn update_persists_across_reopen() {
        let path = temp_state_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        let store = StateStore::open(&path);
        store
            .update(|s| {
                s.global_maintenance = true;
                s.maintenance_subdomains.push("app.example.com".into());
                s.banner_message = Some("upgrading".into());
            })
            .await
            .unwrap();

        let reopened = StateStore::open(&path);
        let state = reopened.snapshot().await;
        assert!(state.global_maintenance);
        assert_eq!(state.maintenance_subdomains, vec!["app.example.com"]);
        assert_eq!(state.banner_message.as_deref(), Some("upgrading"));
    }

    #[tokio::test]
    async fn update_returns_the_new_state() {
        let path = temp_state_path("update-return");
        let _ = std::fs::remove_file(&path);

        let store = StateStore::open(&path);
        let state = store
            .update(|s| s.banner_subdomains.push("app".into()))
            .await
            .unwrap();
        assert_eq!(state.banner_subdomains, vec!["app"]);
    }
}
