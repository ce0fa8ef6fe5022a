//! Configured relay accounts and their sessions.

use crate::config::{AccountConfig, MqttConfig};
use crate::directory::DeviceDirectory;
use crate::error::{BridgeError, Result};
use crate::transport::TransportSession;
use log::{info, warn};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

pub struct AccountRegistry {
    sessions: RwLock<HashMap<String, Arc<TransportSession>>>,
    directory: Arc<DeviceDirectory>,
}

impl AccountRegistry {
    pub fn new(directory: Arc<DeviceDirectory>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            directory,
        }
    }

    pub fn directory(&self) -> &Arc<DeviceDirectory> {
        &self.directory
    }

    /// Deploy an account. A session already deployed under the same id is
    /// shut down and replaced. When the account has a web API configured,
    /// its device list is fetched in the background.
    pub fn configure(&self, account: AccountConfig, mqtt: MqttConfig) -> Arc<TransportSession> {
        let id = account.id.clone();
        let session = TransportSession::new(account, mqtt);

        let previous = self.sessions.write().insert(id.clone(), session.clone());
        if let Some(previous) = previous {
            info!("[MQTT] Replacing session for account {}", id);
            previous.shutdown();
        }

        if session.account().web_api_url.is_some() {
            self.spawn_refresh(session.account().clone());
        }
        session
    }

    pub fn get(&self, id: &str) -> Option<Arc<TransportSession>> {
        self.sessions.read().get(id).cloned()
    }

    /// Undeploy an account and close its connection.
    pub fn remove(&self, id: &str) -> bool {
        let Some(session) = self.sessions.write().remove(id) else {
            return false;
        };
        session.shutdown();
        self.directory.forget(id);
        true
    }

    pub fn account_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Re-fetch the device list of a deployed account.
    pub async fn refresh(&self, id: &str) -> Result<usize> {
        let session = self
            .get(id)
            .ok_or_else(|| BridgeError::AccountNotFound(id.to_string()))?;
        let account = session.account();
        let Some(url) = account.web_api_url.as_deref() else {
            return Err(BridgeError::Config(format!(
                "account {} has no web API URL",
                id
            )));
        };
        self.directory
            .refresh(&account.id, url, &account.username, &account.password)
            .await
    }

    fn spawn_refresh(&self, account: AccountConfig) {
        let directory = self.directory.clone();
        tokio::spawn(async move {
            let Some(url) = account.web_api_url.as_deref() else {
                return;
            };
            if let Err(e) = directory
                .refresh(&account.id, url, &account.username, &account.password)
                .await
            {
                warn!("[Directory] Initial lookup for {} failed: {}", account.id, e);
            }
        });
    }

    /// Close every session.
    pub fn shutdown(&self) {
        for (_, session) in self.sessions.write().drain() {
            session.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::transport::RegisteredHandler;

    fn account(id: &str) -> (AccountConfig, MqttConfig) {
        let mut config = Config::default();
        config.account.id = id.to_string();
        config.account.username = format!("{}-user", id);
        config.account.web_api_url = None;
        config.mqtt.broker_host = "127.0.0.1".to_string();
        config.mqtt.broker_port = Some(1);
        config.mqtt.reconnect_secs = 60;
        (config.account, config.mqtt)
    }

    fn registry() -> AccountRegistry {
        AccountRegistry::new(Arc::new(DeviceDirectory::new()))
    }

    #[tokio::test]
    async fn test_configure_and_lookup() {
        let registry = registry();
        let (a, m) = account("b");
        registry.configure(a, m);
        let (a, m) = account("a");
        registry.configure(a, m);

        assert_eq!(registry.account_ids(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().account().username, "a-user");
        assert!(registry.get("c").is_none());
    }

    #[tokio::test]
    async fn test_reconfigure_shuts_down_previous() {
        let registry = registry();
        let (a, m) = account("acct");
        let old = registry.configure(a.clone(), m.clone());
        old.register(RegisteredHandler::state("s1", "lamp"));
        assert_eq!(old.handler_count(), 1);

        let new = registry.configure(a, m);
        assert_eq!(old.handler_count(), 0);
        assert!(!Arc::ptr_eq(&old, &new));
        assert!(Arc::ptr_eq(&registry.get("acct").unwrap(), &new));
    }

    #[tokio::test]
    async fn test_remove_forgets_directory() {
        let registry = registry();
        let (a, m) = account("acct");
        registry.configure(a, m);
        registry.directory().store("acct", Vec::new());

        assert!(registry.remove("acct"));
        assert!(!registry.remove("acct"));
        assert!(registry.directory().devices("acct").is_none());
    }

    #[tokio::test]
    async fn test_refresh_errors() {
        let registry = registry();
        assert!(matches!(
            registry.refresh("missing").await.unwrap_err(),
            BridgeError::AccountNotFound(_)
        ));

        let (a, m) = account("acct");
        registry.configure(a, m);
        assert!(matches!(
            registry.refresh("acct").await.unwrap_err(),
            BridgeError::Config(_)
        ));
    }
}
