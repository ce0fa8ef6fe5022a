//! Device directory cache.
//!
//! The relay's web API lists the devices an account exposes. The list is
//! fetched on demand and cached per account id for the admin surface.

use crate::error::{BridgeError, Result};
use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::RwLock;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

const DEVICES_PATH: &str = "/api/v1/devices";

/// One device as listed by the web API. Unknown attributes are kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "endpointId", default)]
    pub endpoint_id: String,
    #[serde(rename = "friendlyName", default)]
    pub friendly_name: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryEntry {
    pub devices: Vec<Device>,
    pub fetched_at: DateTime<Utc>,
}

/// Build the listing URL. A bare host name means HTTPS.
pub fn devices_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.starts_with("http://") || base.starts_with("https://") {
        format!("{}{}", base, DEVICES_PATH)
    } else {
        format!("https://{}{}", base, DEVICES_PATH)
    }
}

pub struct DeviceDirectory {
    client: Client,
    entries: RwLock<HashMap<String, DirectoryEntry>>,
}

impl DeviceDirectory {
    pub fn new() -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Fetch the device list for an account and cache it.
    ///
    /// On any failure the previous entry, if any, stays in place.
    pub async fn refresh(
        &self,
        account_id: &str,
        base_url: &str,
        username: &str,
        password: &str,
    ) -> Result<usize> {
        let url = devices_url(base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(username, Some(password))
            .send()
            .await
            .inspect_err(|e| {
                warn!(
                    "[Directory] Unable to look up devices for username {}: {}",
                    username, e
                )
            })?;

        if !response.status().is_success() {
            warn!(
                "[Directory] Device lookup for {} returned {}",
                username,
                response.status()
            );
            return Err(BridgeError::Directory(format!(
                "{} returned {}",
                url,
                response.status()
            )));
        }

        let devices: Vec<Device> = response.json().await.inspect_err(|e| {
            warn!(
                "[Directory] Unreadable device list for username {}: {}",
                username, e
            )
        })?;
        let count = devices.len();
        self.store(account_id, devices);
        info!(
            "[Directory] Cached {} device(s) for account {}",
            count, account_id
        );
        Ok(count)
    }

    pub fn store(&self, account_id: &str, devices: Vec<Device>) {
        self.entries.write().insert(
            account_id.to_string(),
            DirectoryEntry {
                devices,
                fetched_at: Utc::now(),
            },
        );
    }

    pub fn devices(&self, account_id: &str) -> Option<DirectoryEntry> {
        self.entries.read().get(account_id).cloned()
    }

    pub fn forget(&self, account_id: &str) -> bool {
        self.entries.write().remove(account_id).is_some()
    }
}

impl Default for DeviceDirectory {
    fn default() -> Self {
        Self::new()
    }
}
