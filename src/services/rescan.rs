//! Audiobookshelf rescan notification
//!
//! After a successful organize we poke the library server so the new
//! book shows up without waiting for its own scan schedule. Failures are
//! logged and swallowed; the library copy is already in place.

use reqwest::Client;
use tracing::{debug, info, warn};

use crate::config::Config;

pub struct RescanNotifier {
    client: Client,
    base_url: Option<String>,
    api_key: Option<String>,
}

impl RescanNotifier {
    pub fn new(config: &Config) -> Self {
        Self {
            client: Client::new(),
            base_url: config.abs_url.clone(),
            api_key: config.abs_api_key.clone(),
        }
    }

    pub async fn notify(&self) {
        let Some(base_url) = self.base_url.as_deref() else {
            debug!("No library server configured, skipping rescan notification");
            return;
        };

        let url = format!("{}/api/libraries/scan", base_url.trim_end_matches('/'));
        let mut request = self.client.post(&url);
        if let Some(key) = self.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                info!(url = %url, "Triggered library rescan")
            }
            Ok(response) => {
                warn!(url = %url, status = %response.status(), "Library rescan request rejected")
            }
            Err(e) => warn!(url = %url, error = %e, "Library rescan request failed"),
        }
    }
}
