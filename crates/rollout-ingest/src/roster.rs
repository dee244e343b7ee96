//! HTTP client for the device-management service's store roster lookup.

use std::time::Duration;

use reqwest::{Client, StatusCode, header};
use rollout_core::roster::{RosterDevice, RosterSource, StoreDevices};
use serde::Deserialize;
use thiserror::Error;

/// Where and how to reach the device-management service.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterConfig {
  /// Base URL, e.g. `https://devices.internal`.
  pub endpoint:      String,
  /// Path template with `{market}` and `{storeId}` placeholders.
  pub store_devices: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs:  u64,
}

fn default_timeout_secs() -> u64 { 30 }

#[derive(Debug, Error)]
pub enum RosterError {
  #[error("roster request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("roster lookup returned {0}")]
  Status(StatusCode),
}

/// [`RosterSource`] over HTTP.
///
/// Cheap to clone; the inner [`reqwest::Client`] is `Arc`-based.
#[derive(Clone)]
pub struct HttpRosterClient {
  client: Client,
  config: RosterConfig,
}

impl HttpRosterClient {
  pub fn new(config: RosterConfig) -> Result<Self, RosterError> {
    let client = Client::builder()
      .timeout(Duration::from_secs(config.timeout_secs))
      .build()?;
    Ok(Self { client, config })
  }

  /// The lookup URL for one store.
  pub fn url(&self, market: &str, store_id: &str) -> String {
    let path = self
      .config
      .store_devices
      .replace("{market}", market)
      .replace("{storeId}", store_id);
    format!(
      "{}/{}",
      self.config.endpoint.trim_end_matches('/'),
      path.trim_start_matches('/')
    )
  }
}

impl RosterSource for HttpRosterClient {
  type Error = RosterError;

  async fn store_devices(
    &self,
    market: &str,
    store_id: &str,
  ) -> Result<Vec<RosterDevice>, RosterError> {
    let resp = self
      .client
      .get(self.url(market, store_id))
      .header(header::ACCEPT, "application/json")
      .send()
      .await?;

    if !resp.status().is_success() {
      return Err(RosterError::Status(resp.status()));
    }
    let body: StoreDevices = resp.json().await?;
    Ok(body.devices)
  }
}
