//! Device rosters: what a store is expected to report on.
//!
//! The roster comes from an external device-management service via
//! [`RosterSource`]. It is filtered by deployment-specific rules and then
//! frozen into a [`DeviceStats`] snapshot on the store.

use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::deployment::{DeploymentStore, DeviceStats};

/// One device as listed by the device-management service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterDevice {
  pub device_name: String,
  pub device_type: String,
}

impl RosterDevice {
  pub fn new(device_name: impl Into<String>, device_type: impl Into<String>) -> Self {
    Self { device_name: device_name.into(), device_type: device_type.into() }
  }

  fn is_type(&self, device_type: &str) -> bool {
    self.device_type.trim().eq_ignore_ascii_case(device_type)
  }
}

/// The response body of a store-devices lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDevices {
  #[serde(default)]
  pub store_id: Option<String>,
  #[serde(default)]
  pub devices:  Vec<RosterDevice>,
}

impl DeploymentStore {
  /// Kiosk-only deployments apply to CSO devices alone.
  pub fn is_kiosk_only(&self) -> bool {
    matches!(
      self.components.as_slice(),
      [only] if only.software.trim().eq_ignore_ascii_case("kiosk")
    )
  }

  /// Apply the inclusion/exclusion rules for this store's components.
  pub fn filter_roster(&self, mut devices: Vec<RosterDevice>) -> Vec<RosterDevice> {
    if self.is_kiosk_only() {
      devices.retain(|d| d.is_type("CSO"));
    } else {
      devices.retain(|d| !d.is_type("RHS"));
    }
    devices
  }

  /// Filter `devices` and freeze them into a snapshot.
  ///
  /// `None` when nothing survives the filter; an empty roster is never
  /// cached.
  pub fn roster_snapshot(
    &self,
    devices: Vec<RosterDevice>,
    collected_on: DateTime<Utc>,
  ) -> Option<DeviceStats> {
    let kept = self.filter_roster(devices);
    DeviceStats::new(kept.iter().map(|d| d.device_name.as_str()), collected_on)
  }
}

/// Abstraction over the device-management service.
pub trait RosterSource: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// List every device registered for `store_id` in `market`.
  fn store_devices<'a>(
    &'a self,
    market: &'a str,
    store_id: &'a str,
  ) -> impl Future<Output = Result<Vec<RosterDevice>, Self::Error>> + Send + 'a;
}
