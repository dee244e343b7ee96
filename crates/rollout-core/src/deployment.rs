//! The `Deployment` aggregate and the per-store records it owns.
//!
//! Field names serialise in camelCase so the JSON form doubles as the
//! persisted document shape, and patch paths (see [`crate::patch`]) address
//! those names directly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::{
  aggregate,
  status::{DeploymentStatus, EventType, PackageStatus, StoreStatus},
};

// ─── Workflow triggering ─────────────────────────────────────────────────────

/// Workflow templates that run ahead of the deployment proper.
pub const PRE_DEPLOYMENT_TEMPLATES: [&str; 2] = ["Initiation", "DependencyCheck"];

/// Whether `template` is one of [`PRE_DEPLOYMENT_TEMPLATES`].
pub fn is_pre_deployment_template(template: Option<&str>) -> bool {
  template.is_some_and(|t| PRE_DEPLOYMENT_TEMPLATES.contains(&t))
}

/// Which generation of workflows has been created for a deployment.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum WorkflowTrigger {
  #[default]
  NotTriggered,
  /// Pre-deployment (initiation or dependency check) workflows exist.
  FutureDeploymentTriggered,
  /// Deployment workflows exist.
  CurrentDeploymentTriggered,
}

impl WorkflowTrigger {
  pub fn for_template(template: Option<&str>) -> Self {
    if is_pre_deployment_template(template) {
      Self::FutureDeploymentTriggered
    } else {
      Self::CurrentDeploymentTriggered
    }
  }
}

impl From<WorkflowTrigger> for u8 {
  fn from(value: WorkflowTrigger) -> Self {
    match value {
      WorkflowTrigger::NotTriggered => 0,
      WorkflowTrigger::FutureDeploymentTriggered => 1,
      WorkflowTrigger::CurrentDeploymentTriggered => 2,
    }
  }
}

impl TryFrom<u8> for WorkflowTrigger {
  type Error = String;

  fn try_from(value: u8) -> Result<Self, Self::Error> {
    match value {
      0 => Ok(Self::NotTriggered),
      1 => Ok(Self::FutureDeploymentTriggered),
      2 => Ok(Self::CurrentDeploymentTriggered),
      other => Err(format!("unknown workflow trigger: {other}")),
    }
  }
}

// ─── Deployment ──────────────────────────────────────────────────────────────

/// One campaign applying a set of software components to a set of stores.
///
/// The natural key is `(market, deployment_id)`; `id` is the document id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
  /// Document id; assigned by the store when empty.
  #[serde(default)]
  pub id:                        String,
  pub deployment_id:             String,
  pub market:                    String,
  #[serde(default)]
  pub deployment_name:           Option<String>,
  #[serde(default)]
  pub status:                    DeploymentStatus,
  /// Cached projection of `stores[*].status`; see [`aggregate`].
  #[serde(default)]
  pub detailed_status:           String,
  #[serde(default)]
  pub current_workflow_template: Option<String>,
  #[serde(default)]
  pub is_record_created:         bool,
  #[serde(default)]
  pub workflows_created:         WorkflowTrigger,
  #[serde(default)]
  pub stores:                    Vec<DeploymentStore>,
  /// Fields owned by other services; carried through untouched.
  #[serde(flatten)]
  pub extra:                     Map<String, Value>,
}

impl Deployment {
  /// A freshly scheduled deployment with the given stores.
  pub fn scheduled(
    id: impl Into<String>,
    market: impl Into<String>,
    deployment_id: impl Into<String>,
    stores: Vec<DeploymentStore>,
  ) -> Self {
    let mut deployment = Self {
      id: id.into(),
      deployment_id: deployment_id.into(),
      market: market.into(),
      deployment_name: None,
      status: DeploymentStatus::Scheduled,
      detailed_status: String::new(),
      current_workflow_template: None,
      is_record_created: true,
      workflows_created: WorkflowTrigger::NotTriggered,
      stores,
      extra: Map::new(),
    };
    deployment.detailed_status = deployment.derive_detailed_status();
    deployment
  }

  pub fn store_index(&self, store_id: &str) -> Option<usize> {
    self.stores.iter().position(|s| s.store_id == store_id)
  }

  pub fn store(&self, store_id: &str) -> Option<&DeploymentStore> {
    self.stores.iter().find(|s| s.store_id == store_id)
  }

  /// Re-derive the detailed status string from the current store statuses.
  pub fn derive_detailed_status(&self) -> String {
    aggregate::detailed_status(&self.stores)
  }

  pub fn all_stores_canceled(&self) -> bool {
    !self.stores.is_empty()
      && self.stores.iter().all(|s| s.status == StoreStatus::Canceled)
  }

  /// Every store finished its migration, successfully or not.
  pub fn is_deployment_completed(&self) -> bool {
    !self.stores.is_empty()
      && self.stores.iter().all(|s| {
        matches!(s.status, StoreStatus::Completed | StoreStatus::Failed)
      })
  }

  /// The deployment-level status implied by the stores, if any.
  ///
  /// Recomputed from scratch every time; never maintained with counters.
  pub fn rollup_status(&self) -> Option<DeploymentStatus> {
    if self.all_stores_canceled() {
      Some(DeploymentStatus::Canceled)
    } else if self.is_deployment_completed() {
      Some(DeploymentStatus::Completed)
    } else {
      None
    }
  }
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A software component being deployed, e.g. `{"software": "Kiosk"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
  pub software: String,
  #[serde(default)]
  pub version:  Option<String>,
}

/// Per-store state within a deployment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentStore {
  pub store_id:                 String,
  #[serde(default)]
  pub status:                   StoreStatus,
  #[serde(default)]
  pub date_completed:           Option<DateTime<Utc>>,
  #[serde(default)]
  pub workflow_id:              Option<String>,
  #[serde(default)]
  pub components:               Vec<Component>,
  /// Append-only; one entry per dependency-check result batch.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub dependency_check_details: Vec<DependencyCheckBatch>,
  /// Populated once from the device roster, then never overwritten.
  #[serde(default)]
  pub device_stats:             Option<DeviceStats>,
  /// Append-only; every device event is kept, duplicates included.
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub devices_status:           Vec<DeviceStatus>,
}

impl DeploymentStore {
  pub fn new(store_id: impl Into<String>, status: StoreStatus) -> Self {
    Self {
      store_id: store_id.into(),
      status,
      ..Default::default()
    }
  }

  pub fn with_components(mut self, components: Vec<Component>) -> Self {
    self.components = components;
    self
  }
}

// ─── Dependency checks ───────────────────────────────────────────────────────

/// One batch of dependency-check results, stamped with its check date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheckBatch {
  pub dependency_check_date:    String,
  #[serde(default)]
  pub dependency_check_results: Vec<DependencyCheckResult>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCheckResult {
  pub device_id:      String,
  pub device_result:  String,
  #[serde(default)]
  pub device_details: Option<String>,
}

// ─── Device roster snapshot ──────────────────────────────────────────────────

/// The roster of devices expected to report for a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStats {
  pub collected_on: DateTime<Utc>,
  /// Accepts the legacy comma-joined string form on input.
  #[serde(deserialize_with = "device_list")]
  pub devices:      Vec<String>,
}

impl DeviceStats {
  /// Build a snapshot from device names. Returns `None` for an empty roster,
  /// which must not be cached.
  pub fn new<I, S>(devices: I, collected_on: DateTime<Utc>) -> Option<Self>
  where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
  {
    let devices: Vec<String> = devices
      .into_iter()
      .map(|d| d.as_ref().trim().to_owned())
      .filter(|d| !d.is_empty())
      .collect();
    if devices.is_empty() {
      None
    } else {
      Some(Self { collected_on, devices })
    }
  }
}

fn device_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
  D: Deserializer<'de>,
{
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Raw {
    List(Vec<String>),
    Joined(String),
  }

  let list = match Raw::deserialize(deserializer)? {
    Raw::List(list) => list,
    Raw::Joined(joined) => joined.split(',').map(str::to_owned).collect(),
  };
  Ok(
    list
      .into_iter()
      .map(|d| d.trim().to_owned())
      .filter(|d| !d.is_empty())
      .collect(),
  )
}

// ─── Device events ───────────────────────────────────────────────────────────

/// Why a device reported the status it did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
  pub code:        i32,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
  /// Cleared for manual `Complete` events.
  #[serde(default)]
  pub event_type:   Option<EventType>,
  pub event_status: PackageStatus,
  #[serde(default)]
  pub reason:       Option<Reason>,
}

/// Software versions a device reported alongside its status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Versions {
  pub dat_version:          Option<String>,
  pub dat_update_type:      Option<i32>,
  pub binary_version:       Option<String>,
  pub bin_update_type:      Option<i32>,
  pub smart_update_version: Option<String>,
  pub np_container_version: Option<String>,
  pub kiosk_binary_version: Option<String>,
}

/// One reported event for one device within a store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatus {
  pub device_id:            String,
  #[serde(default)]
  pub completed_by_user_id: Option<String>,
  /// Event time; used to pick each device's most recent event.
  pub timestamp:            String,
  pub status_event:         StatusEvent,
  #[serde(default)]
  pub versions:             Option<Versions>,
}

impl DeviceStatus {
  /// Convenience constructor with all optional fields unset.
  pub fn new(
    device_id: impl Into<String>,
    timestamp: impl Into<String>,
    event_status: PackageStatus,
  ) -> Self {
    Self {
      device_id:            device_id.into(),
      completed_by_user_id: None,
      timestamp:            timestamp.into(),
      status_event:         StatusEvent {
        event_type: None,
        event_status,
        reason: None,
      },
      versions:             None,
    }
  }

  pub fn event_status(&self) -> PackageStatus { self.status_event.event_status }
}
