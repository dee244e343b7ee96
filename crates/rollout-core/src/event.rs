//! Decoded inbound events.
//!
//! Raw bus messages are decoded once at ingestion into an [`Event`]; the
//! engine then dispatches on [`EventKind`] with an exhaustive match.

use serde::{Deserialize, Serialize};

use crate::{
  Error, Result,
  deployment::{DependencyCheckBatch, DeviceStatus},
  status::{DetailStatus, DownloadStatus, EventType, PackageStatus},
};

/// Addresses one store within one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRef {
  pub market:        String,
  pub deployment_id: String,
  pub store_id:      String,
}

impl StoreRef {
  /// Build a reference, deriving the market from the store id's two-letter
  /// prefix when the message omitted it.
  pub fn new(
    market: Option<String>,
    deployment_id: impl Into<String>,
    store_id: impl Into<String>,
  ) -> Result<Self> {
    let deployment_id = deployment_id.into();
    let store_id = store_id.into();
    if deployment_id.is_empty() {
      return Err(Error::MalformedEvent("missing deploymentId".into()));
    }
    if store_id.is_empty() {
      return Err(Error::MalformedEvent("missing storeId".into()));
    }
    let market = match market.filter(|m| !m.is_empty()) {
      Some(m) => m,
      None => store_id
        .get(..2)
        .map(str::to_owned)
        .ok_or_else(|| Error::MalformedEvent(format!("cannot derive market from {store_id:?}")))?,
    };
    Ok(Self { market, deployment_id, store_id })
  }
}

/// A workflow step reporting a raw status for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
  pub status:            DetailStatus,
  pub workflow_template: Option<String>,
  /// Present only for dependency-check results.
  pub dependency_check:  Option<DependencyCheckBatch>,
}

/// Workflow documents were (re)created for a store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowIdUpdate {
  pub workflow_template:          Option<String>,
  pub selected_workflow_template: Option<String>,
  pub workflow_id:                Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
  DeviceMigration(DeviceStatus),
  DeviceRollback(DeviceStatus),
  DeviceCancellation(DeviceStatus),
  PackageDownload(DownloadStatus),
  WorkflowStep(WorkflowStep),
  UpdateWorkflowId(WorkflowIdUpdate),
  /// Explicit request to re-derive a store's status from its device events.
  RecalculateStatus,
}

impl EventKind {
  /// Classify a device-reported event by its type and status.
  ///
  /// Manual `Complete` events lose their event type, mirroring how they are
  /// recorded.
  pub fn from_device(event_type: EventType, mut device: DeviceStatus) -> Result<Self> {
    use PackageStatus as P;
    let status = device.event_status();
    device.status_event.event_type = match (event_type, status) {
      (EventType::PackageApplication, P::Complete) => None,
      _ => Some(event_type),
    };

    match (event_type, status) {
      (EventType::PackageDownload, P::Started) => Ok(Self::PackageDownload(DownloadStatus::Started)),
      (EventType::PackageDownload, P::Succeeded) => {
        Ok(Self::PackageDownload(DownloadStatus::Succeeded))
      }
      (EventType::PackageDownload, P::Failed) => Ok(Self::PackageDownload(DownloadStatus::Failed)),
      (EventType::PackageDownload, P::Canceled) => Ok(Self::DeviceCancellation(device)),
      (EventType::PackageApplication, P::Started | P::Succeeded | P::Failed | P::Complete) => {
        Ok(Self::DeviceMigration(device))
      }
      (EventType::PackageApplication, s) if s.is_rollback() => Ok(Self::DeviceRollback(device)),
      (event_type, status) => Err(Error::MalformedEvent(format!(
        "unsupported {} status {}",
        event_type.as_ref(),
        status.as_ref()
      ))),
    }
  }

  /// Short name for logs.
  pub fn name(&self) -> &'static str {
    match self {
      Self::DeviceMigration(_) => "device_migration",
      Self::DeviceRollback(_) => "device_rollback",
      Self::DeviceCancellation(_) => "device_cancellation",
      Self::PackageDownload(_) => "package_download",
      Self::WorkflowStep(_) => "workflow_step",
      Self::UpdateWorkflowId(_) => "update_workflow_id",
      Self::RecalculateStatus => "recalculate_status",
    }
  }

  pub fn device(&self) -> Option<&DeviceStatus> {
    match self {
      Self::DeviceMigration(d) | Self::DeviceRollback(d) | Self::DeviceCancellation(d) => Some(d),
      _ => None,
    }
  }
}

/// One decoded event targeting one store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
  pub target: StoreRef,
  pub kind:   EventKind,
}
