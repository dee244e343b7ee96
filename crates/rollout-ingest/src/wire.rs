//! Bus message formats and their decoding into engine events.
//!
//! Two message shapes arrive on the bus:
//!
//! - device events, with PascalCase fields (`DeviceId`, `Event`, ...);
//! - workflow events, camelCase, whose routing fields are packed into a
//!   `message` string of `key:value` pairs separated by commas.
//!
//! [`decode`] turns one raw message into zero or more [`Inbound`] items,
//! applying the configured [`EventFilter`] on the decoded fields.

use std::{collections::HashMap, str::FromStr};

use rollout_core::{
  Error, Result,
  deployment::{
    DependencyCheckBatch, DependencyCheckResult, DeviceStatus, Reason, StatusEvent, Versions,
  },
  event::{Event, EventKind, StoreRef, WorkflowIdUpdate, WorkflowStep},
  status::{DetailStatus, EventType, PackageStatus},
};
use serde::Deserialize;
use serde_json::Value;

use crate::filter::EventFilter;

// ─── Device events ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DeviceEventMessage {
  pub device_id:            String,
  #[serde(default)]
  pub market:               Option<String>,
  pub store_id:             String,
  pub deployment_id:        String,
  #[serde(default, rename = "completedByUserId")]
  pub completed_by_user_id: Option<String>,
  pub timestamp:            String,
  pub event:                WireStatusEvent,
  #[serde(default)]
  pub versions:             Option<WireVersions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireStatusEvent {
  pub event_type:   String,
  pub event_status: String,
  #[serde(default)]
  pub reason:       Option<WireReason>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireReason {
  pub code:        i32,
  #[serde(default)]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WireVersions {
  pub dat_version:          Option<String>,
  pub dat_update_type:      Option<i32>,
  pub binary_version:       Option<String>,
  pub bin_update_type:      Option<i32>,
  pub smart_update_version: Option<String>,
  pub np_container_version: Option<String>,
  pub kiosk_binary_version: Option<String>,
}

impl From<WireVersions> for Versions {
  fn from(v: WireVersions) -> Self {
    Self {
      dat_version:          v.dat_version,
      dat_update_type:      v.dat_update_type,
      binary_version:       v.binary_version,
      bin_update_type:      v.bin_update_type,
      smart_update_version: v.smart_update_version,
      np_container_version: v.np_container_version,
      kiosk_binary_version: v.kiosk_binary_version,
    }
  }
}

impl DeviceEventMessage {
  fn into_event(self) -> Result<Event> {
    let event_type = EventType::from_str(&self.event.event_type)
      .map_err(|_| Error::MalformedEvent(format!("unknown EventType {:?}", self.event.event_type)))?;
    let event_status = PackageStatus::from_str(&self.event.event_status).map_err(|_| {
      Error::MalformedEvent(format!("unknown EventStatus {:?}", self.event.event_status))
    })?;
    if self.device_id.is_empty() {
      return Err(Error::MalformedEvent("missing DeviceId".into()));
    }

    let target = StoreRef::new(self.market, self.deployment_id, self.store_id)?;
    let device = DeviceStatus {
      device_id:            self.device_id,
      completed_by_user_id: self.completed_by_user_id,
      timestamp:            self.timestamp,
      status_event:         StatusEvent {
        event_type: Some(event_type),
        event_status,
        reason: self.event.reason.map(|r| Reason { code: r.code, description: r.description }),
      },
      versions:             self.versions.map(Versions::from),
    };
    Ok(Event { target, kind: EventKind::from_device(event_type, device)? })
  }
}

// ─── Workflow events ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEventMessage {
  pub status:                          String,
  pub message:                         String,
  #[serde(default)]
  pub name:                            Option<String>,
  #[serde(default)]
  pub workflow_system:                 Option<String>,
  #[serde(default)]
  pub dependency_check_result_details: Option<WireDependencyCheck>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDependencyCheck {
  #[serde(default)]
  pub dependency_check_date:    String,
  #[serde(default)]
  pub dependency_check_results: Vec<WireDependencyCheckResult>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireDependencyCheckResult {
  pub device_name:    String,
  #[serde(default)]
  pub device_result:  Option<String>,
  #[serde(default)]
  pub device_details: Option<String>,
}

impl From<WireDependencyCheck> for DependencyCheckBatch {
  fn from(check: WireDependencyCheck) -> Self {
    Self {
      dependency_check_date:    check.dependency_check_date,
      dependency_check_results: check
        .dependency_check_results
        .into_iter()
        .map(|r| DependencyCheckResult {
          device_id:      r.device_name,
          device_result:  r.device_result.unwrap_or_default(),
          device_details: r.device_details,
        })
        .collect(),
    }
  }
}

/// Parse `"market:US, storeId:US001, ..."` into a map. Values keep any
/// further colons; entries without one are skipped.
pub fn parse_message(message: &str) -> HashMap<String, String> {
  message
    .split(',')
    .filter_map(|pair| pair.split_once(':'))
    .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
    .collect()
}

/// Routing fields carried in a workflow event's `message`.
struct MessageFields(HashMap<String, String>);

impl MessageFields {
  fn get(&self, key: &str) -> Option<String> {
    self.0.get(key).filter(|v| !v.is_empty()).cloned()
  }

  fn require(&self, key: &str) -> Result<String> {
    self
      .get(key)
      .ok_or_else(|| Error::MalformedEvent(format!("message has no {key}")))
  }

  fn target(&self) -> Result<StoreRef> {
    StoreRef::new(
      self.get("market"),
      self.get("deploymentId").unwrap_or_default(),
      self.get("storeId").unwrap_or_default(),
    )
  }
}

impl WorkflowEventMessage {
  fn deployment_event(&self, fields: &MessageFields) -> Result<Event> {
    let workflow_template = fields.get("workflowTemplate");
    let kind = match self.status.as_str() {
      "UpdateWorkflowId" => EventKind::UpdateWorkflowId(WorkflowIdUpdate {
        workflow_template,
        selected_workflow_template: fields.get("selectedWorkflowTemplate"),
        workflow_id: fields.get("id"),
      }),
      "RecalculateStatus" => EventKind::RecalculateStatus,
      raw => {
        let status = DetailStatus::from_str(raw)
          .map_err(|_| Error::MalformedEvent(format!("unknown workflow status {raw:?}")))?;
        EventKind::WorkflowStep(WorkflowStep {
          status,
          workflow_template,
          dependency_check: self
            .dependency_check_result_details
            .clone()
            .map(DependencyCheckBatch::from),
        })
      }
    };
    Ok(Event { target: fields.target()?, kind })
  }
}

// ─── Decoding ────────────────────────────────────────────────────────────────

/// One unit of work decoded from a bus message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
  /// An event for a store within a deployment document.
  Deployment(Event),
  /// Start the named step of a workflow document.
  StepStart { workflow_id: String, step: String },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Message {
  Device(DeviceEventMessage),
  Workflow(WorkflowEventMessage),
}

/// Decode one raw message.
///
/// Returns an empty list when the filter discards the message; a message
/// matching no known shape, or missing required fields, is malformed.
pub fn decode(raw: Value, filter: &EventFilter) -> Result<Vec<Inbound>> {
  let message: Message = serde_json::from_value(raw)
    .map_err(|_| Error::MalformedEvent("not a device or workflow event".into()))?;

  match message {
    Message::Device(device) => {
      if !filter.accepts_device(&device.event.event_type, &device.event.event_status) {
        return Ok(Vec::new());
      }
      Ok(vec![Inbound::Deployment(device.into_event()?)])
    }
    Message::Workflow(workflow) => {
      let fields = MessageFields(parse_message(&workflow.message));
      let mut inbound = Vec::new();
      if filter.accepts_workflow(&workflow.status) {
        inbound.push(Inbound::Deployment(workflow.deployment_event(&fields)?));
      }
      if filter.starts_step(&workflow.status) {
        inbound.push(Inbound::StepStart {
          workflow_id: fields.require("id")?,
          step:        fields.require("workflowName")?,
        });
      }
      Ok(inbound)
    }
  }
}
