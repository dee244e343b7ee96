//! Workflow documents: the per-store orchestration plan.
//!
//! Only the fields this system touches are typed; the rest is carried
//! through in `extra`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{Error, Result, patch::PatchOp};

/// Whether the workflow's next event has been sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSendStatus {
  EventSendPending,
  EventSent,
  NoPendingEvent,
}

/// State of one step of a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepState {
  Initiated,
  Completed,
  Pending,
  Failed,
  Expired,
  Started,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnstructuredData {
  #[serde(default)]
  pub deployment_id: Option<String>,
  #[serde(default)]
  pub market:        Option<String>,
  #[serde(default)]
  pub store_id:      Option<String>,
  #[serde(default)]
  pub status:        Option<EventSendStatus>,
  #[serde(flatten)]
  pub extra:         Map<String, Value>,
}

/// One step ("workflow system") of a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStepRecord {
  pub name:                    String,
  #[serde(default)]
  pub order:                   i32,
  #[serde(default)]
  pub state:                   Option<StepState>,
  #[serde(default)]
  pub workflow_start_date:     Option<DateTime<Utc>>,
  #[serde(default)]
  pub workflow_completed_date: Option<DateTime<Utc>>,
  #[serde(flatten)]
  pub extra:                   Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
  #[serde(default)]
  pub id:                String,
  #[serde(default)]
  pub name:              Option<String>,
  /// Partition key of the workflow collection.
  #[serde(default)]
  pub workflow_template: Option<String>,
  pub unstructured_data: UnstructuredData,
  #[serde(default)]
  pub workflow_systems:  Vec<WorkflowStepRecord>,
  #[serde(flatten)]
  pub extra:             Map<String, Value>,
}

impl Workflow {
  /// Mark the step named `step` as started at `now` and flag the workflow's
  /// pending event as sent.
  ///
  /// Mutates `self` and returns the equivalent patch.
  pub fn start_step(&mut self, step: &str, now: DateTime<Utc>) -> Result<Vec<PatchOp>> {
    let index = self
      .workflow_systems
      .iter()
      .position(|s| s.name == step)
      .ok_or_else(|| Error::WorkflowStepNotFound {
        workflow_id: self.id.clone(),
        step:        step.to_owned(),
      })?;

    self.unstructured_data.status = Some(EventSendStatus::EventSent);
    let record = &mut self.workflow_systems[index];
    record.workflow_start_date = Some(now);
    record.state = Some(StepState::Started);

    Ok(vec![
      PatchOp::set("/unstructuredData/status", EventSendStatus::EventSent)?,
      PatchOp::set(format!("/workflowSystems/{index}/workflowStartDate"), now)?,
      PatchOp::set(format!("/workflowSystems/{index}/state"), StepState::Started)?,
    ])
  }
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;
  use crate::patch;

  fn workflow_json() -> Value {
    json!({
      "id": "wf-1",
      "workflowTemplate": "Deployment",
      "cursorValue": 2,
      "unstructuredData": { "storeId": "US001", "status": "EventSendPending" },
      "workflowSystems": [
        { "name": "DependencyCheck", "order": 1, "state": "Completed" },
        { "name": "DoDeploy", "order": 2, "state": "Pending", "optional": "false" }
      ]
    })
  }

  #[test]
  fn start_step_updates_document_and_patch() {
    let mut raw = workflow_json();
    let mut workflow: Workflow = serde_json::from_value(raw.clone()).unwrap();
    let now = Utc::now();

    let ops = workflow.start_step("DoDeploy", now).unwrap();
    assert_eq!(workflow.workflow_systems[1].state, Some(StepState::Started));
    assert_eq!(workflow.unstructured_data.status, Some(EventSendStatus::EventSent));

    patch::apply(&mut raw, &ops).unwrap();
    let patched: Workflow = serde_json::from_value(raw.clone()).unwrap();
    assert_eq!(patched.workflow_systems[1].workflow_start_date, Some(now));
    assert_eq!(raw["workflowSystems"][1]["optional"], "false");
    assert_eq!(raw["cursorValue"], 2);
  }

  #[test]
  fn unknown_step_is_an_error() {
    let mut workflow: Workflow = serde_json::from_value(workflow_json()).unwrap();
    let err = workflow.start_step("Transport", Utc::now());
    assert!(matches!(err, Err(Error::WorkflowStepNotFound { .. })));
  }
}
