//! Field-based predicates deciding which decoded messages are processed.
//!
//! Each deployment of the host subscribes to a subset of the bus traffic;
//! these lists are how it says which subset.

use serde::Deserialize;

/// Accepted values per message field, from configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
  /// Device `EventType` values to process.
  pub device_event_types:    Vec<String>,
  /// Device `EventStatus` values to process.
  pub device_event_statuses: Vec<String>,
  /// Workflow `status` values applied to deployment documents.
  pub workflow_statuses:     Vec<String>,
  /// Workflow `status` values that start a step on a workflow document.
  pub step_start_statuses:   Vec<String>,
}

impl Default for FilterConfig {
  fn default() -> Self {
    let owned = |values: &[&str]| values.iter().map(|v| (*v).to_owned()).collect();
    Self {
      device_event_types:    owned(&["PackageDownload", "PackageApplication"]),
      device_event_statuses: owned(&[
        "Started",
        "Succeeded",
        "Failed",
        "Complete",
        "Canceled",
        "Cancelled",
        "RollbackStarted",
        "RollbackSucceeded",
        "RollbackFailed",
      ]),
      workflow_statuses:     owned(&[
        "DependencycheckPending",
        "DependencycheckSuccess",
        "DependencycheckFailed",
        "Overridden",
        "MigrationPending",
        "MigrationSuccess",
        "MigrationFailed",
        "DoDeployPending",
        "DoDeploySuccess",
        "DoDeployFailed",
        "CancelDeploymentSuccess",
        "CancelDeploymentValidationFailed",
        "RollbackRequestSuccess",
        "RollbackRequestFailed",
        "UpdateWorkflowId",
        "RecalculateStatus",
      ]),
      step_start_statuses:   owned(&["StartWorkflowStep"]),
    }
  }
}

/// Compiled form of [`FilterConfig`].
#[derive(Debug, Clone)]
pub struct EventFilter {
  config: FilterConfig,
}

impl EventFilter {
  pub fn new(config: FilterConfig) -> Self { Self { config } }

  pub fn accepts_device(&self, event_type: &str, event_status: &str) -> bool {
    contains(&self.config.device_event_types, event_type)
      && contains(&self.config.device_event_statuses, event_status)
  }

  pub fn accepts_workflow(&self, status: &str) -> bool {
    contains(&self.config.workflow_statuses, status)
  }

  pub fn starts_step(&self, status: &str) -> bool {
    contains(&self.config.step_start_statuses, status)
  }
}

impl Default for EventFilter {
  fn default() -> Self { Self::new(FilterConfig::default()) }
}

fn contains(values: &[String], value: &str) -> bool {
  values.iter().any(|v| v.trim() == value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn device_events_need_type_and_status() {
    let filter = EventFilter::default();
    assert!(filter.accepts_device("PackageApplication", "Succeeded"));
    assert!(filter.accepts_device("PackageDownload", "Cancelled"));
    assert!(!filter.accepts_device("PackageInventory", "Succeeded"));
    assert!(!filter.accepts_device("PackageApplication", "Queued"));
  }

  #[test]
  fn narrowed_configuration() {
    let filter = EventFilter::new(FilterConfig {
      device_event_types:    vec!["PackageApplication".into()],
      device_event_statuses: vec![" Succeeded ".into()],
      workflow_statuses:     vec![],
      step_start_statuses:   vec!["Begin".into()],
    });
    assert!(filter.accepts_device("PackageApplication", "Succeeded"));
    assert!(!filter.accepts_device("PackageDownload", "Succeeded"));
    assert!(!filter.accepts_workflow("DoDeploySuccess"));
    assert!(filter.starts_step("Begin"));
  }
}
