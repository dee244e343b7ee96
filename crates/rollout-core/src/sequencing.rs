//! Device-event sequencing predicates for a single store.
//!
//! A store settles once every device on its roster has a most recent event
//! in the status set relevant to the current [`EventPath`]. Coverage, not
//! event count or elapsed time, is what triggers terminal evaluation.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::{
  deployment::{DeploymentStore, DeviceStatus},
  status::PackageStatus,
};

/// The family of device events being sequenced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPath {
  Migration,
  Rollback,
  Cancellation,
}

impl EventPath {
  /// Statuses that count as a device having settled on this path.
  pub fn settles(self, status: PackageStatus) -> bool {
    use PackageStatus as P;
    match self {
      Self::Migration => matches!(status, P::Succeeded | P::Failed | P::Complete),
      Self::Rollback => {
        matches!(status, P::RollbackSucceeded | P::RollbackFailed | P::Complete)
      }
      Self::Cancellation => {
        matches!(status, P::Succeeded | P::Failed | P::Complete | P::Canceled)
      }
    }
  }

  /// Statuses that count as success once settled. Cancellation has none.
  pub fn succeeds(self, status: PackageStatus) -> bool {
    use PackageStatus as P;
    match self {
      Self::Migration => matches!(status, P::Succeeded | P::Complete),
      Self::Rollback => matches!(status, P::RollbackSucceeded | P::Complete),
      Self::Cancellation => false,
    }
  }
}

/// Order two event timestamps chronologically.
///
/// RFC 3339 values are compared as instants; anything else falls back to
/// string order.
pub fn compare_timestamps(a: &str, b: &str) -> Ordering {
  let parse = |s: &str| DateTime::parse_from_rfc3339(s).map(|dt| dt.with_timezone(&Utc));
  match (parse(a), parse(b)) {
    (Ok(a), Ok(b)) => a.cmp(&b),
    _ => a.cmp(b),
  }
}

impl DeploymentStore {
  /// The most recent event per device, in first-reported device order.
  ///
  /// On identical timestamps the first-encountered event wins.
  pub fn latest_by_device(&self) -> Vec<&DeviceStatus> {
    let mut latest: Vec<&DeviceStatus> = Vec::new();
    for event in &self.devices_status {
      match latest.iter_mut().find(|e| e.device_id == event.device_id) {
        Some(current) => {
          if compare_timestamps(&event.timestamp, &current.timestamp)
            == Ordering::Greater
          {
            *current = event;
          }
        }
        None => latest.push(event),
      }
    }
    latest
  }

  /// True when exactly one device event has been recorded.
  pub fn is_first_device_event(&self) -> bool { self.devices_status.len() == 1 }

  /// Roster devices that have not settled on `path`.
  ///
  /// `None` when no roster snapshot exists yet, in which case coverage
  /// cannot be evaluated.
  pub fn pending_devices(&self, path: EventPath) -> Option<Vec<&str>> {
    let stats = self.device_stats.as_ref()?;
    let settled: Vec<&str> = self
      .latest_by_device()
      .into_iter()
      .filter(|e| path.settles(e.event_status()))
      .map(|e| e.device_id.as_str())
      .collect();

    // Devices completed by hand never roll back.
    let manually_completed: Vec<&str> = if path == EventPath::Rollback {
      self
        .devices_status
        .iter()
        .filter(|e| e.event_status() == PackageStatus::Complete)
        .map(|e| e.device_id.as_str())
        .collect()
    } else {
      Vec::new()
    };

    let mut pending: Vec<&str> = Vec::new();
    for device in &stats.devices {
      let device = device.as_str();
      if !settled.contains(&device)
        && !manually_completed.contains(&device)
        && !pending.contains(&device)
      {
        pending.push(device);
      }
    }
    Some(pending)
  }

  /// Every roster device has settled on `path`.
  pub fn is_fully_covered(&self, path: EventPath) -> bool {
    self.pending_devices(path).is_some_and(|p| p.is_empty())
  }

  /// The event just recorded completes forward-migration coverage.
  pub fn is_last_device_event(&self) -> bool {
    self.is_fully_covered(EventPath::Migration)
  }

  /// The event just recorded completes rollback coverage.
  pub fn is_last_device_rollback_event(&self) -> bool {
    self.is_fully_covered(EventPath::Rollback)
  }

  /// The event just recorded completes cancellation coverage.
  pub fn is_last_device_cancel_event(&self) -> bool {
    self.is_fully_covered(EventPath::Cancellation)
  }

  /// Every reporting device's most recent status is a success on `path`.
  pub fn all_devices_succeeded(&self, path: EventPath) -> bool {
    self
      .latest_by_device()
      .iter()
      .all(|e| path.succeeds(e.event_status()))
  }

  pub fn any_device_failed(&self) -> bool {
    self
      .latest_by_device()
      .iter()
      .any(|e| e.event_status() == PackageStatus::Failed)
  }
}
