//! Derivation of a deployment's detailed status string.
//!
//! The string is a pure projection of the store statuses, e.g.
//! `"1/3 Pending Dependency Check~2/3 Completed"`. Segment order follows the
//! order in which each distinct label is first seen while scanning `stores`.

use crate::{deployment::DeploymentStore, status::StoreStatus};

/// Separator between segments.
pub const SEGMENT_SEPARATOR: &str = "~";

/// Count stores per label, in first-seen order.
pub fn status_counts(stores: &[DeploymentStore]) -> Vec<(StoreStatus, usize)> {
  let mut counts: Vec<(StoreStatus, usize)> = Vec::new();
  for store in stores {
    match counts.iter_mut().find(|(status, _)| *status == store.status) {
      Some((_, count)) => *count += 1,
      None => counts.push((store.status, 1)),
    }
  }
  counts
}

/// Render `"{count}/{total} {label}"` segments joined with `~`.
///
/// Returns the empty string for an empty slice.
pub fn detailed_status(stores: &[DeploymentStore]) -> String {
  let total = stores.len();
  status_counts(stores)
    .into_iter()
    .map(|(status, count)| format!("{count}/{total} {}", status.as_label()))
    .collect::<Vec<_>>()
    .join(SEGMENT_SEPARATOR)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn stores(statuses: &[StoreStatus]) -> Vec<DeploymentStore> {
    statuses
      .iter()
      .enumerate()
      .map(|(i, s)| DeploymentStore::new(format!("US{i:03}"), *s))
      .collect()
  }

  fn segment_total(rendered: &str) -> usize {
    rendered
      .split(SEGMENT_SEPARATOR)
      .map(|seg| {
        let (fraction, _) = seg.split_once(' ').unwrap();
        let (count, _) = fraction.split_once('/').unwrap();
        count.parse::<usize>().unwrap()
      })
      .sum()
  }

  #[test]
  fn empty_stores_render_empty() {
    assert_eq!(detailed_status(&[]), "");
  }

  #[test]
  fn single_store() {
    let s = stores(&[StoreStatus::PendingDependencyCheck]);
    assert_eq!(detailed_status(&s), "1/1 Pending Dependency Check");
  }

  #[test]
  fn two_distinct_statuses() {
    let s = stores(&[
      StoreStatus::PendingDependencyCheck,
      StoreStatus::ConfigMigrationFailed,
    ]);
    assert_eq!(
      detailed_status(&s),
      "1/2 Pending Dependency Check~1/2 Config Migration Failed"
    );
  }

  #[test]
  fn three_distinct_statuses() {
    let s = stores(&[
      StoreStatus::PendingDependencyCheck,
      StoreStatus::ConfigMigrationFailed,
      StoreStatus::Completed,
    ]);
    assert_eq!(
      detailed_status(&s),
      "1/3 Pending Dependency Check~1/3 Config Migration Failed~1/3 Completed"
    );
  }

  #[test]
  fn order_follows_first_occurrence() {
    let s = stores(&[
      StoreStatus::Completed,
      StoreStatus::Failed,
      StoreStatus::Completed,
      StoreStatus::DeploymentInProgress,
      StoreStatus::Failed,
    ]);
    assert_eq!(
      detailed_status(&s),
      "2/5 Completed~2/5 Failed~1/5 Deployment In Progress"
    );
  }

  #[test]
  fn reordering_changes_sequence_not_segments() {
    let forward = stores(&[
      StoreStatus::Completed,
      StoreStatus::Failed,
      StoreStatus::Failed,
    ]);
    let mut reversed = forward.clone();
    reversed.reverse();

    let a = detailed_status(&forward);
    let b = detailed_status(&reversed);
    assert_ne!(a, b);

    let mut sa: Vec<&str> = a.split(SEGMENT_SEPARATOR).collect();
    let mut sb: Vec<&str> = b.split(SEGMENT_SEPARATOR).collect();
    sa.sort_unstable();
    sb.sort_unstable();
    assert_eq!(sa, sb);
  }

  #[test]
  fn counts_sum_to_store_total() {
    let s = stores(&[
      StoreStatus::RepositoryReady,
      StoreStatus::DownloadStarted,
      StoreStatus::RepositoryReady,
      StoreStatus::Canceled,
      StoreStatus::DownloadStarted,
      StoreStatus::RepositoryReady,
      StoreStatus::Completed,
    ]);
    let rendered = detailed_status(&s);
    assert_eq!(segment_total(&rendered), s.len());
    assert!(!rendered.ends_with(SEGMENT_SEPARATOR));
  }

  #[test]
  fn derivation_is_idempotent() {
    let s = stores(&[StoreStatus::Failed, StoreStatus::Completed]);
    assert_eq!(detailed_status(&s), detailed_status(&s));
  }
}
