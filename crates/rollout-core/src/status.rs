//! Status vocabularies used across deployments, stores, and device events.
//!
//! Three distinct vocabularies exist:
//!
//! - [`DeploymentStatus`]: the deployment-level lifecycle.
//! - [`DetailStatus`]: raw orchestration statuses as emitted by the workflow
//!   service. These are never stored directly.
//! - [`StoreStatus`]: the end-user label a store holds. Several raw statuses
//!   collapse onto the same label, so labels are the unit of aggregation.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoStaticStr};

use crate::Error;

// ─── Deployment ──────────────────────────────────────────────────────────────

/// Lifecycle of a whole deployment campaign.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize,
)]
pub enum DeploymentStatus {
  #[default]
  Scheduled,
  #[serde(rename = "In Progress", alias = "InProgress")]
  InProgress,
  Completed,
  Canceled,
}

impl DeploymentStatus {
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Canceled)
  }
}

// ─── Raw orchestration status ────────────────────────────────────────────────

/// A raw status reported by the workflow service for one store.
///
/// Parsed from the exact variant name (e.g. `"DoDeploySuccess"`).
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, EnumIter, Serialize,
  Deserialize,
)]
pub enum DetailStatus {
  DependencycheckPending,
  DependencycheckSuccess,
  DependencycheckFailed,
  Overridden,
  MigrationPending,
  MigrationSuccess,
  MigrationFailed,
  TransportPending,
  TransportSuccess,
  TransportFailed,
  DoDeployPending,
  DoDeploySuccess,
  DoDeployFailed,
  DeploymentInProgress,
  Completed,
  Failed,
  Canceled,
  DownloadStarted,
  DownloadCompleted,
  DownloadFailed,
  CancelDeploymentSuccess,
  CancelDeploymentFailed,
  CancelDeploymentValidationFailed,
  RollbackRequestSuccess,
  RollbackRequestFailed,
}

impl DetailStatus {
  /// The store label this raw status projects onto.
  ///
  /// Statuses without a dedicated label fall back to
  /// [`StoreStatus::PendingDependencyCheck`].
  pub fn label(self) -> StoreStatus {
    use StoreStatus as L;
    match self {
      Self::DependencycheckPending => L::PendingDependencyCheck,
      Self::DependencycheckSuccess => L::DependencyCheckSuccess,
      Self::DependencycheckFailed => L::DependencyCheckFailed,
      Self::Overridden => L::DependencyCheckOverridden,
      Self::MigrationPending => L::PendingConfigMigration,
      Self::MigrationSuccess => L::ConfigMigrationSuccess,
      Self::MigrationFailed => L::ConfigMigrationFailed,
      Self::DoDeployPending => L::PreparingRepository,
      Self::DoDeploySuccess => L::RepositoryReady,
      Self::DoDeployFailed => L::PreparingRepositoryFailed,
      Self::DeploymentInProgress => L::DeploymentInProgress,
      Self::Completed => L::Completed,
      Self::Failed => L::Failed,
      Self::DownloadStarted => L::DownloadStarted,
      Self::DownloadCompleted => L::DownloadCompleted,
      Self::DownloadFailed => L::DownloadFailed,
      Self::Canceled
      | Self::CancelDeploymentSuccess
      | Self::CancelDeploymentValidationFailed => L::Canceled,
      Self::RollbackRequestSuccess => L::RollbackRequested,
      // A failed rollback request leaves the store where it was.
      Self::RollbackRequestFailed => L::Completed,
      Self::TransportPending
      | Self::TransportSuccess
      | Self::TransportFailed
      | Self::CancelDeploymentFailed => L::PendingDependencyCheck,
    }
  }

  /// Whether this status carries a dependency-check result batch.
  pub fn is_dependency_check_result(self) -> bool {
    matches!(self, Self::DependencycheckSuccess | Self::DependencycheckFailed)
  }

  /// Whether this step may move a store out of a terminal status: a
  /// rollback request or a cancellation. Anything else arriving for a
  /// finished store is a redelivery and must not regress it.
  pub fn reopens_terminal(self) -> bool {
    matches!(
      self,
      Self::RollbackRequestSuccess
        | Self::Canceled
        | Self::CancelDeploymentSuccess
        | Self::CancelDeploymentValidationFailed
    )
  }
}

// ─── Store label ─────────────────────────────────────────────────────────────

/// The end-user label held by a store within a deployment.
///
/// Stored and serialised as the label text itself (e.g.
/// `"Pending Dependency Check"`).
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  Hash,
  Default,
  EnumString,
  IntoStaticStr,
  Display,
  EnumIter,
  Serialize,
  Deserialize,
)]
#[serde(try_from = "String", into = "&'static str")]
pub enum StoreStatus {
  #[default]
  #[strum(serialize = "Pending Dependency Check")]
  PendingDependencyCheck,
  #[strum(serialize = "Dependency Check Success")]
  DependencyCheckSuccess,
  #[strum(serialize = "Dependency Check Failed")]
  DependencyCheckFailed,
  #[strum(serialize = "Dependency Check Overridden")]
  DependencyCheckOverridden,
  #[strum(serialize = "Pending Config Migration")]
  PendingConfigMigration,
  #[strum(serialize = "Config Migration Success")]
  ConfigMigrationSuccess,
  #[strum(serialize = "Config Migration Failed")]
  ConfigMigrationFailed,
  #[strum(serialize = "Preparing Repository")]
  PreparingRepository,
  #[strum(serialize = "Repository Ready")]
  RepositoryReady,
  #[strum(serialize = "Preparing Repository Failed")]
  PreparingRepositoryFailed,
  #[strum(serialize = "Deployment In Progress")]
  DeploymentInProgress,
  #[strum(serialize = "Download Started")]
  DownloadStarted,
  #[strum(serialize = "Download Completed")]
  DownloadCompleted,
  #[strum(serialize = "Download Failed")]
  DownloadFailed,
  #[strum(serialize = "Rollback Requested")]
  RollbackRequested,
  #[strum(serialize = "Completed")]
  Completed,
  #[strum(serialize = "Failed")]
  Failed,
  #[strum(serialize = "Canceled")]
  Canceled,
}

impl StoreStatus {
  pub fn as_label(self) -> &'static str { self.into() }

  /// Completed, Failed, or Canceled.
  pub fn is_terminal(self) -> bool {
    matches!(self, Self::Completed | Self::Failed | Self::Canceled)
  }

  /// Statuses in which forward migration events still move the store.
  pub fn accepts_migration(self) -> bool {
    matches!(
      self,
      Self::RepositoryReady
        | Self::DownloadStarted
        | Self::DownloadCompleted
        | Self::DeploymentInProgress
    )
  }

  /// Statuses in which rollback events still move the store.
  pub fn accepts_rollback(self) -> bool { matches!(self, Self::RollbackRequested) }
}

impl TryFrom<String> for StoreStatus {
  type Error = Error;

  fn try_from(value: String) -> Result<Self, Self::Error> {
    StoreStatus::from_str(&value).map_err(|_| Error::UnknownStatus(value))
  }
}

// ─── Device events ───────────────────────────────────────────────────────────

/// The kind of package operation a device event reports on.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Serialize,
  Deserialize,
)]
pub enum EventType {
  PackageDownload,
  PackageApplication,
}

/// Status reported by a single device for a package operation.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, EnumString, AsRefStr, Serialize,
  Deserialize,
)]
pub enum PackageStatus {
  Started,
  Succeeded,
  Failed,
  /// Manually marked complete by an operator.
  Complete,
  #[strum(to_string = "Canceled", serialize = "Cancelled")]
  #[serde(alias = "Cancelled")]
  Canceled,
  RollbackStarted,
  RollbackSucceeded,
  RollbackFailed,
}

impl PackageStatus {
  pub fn is_rollback(self) -> bool {
    matches!(
      self,
      Self::RollbackStarted | Self::RollbackSucceeded | Self::RollbackFailed
    )
  }
}

/// Outcome of a package download, as reported per store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
  Started,
  Succeeded,
  Failed,
}

impl DownloadStatus {
  pub fn label(self) -> StoreStatus {
    match self {
      Self::Started => StoreStatus::DownloadStarted,
      Self::Succeeded => StoreStatus::DownloadCompleted,
      Self::Failed => StoreStatus::DownloadFailed,
    }
  }
}
