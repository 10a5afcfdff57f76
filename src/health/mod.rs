//! Health value types shared by every producer in the pipeline.
//!
//! A [`HealthReport`] is the rolled-up judgement for a single entity. Reports
//! for child entities fold into their parent (namespace) report under a
//! monotone status ladder: `Healthy < Warn < Unhealthy`, with `Unknown` and
//! `Ignored` acting as sinks outside the ladder.

pub mod tenant;

pub use tenant::{EnvironmentSet, TenantInfo};

use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Health verdict for an entity.
///
/// The wire form matches the historical API: `True` for healthy and `False`
/// for unhealthy, so downstream dashboards keep working unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    #[serde(rename = "True")]
    Healthy,
    #[serde(rename = "Warn")]
    Warn,
    #[serde(rename = "False")]
    Unhealthy,
    #[serde(rename = "Unknown")]
    Unknown,
    #[serde(rename = "Ignored")]
    Ignored,
}

impl HealthStatus {
    /// Position on the fold ladder. `Unknown` and `Ignored` are not on it.
    fn rank(self) -> Option<u8> {
        match self {
            HealthStatus::Healthy => Some(0),
            HealthStatus::Warn => Some(1),
            HealthStatus::Unhealthy => Some(2),
            HealthStatus::Unknown | HealthStatus::Ignored => None,
        }
    }
}

/// Rolled-up health for a single entity at a point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: i64,
    #[serde(rename = "healthy")]
    pub status: HealthStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alerts: Vec<String>,
    /// Free-form detail, used by URL probes for the observed value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl HealthReport {
    /// A fresh report: status `Unknown`, no messages.
    pub fn new() -> Self {
        Self {
            timestamp: Utc::now().timestamp(),
            status: HealthStatus::Unknown,
            errors: Vec::new(),
            warnings: Vec::new(),
            alerts: Vec::new(),
            text: None,
        }
    }

    /// A report pre-set to `Ignored`; folds contribute nothing.
    pub fn ignored() -> Self {
        let mut report = Self::new();
        report.status = HealthStatus::Ignored;
        report
    }

    /// Record an error. Errors always force the status to `Unhealthy`.
    pub fn add_error(&mut self, msg: impl Into<String>) {
        self.status = HealthStatus::Unhealthy;
        self.errors.push(msg.into());
    }

    /// Record a warning. Raises the status to `Warn` unless already `Unhealthy`.
    pub fn add_warning(&mut self, msg: impl Into<String>) {
        if self.status != HealthStatus::Unhealthy {
            self.status = HealthStatus::Warn;
        }
        self.warnings.push(msg.into());
    }

    /// Record an informational alert. Alerts never change the status.
    pub fn add_alert(&mut self, msg: impl Into<String>) {
        self.alerts.push(msg.into());
    }

    /// Resolve `Unknown` to `Healthy`. Call after all rules have run.
    pub fn fail_healthy(&mut self) {
        if self.status == HealthStatus::Unknown {
            self.status = HealthStatus::Healthy;
        }
    }

    /// Resolve `Unknown` to `Unhealthy`.
    pub fn fail_unhealthy(&mut self) {
        if self.status == HealthStatus::Unknown {
            self.status = HealthStatus::Unhealthy;
        }
    }

    /// Fold a child report into this one.
    ///
    /// Child messages are prefixed with `"{prefix}: "`, and the status becomes
    /// the ladder maximum of the two. An `Ignored` child contributes nothing;
    /// an `Unknown` child contributes only its messages.
    pub fn fold_in(&mut self, child: &HealthReport, prefix: &str) {
        if child.status == HealthStatus::Ignored {
            return;
        }

        for msg in &child.errors {
            self.add_error(format!("{prefix}: {msg}"));
        }
        for msg in &child.warnings {
            self.add_warning(format!("{prefix}: {msg}"));
        }
        for msg in &child.alerts {
            self.add_alert(format!("{prefix}: {msg}"));
        }

        if let Some(child_rank) = child.status.rank() {
            if self.status.rank().map_or(true, |mine| child_rank > mine) {
                self.status = child.status;
            }
        }
    }
}

impl Default for HealthReport {
    fn default() -> Self {
        Self::new()
    }
}

/// The closed set of entity kinds the aggregator understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Node,
    Namespace,
    DaemonSet,
    Deployment,
    StatefulSet,
    Pod,
    Service,
    BackupSchedule,
    BackupRun,
    UrlProbe,
}

impl EntityKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::Namespace => "namespace",
            EntityKind::DaemonSet => "daemonset",
            EntityKind::Deployment => "deployment",
            EntityKind::StatefulSet => "statefulset",
            EntityKind::Pod => "pod",
            EntityKind::Service => "service",
            EntityKind::BackupSchedule => "backupschedule",
            EntityKind::BackupRun => "backuprun",
            EntityKind::UrlProbe => "urlprobe",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EntityKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// What happened to the entity this update describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateAction {
    Add,
    Update,
    Delete,
    /// A namespace recomputation, not tied to a single remote event.
    Refresh,
}

/// A change notification fanned out to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct HealthUpdate {
    #[serde(rename = "apiVersion", skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: EntityKind,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    pub name: String,
    pub tenant: TenantInfo,
    pub action: UpdateAction,
    #[serde(flatten)]
    pub report: HealthReport,
    #[serde(rename = "previousReport", skip_serializing_if = "Option::is_none")]
    pub previous_report: Option<HealthReport>,
}

impl HealthUpdate {
    /// The value of the named attribute, as used for session matching.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        match key {
            "kind" => Some(self.kind.as_str()),
            "namespace" => Some(&self.namespace),
            "name" => Some(&self.name),
            _ => None,
        }
    }

    /// Serialize for the wire, stamping the payload with the current epoch
    /// seconds. Returns an empty string if serialization fails.
    pub fn to_message(&self) -> String {
        let mut stamped = self.clone();
        stamped.report.timestamp = Utc::now().timestamp();
        serde_json::to_string(&stamped).unwrap_or_default()
    }
}
