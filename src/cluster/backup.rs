//! Backup extension resource types.
//!
//! These mirror the velero `Backup` and `Schedule` custom resources closely
//! enough to judge backup health. The aggregator only reads them; the full
//! upstream schema is not required.

use chrono::{DateTime, Utc};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const BACKUP_GROUP: &str = "velero.io";

/// Terminal phases reported by the backup controller.
pub const PHASE_COMPLETED: &str = "Completed";
pub const PHASE_FAILED: &str = "Failed";
pub const PHASE_FAILED_VALIDATION: &str = "FailedValidation";
pub const PHASE_PARTIALLY_FAILED: &str = "PartiallyFailed";

/// A single backup run.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Backup",
    namespaced,
    status = "BackupStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct BackupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_namespaces: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BackupStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    /// RFC 3339 timestamp set when the run finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_timestamp: Option<String>,
    #[serde(default)]
    pub errors: i64,
    #[serde(default)]
    pub warnings: i64,
}

/// A recurring backup schedule.
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "velero.io",
    version = "v1",
    kind = "Schedule",
    namespaced,
    status = "ScheduleStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    /// Cron expression describing the cadence.
    #[serde(default)]
    pub schedule: String,
    #[serde(default)]
    pub template: ScheduleTemplate,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleTemplate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_namespaces: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_backup: Option<String>,
}

/// Whether an `includedNamespaces` list covers the given namespace.
///
/// An absent or empty list means every namespace, matching the upstream
/// convention; `*` is an explicit wildcard.
pub fn includes_namespace(included: Option<&Vec<String>>, namespace: &str) -> bool {
    match included {
        None => true,
        Some(list) if list.is_empty() => true,
        Some(list) => list.iter().any(|ns| ns == namespace || ns == "*"),
    }
}

impl Backup {
    pub fn completion_time(&self) -> Option<DateTime<Utc>> {
        let raw = self.status.as_ref()?.completion_timestamp.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|t| t.with_timezone(&Utc))
    }

    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("")
    }

    pub fn covers(&self, namespace: &str) -> bool {
        includes_namespace(self.spec.included_namespaces.as_ref(), namespace)
    }
}

impl Schedule {
    pub fn phase(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("")
    }

    pub fn covers(&self, namespace: &str) -> bool {
        includes_namespace(self.spec.template.included_namespaces.as_ref(), namespace)
    }
}
