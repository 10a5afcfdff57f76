//! Tenant derivation from entity names.
//!
//! Namespaces follow the `{tenant}-{environment}` convention. Anything that
//! does not end in a recognized environment suffix belongs to the shared
//! `platform` tenant.

use serde::{Deserialize, Serialize};

/// Default environment suffixes recognized in namespace names.
const DEFAULT_ENVIRONMENTS: &[&str] = &[
    "cola", "demo", "dev", "int", "ivv", "pat", "pdt", "perf", "preprod", "prod", "prodtest",
    "sqa", "test", "uat",
];

/// The tenant and environment an entity belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub environment: String,
}

impl TenantInfo {
    /// The shared tenant for entities that carry no environment suffix.
    pub fn platform() -> Self {
        Self {
            name: "platform".to_string(),
            environment: String::new(),
        }
    }
}

/// The set of environment suffixes used when parsing tenant names.
#[derive(Debug, Clone)]
pub struct EnvironmentSet {
    environments: Vec<String>,
}

impl Default for EnvironmentSet {
    fn default() -> Self {
        Self {
            environments: DEFAULT_ENVIRONMENTS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl EnvironmentSet {
    /// Build a set from configuration. An empty list falls back to the
    /// default suffixes.
    pub fn new(environments: &[String]) -> Self {
        if environments.is_empty() {
            return Self::default();
        }
        let mut environments: Vec<String> = environments.to_vec();
        environments.sort();
        environments.dedup();
        Self { environments }
    }

    pub fn contains(&self, env: &str) -> bool {
        self.environments.iter().any(|e| e == env)
    }

    /// Derive `(tenant, environment)` from an entity name.
    ///
    /// The name is split on `-`; if the last segment is a recognized
    /// environment, the remainder is the tenant. Otherwise the entity belongs
    /// to `platform` with no environment.
    pub fn parse(&self, name: &str) -> TenantInfo {
        if let Some((prefix, last)) = name.rsplit_once('-') {
            if !prefix.is_empty() && self.contains(last) {
                return TenantInfo {
                    name: prefix.to_string(),
                    environment: last.to_string(),
                };
            }
        }
        TenantInfo::platform()
    }
}
