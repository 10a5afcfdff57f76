//! Optional remote extension detection.
//!
//! Some evaluation rules only make sense when an extension is installed
//! (today: the backup CRDs). The API surface is probed once at startup and
//! the resulting set consulted by membership afterwards.

use kube::{Client, Discovery};
use tracing::{debug, info};

use super::backup::BACKUP_GROUP;

/// Name of the backup extension in the addon set.
pub const ADDON_BACKUP: &str = "backup";

/// The sorted set of detected extensions.
#[derive(Debug, Clone, Default)]
pub struct AddonSet {
    addons: Vec<String>,
}

impl AddonSet {
    pub fn from_names(mut addons: Vec<String>) -> Self {
        addons.sort();
        addons.dedup();
        Self { addons }
    }

    pub fn has(&self, name: &str) -> bool {
        self.addons.binary_search_by(|a| a.as_str().cmp(name)).is_ok()
    }

    pub fn names(&self) -> &[String] {
        &self.addons
    }
}

/// Probe the remote API groups for known extensions.
pub async fn detect_addons(client: &Client) -> Result<AddonSet, kube::Error> {
    let discovery = Discovery::new(client.clone()).run().await?;

    let mut addons = Vec::new();
    if discovery.groups().any(|group| group.name() == BACKUP_GROUP) {
        debug!("Found API group {BACKUP_GROUP}");
        addons.push(ADDON_BACKUP.to_string());
    }

    let set = AddonSet::from_names(addons);
    info!("Detected addons: {:?}", set.names());
    Ok(set)
}
