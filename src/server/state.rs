use std::sync::Arc;

use crate::bus::Bus;
use crate::cluster::{AddonSet, ClusterCache};
use crate::config::Config;
use crate::health::EnvironmentSet;
use crate::probe::Prober;

/// Shared application state: the core pipeline handles, threaded through
/// every handler.
#[derive(Clone)]
pub struct AppState {
    pub cache: Arc<ClusterCache>,
    pub bus: Arc<Bus>,
    pub prober: Arc<Prober>,
    pub addons: Arc<AddonSet>,
    pub environments: Arc<EnvironmentSet>,
}

impl AppState {
    pub fn new(
        cache: Arc<ClusterCache>,
        bus: Arc<Bus>,
        prober: Arc<Prober>,
        addons: Arc<AddonSet>,
        environments: Arc<EnvironmentSet>,
    ) -> Self {
        Self {
            cache,
            bus,
            prober,
            addons,
            environments,
        }
    }

    /// Apply the reloadable parts of a config document: broadcast filters
    /// and the probe list. Environment suffixes and the notification delay
    /// are fixed at startup.
    pub async fn apply_config(&self, config: &Config) {
        self.bus.set_filters(config.filters.clone());
        self.prober.reload(config.urls.clone()).await;
    }
}
