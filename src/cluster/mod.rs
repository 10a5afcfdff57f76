//! Remote cluster connection and the reactive health pipeline.
//!
//! The [`cache`] keeps an in-memory mirror of remote objects via list+watch,
//! [`evaluate`] turns snapshots into health reports, [`namespace`] folds
//! child reports into namespace reports, and [`demux`] fans cache events out
//! to the subscription bus.

pub mod addons;
pub mod backup;
pub mod cache;
pub mod demux;
pub mod evaluate;
pub mod namespace;
pub mod snapshot;

pub use addons::{detect_addons, AddonSet, ADDON_BACKUP};
pub use cache::{ClusterCache, RawEvent, SYNC_TIMEOUT};
pub use demux::Demux;
pub use evaluate::evaluate_snapshot;
pub use namespace::evaluate_namespace;
pub use snapshot::Snapshot;

use std::path::{Path, PathBuf};

use kube::config::{InClusterError, KubeConfigOptions, Kubeconfig, KubeconfigError};
use kube::{Client, Config};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to load kubeconfig: {0}")]
    Kubeconfig(#[from] KubeconfigError),

    #[error("failed to load in-cluster credentials: {0}")]
    InCluster(#[from] InClusterError),

    #[error("failed to build client: {0}")]
    Client(#[from] kube::Error),
}

/// Connect to the remote cluster.
///
/// Prefers an explicit kubeconfig path (default `$HOME/.kube/config`); falls
/// back to in-cluster credentials when no file exists. Startup cannot proceed
/// without one of the two.
pub async fn connect(kubeconfig: Option<&Path>) -> Result<Client, ConnectError> {
    let path: PathBuf = match kubeconfig {
        Some(path) => path.to_path_buf(),
        None => dirs::home_dir().unwrap_or_default().join(".kube/config"),
    };

    let config = if path.is_file() {
        debug!("Found kubeconfig at {}, attempting to load it.", path.display());
        let kubeconfig = Kubeconfig::read_from(&path)?;
        Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?
    } else {
        debug!(
            "No kubeconfig at {}, attempting in-cluster configuration.",
            path.display()
        );
        Config::incluster()?
    };

    Ok(Client::try_from(config)?)
}
