//! Periodic URL prober.
//!
//! The prober owns the configured probe list and runs one pass per minute
//! (plus an immediate pass on startup): every probe is checked concurrently,
//! a pass finishes when all checks do, and a status transition publishes a
//! [`HealthUpdate`] on the bus.

pub mod check;

pub use check::{check_validity, query_path, DEFAULT_STATUS_EXPR};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::bus::Bus;
use crate::health::{
    EntityKind, EnvironmentSet, HealthReport, HealthStatus, HealthUpdate, UpdateAction,
};

/// Request timeout applied to every probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Time between passes.
pub const PASS_INTERVAL: Duration = Duration::from_secs(60);

/// Which part of the response a probe validates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    #[default]
    HttpStatus,
    HttpBody,
    Json,
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeType::HttpStatus => f.write_str("httpstatus"),
            ProbeType::HttpBody => f.write_str("httpbody"),
            ProbeType::Json => f.write_str("json"),
        }
    }
}

/// One configured URL probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub url: String,
    #[serde(rename = "type", default)]
    pub probe_type: ProbeType,
    /// Invert the verdict: a match becomes unhealthy.
    #[serde(rename = "fail_true", default)]
    pub fail_true: bool,
    #[serde(rename = "jsonpath", default, skip_serializing_if = "Option::is_none")]
    pub json_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regexp: Option<String>,
}

impl ProbeSpec {
    /// Two specs with the same identity keep their health baseline across a
    /// config reload. The description is cosmetic and excluded.
    fn same_identity(&self, other: &ProbeSpec) -> bool {
        self.name == other.name
            && self.url == other.url
            && self.probe_type == other.probe_type
            && self.fail_true == other.fail_true
            && self.json_path == other.json_path
            && self.regexp == other.regexp
    }
}

/// A probe definition plus its authoritative last report.
#[derive(Debug, Clone)]
struct ProbeState {
    spec: ProbeSpec,
    last_report: Option<HealthReport>,
}

/// A probe and its current report, as served over the API.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub metadata: ProbeSpec,
    pub health: HealthReport,
}

pub struct Prober {
    targets: RwLock<Vec<ProbeState>>,
    /// Held for the duration of a pass so passes never overlap.
    pass_lock: Mutex<()>,
    client: Client,
    bus: Arc<Bus>,
    environments: Arc<EnvironmentSet>,
}

impl Prober {
    pub fn new(bus: Arc<Bus>, environments: Arc<EnvironmentSet>) -> Self {
        let client = Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            targets: RwLock::new(Vec::new()),
            pass_lock: Mutex::new(()),
            client,
            bus,
            environments,
        }
    }

    /// Atomically replace the probe list. Probes whose identity is unchanged
    /// keep their previous report as the transition baseline.
    pub async fn reload(&self, specs: Vec<ProbeSpec>) {
        let mut targets = self.targets.write().await;
        let previous = std::mem::take(&mut *targets);

        *targets = specs
            .into_iter()
            .map(|spec| {
                let last_report = previous
                    .iter()
                    .find(|state| state.spec.same_identity(&spec))
                    .and_then(|state| state.last_report.clone());
                ProbeState { spec, last_report }
            })
            .collect();

        info!("Loaded {} URLs.", targets.len());
    }

    /// Current probe reports; probes never checked report `Unknown`.
    pub async fn results(&self) -> Vec<ProbeResult> {
        self.targets
            .read()
            .await
            .iter()
            .map(|state| ProbeResult {
                metadata: state.spec.clone(),
                health: state.last_report.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// Run passes until the stop signal fires. The first pass starts
    /// immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("Starting URL checker.");
        let mut ticker = tokio::time::interval(PASS_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.run_pass().await,
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Stopping URL checker.");
    }

    /// One pass: check every probe concurrently, store the reports, and
    /// publish transitions.
    pub async fn run_pass(&self) {
        let _pass = self.pass_lock.lock().await;
        let started = tokio::time::Instant::now();

        let snapshot: Vec<(usize, ProbeSpec, Option<HealthReport>)> = {
            let targets = self.targets.read().await;
            targets
                .iter()
                .enumerate()
                .map(|(idx, state)| (idx, state.spec.clone(), state.last_report.clone()))
                .collect()
        };

        if snapshot.is_empty() {
            return;
        }
        debug!("Checking {} URLs.", snapshot.len());

        let checks = snapshot.into_iter().map(|(idx, spec, previous)| {
            let client = self.client.clone();
            async move {
                let report = execute(&client, &spec).await;
                (idx, spec, previous, report)
            }
        });
        let outcomes = join_all(checks).await;

        let mut targets = self.targets.write().await;
        for (idx, spec, previous, report) in outcomes {
            // Skip stale results if a reload swapped the list mid-pass.
            if let Some(state) = targets.get_mut(idx) {
                if state.spec.same_identity(&spec) {
                    state.last_report = Some(report.clone());
                }
            }

            let previous_status = previous
                .as_ref()
                .map(|r| r.status)
                .unwrap_or(HealthStatus::Unknown);
            if previous_status != report.status {
                let update = HealthUpdate {
                    api_version: None,
                    kind: EntityKind::UrlProbe,
                    namespace: String::new(),
                    name: spec.name.clone(),
                    tenant: self.environments.parse(&spec.name),
                    action: UpdateAction::Update,
                    report,
                    previous_report: Some(previous.unwrap_or_default()),
                };
                self.bus.broadcast(&update);
            }
        }

        debug!(
            "Worker pool completed in {:.2}s.",
            started.elapsed().as_secs_f64()
        );
    }
}

/// Check a single probe and build its report.
async fn execute(client: &Client, spec: &ProbeSpec) -> HealthReport {
    let mut report = HealthReport::new();

    let response = match client.get(&spec.url).send().await {
        Ok(response) => response,
        Err(err) => {
            warn!("Probe {} failed: {err}", spec.name);
            report.errors.push(err.to_string());
            return report;
        }
    };

    let status = response.status();
    let status_line = match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    };

    match spec.probe_type {
        ProbeType::HttpStatus => check::check_http_status(&mut report, &status_line, spec),
        ProbeType::HttpBody => match response.text().await {
            Ok(body) => check::check_http_body(&mut report, &body, spec),
            Err(err) => report.errors.push(err.to_string()),
        },
        ProbeType::Json => match response.text().await {
            Ok(body) => check::check_json(&mut report, &body, spec),
            Err(err) => report.errors.push(err.to_string()),
        },
    }

    if spec.fail_true {
        report.status = match report.status {
            HealthStatus::Healthy => HealthStatus::Unhealthy,
            HealthStatus::Unhealthy => HealthStatus::Healthy,
            other => other,
        };
    }

    report
}
