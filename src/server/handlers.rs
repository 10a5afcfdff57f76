//! REST handlers. Everything reads through the cache; nothing here touches
//! the remote API.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use super::state::AppState;
use super::views;
use crate::cluster::evaluate::evaluate_backup_run;
use crate::cluster::evaluate::evaluate_backup_schedule;
use crate::cluster::ADDON_BACKUP;
use crate::health::TenantInfo;

pub async fn ping() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

/// `GET /ns`: namespace names and tenants.
pub async fn list_namespaces(State(state): State<AppState>) -> impl IntoResponse {
    #[derive(Serialize)]
    struct NamespaceSummary {
        name: String,
        tenant: TenantInfo,
    }

    let summaries: Vec<NamespaceSummary> = state
        .cache
        .namespaces
        .list_all()
        .iter()
        .filter_map(|ns| ns.metadata.name.clone())
        .filter(|name| !state.bus.is_ignored("namespace", "", name))
        .map(|name| NamespaceSummary {
            tenant: state.environments.parse(&name),
            name,
        })
        .collect();

    Json(summaries)
}

/// `GET /ns/{name}`: one namespace with all of its workloads.
pub async fn get_namespace(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match views::namespace_detail(&state.cache, &state.addons, &state.environments, &name) {
        Some(detail) => (StatusCode::OK, Json(detail)).into_response(),
        None => not_found(&format!("namespace '{name}' not found")),
    }
}

/// `GET /ns/{name}/pods`
pub async fn namespace_pods(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    Json(views::pod_views(&state.cache, &state.environments, Some(name.as_str())))
}

/// `GET /pods`: every pod in the cluster.
pub async fn list_pods(State(state): State<AppState>) -> impl IntoResponse {
    let pods: Vec<_> = views::pod_views(&state.cache, &state.environments, None)
        .into_iter()
        .filter(|pod| !state.bus.is_ignored("pod", &pod.namespace, &pod.name))
        .collect();
    Json(pods)
}

/// `GET /nodes`
pub async fn list_nodes(State(state): State<AppState>) -> impl IntoResponse {
    Json(views::node_views(&state.cache))
}

/// `GET /nodes/{name}`
pub async fn get_node(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    match views::node_views(&state.cache)
        .into_iter()
        .find(|node| node.name == name)
    {
        Some(node) => (StatusCode::OK, Json(node)).into_response(),
        None => not_found(&format!("node '{name}' not found")),
    }
}

/// `GET /health/namespaces`: rolled-up reports for every namespace.
pub async fn namespace_health(State(state): State<AppState>) -> impl IntoResponse {
    let mut healths =
        views::namespace_health_views(&state.cache, &state.addons, &state.environments);
    healths.retain(|ns| !state.bus.is_ignored("namespace", "", &ns.name));
    Json(healths)
}

/// `GET /report`: the synthesized cluster report with all nodes, unhealthy
/// workloads only, and current URL probe results.
pub async fn report(State(state): State<AppState>) -> impl IntoResponse {
    let cache = &state.cache;
    let environments = &state.environments;

    let only_unhealthy = |views: Vec<views::WorkloadView>| -> Vec<views::WorkloadView> {
        views.into_iter().filter(|v| v.is_unhealthy()).collect()
    };

    let report = views::Report {
        date: Utc::now(),
        errors: Vec::new(),
        nodes: views::node_views(cache),
        unhealthy_daemonsets: only_unhealthy(views::daemon_set_views(cache, environments, None)),
        unhealthy_deployments: only_unhealthy(views::deployment_views(cache, environments, None)),
        unhealthy_pods: only_unhealthy(views::pod_views(cache, environments, None)),
        unhealthy_statefulsets: only_unhealthy(views::stateful_set_views(
            cache,
            environments,
            None,
        )),
        urlchecks: state.prober.results().await,
    };

    Json(report)
}

/// `GET /urls`: current URL probe reports.
pub async fn url_results(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.prober.results().await)
}

/// `GET /velero/backups` and `GET /velero/backups/{namespace}`.
pub async fn list_backups(State(state): State<AppState>) -> impl IntoResponse {
    backups_for(&state, None)
}

pub async fn list_backups_in_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    backups_for(&state, Some(namespace.as_str()))
}

fn backups_for(state: &AppState, namespace: Option<&str>) -> axum::response::Response {
    if !state.addons.has(ADDON_BACKUP) {
        return not_found("backup addon not detected");
    }

    let backups: Vec<views::BackupView> = state
        .cache
        .backup_runs
        .as_ref()
        .map(|store| store.list_all())
        .unwrap_or_default()
        .iter()
        .filter(|backup| namespace.map_or(true, |ns| backup.covers(ns)))
        .map(|backup| views::BackupView {
            name: backup.metadata.name.clone().unwrap_or_default(),
            namespace: backup.metadata.namespace.clone().unwrap_or_default(),
            tenant: state
                .environments
                .parse(backup.metadata.namespace.as_deref().unwrap_or_default()),
            phase: backup.phase().to_string(),
            health: evaluate_backup_run(backup),
        })
        .collect();

    (StatusCode::OK, Json(backups)).into_response()
}

/// `GET /velero/schedules` and `GET /velero/schedules/{namespace}`.
pub async fn list_schedules(State(state): State<AppState>) -> impl IntoResponse {
    schedules_for(&state, None)
}

pub async fn list_schedules_in_namespace(
    State(state): State<AppState>,
    Path(namespace): Path<String>,
) -> impl IntoResponse {
    schedules_for(&state, Some(namespace.as_str()))
}

fn schedules_for(state: &AppState, namespace: Option<&str>) -> axum::response::Response {
    if !state.addons.has(ADDON_BACKUP) {
        return not_found("backup addon not detected");
    }

    let schedules: Vec<views::BackupView> = state
        .cache
        .backup_schedules
        .as_ref()
        .map(|store| store.list_all())
        .unwrap_or_default()
        .iter()
        .filter(|schedule| namespace.map_or(true, |ns| schedule.covers(ns)))
        .map(|schedule| views::BackupView {
            name: schedule.metadata.name.clone().unwrap_or_default(),
            namespace: schedule.metadata.namespace.clone().unwrap_or_default(),
            tenant: state
                .environments
                .parse(schedule.metadata.namespace.as_deref().unwrap_or_default()),
            phase: schedule.phase().to_string(),
            health: evaluate_backup_schedule(schedule),
        })
        .collect();

    (StatusCode::OK, Json(schedules)).into_response()
}

fn not_found(message: &str) -> axum::response::Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}
