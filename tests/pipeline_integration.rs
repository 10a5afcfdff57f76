//! Integration tests wiring the demultiplexer, prober, and bus together.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{Pod, PodCondition, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tokio::sync::{mpsc, watch};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

use bms_api::bus::Bus;
use bms_api::cluster::{AddonSet, ClusterCache, Demux, RawEvent, Snapshot};
use bms_api::health::{EnvironmentSet, UpdateAction};
use bms_api::probe::{ProbeSpec, ProbeType, Prober};

fn pod(namespace: &str, name: &str, ready: &str) -> Arc<Pod> {
    Arc::new(Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            conditions: Some(vec![PodCondition {
                type_: "Ready".to_string(),
                status: ready.to_string(),
                ..PodCondition::default()
            }]),
            ..PodStatus::default()
        }),
        ..Pod::default()
    })
}

fn attrs(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

async fn recv_soon(rx: &mut mpsc::Receiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("timed out waiting for a broadcast")
        .expect("bus closed the session")
}

#[tokio::test]
async fn test_cache_event_reaches_matching_sessions_only() {
    let cache = Arc::new(ClusterCache::new(false));
    cache.pods.mark_synced();
    cache.namespaces.mark_synced();

    let bus = Arc::new(Bus::new(Vec::new()));
    let (_, mut pod_rx) = bus.register(attrs(&[("kind", "pod")]));
    let (_, mut deployment_rx) = bus.register(attrs(&[("kind", "deployment")]));
    let (_, mut namespace_rx) = bus.register(attrs(&[("kind", "namespace")]));

    let demux = Demux::new(
        cache.clone(),
        bus.clone(),
        Arc::new(AddonSet::default()),
        Arc::new(EnvironmentSet::default()),
        Duration::from_millis(20),
    );

    let (events_tx, events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(demux.run(events_rx, shutdown_rx));

    let snapshot = Snapshot::Pod(pod("team-prod", "web-0", "True"));
    cache.pods.apply(pod("team-prod", "web-0", "True"));
    events_tx
        .send(RawEvent {
            action: UpdateAction::Add,
            snapshot,
            previous: None,
        })
        .await
        .unwrap();

    // The pod session sees the add.
    let msg = recv_soon(&mut pod_rx).await;
    assert!(msg.contains("\"kind\":\"pod\""));
    assert!(msg.contains("\"name\":\"web-0\""));
    assert!(msg.contains("\"tenant\":{\"name\":\"team\",\"environment\":\"prod\"}"));

    // The namespace session sees the debounced refresh.
    let refresh = recv_soon(&mut namespace_rx).await;
    assert!(refresh.contains("\"action\":\"refresh\""));
    assert!(refresh.contains("\"name\":\"team-prod\""));

    // The deployment session sees nothing at all.
    assert!(deployment_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_status_transition_produces_one_update() {
    let cache = Arc::new(ClusterCache::new(false));
    cache.pods.mark_synced();

    let bus = Arc::new(Bus::new(Vec::new()));
    let (_, mut rx) = bus.register(attrs(&[("kind", "pod")]));

    let demux = Demux::new(
        cache.clone(),
        bus.clone(),
        Arc::new(AddonSet::default()),
        Arc::new(EnvironmentSet::default()),
        Duration::from_millis(10),
    );

    let (events_tx, events_rx) = mpsc::channel(16);
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(demux.run(events_rx, shutdown_rx));

    // Same status on both sides: no emission.
    events_tx
        .send(RawEvent {
            action: UpdateAction::Update,
            snapshot: Snapshot::Pod(pod("team-prod", "web-0", "True")),
            previous: Some(Snapshot::Pod(pod("team-prod", "web-0", "True"))),
        })
        .await
        .unwrap();

    // A real transition follows and must be the first thing received.
    events_tx
        .send(RawEvent {
            action: UpdateAction::Update,
            snapshot: Snapshot::Pod(pod("team-prod", "web-0", "False")),
            previous: Some(Snapshot::Pod(pod("team-prod", "web-0", "True"))),
        })
        .await
        .unwrap();

    let msg = recv_soon(&mut rx).await;
    assert!(msg.contains("\"healthy\":\"False\""));
    assert!(msg.contains("\"previousReport\""));
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_probe_transition_reaches_url_session() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let bus = Arc::new(Bus::new(Vec::new()));
    let (_, mut url_rx) = bus.register(attrs(&[("kind", "urlprobe")]));
    let (_, mut pod_rx) = bus.register(attrs(&[("kind", "pod")]));

    let prober = Arc::new(Prober::new(bus.clone(), Arc::new(EnvironmentSet::default())));
    prober
        .reload(vec![ProbeSpec {
            name: "portal-prod".to_string(),
            description: None,
            url: server.uri(),
            probe_type: ProbeType::HttpStatus,
            fail_true: false,
            json_path: None,
            regexp: None,
        }])
        .await;

    prober.run_pass().await;

    let msg = recv_soon(&mut url_rx).await;
    assert!(msg.contains("\"kind\":\"urlprobe\""));
    assert!(msg.contains("\"healthy\":\"True\""));
    assert!(msg.contains("\"text\":\"200 OK\""));
    // Probe names parse tenants like namespaces do.
    assert!(msg.contains("\"tenant\":{\"name\":\"portal\",\"environment\":\"prod\"}"));

    assert!(pod_rx.try_recv().is_err());

    // A steady second pass emits nothing.
    prober.run_pass().await;
    assert!(url_rx.try_recv().is_err());
}
