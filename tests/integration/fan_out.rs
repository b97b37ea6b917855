//! Fan-out probe and control tests against mock worker agents

use std::sync::Arc;
use std::time::Duration;

use cluster_monitoring::config::WorkerEndpoint;
use cluster_monitoring::control::ControlPlane;
use cluster_monitoring::inspector::ClusterInspector;
use cluster_monitoring::transport::HttpWorkerTransport;
use pretty_assertions::assert_eq;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(2);

fn endpoint(hostname: &str, url: &str) -> WorkerEndpoint {
    WorkerEndpoint {
        hostname: hostname.to_string(),
        url: url.to_string(),
        token: None,
    }
}

async fn mock_command(server: &MockServer, command: &str, reply: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/control"))
        .and(body_partial_json(serde_json::json!({"command": command})))
        .respond_with(ResponseTemplate::new(200).set_body_json(reply))
        .mount(server)
        .await;
}

#[tokio::test]
async fn ping_returns_exactly_the_responding_nodes() {
    let worker_a = MockServer::start().await;
    let worker_b = MockServer::start().await;

    mock_command(&worker_a, "ping", serde_json::json!({"ok": "pong"})).await;
    mock_command(&worker_b, "ping", serde_json::json!({"ok": "pong"})).await;

    let transport = Arc::new(HttpWorkerTransport::new(vec![
        endpoint("worker-a@host1", &worker_a.uri()),
        endpoint("worker-b@host2", &worker_b.uri()),
        // Nobody listens here; it must simply be absent
        endpoint("worker-c@host3", "http://127.0.0.1:9"),
    ]));
    let inspector = ClusterInspector::new(transport, TIMEOUT);

    let pings = inspector.ping().await;

    assert_eq!(pings.len(), 2);
    assert!(pings["worker-a@host1"]);
    assert!(pings["worker-b@host2"]);
    assert!(!pings.contains_key("worker-c@host3"));
}

#[tokio::test]
async fn get_workers_never_omits_a_host_seen_by_any_probe() {
    let worker_a = MockServer::start().await;
    let worker_b = MockServer::start().await;

    // A answers ping and stats; B answers stats only (its ping falls
    // through to a 404 and is treated as silence)
    mock_command(&worker_a, "ping", serde_json::json!({"ok": "pong"})).await;
    mock_command(
        &worker_a,
        "stats",
        serde_json::json!({"pid": 41, "processed": 120, "concurrency": 8}),
    )
    .await;
    mock_command(
        &worker_b,
        "stats",
        serde_json::json!({"pid": 42, "processed": 55, "concurrency": 4}),
    )
    .await;

    let transport = Arc::new(HttpWorkerTransport::new(vec![
        endpoint("worker-a@host1", &worker_a.uri()),
        endpoint("worker-b@host2", &worker_b.uri()),
    ]));
    let inspector = ClusterInspector::new(transport, TIMEOUT);

    let workers = inspector.get_workers().await;

    assert_eq!(workers.len(), 2);

    let a = workers.iter().find(|w| w.hostname == "worker-a@host1").unwrap();
    assert!(a.is_alive);
    assert_eq!(a.processed_tasks, 120);

    let b = workers.iter().find(|w| w.hostname == "worker-b@host2").unwrap();
    assert!(!b.is_alive, "a host seen only via stats is reported dead");
    assert_eq!(b.processed_tasks, 55);
    assert_eq!(b.stats.as_ref().unwrap().concurrency, 4);
}

#[tokio::test]
async fn active_probe_fills_worker_status() {
    let worker_a = MockServer::start().await;

    mock_command(&worker_a, "ping", serde_json::json!({"ok": "pong"})).await;
    mock_command(
        &worker_a,
        "active",
        serde_json::json!([
            {"id": "t1", "name": "tasks.render", "args": [3], "kwargs": {}, "time_start": 1717171000.0},
            {"id": "t2", "name": "tasks.export", "args": [], "kwargs": {}}
        ]),
    )
    .await;

    let transport = Arc::new(HttpWorkerTransport::new(vec![endpoint(
        "worker-a@host1",
        &worker_a.uri(),
    )]));
    let inspector = ClusterInspector::new(transport, TIMEOUT);

    let workers = inspector.get_workers().await;

    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0].active_tasks_count, 2);
    assert_eq!(workers[0].active_tasks[0].worker, "worker-a@host1");
    assert_eq!(workers[0].active_tasks[1].name, "tasks.export");
}

#[tokio::test]
async fn control_command_with_zero_reachable_nodes_returns_empty_map() {
    let transport = Arc::new(HttpWorkerTransport::new(vec![endpoint(
        "worker-a@host1",
        "http://127.0.0.1:9",
    )]));
    let control = ControlPlane::new(transport, TIMEOUT);

    let replies = control.restart_pool(None).await;

    assert!(replies.is_empty());
}

#[tokio::test]
async fn purge_sums_counts_from_the_nodes_that_replied() {
    let worker_a = MockServer::start().await;
    let worker_b = MockServer::start().await;

    mock_command(&worker_a, "purge", serde_json::json!({"purged": 17})).await;
    mock_command(&worker_b, "purge", serde_json::json!({"purged": 25})).await;

    let transport = Arc::new(HttpWorkerTransport::new(vec![
        endpoint("worker-a@host1", &worker_a.uri()),
        endpoint("worker-b@host2", &worker_b.uri()),
        endpoint("worker-c@host3", "http://127.0.0.1:9"),
    ]));
    let control = ControlPlane::new(transport, TIMEOUT);

    let purged = control.purge_all_queues(None).await;

    assert_eq!(purged, 42);
}

#[tokio::test]
async fn shutdown_collects_partial_acknowledgements() {
    let worker_a = MockServer::start().await;

    mock_command(&worker_a, "shutdown", serde_json::json!({"ok": "shutting down"})).await;

    let transport = Arc::new(HttpWorkerTransport::new(vec![
        endpoint("worker-a@host1", &worker_a.uri()),
        endpoint("worker-b@host2", "http://127.0.0.1:9"),
    ]));
    let control = ControlPlane::new(transport, TIMEOUT);

    let replies = control.shutdown_workers(None).await;

    assert_eq!(replies.len(), 1);
    assert_eq!(replies["worker-a@host1"]["ok"], "shutting down");
}
