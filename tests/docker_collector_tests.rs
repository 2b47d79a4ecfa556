// Docker collector tests against a mock Engine API on a Unix socket

use axum::Json;
use axum::Router;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use hostmon::docker_collector::DockerCollector;
use hostmon::models::{ContainerStatus, PortMapping};
use serde_json::json;
use std::path::Path;

const RUNNING_ID: &str = "aaaaaaaaaaaa1111111111111111111111111111111111111111111111111111";
const EXITED_ID: &str = "bbbbbbbbbbbb2222222222222222222222222222222222222222222222222222";

async fn engine(uri: Uri) -> Response {
    let path = uri.path();
    if path.ends_with("/containers/json") {
        return Json(json!([
            {
                "Id": RUNNING_ID,
                "Names": ["/web"],
                "Image": "nginx:latest",
                "State": "running",
                "Status": "Up 2 hours",
                "Ports": [{"PrivatePort": 80, "PublicPort": 8080, "Type": "tcp"}]
            },
            {
                "Id": EXITED_ID,
                "Names": ["/job"],
                "Image": "alpine:3",
                "State": "exited",
                "Status": "Exited (0) 1 hour ago"
            }
        ]))
        .into_response();
    }
    // Stats are served for every id so a stopped container's zeros come from the collector.
    if path.ends_with("/stats") {
        return Json(json!({
            "read": "2024-01-01T00:00:01Z",
            "preread": "2024-01-01T00:00:00Z",
            "cpu_stats": {
                "cpu_usage": {"total_usage": 400, "percpu_usage": [200, 200]},
                "system_cpu_usage": 2000,
                "online_cpus": 2
            },
            "precpu_stats": {
                "cpu_usage": {"total_usage": 0},
                "system_cpu_usage": 1000
            },
            "memory_stats": {"usage": 104857600, "limit": 536870912},
            "networks": {
                "eth0": {"rx_bytes": 1000, "tx_bytes": 2000},
                "eth1": {"rx_bytes": 500, "tx_bytes": 0}
            },
            "blkio_stats": {
                "io_service_bytes_recursive": [
                    {"major": 8, "minor": 0, "op": "read", "value": 4096},
                    {"major": 8, "minor": 0, "op": "write", "value": 8192}
                ]
            },
            "pids_stats": {"current": 5}
        }))
        .into_response();
    }
    if path.ends_with(&format!("/containers/{RUNNING_ID}/json")) {
        return Json(json!({
            "Id": RUNNING_ID,
            "Name": "/web",
            "RestartCount": 2,
            "State": {
                "Status": "running",
                "Running": true,
                "StartedAt": "2024-01-01T00:00:00Z",
                "Health": {"Status": "healthy"}
            },
            "NetworkSettings": {
                "Ports": {
                    "80/tcp": [
                        {"HostIp": "0.0.0.0", "HostPort": "8080"},
                        {"HostIp": "::", "HostPort": "8080"}
                    ],
                    "443/tcp": null
                }
            }
        }))
        .into_response();
    }
    if path.ends_with(&format!("/containers/{EXITED_ID}/json")) {
        return Json(json!({
            "Id": EXITED_ID,
            "Name": "/job",
            "RestartCount": 0,
            "State": {"Status": "exited", "Running": false, "StartedAt": "2024-01-01T00:00:00Z"}
        }))
        .into_response();
    }
    (StatusCode::NOT_FOUND, Json(json!({"message": "not found"}))).into_response()
}

async fn serve_engine(socket: &Path) {
    let listener = tokio::net::UnixListener::bind(socket).expect("bind unix socket");
    let app = Router::new().fallback(engine);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
}

#[tokio::test]
async fn test_refresh_lists_all_containers_with_stats() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("docker.sock");
    serve_engine(&socket).await;

    let collector = DockerCollector::connect(socket.to_str().unwrap());
    let (mut rx, _sub) = collector.broadcaster().subscribe(1);
    collector.refresh().await;

    let containers = collector.collect().await;
    assert_eq!(containers.len(), 2);
    assert_eq!(rx.recv().await.unwrap(), containers);

    let web = &containers[0];
    assert_eq!(web.id, "aaaaaaaaaaaa");
    assert_eq!(web.name, "web");
    assert_eq!(web.image, "nginx:latest");
    assert_eq!(web.status, ContainerStatus::Running);
    assert_eq!(web.cpu_percent, 80.0);
    assert_eq!(web.memory_usage_mb, 100.0);
    assert_eq!(web.memory_limit_mb, 512.0);
    assert_eq!(web.network_rx_bytes, 1500);
    assert_eq!(web.network_tx_bytes, 2000);
    assert_eq!(web.block_read_bytes, 4096);
    assert_eq!(web.block_write_bytes, 8192);
    assert_eq!(web.pids, 5);
    assert_eq!(web.restart_count, 2);
    assert_eq!(web.health_status, "healthy");
    assert_eq!(web.started_at, "2024-01-01T00:00:00Z");
    assert_eq!(
        web.ports,
        vec![PortMapping {
            host_port: 8080,
            container_port: 80,
            protocol: "tcp".into(),
        }]
    );

    let job = &containers[1];
    assert_eq!(job.name, "job");
    assert_eq!(job.status, ContainerStatus::Stopped);
    assert_eq!(job.cpu_percent, 0.0);
    assert_eq!(job.memory_usage_mb, 0.0);
    assert_eq!(job.memory_limit_mb, 0.0);
    assert_eq!(job.network_rx_bytes, 0);
    assert_eq!(job.network_tx_bytes, 0);
    assert_eq!(job.block_read_bytes, 0);
    assert_eq!(job.block_write_bytes, 0);
    assert_eq!(job.pids, 0);
    assert!(job.ports.is_empty());
    assert_eq!(job.health_status, "none");
    assert_eq!(job.started_at, "2024-01-01T00:00:00Z");
}

#[tokio::test]
async fn test_unreachable_daemon_publishes_empty_list() {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("missing.sock");

    let collector = DockerCollector::connect(socket.to_str().unwrap());
    let (mut rx, _sub) = collector.broadcaster().subscribe(1);
    collector.refresh().await;

    assert!(collector.collect().await.is_empty());
    assert_eq!(rx.recv().await, Some(vec![]));
}

#[tokio::test]
async fn test_collect_before_refresh_is_empty() {
    let collector = DockerCollector::connect("/nonexistent/docker.sock");
    assert!(collector.collect().await.is_empty());
}
