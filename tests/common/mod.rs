// Shared test helpers

#![allow(dead_code)]

use axum::Router;
use hostmon::services::DetectionEnv;
use std::collections::{BTreeMap, BTreeSet};

/// Serves `app` on an ephemeral loopback port and returns its base URL.
pub async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{addr}")
}

pub fn port_of(base_url: &str) -> u16 {
    base_url
        .rsplit(':')
        .next()
        .and_then(|p| p.parse().ok())
        .expect("port in base url")
}

/// Environment with a single process listening on `port`.
pub fn env_with_process(name: &str, port: u16) -> DetectionEnv {
    DetectionEnv::new(
        vec![],
        BTreeSet::from([name.to_string()]),
        BTreeMap::from([(name.to_string(), vec![port])]),
    )
}
