use anyhow::Result;
use hostmon::*;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::FormatTime;

struct LocalTimer;

impl FormatTime for LocalTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        write!(
            w,
            "{}",
            chrono::Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z")
        )
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(s) => s,
                Err(_) => {
                    let _ = tokio::signal::ctrl_c().await;
                    return;
                }
            };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_timer(LocalTimer)
        .with_env_filter(filter)
        .init();

    tracing::info!(name = version::NAME, version = version::VERSION, "starting");

    let app_config = config::AppConfig::load()?;
    tracing::debug!(config = ?app_config, "config loaded");

    let procfs = system_sampler::procfs::ProcFs::default();
    let proc_root = procfs.proc_root().to_path_buf();
    let sampler = Arc::new(system_sampler::SystemSampler::new(
        procfs,
        app_config.monitoring.process_keep,
    ));
    let docker = Arc::new(docker_collector::DockerCollector::connect(
        &app_config.docker.socket,
    ));
    let env = services::HostEnvironment::new(docker.client(), proc_root);
    let detector = Arc::new(services::ServiceDetector::new(
        services::default_plugins(),
        Arc::new(env),
        services::DetectorConfig {
            collect_timeout: Duration::from_secs(app_config.monitoring.collect_timeout_secs),
            ..Default::default()
        },
    ));

    let password = &app_config.services.pihole.password;
    if !password.is_empty() {
        detector
            .set_service_config("pihole", services::pihole::PASSWORD_KEY, password)
            .await;
    }

    let shutdown = CancellationToken::new();
    let handles = worker::spawn(
        worker::WorkerDeps {
            sampler,
            docker,
            detector,
            shutdown: shutdown.clone(),
        },
        worker::WorkerConfig::from(&app_config),
    );

    shutdown_signal().await;
    tracing::info!("Received shutdown signal");
    shutdown.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, operation = "join_worker", "worker task failed");
        }
    }
    tracing::info!("stopped");

    Ok(())
}
