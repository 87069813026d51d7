use std::sync::Arc;

use library::{LibraryDb, PathValidator, Scanner};
use metadata::LoftyReader;
use server::config::{
    allowed_roots, apply_env_overrides, config_path_from_env, load_or_create_config,
    resolve_download_root, resolve_path,
};
use server::scan::ScanQueue;
use server::scheduler::{ScheduleSettings, Scheduler};
use server::watch::{FileEventSource, NotifySource};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (mut config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    apply_env_overrides(&mut config);

    let index_path = resolve_path(&config_path, config.index_path.trim());
    let db = LibraryDb::open(&index_path)?;
    info!("Opened index at {:?}", index_path);

    let download_root = resolve_download_root(&config_path, &config);
    std::fs::create_dir_all(&download_root)?;
    let validator = PathValidator::new(allowed_roots(&config_path, &config));
    info!("Allowed library roots: {:?}", validator.roots());

    let scanner = Scanner::new(db, validator, Arc::new(LoftyReader), download_root);
    let queue = ScanQueue::new(Arc::new(scanner), config.scan_worker_limit());
    info!("Scan workers: {}", queue.max_workers());

    let recovery = {
        let queue = queue.clone();
        tokio::task::spawn_blocking(move || queue.recover()).await?
    };
    match recovery {
        Ok(report) => info!(
            "Scan recovery: {} interrupted runs failed, {} queued runs started",
            report.failed_running, report.queued_started
        ),
        Err(err) => warn!("Scan recovery failed: {}", err),
    }

    let source: Arc<dyn FileEventSource> =
        Arc::new(NotifySource::new(config.watch_poll_interval()));
    let scheduler = Arc::new(Scheduler::new(
        queue,
        source,
        ScheduleSettings::from_config(&config),
    ));
    scheduler.start();

    shutdown_signal().await;
    scheduler.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!("Failed to install terminate signal handler: {}", err);
                if let Err(err) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for ctrl-c: {}", err);
                }
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", err);
        }
    }

    info!("Shutdown signal received.");
}
