use library::{Catalog, Scanner};
use scanner::{
    config_path_from_env, load_or_create_config, resolve_path, ScanEvent, ScannerService,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config_path = config_path_from_env();
    let (config, created) = load_or_create_config(&config_path)?;
    if created {
        info!("Created default config at {:?}", config_path);
    } else {
        info!("Loaded config from {:?}", config_path);
    }
    if config.media_roots.is_empty() {
        info!("No media roots configured yet; edit {:?} to add one.", config_path);
    }

    let index_path = resolve_path(&config_path, config.index_path.trim());
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let catalog = Catalog::open_or_reset(&index_path)?;
    let service = ScannerService::new(Scanner::new(catalog), config_path, config);

    let mut events = service.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ScanEvent::Scheduled(at)) => debug!("Scan scheduled at {}", at),
                Ok(ScanEvent::Started) => debug!("Scan started"),
                Ok(ScanEvent::Progress(progress)) => debug!(
                    "Scan step {}/{} ({:?}): {}/{}",
                    progress.step_index + 1,
                    progress.step_count,
                    progress.step,
                    progress.processed,
                    progress.total
                ),
                Ok(ScanEvent::Complete(stats)) => {
                    for error in &stats.errors {
                        debug!("Scan error {:?} on {}: {}", error.kind, error.path, error.message);
                    }
                }
                Err(RecvError::Lagged(skipped)) => warn!("Dropped {} scan events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|arg| arg == "--scan-now") {
        service.request_immediate_scan(args.iter().any(|arg| arg == "--full"));
    }

    let runner = tokio::spawn(service.clone().run());
    shutdown_signal().await;
    service.shutdown();
    if let Err(err) = runner.await {
        warn!("Scanner service join error: {}", err);
    }
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
