use std::env;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use library::{Catalog, ScanListener, ScanOptions, ScanOutcome, ScanProgress, ScanSettings, Scanner};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct LogProgress;

impl ScanListener for LogProgress {
    fn on_progress(&self, progress: &ScanProgress) {
        info!(
            "[{}/{}] {:?}: {}/{}",
            progress.step_index + 1,
            progress.step_count,
            progress.step,
            progress.processed,
            progress.total
        );
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (flags, positional): (Vec<String>, Vec<String>) =
        env::args().skip(1).partition(|arg| arg.starts_with("--"));
    let full_scan = flags.iter().any(|flag| flag == "--full");
    let mut positional = positional.into_iter();
    let media_root = positional
        .next()
        .or_else(|| env::var("MEDIA_ROOT").ok())
        .ok_or("MEDIA_ROOT not set and no path argument")?;
    let index_path = positional
        .next()
        .or_else(|| env::var("INDEX_PATH").ok())
        .unwrap_or_else(|| "data/catalog.redb".to_string());

    let index_path = PathBuf::from(index_path);
    if let Some(parent) = index_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let catalog = Catalog::open_or_reset(&index_path)?;
    let settings = ScanSettings {
        media_roots: vec![PathBuf::from(media_root)],
        ..ScanSettings::default()
    }
    .normalized();

    let scanner = Scanner::new(catalog);
    let abort = Arc::new(AtomicBool::new(false));
    let outcome = scanner.run(
        Arc::new(settings),
        ScanOptions { full_scan },
        abort,
        &LogProgress,
    )?;
    match outcome {
        ScanOutcome::Completed(stats) => println!("{}", serde_json::to_string_pretty(&stats)?),
        ScanOutcome::Aborted => return Err("scan aborted".into()),
    }
    Ok(())
}
