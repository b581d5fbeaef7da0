use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use library::{ScanListener, ScanOptions, ScanOutcome, ScanProgress, ScanStats, Scanner};
use parking_lot::{Mutex, RwLock};
use time::OffsetDateTime;
use tokio::sync::{broadcast, Notify};
use tracing::{info, warn};

use crate::config::{self, ConfigError, ScannerConfig};
use crate::schedule::next_scan_time;

const EVENT_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub enum ScanEvent {
    Scheduled(OffsetDateTime),
    Started,
    Progress(ScanProgress),
    Complete(ScanStats),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServiceState {
    NotScheduled,
    Scheduled,
    InProgress,
}

#[derive(Clone, Debug)]
pub struct ServiceStatus {
    pub state: ServiceState,
    pub next_scheduled: Option<OffsetDateTime>,
    pub in_progress: Option<ScanProgress>,
    pub last_complete: Option<ScanStats>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Command {
    Reload,
    ImmediateScan { full: bool },
    Stop,
}

impl Command {
    /// Folds a new request into a pending one; a stronger request wins and
    /// a full scan is never downgraded.
    fn merge(pending: Option<Command>, next: Command) -> Command {
        match (pending, next) {
            (Some(Command::Stop), _) | (_, Command::Stop) => Command::Stop,
            (Some(Command::ImmediateScan { full: a }), Command::ImmediateScan { full: b }) => {
                Command::ImmediateScan { full: a || b }
            }
            (Some(scan @ Command::ImmediateScan { .. }), Command::Reload) => scan,
            (_, next) => next,
        }
    }
}

enum Wake {
    Timer,
    Request(Option<Command>),
}

type SimilarityReloader = Arc<dyn Fn() + Send + Sync>;

struct Shared {
    config_path: PathBuf,
    config: RwLock<ScannerConfig>,
    state: RwLock<ServiceState>,
    next_scheduled: RwLock<Option<OffsetDateTime>>,
    in_progress: RwLock<Option<ScanProgress>>,
    last_complete: RwLock<Option<ScanStats>>,
    abort: Mutex<Arc<AtomicBool>>,
    pending: Mutex<Option<Command>>,
    notify: Notify,
    events: broadcast::Sender<ScanEvent>,
    similarity_reloader: RwLock<Option<SimilarityReloader>>,
}

impl Shared {
    fn send(&self, event: ScanEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

struct EventListener {
    shared: Arc<Shared>,
}

impl ScanListener for EventListener {
    fn on_progress(&self, progress: &ScanProgress) {
        *self.shared.in_progress.write() = Some(progress.clone());
        self.shared.send(ScanEvent::Progress(progress.clone()));
    }

    fn reload_similarity(&self) {
        let reloader = self.shared.similarity_reloader.read().clone();
        match reloader {
            Some(reload) => {
                info!("Reloading similarity data");
                reload();
            }
            None => info!("Similarity reload requested but no reloader is registered"),
        }
    }
}

/// Long-running scanner: owns the schedule, runs scans on the blocking pool
/// and publishes their progress.
#[derive(Clone)]
pub struct ScannerService {
    shared: Arc<Shared>,
    scanner: Arc<Scanner>,
}

impl ScannerService {
    pub fn new(scanner: Scanner, config_path: PathBuf, config: ScannerConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let shared = Shared {
            config_path,
            config: RwLock::new(config),
            state: RwLock::new(ServiceState::NotScheduled),
            next_scheduled: RwLock::new(None),
            in_progress: RwLock::new(None),
            last_complete: RwLock::new(None),
            abort: Mutex::new(Arc::new(AtomicBool::new(false))),
            pending: Mutex::new(None),
            notify: Notify::new(),
            events,
            similarity_reloader: RwLock::new(None),
        };
        Self {
            shared: Arc::new(shared),
            scanner: Arc::new(scanner),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn set_similarity_reloader(&self, reload: impl Fn() + Send + Sync + 'static) {
        *self.shared.similarity_reloader.write() = Some(Arc::new(reload));
    }

    pub fn status(&self) -> ServiceStatus {
        ServiceStatus {
            state: *self.shared.state.read(),
            next_scheduled: *self.shared.next_scheduled.read(),
            in_progress: self.shared.in_progress.read().clone(),
            last_complete: self.shared.last_complete.read().clone(),
        }
    }

    pub fn config(&self) -> ScannerConfig {
        self.shared.config.read().clone()
    }

    /// Aborts any running scan and starts a new one as soon as possible.
    pub fn request_immediate_scan(&self, full: bool) {
        self.push_command(Command::ImmediateScan { full });
    }

    /// Aborts any running scan and recomputes the schedule.
    pub fn request_reload(&self) {
        self.push_command(Command::Reload);
    }

    /// Saves a new config (bumping the scan version when needed) and reloads.
    pub fn update_config(&self, updated: ScannerConfig) -> Result<(), ConfigError> {
        let current = self.config();
        let saved = config::update_config(&self.shared.config_path, &current, updated)?;
        if saved.scan_version != current.scan_version {
            info!("Scan settings changed; scan version is now {}", saved.scan_version);
        }
        *self.shared.config.write() = saved;
        self.request_reload();
        Ok(())
    }

    pub fn shutdown(&self) {
        self.push_command(Command::Stop);
    }

    fn push_command(&self, command: Command) {
        {
            let mut pending = self.shared.pending.lock();
            self.shared.abort.lock().store(true, Ordering::Relaxed);
            *pending = Some(Command::merge(*pending, command));
        }
        self.shared.notify.notify_one();
    }

    fn take_command(&self) -> Option<Command> {
        self.shared.pending.lock().take()
    }

    /// Drives the service until `shutdown` is called.
    pub async fn run(self) {
        let mut next = self.reschedule();
        loop {
            let wake = match next {
                Some(at) => {
                    let delay = std::time::Duration::try_from(at - OffsetDateTime::now_utc())
                        .unwrap_or_default();
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => Wake::Timer,
                        _ = self.shared.notify.notified() => Wake::Request(self.take_command()),
                    }
                }
                None => {
                    self.shared.notify.notified().await;
                    Wake::Request(self.take_command())
                }
            };

            let completed = match wake {
                Wake::Timer => self.run_scan(ScanOptions::default()).await,
                Wake::Request(Some(Command::ImmediateScan { full })) => {
                    self.run_scan(ScanOptions { full_scan: full }).await
                }
                Wake::Request(Some(Command::Reload)) => {
                    info!("Reloading scanner schedule");
                    true
                }
                Wake::Request(Some(Command::Stop)) => break,
                Wake::Request(None) => false,
            };
            // An aborted run leaves the schedule to the request that aborted it.
            if completed {
                next = self.reschedule();
            }
        }
        *self.shared.state.write() = ServiceState::NotScheduled;
        info!("Scanner service stopped");
    }

    fn reschedule(&self) -> Option<OffsetDateTime> {
        let config = self.config();
        let start_time = match config.start_time() {
            Ok(start_time) => start_time,
            Err(err) => {
                warn!("Cannot schedule scans: {}", err);
                *self.shared.state.write() = ServiceState::NotScheduled;
                *self.shared.next_scheduled.write() = None;
                return None;
            }
        };

        let next = next_scan_time(OffsetDateTime::now_utc(), config.update_period, start_time);
        *self.shared.next_scheduled.write() = next;
        match next {
            Some(at) => {
                info!("Next scan scheduled at {}", at);
                *self.shared.state.write() = ServiceState::Scheduled;
                self.shared.send(ScanEvent::Scheduled(at));
            }
            None => {
                info!("No periodic scan scheduled");
                *self.shared.state.write() = ServiceState::NotScheduled;
            }
        }
        next
    }

    /// Returns false when the run was aborted.
    async fn run_scan(&self, options: ScanOptions) -> bool {
        let settings = Arc::new(self.config().to_scan_settings(&self.shared.config_path));
        let abort = Arc::new(AtomicBool::new(false));
        {
            // Requests store their command and raise the flag under the same lock.
            let pending = self.shared.pending.lock();
            if pending.is_some() {
                return false;
            }
            *self.shared.abort.lock() = Arc::clone(&abort);
        }

        *self.shared.state.write() = ServiceState::InProgress;
        *self.shared.next_scheduled.write() = None;
        self.shared.send(ScanEvent::Started);

        let scanner = Arc::clone(&self.scanner);
        let listener = EventListener {
            shared: Arc::clone(&self.shared),
        };
        let result = tokio::task::spawn_blocking(move || {
            scanner.run(settings, options, abort, &listener)
        })
        .await;
        *self.shared.in_progress.write() = None;

        match result {
            Ok(Ok(ScanOutcome::Completed(stats))) => {
                *self.shared.last_complete.write() = Some(stats.clone());
                self.shared.send(ScanEvent::Complete(stats));
                true
            }
            Ok(Ok(ScanOutcome::Aborted)) => false,
            Ok(Err(err)) => {
                warn!("Scan failed: {}", err);
                true
            }
            Err(err) => {
                warn!("Scan join error: {}", err);
                true
            }
        }
    }
}
