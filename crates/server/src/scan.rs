use std::sync::Arc;

use common::{ScanRun, ScanStats, ScanStatus};
use library::{LibraryDb, LibraryError, Scanner};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

pub const LIBRARY_NOT_FOUND: &str = "Library not found.";
pub const SCAN_ALREADY_ACTIVE: &str = "A scan is already queued or running for this library.";
pub const SCAN_INTERRUPTED: &str = "Scan interrupted by server restart.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Accepted { scan_run_id: u64 },
    Rejected { reason: String },
}

impl EnqueueOutcome {
    fn rejected(reason: &str) -> Self {
        EnqueueOutcome::Rejected {
            reason: reason.to_string(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self, EnqueueOutcome::Accepted { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub failed_running: usize,
    pub queued_started: usize,
}

#[derive(Debug)]
pub enum ScanNowError {
    Busy,
    Library(LibraryError),
    Join(tokio::task::JoinError),
}

impl std::fmt::Display for ScanNowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScanNowError::Busy => f.write_str(SCAN_ALREADY_ACTIVE),
            ScanNowError::Library(err) => write!(f, "{}", err),
            ScanNowError::Join(err) => write!(f, "scan task failed: {}", err),
        }
    }
}

impl std::error::Error for ScanNowError {}

impl From<LibraryError> for ScanNowError {
    fn from(err: LibraryError) -> Self {
        ScanNowError::Library(err)
    }
}

impl From<tokio::task::JoinError> for ScanNowError {
    fn from(err: tokio::task::JoinError) -> Self {
        ScanNowError::Join(err)
    }
}

#[derive(Default)]
struct DrainState {
    running: bool,
    pending: bool,
}

/// Scan job queue backed by the run ledger. Accepts at most one active run
/// per library and keeps at most `max_workers` runs executing.
///
/// Store calls block, so `enqueue`, `drain` and `recover` belong on a blocking
/// thread inside the tokio runtime; dispatched scans are spawned onto it.
/// Called outside a runtime they only touch the ledger, and queued runs wait
/// for the next drain made inside one.
#[derive(Clone)]
pub struct ScanQueue {
    inner: Arc<QueueInner>,
}

struct QueueInner {
    scanner: Arc<Scanner>,
    max_workers: usize,
    drain: Mutex<DrainState>,
}

impl ScanQueue {
    pub fn new(scanner: Arc<Scanner>, max_workers: usize) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                scanner,
                max_workers: max_workers.max(1),
                drain: Mutex::new(DrainState::default()),
            }),
        }
    }

    pub fn db(&self) -> &LibraryDb {
        self.inner.scanner.db()
    }

    pub fn max_workers(&self) -> usize {
        self.inner.max_workers
    }

    pub fn enqueue(&self, user_id: u64, library_id: u64) -> Result<EnqueueOutcome, LibraryError> {
        let db = self.db();
        if db.find_user_library(user_id, library_id)?.is_none() {
            return Ok(EnqueueOutcome::rejected(LIBRARY_NOT_FOUND));
        }
        let run = match db.create_scan_run_if_idle(library_id, user_id, ScanStatus::Queued)? {
            Some(run) => run,
            None => return Ok(EnqueueOutcome::rejected(SCAN_ALREADY_ACTIVE)),
        };
        info!("Queued scan run {} for library {}", run.id, library_id);
        self.request_drain();
        Ok(EnqueueOutcome::Accepted { scan_run_id: run.id })
    }

    /// Enqueues on behalf of the library's owner.
    pub fn enqueue_library(&self, library_id: u64) -> Result<EnqueueOutcome, LibraryError> {
        match self.db().get_library(library_id)? {
            Some(library) => self.enqueue(library.user_id, library.id),
            None => Ok(EnqueueOutcome::rejected(LIBRARY_NOT_FOUND)),
        }
    }

    /// Enqueues every library; returns how many were accepted.
    pub fn enqueue_all(&self) -> Result<usize, LibraryError> {
        let mut accepted = 0;
        for library in self.db().list_libraries()? {
            match self.enqueue(library.user_id, library.id)? {
                EnqueueOutcome::Accepted { .. } => accepted += 1,
                EnqueueOutcome::Rejected { reason } => {
                    debug!("Skipping scheduled scan of library {}: {}", library.id, reason)
                }
            }
        }
        Ok(accepted)
    }

    pub fn is_active(&self, user_id: u64, library_id: u64) -> Result<bool, LibraryError> {
        let db = self.db();
        if db.find_user_library(user_id, library_id)?.is_none() {
            return Ok(false);
        }
        Ok(db.find_active_run(library_id)?.is_some())
    }

    /// Fails runs left `running` by a previous process, then restarts the
    /// queue.
    pub fn recover(&self) -> Result<RecoveryReport, LibraryError> {
        let failed_running = self.db().fail_running_runs(SCAN_INTERRUPTED)?;
        if failed_running > 0 {
            warn!("Marked {} interrupted scan runs as failed", failed_running);
        }
        let queued_started = self.drain();
        Ok(RecoveryReport {
            failed_running,
            queued_started,
        })
    }

    /// Runs a scan on the calling task's behalf and waits for it.
    pub async fn scan_now(&self, user_id: u64, library_id: u64) -> Result<ScanStats, ScanNowError> {
        let scanner = Arc::clone(&self.inner.scanner);
        let result = tokio::task::spawn_blocking(move || -> Result<Option<ScanStats>, LibraryError> {
            let db = scanner.db();
            if db.find_user_library(user_id, library_id)?.is_none() {
                return Err(LibraryError::LibraryNotFound(library_id));
            }
            match db.create_scan_run_if_idle(library_id, user_id, ScanStatus::Running)? {
                Some(run) => scanner.scan(user_id, library_id, Some(run.id)).map(Some),
                None => Ok(None),
            }
        })
        .await?;
        match result? {
            Some(stats) => Ok(stats),
            None => Err(ScanNowError::Busy),
        }
    }

    /// Starts queued runs until the worker limit is reached or the queue is
    /// empty. A call made while another drain is in progress makes that drain
    /// take one more pass instead. Returns the number of runs started here.
    pub fn drain(&self) -> usize {
        {
            let mut state = self.inner.drain.lock();
            if state.running {
                state.pending = true;
                return 0;
            }
            state.running = true;
        }

        let mut started = 0;
        loop {
            started += self.drain_pass();
            let mut state = self.inner.drain.lock();
            if state.pending {
                state.pending = false;
                continue;
            }
            state.running = false;
            break;
        }
        started
    }

    fn drain_pass(&self) -> usize {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No tokio runtime to run scans on; queued scans stay queued");
                return 0;
            }
        };
        let db = self.db();
        let mut started = 0;
        loop {
            let running = match db.count_running_runs() {
                Ok(running) => running,
                Err(err) => {
                    warn!("Failed to count running scans: {}", err);
                    break;
                }
            };
            let available = self.inner.max_workers.saturating_sub(running);
            if available == 0 {
                break;
            }
            let queued = match db.list_queued_runs(available) {
                Ok(queued) => queued,
                Err(err) => {
                    warn!("Failed to list queued scans: {}", err);
                    break;
                }
            };
            if queued.is_empty() {
                break;
            }

            let mut claimed = 0;
            for run in queued {
                match db.claim_queued_run(run.id) {
                    Ok(0) => debug!("Scan run {} was claimed elsewhere", run.id),
                    Ok(_) => {
                        self.dispatch(&runtime, run);
                        claimed += 1;
                    }
                    Err(err) => warn!("Failed to claim scan run {}: {}", run.id, err),
                }
            }
            if claimed == 0 {
                break;
            }
            started += claimed;
        }
        started
    }

    fn request_drain(&self) {
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                debug!("No tokio runtime; queued scans wait for the next drain");
                return;
            }
        };
        let queue = self.clone();
        runtime.spawn_blocking(move || {
            queue.drain();
        });
    }

    fn dispatch(&self, runtime: &Handle, run: ScanRun) {
        let queue = self.clone();
        runtime.spawn(async move {
            let (run_id, user_id, library_id) = (run.id, run.user_id, run.library_id);
            let scanner = Arc::clone(&queue.inner.scanner);
            let result =
                tokio::task::spawn_blocking(move || scanner.scan(user_id, library_id, Some(run_id)))
                    .await;

            let failure = match result {
                Ok(Ok(_)) => None,
                Ok(Err(err)) => Some(err.to_string()),
                Err(err) => Some(format!("Scan task failed: {}", err)),
            };
            if let Some(message) = failure {
                warn!("Scan run {} for library {} failed: {}", run_id, library_id, message);
                let db = queue.db().clone();
                let written = tokio::task::spawn_blocking(move || {
                    db.finish_scan_run(run_id, ScanStatus::Failed, Some(message), None)
                })
                .await;
                match written {
                    Ok(Ok(_)) => {}
                    Ok(Err(err)) => warn!("Failed to mark scan run {} failed: {}", run_id, err),
                    Err(err) => warn!("Failed to mark scan run {} failed: {}", run_id, err),
                }
            }

            queue.request_drain();
        });
    }
}
