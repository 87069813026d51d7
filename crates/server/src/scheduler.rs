use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use common::LibraryPath;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::ServerConfig;
use crate::scan::{EnqueueOutcome, ScanQueue};
use crate::watch::{EventStream, FileEventSource};

/// Quiet period after the last filesystem event before a library is queued.
pub const WATCH_DEBOUNCE: Duration = Duration::from_millis(2_500);

#[derive(Clone, Debug)]
pub struct ScheduleSettings {
    pub scan_interval: Option<Duration>,
    pub watch_enabled: bool,
    pub watch_refresh: Duration,
    pub watch_debounce: Duration,
}

impl ScheduleSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            scan_interval: config.scan_interval(),
            watch_enabled: config.watch_libraries,
            watch_refresh: config.watch_refresh_interval(),
            watch_debounce: WATCH_DEBOUNCE,
        }
    }
}

/// Open watch on one library path. Dropping it stops the forwarding task,
/// which closes the event stream.
struct PathWatch {
    library_id: u64,
    path: String,
    _stop: oneshot::Sender<()>,
}

/// Periodic rescans plus filesystem watchers feeding the scan queue.
pub struct Scheduler {
    queue: ScanQueue,
    source: Arc<dyn FileEventSource>,
    settings: ScheduleSettings,
    watchers: Mutex<HashMap<u64, PathWatch>>,
    debouncer: Arc<Debouncer>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        queue: ScanQueue,
        source: Arc<dyn FileEventSource>,
        settings: ScheduleSettings,
    ) -> Self {
        let trigger_queue = queue.clone();
        let debouncer = Arc::new(Debouncer::new(
            settings.watch_debounce,
            Arc::new(move |library_id: u64| enqueue_from_watch(&trigger_queue, library_id)),
        ));
        Self {
            queue,
            source,
            settings,
            watchers: Mutex::new(HashMap::new()),
            debouncer,
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock();

        match self.settings.scan_interval {
            Some(period) => {
                info!("Scheduled library scans every {} minutes", period.as_secs() / 60);
                let queue = self.queue.clone();
                tasks.push(tokio::spawn(async move {
                    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                    loop {
                        ticker.tick().await;
                        let queue = queue.clone();
                        match tokio::task::spawn_blocking(move || queue.enqueue_all()).await {
                            Ok(Ok(accepted)) => {
                                debug!("Scheduled scan queued {} libraries", accepted)
                            }
                            Ok(Err(err)) => warn!("Scheduled scan failed: {}", err),
                            Err(err) => warn!("Scheduled scan join error: {}", err),
                        }
                    }
                }));
            }
            None => info!("Scheduled library scans disabled"),
        }

        if !self.settings.watch_enabled {
            info!("Library watchers disabled");
            return;
        }
        let weak = Arc::downgrade(self);
        let period = self.settings.watch_refresh;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(scheduler) = weak.upgrade() else {
                    break;
                };
                let open = scheduler.refresh_watchers().await;
                debug!("Watching {} library paths", open);
            }
        }));
    }

    /// Brings open watches in line with the enabled library paths. Returns
    /// the number of paths being watched afterwards.
    pub async fn refresh_watchers(&self) -> usize {
        let db = self.queue.db().clone();
        let paths = match tokio::task::spawn_blocking(move || db.list_enabled_paths()).await {
            Ok(Ok(paths)) => paths,
            Ok(Err(err)) => {
                warn!("Failed to list library paths: {}", err);
                return self.watchers.lock().len();
            }
            Err(err) => {
                warn!("Failed to list library paths: {}", err);
                return self.watchers.lock().len();
            }
        };
        let wanted: HashMap<u64, LibraryPath> =
            paths.into_iter().map(|path| (path.id, path)).collect();

        let mut watchers = self.watchers.lock();
        watchers.retain(|path_id, watch| {
            let keep = wanted.get(path_id).is_some_and(|path| {
                path.path == watch.path && path.library_id == watch.library_id
            });
            if !keep {
                debug!("Closing watcher for {:?}", watch.path);
            }
            keep
        });

        for (path_id, path) in wanted {
            if watchers.contains_key(&path_id) {
                continue;
            }
            match self.source.watch(Path::new(&path.path)) {
                Ok(stream) => {
                    let stop = self.forward_events(path.library_id, stream);
                    info!("Watching {:?} for library {}", path.path, path.library_id);
                    watchers.insert(
                        path_id,
                        PathWatch {
                            library_id: path.library_id,
                            path: path.path,
                            _stop: stop,
                        },
                    );
                }
                Err(err) => debug!("Failed to watch {:?}: {}", path.path, err),
            }
        }
        watchers.len()
    }

    fn forward_events(&self, library_id: u64, mut stream: EventStream) -> oneshot::Sender<()> {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let debouncer = Arc::clone(&self.debouncer);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    event = stream.next() => match event {
                        Some(changed) => {
                            debug!("Change under library {}: {:?}", library_id, changed);
                            debouncer.touch(library_id);
                        }
                        None => break,
                    },
                }
            }
            stream.close();
        });
        stop_tx
    }

    pub fn shutdown(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.watchers.lock().clear();
        self.debouncer.cancel_all();
        info!("Scheduler stopped");
    }
}

fn enqueue_from_watch(queue: &ScanQueue, library_id: u64) {
    let queue = queue.clone();
    tokio::task::spawn_blocking(move || match queue.enqueue_library(library_id) {
        Ok(EnqueueOutcome::Accepted { scan_run_id }) => {
            info!("Library {} changed; queued scan run {}", library_id, scan_run_id)
        }
        Ok(EnqueueOutcome::Rejected { reason }) => {
            debug!("Library {} changed; not queued: {}", library_id, reason)
        }
        Err(err) => warn!("Failed to queue scan for library {}: {}", library_id, err),
    });
}

type Trigger = Arc<dyn Fn(u64) + Send + Sync>;

/// Per-library timers. Each touch restarts the library's timer; the trigger
/// runs once the timer survives a full quiet period.
struct Debouncer {
    delay: Duration,
    trigger: Trigger,
    timers: Mutex<HashMap<u64, (u64, JoinHandle<()>)>>,
    generation: Mutex<u64>,
}

impl Debouncer {
    fn new(delay: Duration, trigger: Trigger) -> Self {
        Self {
            delay,
            trigger,
            timers: Mutex::new(HashMap::new()),
            generation: Mutex::new(0),
        }
    }

    fn touch(self: &Arc<Self>, library_id: u64) {
        let generation = {
            let mut counter = self.generation.lock();
            *counter += 1;
            *counter
        };
        let debouncer = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(debouncer.delay).await;
            debouncer.fire(library_id, generation);
        });

        let mut timers = self.timers.lock();
        if let Some((_, previous)) = timers.insert(library_id, (generation, timer)) {
            previous.abort();
        }
    }

    fn fire(&self, library_id: u64, generation: u64) {
        {
            let mut timers = self.timers.lock();
            match timers.get(&library_id) {
                Some((current, _)) if *current == generation => {
                    timers.remove(&library_id);
                }
                _ => return,
            }
        }
        (self.trigger)(library_id);
    }

    fn cancel_all(&self) {
        for (_, (_, timer)) in self.timers.lock().drain() {
            timer.abort();
        }
    }

    #[cfg(test)]
    fn pending(&self) -> usize {
        self.timers.lock().len()
    }
}
