use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{
    Config as NotifyConfig, Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode,
    Watcher,
};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

#[derive(Debug)]
pub enum WatchError {
    Notify(notify::Error),
}

impl std::fmt::Display for WatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WatchError::Notify(err) => write!(f, "watch error: {}", err),
        }
    }
}

impl std::error::Error for WatchError {}

impl From<notify::Error> for WatchError {
    fn from(err: notify::Error) -> Self {
        WatchError::Notify(err)
    }
}

/// Changed paths under one watched directory. Dropping or closing the stream
/// releases the underlying watcher.
pub struct EventStream {
    rx: UnboundedReceiver<PathBuf>,
    _watcher: Option<Box<dyn Any + Send>>,
}

impl EventStream {
    pub fn new(rx: UnboundedReceiver<PathBuf>, guard: Box<dyn Any + Send>) -> Self {
        Self {
            rx,
            _watcher: Some(guard),
        }
    }

    /// A stream fed by hand, for sources that are not backed by notify.
    pub fn channel() -> (UnboundedSender<PathBuf>, Self) {
        let (tx, rx) = unbounded_channel();
        (tx, Self { rx, _watcher: None })
    }

    pub async fn next(&mut self) -> Option<PathBuf> {
        self.rx.recv().await
    }

    pub fn close(&mut self) {
        self._watcher = None;
        self.rx.close();
    }
}

pub trait FileEventSource: Send + Sync {
    /// Starts a recursive watch on `path`.
    fn watch(&self, path: &Path) -> Result<EventStream, WatchError>;
}

/// notify-backed source: native events, or polling when an interval is set.
#[derive(Clone, Debug, Default)]
pub struct NotifySource {
    poll_interval: Option<Duration>,
}

impl NotifySource {
    pub fn new(poll_interval: Option<Duration>) -> Self {
        Self { poll_interval }
    }
}

impl FileEventSource for NotifySource {
    fn watch(&self, path: &Path) -> Result<EventStream, WatchError> {
        let (tx, rx) = unbounded_channel::<PathBuf>();
        let root = path.to_path_buf();
        let handler = move |res: notify::Result<Event>| {
            let event = match res {
                Ok(event) => event,
                Err(_) => return,
            };
            if !is_relevant_event(&event) {
                return;
            }
            if event.paths.is_empty() {
                let _ = tx.send(root.clone());
            }
            for changed in event.paths {
                let _ = tx.send(changed);
            }
        };

        match self.poll_interval {
            Some(interval) => {
                let mut watcher = PollWatcher::new(
                    handler,
                    NotifyConfig::default().with_poll_interval(interval),
                )?;
                watcher.watch(path, RecursiveMode::Recursive)?;
                Ok(EventStream::new(rx, Box::new(watcher)))
            }
            None => {
                let mut watcher = RecommendedWatcher::new(handler, NotifyConfig::default())?;
                watcher.watch(path, RecursiveMode::Recursive)?;
                Ok(EventStream::new(rx, Box::new(watcher)))
            }
        }
    }
}

fn is_relevant_event(event: &Event) -> bool {
    matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind};

    #[test]
    fn only_content_changes_are_relevant() {
        assert!(is_relevant_event(&Event::new(EventKind::Create(CreateKind::File))));
        assert!(!is_relevant_event(&Event::new(EventKind::Access(AccessKind::Read))));
    }

    #[tokio::test]
    async fn closed_stream_drops_pending_events() {
        let (tx, mut stream) = EventStream::channel();
        tx.send(PathBuf::from("/music/a.mp3")).unwrap();
        assert_eq!(stream.next().await, Some(PathBuf::from("/music/a.mp3")));

        stream.close();
        assert!(tx.send(PathBuf::from("/music/b.mp3")).is_err());
        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn missing_directories_fail_to_watch() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(NotifySource::new(None).watch(&missing).is_err());
    }

    #[tokio::test]
    async fn polling_source_reports_new_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = NotifySource::new(Some(Duration::from_millis(50)));
        let mut stream = source.watch(dir.path()).unwrap();

        std::fs::write(dir.path().join("01 - Song.mp3"), b"audio").unwrap();
        let changed = tokio::time::timeout(Duration::from_secs(5), stream.next())
            .await
            .unwrap();
        assert!(changed.is_some());
        stream.close();
    }
}
