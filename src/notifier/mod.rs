//! Filesystem change notification for the catalog root.
//!
//! Raw OS events are bridged out of the notify callback thread into a tokio
//! task, translated into typed created/deleted/modified events, filtered to
//! tracked extensions, and fanned out on a broadcast channel. There is no
//! push channel to HTTP clients; `GET /watch` only reports whether
//! monitoring is live.

use notify::event::{CreateKind, ModifyKind, RemoveKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast, mpsc};
use tracing::{debug, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Deleted,
    Modified,
}

#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum NotifierError {
    #[error("watch backend error: {0}")]
    Backend(#[from] notify::Error),
}

struct ActiveWatch {
    // Held for its side effect: dropping the watcher stops the OS watch and
    // closes the bridge channel, which ends the translation task.
    _watcher: Box<dyn Watcher + Send>,
    root: PathBuf,
    polling: bool,
}

/// Background watcher translating OS events for the catalog root.
///
/// Starting while already running is a no-op; switching polling mode
/// restarts the watch only when the mode actually changes. An unavailable
/// backend is reported to the caller, never fatal.
pub struct ChangeNotifier {
    inner: Mutex<Option<ActiveWatch>>,
    extensions: Arc<RwLock<HashSet<String>>>,
    events: broadcast::Sender<ChangeEvent>,
    poll_interval: Duration,
}

impl ChangeNotifier {
    pub fn new(poll_interval_secs: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Mutex::new(None),
            extensions: Arc::new(RwLock::new(HashSet::new())),
            events,
            poll_interval: Duration::from_secs(poll_interval_secs.max(1)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.events.subscribe()
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lock().await.is_some()
    }

    pub async fn start(
        &self,
        root: &Path,
        extensions: HashSet<String>,
        polling: bool,
    ) -> Result<(), NotifierError> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            debug!("file monitoring already running");
            return Ok(());
        }

        *self.extensions.write().await = normalize_extensions(extensions);

        // Bridge channel: the notify callback runs on its own thread and must
        // not block, so it only forwards raw events.
        let (tx, mut rx) = mpsc::channel::<Event>(EVENT_CHANNEL_CAPACITY);
        let handler = move |result: Result<Event, notify::Error>| match result {
            Ok(event) => {
                let _ = tx.try_send(event);
            }
            Err(e) => warn!(error = %e, "filesystem watcher error"),
        };

        let mut watcher: Box<dyn Watcher + Send> = if polling {
            Box::new(PollWatcher::new(
                handler,
                notify::Config::default().with_poll_interval(self.poll_interval),
            )?)
        } else {
            Box::new(RecommendedWatcher::new(handler, notify::Config::default())?)
        };
        watcher.watch(root, RecursiveMode::Recursive)?;

        let extensions = Arc::clone(&self.extensions);
        let events = self.events.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let tracked = extensions.read().await;
                for change in translate_event(&event, &tracked) {
                    debug!(kind = ?change.kind, path = %change.path.display(), "file change");
                    let _ = events.send(change);
                }
            }
            debug!("file monitoring bridge closed");
        });

        info!(path = %root.display(), polling, "file monitoring started");
        *guard = Some(ActiveWatch {
            _watcher: watcher,
            root: root.to_path_buf(),
            polling,
        });
        Ok(())
    }

    pub async fn stop(&self) {
        let mut guard = self.inner.lock().await;
        if guard.take().is_some() {
            info!("file monitoring stopped");
        }
    }

    pub async fn update_extensions(&self, extensions: HashSet<String>) {
        *self.extensions.write().await = normalize_extensions(extensions);
    }

    /// Switch between native and polling backends. A stop/reconfigure/restart
    /// cycle only happens when the mode actually changes while running.
    pub async fn update_polling(&self, polling: bool) -> Result<(), NotifierError> {
        let current = {
            let guard = self.inner.lock().await;
            guard.as_ref().map(|watch| (watch.root.clone(), watch.polling))
        };

        match current {
            Some((_, mode)) if mode == polling => Ok(()),
            Some((root, _)) => {
                let extensions = self.extensions.read().await.clone();
                self.stop().await;
                self.start(&root, extensions, polling).await
            }
            None => Ok(()),
        }
    }

    /// Restart on a new root, preserving the current mode. Used when the
    /// custom root setting changes while monitoring is live.
    pub async fn rewatch(&self, root: &Path) -> Result<(), NotifierError> {
        let current = {
            let guard = self.inner.lock().await;
            guard.as_ref().map(|watch| (watch.root.clone(), watch.polling))
        };

        match current {
            Some((old_root, _)) if old_root == root => Ok(()),
            Some((_, polling)) => {
                let extensions = self.extensions.read().await.clone();
                self.stop().await;
                self.start(root, extensions, polling).await
            }
            None => Ok(()),
        }
    }
}

fn normalize_extensions(extensions: HashSet<String>) -> HashSet<String> {
    extensions
        .into_iter()
        .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}

/// Translate one raw notify event into typed changes. Paths without a
/// tracked extension are discarded at the source, which also drops
/// directory-level events. Renames become a deleted + created pair.
pub(crate) fn translate_event(event: &Event, extensions: &HashSet<String>) -> Vec<ChangeEvent> {
    let tracked = |path: &PathBuf| -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| extensions.contains(&ext.to_ascii_lowercase()))
            .unwrap_or(false)
    };

    let emit = |kind: ChangeKind| -> Vec<ChangeEvent> {
        event
            .paths
            .iter()
            .filter(|path| tracked(path))
            .map(|path| ChangeEvent {
                kind,
                path: path.clone(),
            })
            .collect()
    };

    match event.kind {
        EventKind::Create(CreateKind::Folder) | EventKind::Remove(RemoveKind::Folder) => Vec::new(),
        EventKind::Create(_) => emit(ChangeKind::Created),
        EventKind::Remove(_) => emit(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => emit(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => emit(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(_)) => {
            // A full rename carries [from, to]; model it as deleted + created.
            let mut changes = Vec::new();
            if let Some(from) = event.paths.first()
                && tracked(from)
            {
                changes.push(ChangeEvent {
                    kind: ChangeKind::Deleted,
                    path: from.clone(),
                });
            }
            if let Some(to) = event.paths.get(1)
                && tracked(to)
            {
                changes.push(ChangeEvent {
                    kind: ChangeKind::Created,
                    path: to.clone(),
                });
            }
            changes
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => Vec::new(),
        EventKind::Modify(_) => emit(ChangeKind::Modified),
        _ => Vec::new(),
    }
}
