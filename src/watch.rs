//! Change watcher.
//!
//! A thin layer over `notify` that turns filesystem notifications for source
//! files into a stream of [`WatchEvent`]s. It does not coalesce anything; the
//! consumer debounces.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use notify::{
    event::{EventKind, ModifyKind},
    Event, RecommendedWatcher, RecursiveMode, Watcher,
};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{
    error::WatchError,
    unit::{default_ignored_dirs, is_ignored, is_source_file},
};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// All paths are registered; only real edits are reported from here on.
    Ready,
    Change(PathBuf),
    Error(String),
}

/// What to watch for one entry point.
#[derive(Debug, Clone)]
pub struct WatchSession {
    entry: PathBuf,
    root: PathBuf,
    watched_paths: Vec<PathBuf>,
    ignore_patterns: Vec<String>,
    debounce_window: Duration,
}

impl WatchSession {
    /// Watches `root` recursively plus the entry file itself.
    ///
    /// A relative `entry` is taken relative to `root`.
    pub fn for_entry(entry: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let entry = entry.into();
        let entry = if entry.is_relative() {
            root.join(entry)
        } else {
            entry
        };
        let mut watched_paths = vec![root.clone()];
        if !entry.starts_with(&root) {
            watched_paths.push(entry.clone());
        }
        Self {
            entry,
            root,
            watched_paths,
            ignore_patterns: default_ignored_dirs(),
            debounce_window: DEFAULT_DEBOUNCE,
        }
    }

    /// Adds a directory name that is never reported, e.g. a custom output dir.
    #[must_use]
    pub fn with_ignored(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.ignore_patterns.contains(&name) {
            self.ignore_patterns.push(name);
        }
        self
    }

    #[must_use]
    pub fn with_debounce_window(mut self, window: Duration) -> Self {
        self.debounce_window = window;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }

    pub fn ignore_patterns(&self) -> &[String] {
        &self.ignore_patterns
    }

    pub fn debounce_window(&self) -> Duration {
        self.debounce_window
    }

    /// True when an edit of `path` should trigger a rebuild.
    ///
    /// Ignored directory names only count below the root; where the project
    /// itself lives does not matter.
    pub fn is_relevant(&self, path: &Path) -> bool {
        if same_file(path, &self.entry) {
            return true;
        }
        let inside = path.strip_prefix(&self.root).unwrap_or(path);
        !is_ignored(inside, &self.ignore_patterns) && is_source_file(path)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    a == b || matches!((a.canonicalize(), b.canonicalize()), (Ok(a), Ok(b)) if a == b)
}

fn is_edit(kind: &EventKind) -> bool {
    match kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Modify(_) => true,
        _ => false,
    }
}

/// Owns the OS watch. Dropping or closing it ends the session.
pub struct ChangeWatcher {
    watcher: RecommendedWatcher,
    session: WatchSession,
}

impl std::fmt::Debug for ChangeWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeWatcher")
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl ChangeWatcher {
    /// Installs the OS watch and returns the event stream that owns it.
    pub fn watch(session: WatchSession) -> Result<ChangeStream, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));

        let filter = session.clone();
        let callback_ready = ready.clone();
        let callback_tx = tx.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            // Anything seen before registration completes belongs to the initial scan.
            if !callback_ready.load(Ordering::SeqCst) {
                return;
            }
            match res {
                Ok(event) if is_edit(&event.kind) => {
                    for path in event.paths {
                        if filter.is_relevant(&path) {
                            let _ = callback_tx.send(WatchEvent::Change(path));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    let _ = callback_tx.send(WatchEvent::Error(e.to_string()));
                }
            }
        })
        .map_err(WatchError::Create)?;

        for path in &session.watched_paths {
            let mode = if path.is_dir() {
                RecursiveMode::Recursive
            } else {
                RecursiveMode::NonRecursive
            };
            watcher
                .watch(path, mode)
                .map_err(|source| WatchError::Path {
                    path: path.clone(),
                    source,
                })?;
            debug!(path = %path.display(), ?mode, "watching");
        }

        ready.store(true, Ordering::SeqCst);
        let _ = tx.send(WatchEvent::Ready);
        info!(paths = session.watched_paths.len(), "file watcher ready");

        Ok(ChangeStream {
            rx,
            watcher: Some(ChangeWatcher { watcher, session }),
        })
    }

    pub fn session(&self) -> &WatchSession {
        &self.session
    }

    /// Stops the OS watch.
    pub fn close(mut self) {
        for path in &self.session.watched_paths {
            let _ = self.watcher.unwatch(path);
        }
    }
}

/// Stream of watch events, owning the watcher that produces them.
#[derive(Debug)]
pub struct ChangeStream {
    rx: mpsc::UnboundedReceiver<WatchEvent>,
    watcher: Option<ChangeWatcher>,
}

impl ChangeStream {
    /// A stream fed by hand, without an OS watch behind it.
    pub fn channel() -> (mpsc::UnboundedSender<WatchEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (tx, Self { rx, watcher: None })
    }

    /// A stream that never yields, for single-shot runs.
    pub fn empty() -> Self {
        Self::channel().1
    }

    /// Next event, or `None` once the stream has been closed.
    pub async fn recv(&mut self) -> Option<WatchEvent> {
        self.rx.recv().await
    }

    pub fn is_closed(&self) -> bool {
        self.watcher.is_none() && self.rx.is_closed()
    }

    /// Tears down the OS watch and stops accepting events.
    pub fn close(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.close();
        }
        self.rx.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relevant_paths() {
        let session = WatchSession::for_entry("/p/main.ts", "/p");
        assert!(session.is_relevant(Path::new("/p/src/util.ts")));
        assert!(session.is_relevant(Path::new("/p/src/App.tsx")));
        assert!(!session.is_relevant(Path::new("/p/node_modules/lib/index.ts")));
        assert!(!session.is_relevant(Path::new("/p/.ghostts/run.js")));
        assert!(!session.is_relevant(Path::new("/p/dist/main.ts")));
        assert!(!session.is_relevant(Path::new("/p/src/types.d.ts")));
        assert!(!session.is_relevant(Path::new("/p/README.md")));
    }

    #[test]
    fn project_below_an_ignored_name_still_reports_edits() {
        let session = WatchSession::for_entry("/work/dist/app/main.ts", "/work/dist/app");
        assert!(session.is_relevant(Path::new("/work/dist/app/src/a.ts")));
        assert!(session.is_relevant(Path::new("/work/dist/app/main.ts")));
        assert!(!session.is_relevant(Path::new("/work/dist/app/dist/a.ts")));
        assert!(!session.is_relevant(Path::new(
            "/work/dist/app/node_modules/pkg/index.ts"
        )));
    }

    #[test]
    fn relative_entry_is_resolved_against_root() {
        let session = WatchSession::for_entry("src/index.ts", "/p");
        assert_eq!(session.watched_paths(), &[PathBuf::from("/p")]);
        assert!(session.is_relevant(Path::new("/p/src/index.ts")));
        assert_eq!(session.root(), Path::new("/p"));
    }

    #[test]
    fn entry_outside_root_is_watched_separately() {
        let session = WatchSession::for_entry("/elsewhere/main.ts", "/p");
        assert_eq!(
            session.watched_paths(),
            &[PathBuf::from("/p"), PathBuf::from("/elsewhere/main.ts")]
        );
        let inside = WatchSession::for_entry("/p/main.ts", "/p");
        assert_eq!(inside.watched_paths(), &[PathBuf::from("/p")]);
    }

    #[test]
    fn custom_ignored_dir() {
        let session = WatchSession::for_entry("/p/main.ts", "/p").with_ignored("build");
        assert!(!session.is_relevant(Path::new("/p/build/x.ts")));
        assert_eq!(
            session.ignore_patterns().iter().filter(|p| *p == "build").count(),
            1
        );
    }

    #[test]
    fn only_edits_count() {
        use notify::event::{AccessKind, CreateKind, DataChange, MetadataKind, RemoveKind};
        assert!(is_edit(&EventKind::Create(CreateKind::File)));
        assert!(is_edit(&EventKind::Modify(ModifyKind::Data(DataChange::Content))));
        assert!(!is_edit(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Permissions
        ))));
        assert!(!is_edit(&EventKind::Access(AccessKind::Read)));
        assert!(!is_edit(&EventKind::Remove(RemoveKind::File)));
    }

    #[tokio::test]
    async fn closed_stream_yields_nothing() {
        let (tx, mut stream) = ChangeStream::channel();
        tx.send(WatchEvent::Ready).unwrap();
        stream.close();
        assert_eq!(stream.recv().await, Some(WatchEvent::Ready));
        assert_eq!(stream.recv().await, None);
        assert!(stream.is_closed());
    }

    #[tokio::test]
    async fn real_watcher_reports_ready_first() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("main.ts");
        std::fs::write(&entry, "console.log(1);\n").unwrap();

        let session = WatchSession::for_entry(&entry, dir.path());
        let mut stream = ChangeWatcher::watch(session).unwrap();
        assert_eq!(stream.recv().await, Some(WatchEvent::Ready));
        stream.close();
    }
}
