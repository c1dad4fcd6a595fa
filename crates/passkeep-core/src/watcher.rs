//! Live view of a store file that reloads when the file changes.
//!
//! One owner task holds the current store and a `pending` flag. Handles
//! send it requests over a channel; `notify` callbacks only flag the file
//! as changed. The reload itself happens lazily, the next time a reader
//! asks for the store, so a burst of writes costs one decryption.
//!
//! Reload failures never reach readers:
//! - the file could not be read ([`Error::Io`], e.g. mid-rename): keep
//!   serving the old store and retry on the next request;
//! - the file was read but rejected (truncated, corrupt, wrong key): keep
//!   serving the old store and wait for the next change.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cipher::Key;
use crate::error::{Error, Result};
use crate::store::EncryptedStore;

/// Key function kept by the watcher for every reload.
pub type KeyFn = Arc<dyn Fn(&[u8]) -> Result<Key> + Send + Sync>;

enum Request<T> {
    Current(oneshot::Sender<Arc<EncryptedStore<T>>>),
    Invalidate,
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FsSignal {
    /// Created, written, removed or renamed into place.
    Changed,
    /// Renamed away; the watch no longer tracks the file.
    Moved,
}

struct State<T> {
    path: PathBuf,
    key_fn: KeyFn,
    current: Arc<EncryptedStore<T>>,
    pending: bool,
}

/// Handle to a running watcher. Cheap to clone; the owner task stops when
/// [`shutdown`](Self::shutdown) is called or the last handle drops.
pub struct StoreWatcher<T> {
    tx: mpsc::UnboundedSender<Request<T>>,
}

impl<T> Clone for StoreWatcher<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<T> StoreWatcher<T>
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    /// Open `path` and start watching it.
    ///
    /// The first open runs on the blocking pool and its error is returned
    /// as is. Must be awaited inside a tokio runtime.
    pub async fn start<F>(path: impl AsRef<Path>, key_fn: F) -> Result<Self>
    where
        F: Fn(&[u8]) -> Result<Key> + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| Error::Config(format!("store watcher needs a tokio runtime: {e}")))?;
        let path = resolve(path.as_ref())?;
        let key_fn: KeyFn = Arc::new(key_fn);
        let store = {
            let path = path.clone();
            let key_fn = Arc::clone(&key_fn);
            runtime
                .spawn_blocking(move || EncryptedStore::open_file(&path, |salt| key_fn(salt)))
                .await
                .map_err(std::io::Error::other)??
        };

        let (fs_tx, fs_rx) = mpsc::unbounded_channel();
        let watcher = watch_parent(&path, fs_tx)?;
        let (tx, rx) = mpsc::unbounded_channel();

        info!("Watching store: {}", path.display());
        let state = State {
            path,
            key_fn,
            current: Arc::new(store),
            pending: false,
        };
        runtime.spawn(run(state, watcher, rx, fs_rx));
        Ok(Self { tx })
    }
}

impl<T> StoreWatcher<T> {
    /// The current store, reloading it first if the file changed.
    pub async fn current(&self) -> Result<Arc<EncryptedStore<T>>> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Request::Current(reply))
            .map_err(|_| Error::WatcherClosed)?;
        rx.await.map_err(|_| Error::WatcherClosed)
    }

    /// Force a reload attempt on the next [`current`](Self::current).
    pub fn invalidate(&self) -> Result<()> {
        self.tx
            .send(Request::Invalidate)
            .map_err(|_| Error::WatcherClosed)
    }

    /// Stop the owner task and release the OS watch. Idempotent.
    pub fn shutdown(&self) {
        let _ = self.tx.send(Request::Shutdown);
    }

    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }
}

// ── Owner task ───────────────────────────────────────────────────────────────

async fn run<T>(
    mut state: State<T>,
    watcher: RecommendedWatcher,
    mut requests: mpsc::UnboundedReceiver<Request<T>>,
    mut fs_events: mpsc::UnboundedReceiver<FsSignal>,
) where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    let mut watcher = Some(watcher);
    let mut fs_open = true;

    loop {
        tokio::select! {
            req = requests.recv() => match req {
                Some(Request::Current(reply)) => {
                    refresh(&mut state).await;
                    let _ = reply.send(Arc::clone(&state.current));
                }
                Some(Request::Invalidate) => state.pending = true,
                Some(Request::Shutdown) | None => break,
            },
            sig = fs_events.recv(), if fs_open => match sig {
                Some(FsSignal::Changed) => {
                    debug!("store file changed");
                    state.pending = true;
                }
                Some(FsSignal::Moved) => {
                    warn!(
                        "Store file moved away, no longer watching: {}",
                        state.path.display()
                    );
                    watcher = None;
                }
                None => fs_open = false,
            },
        }
    }

    drop(watcher);
    info!("Store watcher stopped: {}", state.path.display());
}

async fn refresh<T>(state: &mut State<T>)
where
    T: Serialize + DeserializeOwned + Default + Send + Sync + 'static,
{
    if !state.pending {
        return;
    }
    let path = state.path.clone();
    let key_fn = Arc::clone(&state.key_fn);
    let res = tokio::task::spawn_blocking(move || {
        EncryptedStore::open_file(&path, |salt| key_fn(salt))
    })
    .await;

    match res {
        Ok(Ok(store)) => {
            state.current = Arc::new(store);
            state.pending = false;
            debug!("store reloaded");
        }
        Ok(Err(Error::Io(e))) => {
            warn!(error = %e, "store unreadable, serving previous copy");
        }
        Ok(Err(e)) => {
            warn!(error = %e, "store rejected, serving previous copy");
            state.pending = false;
        }
        Err(e) => {
            error!(error = %e, "store reload task failed");
            state.pending = false;
        }
    }
}

// ── Filesystem events ────────────────────────────────────────────────────────

/// Absolute path with a canonical parent, matching what `notify` reports.
fn resolve(path: &Path) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| Error::Config(format!("not a file path: {}", path.display())))?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    Ok(fs::canonicalize(parent)?.join(name))
}

/// Watch the directory, not the file: atomic saves replace the inode.
fn watch_parent(path: &Path, tx: mpsc::UnboundedSender<FsSignal>) -> Result<RecommendedWatcher> {
    let target = path.to_path_buf();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if let Some(sig) = classify_event(&target, &event) {
                    let _ = tx.send(sig);
                }
            }
            Err(e) => error!("Store watch error: {}", e),
        },
        Config::default(),
    )?;
    let dir = path.parent().unwrap_or(path);
    watcher.watch(dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

fn classify_event(target: &Path, event: &Event) -> Option<FsSignal> {
    let touches = event.paths.iter().any(|p| p == target);
    match &event.kind {
        EventKind::Modify(ModifyKind::Name(mode)) => match mode {
            RenameMode::From if touches => Some(FsSignal::Moved),
            RenameMode::Both if event.paths.len() >= 2 => {
                if event.paths[1] == target {
                    Some(FsSignal::Changed)
                } else if event.paths[0] == target {
                    Some(FsSignal::Moved)
                } else {
                    None
                }
            }
            _ if touches => Some(FsSignal::Changed),
            _ => None,
        },
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) if touches => {
            Some(FsSignal::Changed)
        }
        _ => None,
    }
}
