//! Local log tailing: filesystem notifications with a polling fallback, and
//! rotation detection by a shrinking size.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use notify::Watcher;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::LogSourceError;
use crate::logs::LineAssembler;
use crate::logs::queue::LineQueue;

/// Tails a file on the local disk.
pub struct TailSource {
    path: PathBuf,
    path_display: String,
    poll_interval: Duration,
    start_from_end: bool,
    watching: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TailSource {
    pub fn new(path: String, poll_interval: Duration, start_from_end: bool) -> Self {
        Self {
            path_display: path.clone(),
            path: PathBuf::from(path),
            poll_interval,
            start_from_end,
            watching: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path_display
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Verifies the file exists, records the starting position and starts the
    /// delivery task. Change notifications and the polling timer both trigger
    /// the same size check.
    pub async fn watch(&self, queue: Arc<LineQueue>) -> Result<(), LogSourceError> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let metadata = match tokio::fs::metadata(&self.path).await {
            Ok(metadata) => metadata,
            Err(err) => {
                self.watching.store(false, Ordering::SeqCst);
                return Err(classify_io(err, &self.path_display));
            }
        };
        let mut position = if self.start_from_end {
            metadata.len()
        } else {
            0
        };

        // The notifier thread only pokes the task; the task re-stats the file
        // itself, so a lost notification costs at most one poll interval.
        let (wake_tx, mut wake_rx) = mpsc::unbounded_channel::<()>();
        let watcher = {
            let tx = wake_tx.clone();
            notify::recommended_watcher(move |_event| {
                let _ = tx.send(());
            })
        };
        let mut watcher = match watcher {
            Ok(watcher) => Some(watcher),
            Err(err) => {
                tracing::warn!(%err, "FS watcher unavailable, relying on polling.");
                None
            }
        };
        if let Some(w) = watcher.as_mut()
            && let Err(err) = w.watch(&self.path, notify::RecursiveMode::NonRecursive)
        {
            tracing::warn!(%err, "Could not watch the log file, relying on polling.");
            watcher = None;
        }

        let path = self.path.clone();
        let path_display = self.path_display.clone();
        let poll_interval = self.poll_interval;
        let watching = self.watching.clone();
        let task = tokio::spawn(async move {
            // Moved in so the watcher thread lives as long as the task.
            let _watcher = watcher;
            let mut assembler = LineAssembler::new();
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            while watching.load(Ordering::SeqCst) {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = wake_rx.recv() => {}
                }
                check_file(&path, &path_display, &mut position, &mut assembler, &queue).await;
            }
        });
        *self.task.lock().await = Some(task);
        Ok(())
    }

    pub async fn unwatch(&self) {
        self.watching.store(false, Ordering::SeqCst);
        if let Some(task) = self.task.lock().await.take() {
            task.abort();
        }
    }
}

/// One size check: shrink means rotation (reset and re-read from the start),
/// growth means reading exactly the appended range. Transient stat or read
/// errors are dropped; the next tick retries.
async fn check_file(
    path: &PathBuf,
    path_display: &str,
    position: &mut u64,
    assembler: &mut LineAssembler,
    queue: &LineQueue,
) {
    let size = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata.len(),
        Err(err) => {
            tracing::debug!(%err, path = path_display, "Stat failed, retrying next tick.");
            return;
        }
    };
    if size < *position {
        tracing::info!(path = path_display, "Log rotation detected, rewinding.");
        *position = 0;
        assembler.clear();
    }
    if size > *position {
        match read_range(path, *position, size).await {
            Ok(chunk) => {
                *position += chunk.len() as u64;
                let lines = assembler.push(&chunk);
                if !lines.is_empty() {
                    queue.enqueue_many(lines);
                }
            }
            Err(err) => {
                tracing::debug!(%err, path = path_display, "Read failed, retrying next tick.");
            }
        }
    }
}

async fn read_range(path: &PathBuf, from: u64, to: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(from)).await?;
    let mut chunk = Vec::with_capacity((to - from) as usize);
    file.take(to - from).read_to_end(&mut chunk).await?;
    Ok(chunk)
}

fn classify_io(err: std::io::Error, path: &str) -> LogSourceError {
    match err.kind() {
        std::io::ErrorKind::NotFound => LogSourceError::FileNotFound(path.to_owned()),
        std::io::ErrorKind::PermissionDenied => LogSourceError::PermissionDenied(path.to_owned()),
        _ => LogSourceError::Read(err.to_string()),
    }
}
