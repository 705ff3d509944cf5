//! FTP log polling. Every poll opens a fresh connection, stats the file and
//! downloads only the appended range. The poll loop is serial, so two polls
//! can never overlap; a failing poll is dropped and retried on the next tick.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use suppaftp::FtpStream;
use tokio::task::JoinHandle;

use crate::config::RemoteCredentials;
use crate::error::LogSourceError;
use crate::logs::LineAssembler;
use crate::logs::queue::LineQueue;

/// The result of one remote poll.
pub(crate) struct PollResult {
    pub(crate) rotated: bool,
    pub(crate) size: u64,
    pub(crate) data: Vec<u8>,
}

/// Polls a log file on an FTP server.
pub struct FtpSource {
    path: String,
    credentials: RemoteCredentials,
    fetch_interval: Duration,
    start_from_end: bool,
    watching: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl FtpSource {
    pub fn new(
        path: String,
        credentials: RemoteCredentials,
        fetch_interval: Duration,
        start_from_end: bool,
    ) -> Self {
        Self {
            path,
            credentials,
            fetch_interval,
            start_from_end,
            watching: Arc::new(AtomicBool::new(false)),
            task: tokio::sync::Mutex::new(None),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn is_watching(&self) -> bool {
        self.watching.load(Ordering::SeqCst)
    }

    /// Verifies the server is reachable, the login works and the file exists,
    /// then starts the poll loop.
    pub async fn watch(&self, queue: Arc<LineQueue>) -> Result<(), LogSourceError> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.credentials.secure {
            // The sftp mode covers encrypted transfers.
            self.watching.store(false, Ordering::SeqCst);
            return Err(LogSourceError::ConnectionFailed(
                "ftps is not supported, use the sftp mode".to_owned(),
            ));
        }
        let credentials = self.credentials.clone();
        let path = self.path.clone();
        let probe =
            tokio::task::spawn_blocking(move || probe_blocking(&credentials, &path)).await;
        let size = match probe {
            Ok(Ok(size)) => size,
            Ok(Err(err)) => {
                self.watching.store(false, Ordering::SeqCst);
                return Err(err);
            }
            Err(join) => {
                self.watching.store(false, Ordering::SeqCst);
                return Err(LogSourceError::Read(join.to_string()));
            }
        };
        let mut position = if self.start_from_end { size } else { 0 };

        let credentials = self.credentials.clone();
        let path = self.path.clone();
        let fetch_interval = self.fetch_interval;
        let watching = self.watching.clone();
        let task = tokio::spawn(async move {
            let mut assembler = LineAssembler::new();
            let mut ticker = tokio::time::interval(fetch_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            while watching.load(Ordering::SeqCst) {
                ticker.tick().await;
                let credentials = credentials.clone();
                let poll_path = path.clone();
                let from = position;
                let outcome = tokio::task::spawn_blocking(move || {
                    poll_blocking(&credentials, &poll_path, from)
                })
                .await;
                match outcome {
                    Ok(Ok(result)) => {
                        if result.rotated {
                            tracing::info!(path = %path, "Remote log rotated, rewinding.");
                            assembler.clear();
                        }
                        position = result.size;
                        if !result.data.is_empty() {
                            let lines = assembler.push(&result.data);
                            if !lines.is_empty() {
                                queue.enqueue_many(lines);
                            }
                        }
                    }
                    Ok(Err(err)) => {
                        tracing::debug!(%err, path = %path, "Ftp poll failed, retrying next tick.");
                    }
                    Err(join) => {
                        tracing::debug!(%join, path = %path, "Ftp poll task failed.");
                    }
                }
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

fn connect(credentials: &RemoteCredentials) -> Result<FtpStream, LogSourceError> {
    let addr = format!("{}:{}", credentials.host, credentials.port);
    let mut ftp = FtpStream::connect(&addr)
        .map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    ftp.login(&credentials.user, &credentials.password)
        .map_err(|_| LogSourceError::AuthFailed)?;
    let _ = ftp.transfer_type(suppaftp::types::FileType::Binary);
    Ok(ftp)
}

fn stat_size(ftp: &mut FtpStream, path: &str) -> Result<u64, LogSourceError> {
    ftp.size(path)
        .map(|size| size as u64)
        .map_err(|err| match &err {
            suppaftp::FtpError::UnexpectedResponse(response)
                if response.status == suppaftp::Status::FileUnavailable =>
            {
                LogSourceError::FileNotFound(path.to_owned())
            }
            _ => LogSourceError::Read(err.to_string()),
        })
}

/// The initial health check: connect, log in, stat.
fn probe_blocking(credentials: &RemoteCredentials, path: &str) -> Result<u64, LogSourceError> {
    let mut ftp = connect(credentials)?;
    let size = stat_size(&mut ftp, path)?;
    let _ = ftp.quit();
    Ok(size)
}

/// One poll: stat, rotation check, ranged download of the appended bytes.
fn poll_blocking(
    credentials: &RemoteCredentials,
    path: &str,
    mut from: u64,
) -> Result<PollResult, LogSourceError> {
    let mut ftp = connect(credentials)?;
    let size = stat_size(&mut ftp, path)?;
    let mut rotated = false;
    if size < from {
        from = 0;
        rotated = true;
    }
    let data = if size > from {
        if from > 0 {
            ftp.resume_transfer(from as usize)
                .map_err(|err| LogSourceError::Read(err.to_string()))?;
        }
        ftp.retr_as_buffer(path)
            .map_err(|err| LogSourceError::Read(err.to_string()))?
            .into_inner()
    } else {
        Vec::new()
    };
    let _ = ftp.quit();
    Ok(PollResult {
        rotated,
        size,
        data,
    })
}
