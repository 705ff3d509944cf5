//! SFTP log polling. Same shape as the FTP reader: fresh session per poll,
//! stat, rotation check, ranged read of the appended bytes on the blocking
//! pool.

use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::RemoteCredentials;
use crate::error::LogSourceError;
use crate::logs::LineAssembler;
use crate::logs::ftp::PollResult;
use crate::logs::queue::LineQueue;

/// Polls a log file over SFTP.
pub struct SftpSource {
    path: String,
    credentials: RemoteCredentials,
    fetch_interval: Duration,
    start_from_end: bool,
    watching: Arc<AtomicBool>,
    task: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SftpSource {
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

    pub async fn watch(&self, queue: Arc<LineQueue>) -> Result<(), LogSourceError> {
        if self.watching.swap(true, Ordering::SeqCst) {
            return Ok(());
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
                        tracing::debug!(%err, path = %path, "Sftp poll failed, retrying next tick.");
                    }
                    Err(join) => {
                        tracing::debug!(%join, path = %path, "Sftp poll task failed.");
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

fn open_session(credentials: &RemoteCredentials) -> Result<ssh2::Session, LogSourceError> {
    let tcp = std::net::TcpStream::connect((credentials.host.as_str(), credentials.port))
        .map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    let mut session =
        ssh2::Session::new().map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    session.set_timeout(10_000);
    session.set_tcp_stream(tcp);
    session
        .handshake()
        .map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    session
        .userauth_password(&credentials.user, &credentials.password)
        .map_err(|_| LogSourceError::AuthFailed)?;
    if !session.authenticated() {
        return Err(LogSourceError::AuthFailed);
    }
    Ok(session)
}

fn stat_size(session: &ssh2::Session, path: &str) -> Result<u64, LogSourceError> {
    let sftp = session
        .sftp()
        .map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    let stat = sftp
        .stat(Path::new(path))
        .map_err(|_| LogSourceError::FileNotFound(path.to_owned()))?;
    Ok(stat.size.unwrap_or(0))
}

fn probe_blocking(credentials: &RemoteCredentials, path: &str) -> Result<u64, LogSourceError> {
    let session = open_session(credentials)?;
    stat_size(&session, path)
}

fn poll_blocking(
    credentials: &RemoteCredentials,
    path: &str,
    mut from: u64,
) -> Result<PollResult, LogSourceError> {
    let session = open_session(credentials)?;
    let sftp = session
        .sftp()
        .map_err(|err| LogSourceError::ConnectionFailed(err.to_string()))?;
    let stat = sftp
        .stat(Path::new(path))
        .map_err(|_| LogSourceError::FileNotFound(path.to_owned()))?;
    let size = stat.size.unwrap_or(0);
    let mut rotated = false;
    if size < from {
        from = 0;
        rotated = true;
    }
    let data = if size > from {
        let mut file = sftp
            .open(Path::new(path))
            .map_err(|err| LogSourceError::Read(err.to_string()))?;
        file.seek(SeekFrom::Start(from))
            .map_err(|err| LogSourceError::Read(err.to_string()))?;
        let mut data = Vec::with_capacity((size - from) as usize);
        file.take(size - from)
            .read_to_end(&mut data)
            .map_err(|err| LogSourceError::Read(err.to_string()))?;
        data
    } else {
        Vec::new()
    };
    Ok(PollResult {
        rotated,
        size,
        data,
    })
}
