//! Source-agnostic log line delivery. Three transports share one contract:
//! start watching, push newline-framed records into the bounded queue, stop.
//! Every transport is rotation-safe: a shrinking file resets the read
//! position and clears the partial-line buffer.

pub mod ftp;
pub mod queue;
pub mod sftp;
pub mod tail;

use std::sync::Arc;

use crate::config::{LogReaderConfig, LogSourceMode, RemoteCredentials};
use crate::error::LogSourceError;
use crate::logs::queue::LineQueue;

/// Splits raw chunks into complete lines. The last fragment of a chunk may be
/// an incomplete line; it is carried until its terminator arrives. Terminators
/// are `\n` with an optional preceding `\r`, both stripped.
#[derive(Debug, Default)]
pub struct LineAssembler {
    buffer: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        for i in 0..self.buffer.len() {
            if self.buffer[i] == b'\n' {
                let mut end = i;
                if end > start && self.buffer[end - 1] == b'\r' {
                    end -= 1;
                }
                lines.push(String::from_utf8_lossy(&self.buffer[start..end]).into_owned());
                start = i + 1;
            }
        }
        if start > 0 {
            self.buffer.drain(..start);
        }
        lines
    }

    /// Throws away the carried fragment; used on rotation.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// The configured log source. One variant per transport; all of them push
/// into the same [`LineQueue`].
pub enum LogReader {
    Tail(tail::TailSource),
    Ftp(ftp::FtpSource),
    Sftp(sftp::SftpSource),
}

impl LogReader {
    /// Builds the reader the configuration asks for. Remote modes need
    /// credentials; their absence is reported as an auth failure at
    /// construction rather than on the first poll.
    pub fn from_config(config: &LogReaderConfig) -> Result<Self, LogSourceError> {
        let path = config.file_path();
        match config.mode {
            LogSourceMode::Tail => Ok(LogReader::Tail(tail::TailSource::new(
                path,
                config.poll_interval(),
                config.start_from_end,
            ))),
            LogSourceMode::Ftp => {
                let credentials = require_credentials(config)?;
                Ok(LogReader::Ftp(ftp::FtpSource::new(
                    path,
                    credentials,
                    config.fetch_interval(),
                    config.start_from_end,
                )))
            }
            LogSourceMode::Sftp => {
                let credentials = require_credentials(config)?;
                Ok(LogReader::Sftp(sftp::SftpSource::new(
                    path,
                    credentials,
                    config.fetch_interval(),
                    config.start_from_end,
                )))
            }
        }
    }

    /// Verifies reachability, then starts delivering lines into the queue.
    pub async fn watch(&self, queue: Arc<LineQueue>) -> Result<(), LogSourceError> {
        match self {
            LogReader::Tail(source) => source.watch(queue).await,
            LogReader::Ftp(source) => source.watch(queue).await,
            LogReader::Sftp(source) => source.watch(queue).await,
        }
    }

    /// Stops delivery. Idempotent.
    pub async fn unwatch(&self) {
        match self {
            LogReader::Tail(source) => source.unwatch().await,
            LogReader::Ftp(source) => source.unwatch().await,
            LogReader::Sftp(source) => source.unwatch().await,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            LogReader::Tail(source) => source.path(),
            LogReader::Ftp(source) => source.path(),
            LogReader::Sftp(source) => source.path(),
        }
    }

    pub fn is_watching(&self) -> bool {
        match self {
            LogReader::Tail(source) => source.is_watching(),
            LogReader::Ftp(source) => source.is_watching(),
            LogReader::Sftp(source) => source.is_watching(),
        }
    }
}

fn require_credentials(config: &LogReaderConfig) -> Result<RemoteCredentials, LogSourceError> {
    config.credentials.clone().ok_or(LogSourceError::AuthFailed)
}
