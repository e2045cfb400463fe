// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Polling file follower.
//!
//! A [`Tailer`] yields complete lines appended to a file. It tolerates the file not existing
//! yet, buffers partial lines until their newline arrives, and reopens the file from the start
//! when it is truncated or replaced (rename-based rotation).

use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Where reading begins the first time the file is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    Beginning,
    /// Only lines written after the file is opened are read. A file that does not exist yet is
    /// read from the beginning once it appears.
    End,
}

pub struct Tailer {
    path: PathBuf,
    start_at: StartAt,
    poll_interval: Duration,
    reader: Option<BufReader<File>>,
    offset: u64,
    identity: Option<u64>,
    pending: Vec<u8>,
    missing_logged: bool,
}

impl Tailer {
    #[must_use]
    pub fn new(path: impl AsRef<Path>, start_at: StartAt) -> Self {
        Tailer {
            path: path.as_ref().to_path_buf(),
            start_at,
            poll_interval: DEFAULT_POLL_INTERVAL,
            reader: None,
            offset: 0,
            identity: None,
            pending: Vec::new(),
            missing_logged: false,
        }
    }

    #[must_use]
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Waits for the next complete line, without its line terminator.
    ///
    /// Returns `None` once `cancel` fires.
    pub async fn next_line(&mut self, cancel: &CancellationToken) -> Option<String> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if self.reader.is_none() && !self.open().await {
                self.sleep(cancel).await?;
                continue;
            }

            match self.read_chunk().await {
                Ok(0) => {
                    if let Some(line) = self.check_rotation().await {
                        return Some(line);
                    }
                    self.sleep(cancel).await?;
                }
                Ok(n) => {
                    self.offset += n as u64;
                    if self.pending.last() == Some(&b'\n') {
                        return Some(self.take_pending());
                    }
                }
                Err(e) => {
                    warn!("LOG_TASK | Failed to read {}: {e}", self.path.display());
                    self.reader = None;
                    self.sleep(cancel).await?;
                }
            }
        }
    }

    async fn read_chunk(&mut self) -> std::io::Result<usize> {
        match self.reader.as_mut() {
            Some(reader) => reader.read_until(b'\n', &mut self.pending).await,
            None => Ok(0),
        }
    }

    async fn open(&mut self) -> bool {
        let mut file = match File::open(&self.path).await {
            Ok(file) => file,
            Err(e) => {
                if !self.missing_logged {
                    debug!("LOG_TASK | Waiting for {}: {e}", self.path.display());
                    self.missing_logged = true;
                }
                // A file created later is read in full.
                self.start_at = StartAt::Beginning;
                return false;
            }
        };
        self.missing_logged = false;

        let offset = match self.start_at {
            StartAt::Beginning => 0,
            StartAt::End => match file.seek(SeekFrom::End(0)).await {
                Ok(end) => end,
                Err(e) => {
                    warn!("LOG_TASK | Failed to seek {}: {e}", self.path.display());
                    return false;
                }
            },
        };
        self.start_at = StartAt::Beginning;
        self.identity = match file.metadata().await {
            Ok(meta) => file_identity(&meta),
            Err(_) => None,
        };
        self.offset = offset;
        self.reader = Some(BufReader::new(file));
        info!(
            "LOG_TASK | Following {} from offset {offset}",
            self.path.display()
        );
        true
    }

    /// At EOF: detects truncation and replacement of the followed file.
    async fn check_rotation(&mut self) -> Option<String> {
        let meta = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta,
            // Removed or mid-rotation; keep the open handle until a new file appears.
            Err(_) => return None,
        };

        let replaced = match (self.identity, file_identity(&meta)) {
            (Some(old), Some(new)) => old != new,
            _ => false,
        };
        if replaced {
            info!("LOG_TASK | {} was rotated, reopening", self.path.display());
            self.reader = None;
            self.offset = 0;
            if !self.pending.is_empty() {
                return Some(self.take_pending());
            }
            return None;
        }

        if meta.len() < self.offset {
            info!("LOG_TASK | {} was truncated, reading from start", self.path.display());
            self.pending.clear();
            self.offset = 0;
            if let Some(reader) = self.reader.as_mut() {
                if let Err(e) = reader.seek(SeekFrom::Start(0)).await {
                    warn!("LOG_TASK | Failed to rewind {}: {e}", self.path.display());
                    self.reader = None;
                }
            }
        }
        None
    }

    fn take_pending(&mut self) -> String {
        let mut bytes = std::mem::take(&mut self.pending);
        if bytes.last() == Some(&b'\n') {
            bytes.pop();
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
        }
        String::from_utf8_lossy(&bytes).into_owned()
    }

    async fn sleep(&self, cancel: &CancellationToken) -> Option<()> {
        tokio::select! {
            () = cancel.cancelled() => None,
            () = tokio::time::sleep(self.poll_interval) => Some(()),
        }
    }
}

#[cfg(unix)]
fn file_identity(meta: &std::fs::Metadata) -> Option<u64> {
    use std::os::unix::fs::MetadataExt;
    Some(meta.ino())
}

#[cfg(not(unix))]
fn file_identity(_meta: &std::fs::Metadata) -> Option<u64> {
    None
}
