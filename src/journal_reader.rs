use crate::error::{Result, WatchError};
use crate::types::{Cursor, LogEntry};
use log::{debug, trace, warn};
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;

/// Which part of the journal to read.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct JournalQuery {
    /// Only entries after this one
    pub after_cursor: Option<Cursor>,
    /// journalctl --since expression, used when there is no cursor
    pub since: Option<String>,
    pub priority: u8,
}

impl JournalQuery {
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "--output=json".to_string(),
            "--no-pager".to_string(),
            "--quiet".to_string(),
            format!("--priority={}", self.priority),
        ];

        if let Some(ref cursor) = self.after_cursor {
            args.push(format!("--after-cursor={}", cursor));
        } else if let Some(ref since) = self.since {
            args.push(format!("--since={}", since));
        }

        args
    }
}

/// Streams entries out of a running journalctl, oldest first.
pub struct JournalReader {
    child: Child,
    lines: Lines<BufReader<ChildStdout>>,
    /// Drains stderr while stdout is read, so a chatty journalctl never
    /// blocks on a full pipe
    stderr: Option<JoinHandle<Vec<u8>>>,
    read: usize,
}

fn drain_stderr(mut pipe: ChildStderr) -> JoinHandle<Vec<u8>> {
    tokio::spawn(async move {
        let mut buffer = Vec::new();
        if let Err(e) = pipe.read_to_end(&mut buffer).await {
            warn!("Failed to read journal command stderr: {}", e);
        }
        buffer
    })
}

impl JournalReader {
    /// Start `command` (program followed by leading arguments) with the
    /// query arguments appended.
    pub fn spawn(command: &[String], query: &JournalQuery) -> Result<Self> {
        let (program, leading) = command
            .split_first()
            .ok_or_else(|| WatchError::ReadError("Empty journal command".to_string()))?;

        let args = query.args();
        debug!("Running {} {:?} {:?}", program, leading, args);

        let mut child = Command::new(program)
            .args(leading)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| WatchError::ReadError(format!("Failed to start {}: {}", program, e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| WatchError::ReadError("journal command has no stdout".to_string()))?;

        let stderr = child.stderr.take().map(drain_stderr);

        Ok(Self {
            child,
            lines: BufReader::new(stdout).lines(),
            stderr,
            read: 0,
        })
    }

    /// Next entry, or `None` once the journal command closed its output.
    pub async fn next_entry(&mut self) -> Result<Option<LogEntry>> {
        loop {
            let line = self
                .lines
                .next_line()
                .await
                .map_err(|e| WatchError::ReadError(format!("Failed to read journal output: {}", e)))?;

            let line = match line {
                Some(line) => line,
                None => return Ok(None),
            };

            if line.trim().is_empty() {
                continue;
            }

            trace!("Journal line: {}", line);
            let entry = LogEntry::from_json(&line).map_err(|e| {
                WatchError::ReadError(format!("Malformed journal entry after {} entries: {}", self.read, e))
            })?;
            self.read += 1;

            return Ok(Some(entry));
        }
    }

    /// Wait for the journal command and fail if it did not exit cleanly.
    pub async fn finish(mut self) -> Result<usize> {
        let status = self
            .child
            .wait()
            .await
            .map_err(|e| WatchError::ReadError(format!("Failed to wait for journal command: {}", e)))?;

        let stderr = match self.stderr.take() {
            Some(handle) => handle.await.unwrap_or_else(|e| {
                warn!("Journal stderr reader failed: {}", e);
                Vec::new()
            }),
            None => Vec::new(),
        };

        if !status.success() {
            return Err(WatchError::ReadError(format!(
                "journal command exited with {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }

        debug!("Read {} journal entries", self.read);
        Ok(self.read)
    }
}
