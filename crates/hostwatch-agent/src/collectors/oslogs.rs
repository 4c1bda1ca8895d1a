// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tails plain-text log files.
//!
//! A byte cursor per file is persisted after every cycle that produced events, so a restart
//! resumes where the previous run stopped. Only newline-terminated lines are consumed: a line
//! still being written stays in the file for the next cycle.

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

use crate::collector::Collector;
use crate::config::OsLogConfig;
use crate::persist;
use crate::prefs::PrefsStore;

pub type Cursor = HashMap<String, u64>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogEvent {
    pub timestamp: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub source: String,
    pub file: String,
    pub message: String,
}

#[derive(Debug, Serialize)]
struct LogBatch<'a> {
    events: &'a [LogEvent],
}

struct TailState {
    files: Vec<PathBuf>,
    cursor_path: PathBuf,
    batch_lines: usize,
    max_bytes: usize,
    source: String,
    cursor: Cursor,
}

pub struct OsLogCollector {
    state: Arc<Mutex<TailState>>,
    prefs: Arc<PrefsStore>,
    interval: Duration,
}

impl OsLogCollector {
    pub fn new(config: &OsLogConfig, prefs: Arc<PrefsStore>, source: impl Into<String>) -> Self {
        let cursor = load_cursor(&config.cursor_path);
        OsLogCollector {
            state: Arc::new(Mutex::new(TailState {
                files: config.files.clone(),
                cursor_path: config.cursor_path.clone(),
                batch_lines: config.batch_lines.max(1),
                max_bytes: config.max_bytes.max(1),
                source: source.into(),
                cursor,
            })),
            prefs,
            interval: config.interval,
        }
    }
}

#[async_trait]
impl Collector for OsLogCollector {
    fn name(&self) -> &str {
        "oslogs"
    }

    fn interval(&self) -> Duration {
        self.interval
    }

    async fn collect(&self) -> anyhow::Result<Vec<u8>> {
        if !self.prefs.get().logs {
            debug!("Log collection disabled by preferences");
            return Ok(Vec::new());
        }
        let state = Arc::clone(&self.state);
        let events = tokio::task::spawn_blocking(move || {
            let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
            state.read_new_events()
        })
        .await?;
        if events.is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::to_vec(&LogBatch { events: &events })?)
    }
}

impl TailState {
    fn read_new_events(&mut self) -> Vec<LogEvent> {
        let mut events = Vec::new();
        for path in self.files.clone() {
            let budget = self.batch_lines.saturating_sub(events.len());
            if budget == 0 {
                break;
            }
            match self.read_file(&path, budget) {
                Ok(mut file_events) => events.append(&mut file_events),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("Log file {} not found, skipping", path.display());
                }
                Err(e) => warn!("Unable to read log file {}: {e}", path.display()),
            }
        }
        // Events are returned even if the cursor cannot be saved; a restart may re-read them.
        if !events.is_empty() {
            if let Err(e) = persist::write_json(&self.cursor_path, &self.cursor) {
                warn!(
                    "Unable to save log cursor to {}: {e}",
                    self.cursor_path.display()
                );
            }
        }
        events
    }

    fn read_file(&mut self, path: &Path, budget: usize) -> io::Result<Vec<LogEvent>> {
        let key = path.display().to_string();
        let mut file = File::open(path)?;
        let len = file.metadata()?.len();
        let mut offset = self.cursor.get(&key).copied().unwrap_or(0);
        if offset > len {
            debug!("Log file {key} shrank below its cursor, reading from the start");
            offset = 0;
        }
        file.seek(SeekFrom::Start(offset))?;

        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut line = Vec::new();
        while events.len() < budget {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 || line.last() != Some(&b'\n') {
                break;
            }
            offset += read as u64;
            let text = String::from_utf8_lossy(&line);
            let text = text.trim_end_matches(['\n', '\r']);
            if text.is_empty() {
                continue;
            }
            events.push(LogEvent {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Nanos, true),
                source: self.source.clone(),
                file: key.clone(),
                message: truncate_at_char_boundary(text, self.max_bytes).to_string(),
            });
        }
        self.cursor.insert(key, offset);
        Ok(events)
    }
}

fn truncate_at_char_boundary(text: &str, max_bytes: usize) -> &str {
    if text.len() <= max_bytes {
        return text;
    }
    let mut end = max_bytes;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn load_cursor(path: &Path) -> Cursor {
    match persist::read_json::<Cursor>(path) {
        Ok(cursor) => cursor.unwrap_or_default(),
        Err(e) => {
            warn!("Ignoring unreadable log cursor at {}: {e}", path.display());
            Cursor::default()
        }
    }
}
