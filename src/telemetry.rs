use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::errors::AppResult;

const BUFFER_STEM: &str = "ingest-events";

/// One line of the event log.
#[derive(Debug, Serialize)]
struct IngestEvent {
    event: String,
    recorded_at: DateTime<Utc>,
    payload: Value,
}

/// Append-only JSON-lines log of ingest events. Events are written in
/// batches; once the file would outgrow its limit it is rotated and only the
/// newest rotated file is kept.
#[derive(Clone)]
pub struct TelemetryClient {
    enabled: bool,
    pending: Arc<Mutex<Vec<IngestEvent>>>,
    dir: PathBuf,
    buffer_path: PathBuf,
    batch_size: usize,
    rotate_at: u64,
    #[cfg(test)]
    refuse_writes: Arc<std::sync::atomic::AtomicUsize>,
}

impl TelemetryClient {
    pub fn new<P: AsRef<Path>>(data_dir: P, config: &AppConfig) -> AppResult<Self> {
        let dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let buffer_path = dir.join(format!("{BUFFER_STEM}.jsonl"));
        open_for_append(&buffer_path)?;

        Ok(Self {
            enabled: config.telemetry_enabled,
            pending: Arc::default(),
            dir,
            buffer_path,
            batch_size: config.telemetry_batch_size.max(1),
            rotate_at: config.telemetry_buffer_max_bytes,
            #[cfg(test)]
            refuse_writes: Arc::default(),
        })
    }

    /// Queues an event, writing the queue out once a full batch is waiting.
    pub fn record(&self, event: &str, payload: Value) -> AppResult<()> {
        if !self.enabled {
            return Ok(());
        }
        let mut pending = self.pending.lock();
        pending.push(IngestEvent {
            event: event.to_string(),
            recorded_at: Utc::now(),
            payload,
        });
        if pending.len() < self.batch_size {
            return Ok(());
        }
        self.drain(&mut pending)
    }

    pub fn flush(&self) -> AppResult<()> {
        self.drain(&mut self.pending.lock())
    }

    pub fn queue_depth(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn buffer_path(&self) -> &Path {
        &self.buffer_path
    }

    /// Events stay queued when the write fails.
    fn drain(&self, pending: &mut Vec<IngestEvent>) -> AppResult<()> {
        if pending.is_empty() {
            return Ok(());
        }
        let mut lines = Vec::new();
        for event in pending.iter() {
            serde_json::to_writer(&mut lines, event)?;
            lines.push(b'\n');
        }
        self.append(&lines)?;
        pending.clear();
        Ok(())
    }

    fn append(&self, lines: &[u8]) -> AppResult<()> {
        let current = fs::metadata(&self.buffer_path).map_or(0, |meta| meta.len());
        if current > 0 && current + lines.len() as u64 > self.rotate_at {
            self.rotate()?;
        }

        #[cfg(test)]
        self.check_refusal()?;

        let mut file = open_for_append(&self.buffer_path)?;
        file.write_all(lines)?;
        file.flush()?;
        Ok(())
    }

    fn rotate(&self) -> AppResult<()> {
        let stamp = Utc::now().format("%Y%m%d%H%M%S%3f");
        let rotated = self.dir.join(format!("{BUFFER_STEM}-{stamp}.jsonl"));
        fs::rename(&self.buffer_path, &rotated)?;

        let older = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path != &rotated && is_rotated_log(path));
        for path in older {
            let _ = fs::remove_file(path);
        }
        Ok(())
    }
}

fn is_rotated_log(path: &Path) -> bool {
    let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
        return false;
    };
    name.strip_prefix(BUFFER_STEM)
        .is_some_and(|rest| rest.starts_with('-') && rest.ends_with(".jsonl"))
}

fn open_for_append(path: &Path) -> std::io::Result<fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

#[cfg(test)]
impl TelemetryClient {
    fn refuse_next_write(&self) {
        self.refuse_writes
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    }

    fn check_refusal(&self) -> AppResult<()> {
        use std::sync::atomic::Ordering;
        let refused = self
            .refuse_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            let err = std::io::Error::new(std::io::ErrorKind::WriteZero, "simulated disk full");
            return Err(err.into());
        }
        Ok(())
    }
}
