//! Call record stores
//!
//! - `InMemoryCallRecords`: process-local, used by tests and the mock setup
//! - `JsonlCallRecords`: one JSON document per line, appended on save

use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::domain::{CallRecord, ModemError, ModemResult};
use crate::ports::{CallRecordRepository, Page, PageRequest, RecordFilter};
use crate::sync::lock;

#[derive(Default)]
pub struct InMemoryCallRecords {
    records: Mutex<Vec<CallRecord>>,
}

impl InMemoryCallRecords {
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything saved so far, in save order
    pub fn all(&self) -> Vec<CallRecord> {
        lock(&self.records).clone()
    }
}

impl CallRecordRepository for InMemoryCallRecords {
    fn save(&self, record: &CallRecord) -> ModemResult<()> {
        lock(&self.records).push(record.clone());
        Ok(())
    }

    fn query(&self, filter: &RecordFilter, page: PageRequest) -> ModemResult<Page<CallRecord>> {
        Ok(Page::select(self.all(), filter, page))
    }
}

pub struct JsonlCallRecords {
    path: PathBuf,
    /// Serializes appends from concurrent completions
    write_lock: Mutex<()>,
}

impl JsonlCallRecords {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ModemResult<Vec<CallRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let file = std::fs::File::open(&self.path).map_err(|e| {
            ModemError::Repository(format!("Failed to open {}: {e}", self.path.display()))
        })?;

        let mut records = Vec::new();
        for (n, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| {
                ModemError::Repository(format!("Failed to read {}: {e}", self.path.display()))
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(&line) {
                Ok(record) => records.push(record),
                Err(e) => log::warn!("Skipping bad record at {}:{}: {e}", self.path.display(), n + 1),
            }
        }
        Ok(records)
    }
}

impl CallRecordRepository for JsonlCallRecords {
    fn save(&self, record: &CallRecord) -> ModemResult<()> {
        let line = serde_json::to_string(record)
            .map_err(|e| ModemError::Repository(format!("Serialization error: {e}")))?;

        let _guard = lock(&self.write_lock);
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ModemError::Repository(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                ModemError::Repository(format!("Failed to open {}: {e}", self.path.display()))
            })?;
        writeln!(file, "{line}").map_err(|e| {
            ModemError::Repository(format!("Failed to write {}: {e}", self.path.display()))
        })?;
        log::debug!("Saved call record {} to {}", record.id, self.path.display());
        Ok(())
    }

    fn query(&self, filter: &RecordFilter, page: PageRequest) -> ModemResult<Page<CallRecord>> {
        let records = {
            let _guard = lock(&self.write_lock);
            self.load()?
        };
        Ok(Page::select(records, filter, page))
    }
}
