use chrono::{DateTime, Utc};
use log::{error, info};
use parking_lot::Mutex;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::capture::inspector::AnomalyReason;
use crate::models::record::PacketRecord;
use crate::utils::error::AppResult;

/// Destination for records flagged as suspicious.
///
/// Fire-and-forget: implementations swallow their own failures.
pub trait PersistenceSink: Send + Sync {
    fn insert(&self, record: &PacketRecord, reason: &AnomalyReason);
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl PersistenceSink for NullSink {
    fn insert(&self, _record: &PacketRecord, _reason: &AnomalyReason) {}
}

/// One JSON document per line
#[derive(Serialize)]
struct AnomalyLine<'a> {
    logged_at: DateTime<Utc>,
    reason: &'a AnomalyReason,
    description: String,
    record: &'a PacketRecord,
}

/// Appends flagged records to a JSON lines file
pub struct JsonlSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        info!("Writing suspicious packets to {}", path.display());
        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, record: &PacketRecord, reason: &AnomalyReason) -> AppResult<()> {
        let line = AnomalyLine {
            logged_at: Utc::now(),
            reason,
            description: reason.to_string(),
            record,
        };
        let json = serde_json::to_string(&line)?;

        let mut writer = self.writer.lock();
        writer.write_all(json.as_bytes())?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

impl PersistenceSink for JsonlSink {
    fn insert(&self, record: &PacketRecord, reason: &AnomalyReason) {
        if let Err(e) = self.write_line(record, reason) {
            error!("Failed to persist suspicious packet to {}: {}", self.path.display(), e);
        }
    }
}
