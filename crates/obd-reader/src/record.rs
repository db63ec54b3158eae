//! Diagnostic Records
//!
//! Serializable snapshots of resolved queries and the sinks that persist
//! them. A record owns plain strings so it outlives the catalog borrow and
//! round-trips through JSON.

use crate::reader::Vin;
use obd_protocol::{ItemValue, QueryDescriptor};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tracing::trace;

/// One decoded value of a sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleItem {
    pub name: String,
    pub value: ItemValue,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub unit: String,
}

/// A resolved query with its timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PidSample {
    pub mode: u8,
    pub pid: u8,
    pub description: String,
    pub queried_at_ms: Option<u64>,
    pub received_at_ms: Option<u64>,
    pub items: Vec<SampleItem>,
}

impl From<&QueryDescriptor> for PidSample {
    fn from(descriptor: &QueryDescriptor) -> Self {
        Self {
            mode: descriptor.mode(),
            pid: descriptor.pid(),
            description: descriptor.metadata().description.to_string(),
            queried_at_ms: descriptor.sent_at_ms(),
            received_at_ms: descriptor.received_at_ms(),
            items: descriptor
                .items()
                .iter()
                .map(|item| SampleItem {
                    name: item.name.to_string(),
                    value: item.value.clone(),
                    unit: item.unit.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TroubleCodeRecord {
    pub recorded_at_ms: u64,
    pub mil_on: Option<bool>,
    pub codes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleIdentityRecord {
    pub recorded_at_ms: u64,
    pub vin: Vin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupportedPidsRecord {
    pub recorded_at_ms: u64,
    pub mode: u8,
    /// Two-digit lowercase hex PIDs
    pub pids: Vec<String>,
}

impl SupportedPidsRecord {
    pub fn new(recorded_at_ms: u64, mode: u8, pids: &[u8]) -> Self {
        Self {
            recorded_at_ms,
            mode,
            pids: pids.iter().map(|pid| format!("{:02x}", pid)).collect(),
        }
    }
}

/// Anything the reader produces that is worth keeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum DiagnosticRecord {
    PidSample(PidSample),
    TroubleCodes(TroubleCodeRecord),
    VehicleIdentity(VehicleIdentityRecord),
    SupportedPids(SupportedPidsRecord),
}

impl From<&QueryDescriptor> for DiagnosticRecord {
    fn from(descriptor: &QueryDescriptor) -> Self {
        DiagnosticRecord::PidSample(descriptor.into())
    }
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Sink write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Destination for diagnostic records
pub trait DataSink: Send + Sync {
    fn accept(&self, record: &DiagnosticRecord) -> Result<(), SinkError>;
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> DataSink for JsonLinesSink<W> {
    fn accept(&self, record: &DiagnosticRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(record)?;
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        trace!("Wrote {} byte record", line.len());
        Ok(())
    }
}
