//! Query descriptors and decoded result items

use crate::catalog::{self, ByteLength, PidMetadata};
use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_QUERY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryId(pub u64);

impl QueryId {
    /// Allocate the next identity
    pub fn next() -> Self {
        QueryId(NEXT_QUERY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Correlation key shared by a request and its response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QueryKey {
    pub mode: u8,
    pub pid: u8,
}

impl QueryKey {
    pub fn new(mode: u8, pid: u8) -> Self {
        Self { mode, pid }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X}{:02X}", self.mode, self.pid)
    }
}

/// Value of one decoded result item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ItemValue {
    Number(f64),
    Text(String),
    Error(String),
}

/// One decoded value with its catalog name and unit
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultItem {
    pub name: &'static str,
    pub value: ItemValue,
    pub unit: &'static str,
}

impl ResultItem {
    pub fn number(name: &'static str, value: f64, unit: &'static str) -> Self {
        Self {
            name,
            value: ItemValue::Number(value),
            unit,
        }
    }

    pub fn text(name: &'static str, value: impl Into<String>) -> Self {
        Self {
            name,
            value: ItemValue::Text(value.into()),
            unit: "",
        }
    }

    pub fn error(name: &'static str, message: impl Into<String>) -> Self {
        Self {
            name,
            value: ItemValue::Error(message.into()),
            unit: "",
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self.value {
            ItemValue::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            ItemValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Unix time in milliseconds
pub fn unix_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// A single request/response exchange.
///
/// Built from the catalog before any I/O, so an unsupported PID never reaches
/// the wire. The reassembler attaches the raw payload once and the decode
/// engine attaches the items once.
#[derive(Debug, Clone)]
pub struct QueryDescriptor {
    id: QueryId,
    mode: u8,
    pid: u8,
    metadata: &'static PidMetadata,
    sent_at_ms: Option<u64>,
    received_at_ms: Option<u64>,
    raw: Option<Vec<u8>>,
    items: Option<Vec<ResultItem>>,
    effective_len: Option<usize>,
}

impl QueryDescriptor {
    /// Build a descriptor for a catalog entry
    pub fn new(mode: u8, pid: u8) -> Result<Self, ProtocolError> {
        let metadata = catalog::lookup(mode, pid)?;
        let pid = if catalog::mode_carries_pid(mode) { pid } else { 0x00 };
        Ok(Self {
            id: QueryId::next(),
            mode,
            pid,
            metadata,
            sent_at_ms: None,
            received_at_ms: None,
            raw: None,
            items: None,
            effective_len: None,
        })
    }

    /// Parse a textual query such as `010C`, `03` or `0902`
    pub fn parse(query: &str) -> Result<Self, ProtocolError> {
        let query = query.trim();
        let invalid = || ProtocolError::InvalidQuery(query.to_string());
        if query.len() < 2 || query.len() % 2 != 0 || !query.is_ascii() {
            return Err(invalid());
        }
        let mode = u8::from_str_radix(&query[0..2], 16).map_err(|_| invalid())?;
        let pid = match query.get(2..4) {
            Some(pid) => u8::from_str_radix(pid, 16).map_err(|_| invalid())?,
            None if !catalog::mode_carries_pid(mode) => 0x00,
            None => return Err(invalid()),
        };
        if query.len() > 4 {
            return Err(invalid());
        }
        Self::new(mode, pid)
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn mode(&self) -> u8 {
        self.mode
    }

    pub fn pid(&self) -> u8 {
        self.pid
    }

    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.mode, self.pid)
    }

    pub fn metadata(&self) -> &'static PidMetadata {
        self.metadata
    }

    pub fn expected_len(&self) -> ByteLength {
        self.metadata.length
    }

    /// Wire command without the trailing carriage return
    pub fn command(&self, line_count_hint: bool) -> String {
        let mut command = format!("{:02X}", self.mode);
        if catalog::mode_carries_pid(self.mode) {
            command.push_str(&format!("{:02X}", self.pid));
        }
        if line_count_hint {
            if let Some(lines) = self.metadata.line_count_hint() {
                command.push_str(&format!("{:X}", lines));
            }
        }
        command
    }

    pub fn mark_sent(&mut self, at_ms: u64) {
        self.sent_at_ms = Some(at_ms);
    }

    pub fn sent_at_ms(&self) -> Option<u64> {
        self.sent_at_ms
    }

    /// Attach the response payload (mode and PID bytes already stripped)
    pub fn attach_response(&mut self, payload: Vec<u8>, at_ms: u64) {
        self.raw = Some(payload);
        self.received_at_ms = Some(at_ms);
    }

    pub fn received_at_ms(&self) -> Option<u64> {
        self.received_at_ms
    }

    pub fn raw_bytes(&self) -> Option<&[u8]> {
        self.raw.as_deref()
    }

    pub(crate) fn set_items(&mut self, items: Vec<ResultItem>) {
        self.items = Some(items);
    }

    pub(crate) fn set_effective_len(&mut self, len: usize) {
        self.effective_len = Some(len);
    }

    /// Byte count of a variable-length response once decoded
    pub fn effective_len(&self) -> Option<usize> {
        self.effective_len
    }

    pub fn items(&self) -> &[ResultItem] {
        self.items.as_deref().unwrap_or(&[])
    }

    pub fn is_decoded(&self) -> bool {
        self.items.is_some()
    }

    /// Message of the first error item, if decoding failed
    pub fn error_message(&self) -> Option<&str> {
        self.items().iter().find_map(|item| match &item.value {
            ItemValue::Error(message) => Some(message.as_str()),
            _ => None,
        })
    }

    pub fn first_number(&self) -> Option<f64> {
        self.items().first().and_then(ResultItem::as_number)
    }

    pub fn first_text(&self) -> Option<&str> {
        self.items().first().and_then(ResultItem::as_text)
    }

    /// Look up an item by catalog name
    pub fn item(&self, name: &str) -> Option<&ResultItem> {
        self.items().iter().find(|item| item.name == name)
    }
}
