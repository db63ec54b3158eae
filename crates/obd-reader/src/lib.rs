//! OBD-II Reader
//!
//! Typed vehicle reads built on the ELM327 driver:
//! - Named accessors for common PIDs, live or from the freeze frame
//! - Short-lived caching of live readings
//! - Supported-PID discovery
//! - Trouble code reading and clearing
//! - Serializable diagnostic records and JSON-lines sinks

mod cache;
mod error;
mod reader;
pub mod record;

pub use cache::{CacheConfig, CachedValue, Expiry, ResultCache};
pub use error::ReaderError;
pub use reader::{DataSource, DtcStatus, FuelTrim, ObdReader, TorqueProfile, Vin};
pub use record::{
    DataSink, DiagnosticRecord, JsonLinesSink, PidSample, SampleItem, SinkError, SupportedPidsRecord, TroubleCodeRecord,
    VehicleIdentityRecord,
};
