//! OBD-II Protocol Implementation
//!
//! Synchronous building blocks for talking to ELM327-compatible adapters:
//! the PID catalog, query descriptors and their wire commands, response
//! block parsing (including ISO 15765-4 multi-frame reassembly) and the
//! decode engine. Nothing in this crate performs I/O.

pub mod catalog;
pub mod decode;
mod error;
pub mod frame;
mod protocol;
mod query;

pub use catalog::{lookup, ByteLength, Formula, ItemSpec, Operand, PidMetadata};
pub use decode::{decode, decode_dtc};
pub use error::{DecodeError, ProtocolError};
pub use frame::{parse_block, BlockBuffer, ParsedBlock, ResponseFrame};
pub use protocol::{AdapterSettings, ObdProtocol};
pub use query::{unix_millis, ItemValue, QueryDescriptor, QueryId, QueryKey, ResultItem};

/// OBD-II mode constants
pub mod mode {
    /// Current data
    pub const CURRENT_DATA: u8 = 0x01;
    /// Freeze frame data
    pub const FREEZE_FRAME: u8 = 0x02;
    /// Diagnostic trouble codes
    pub const READ_DTC: u8 = 0x03;
    /// Clear trouble codes
    pub const CLEAR_DTC: u8 = 0x04;
    /// Vehicle information
    pub const VEHICLE_INFO: u8 = 0x09;
}

/// Frequently used PIDs
pub mod pid {
    pub const SUPPORTED_PIDS_01_20: u8 = 0x00;
    pub const MONITOR_STATUS: u8 = 0x01;
    pub const FREEZE_DTC: u8 = 0x02;
    pub const ENGINE_LOAD: u8 = 0x04;
    pub const COOLANT_TEMP: u8 = 0x05;
    pub const SHORT_FUEL_TRIM_BANK_1: u8 = 0x06;
    pub const LONG_FUEL_TRIM_BANK_1: u8 = 0x07;
    pub const SHORT_FUEL_TRIM_BANK_2: u8 = 0x08;
    pub const LONG_FUEL_TRIM_BANK_2: u8 = 0x09;
    pub const FUEL_PRESSURE: u8 = 0x0A;
    pub const INTAKE_MANIFOLD_PRESSURE: u8 = 0x0B;
    pub const ENGINE_RPM: u8 = 0x0C;
    pub const VEHICLE_SPEED: u8 = 0x0D;
    pub const MAF: u8 = 0x10;
    pub const THROTTLE_POSITION: u8 = 0x11;
    pub const OBD_STANDARD: u8 = 0x1C;
    pub const RUN_TIME: u8 = 0x1F;
    pub const DISTANCE_WITH_MIL: u8 = 0x21;
    pub const FUEL_LEVEL: u8 = 0x2F;
    pub const FUEL_TYPE: u8 = 0x51;
    pub const ETHANOL_FUEL: u8 = 0x52;
    pub const FUEL_RAIL_ABSOLUTE_PRESSURE: u8 = 0x59;
    pub const ENGINE_OIL_TEMP: u8 = 0x5C;
    pub const FUEL_INJECTION_TIMING: u8 = 0x5D;
    pub const ENGINE_FUEL_RATE: u8 = 0x5E;
    pub const DRIVER_DEMAND_TORQUE: u8 = 0x61;
    pub const ACTUAL_ENGINE_TORQUE: u8 = 0x62;
    pub const ENGINE_REFERENCE_TORQUE: u8 = 0x63;
    pub const ENGINE_PERCENT_TORQUE: u8 = 0x64;

    /// Mode 9 info types
    pub const VIN: u8 = 0x02;
}
