//! ELM327 Adapter Driver
//!
//! Async, half-duplex command channel to an ELM327-compatible OBD-II adapter.
//! A TX task paces commands onto the wire, an RX task reassembles responses
//! and resolves pending queries, and a per-query watchdog turns silence into
//! a timeout. Transports are any tokio byte stream; serial and TCP openers
//! are provided.

mod config;
mod driver;
mod error;
mod reassembler;
mod registry;
mod scheduler;
mod transport;

pub use config::DriverConfig;
pub use driver::{Elm327Driver, QueryChannel};
pub use error::DriverError;
pub use registry::{PendingRegistry, QueryHandle, QueryResult};
pub use scheduler::{CommandEntry, IdleBackoff};
pub use transport::{open, AdapterStream, TransportConfig};
