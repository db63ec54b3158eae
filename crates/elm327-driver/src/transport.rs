//! Adapter transports
//!
//! Bluetooth SPP adapters show up as serial ports; Wi-Fi adapters listen on
//! a TCP socket (usually 192.168.0.10:35000).

use crate::error::DriverError;
use obd_protocol::ObdProtocol;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_serial::SerialPortBuilderExt;
use tracing::info;

/// Byte stream an adapter can be driven over
pub trait AdapterStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> AdapterStream for T {}

/// Where to find the adapter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransportConfig {
    /// Serial device, e.g. `/dev/rfcomm0` or `COM3`
    Serial { device: String, baud_rate: Option<u32> },
    /// TCP endpoint, e.g. `192.168.0.10:35000`
    Tcp { address: String },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Serial {
            device: "/dev/rfcomm0".to_string(),
            baud_rate: None,
        }
    }
}

/// Open the configured transport
pub async fn open(config: &TransportConfig, protocol: ObdProtocol) -> Result<Box<dyn AdapterStream>, DriverError> {
    match config {
        TransportConfig::Serial { device, baud_rate } => {
            let baud_rate = baud_rate.unwrap_or_else(|| protocol.default_baud_rate());
            info!("Opening serial adapter {} at {} baud", device, baud_rate);
            let port = tokio_serial::new(device, baud_rate).open_native_async()?;
            Ok(Box::new(port))
        }
        TransportConfig::Tcp { address } => {
            info!("Connecting to adapter at {}", address);
            let stream = TcpStream::connect(address).await?;
            stream.set_nodelay(true)?;
            Ok(Box::new(stream))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_config_tags() {
        let tcp: TransportConfig =
            serde_json::from_str(r#"{"kind":"tcp","address":"192.168.0.10:35000"}"#).unwrap();
        assert_eq!(
            tcp,
            TransportConfig::Tcp {
                address: "192.168.0.10:35000".to_string()
            }
        );

        let serial: TransportConfig = serde_json::from_str(r#"{"kind":"serial","device":"/dev/ttyUSB0"}"#).unwrap();
        assert!(matches!(serial, TransportConfig::Serial { baud_rate: None, .. }));
    }

    #[tokio::test]
    async fn test_tcp_connect_failure_is_io_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = open(&TransportConfig::Tcp { address }, ObdProtocol::Auto).await;
        assert!(matches!(result, Err(DriverError::Io(_))));
    }

    #[tokio::test]
    async fn test_tcp_connect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let stream = open(&TransportConfig::Tcp { address }, ObdProtocol::Auto).await;
        assert!(stream.is_ok());
    }
}
