//! Subcommand implementations
//!
//! Each command reads through an [`ObdReader`] and hands what it gets to a
//! [`DataSink`].

use anyhow::{Context, Result};
use elm327_driver::{DriverError, QueryChannel};
use obd_protocol::unix_millis;
use obd_reader::{
    DataSink, DiagnosticRecord, ObdReader, ReaderError, SupportedPidsRecord, TroubleCodeRecord,
    VehicleIdentityRecord,
};
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{info, warn};

/// Run each hex query once, e.g. `010C` or `03`
pub async fn query<C: QueryChannel>(reader: &ObdReader<C>, sink: &dyn DataSink, queries: &[String]) -> Result<()> {
    for query in queries {
        let resolved = reader
            .execute_query_str(query)
            .await
            .with_context(|| format!("Query {} failed", query))?;
        sink.accept(&DiagnosticRecord::from(&resolved))?;
    }
    Ok(())
}

/// Poll a set of queries until `rounds` is reached (forever when `None`).
/// Per-query timeouts and decode failures are logged and skipped.
pub async fn monitor<C: QueryChannel>(
    reader: &ObdReader<C>,
    sink: &dyn DataSink,
    queries: &[String],
    period: Duration,
    rounds: Option<u64>,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut round = 0u64;

    while rounds.map_or(true, |limit| round < limit) {
        ticker.tick().await;
        for query in queries {
            match reader.execute_query_str(query).await {
                Ok(resolved) => sink.accept(&DiagnosticRecord::from(&resolved))?,
                Err(err) if is_fatal(&err) => return Err(err).context("Adapter connection lost"),
                Err(err) => warn!("Query {} failed: {}", query, err),
            }
        }
        round += 1;
    }
    Ok(())
}

fn is_fatal(err: &ReaderError) -> bool {
    matches!(
        err,
        ReaderError::Protocol(_)
            | ReaderError::Driver(
                DriverError::TransportClosed
                    | DriverError::TransportRead(_)
                    | DriverError::TransportWrite(_)
                    | DriverError::Io(_)
            )
    )
}

/// Stored trouble codes with the MIL state when the vehicle reports it
pub async fn trouble_codes<C: QueryChannel>(reader: &ObdReader<C>, sink: &dyn DataSink) -> Result<()> {
    let mil_on = match reader.dtc_status().await {
        Ok(status) => Some(status.mil_on),
        Err(err) => {
            warn!("Monitor status unavailable: {}", err);
            None
        }
    };
    let codes = reader.trouble_codes().await.context("Reading trouble codes failed")?;
    info!("{} trouble codes stored", codes.len());
    sink.accept(&DiagnosticRecord::TroubleCodes(TroubleCodeRecord {
        recorded_at_ms: unix_millis(),
        mil_on,
        codes,
    }))?;
    Ok(())
}

pub async fn clear_trouble_codes<C: QueryChannel>(reader: &ObdReader<C>) -> Result<()> {
    reader
        .clear_trouble_codes()
        .await
        .context("Clearing trouble codes failed")
}

pub async fn vin<C: QueryChannel>(reader: &ObdReader<C>, sink: &dyn DataSink) -> Result<()> {
    let vin = reader.vin().await.context("Reading VIN failed")?;
    sink.accept(&DiagnosticRecord::VehicleIdentity(VehicleIdentityRecord {
        recorded_at_ms: unix_millis(),
        vin,
    }))?;
    Ok(())
}

pub async fn supported<C: QueryChannel>(reader: &ObdReader<C>, sink: &dyn DataSink, mode: u8) -> Result<()> {
    let pids = reader
        .supported_pids(mode)
        .await
        .with_context(|| format!("Discovering mode {:02X} PIDs failed", mode))?;
    sink.accept(&DiagnosticRecord::SupportedPids(SupportedPidsRecord::new(
        unix_millis(),
        mode,
        &pids,
    )))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use elm327_driver::QueryHandle;
    use obd_protocol::{decode, QueryDescriptor, QueryKey};
    use obd_reader::{CacheConfig, JsonLinesSink};
    use std::collections::HashMap;
    use tokio::sync::oneshot;

    /// Vehicle answering from a payload table; other keys time out
    struct ScriptedVehicle {
        payloads: HashMap<QueryKey, Vec<u8>>,
        closed: bool,
    }

    impl ScriptedVehicle {
        fn new(entries: &[(u8, u8, &[u8])]) -> Self {
            Self {
                payloads: entries
                    .iter()
                    .map(|(mode, pid, bytes)| (QueryKey::new(*mode, *pid), bytes.to_vec()))
                    .collect(),
                closed: false,
            }
        }
    }

    impl QueryChannel for ScriptedVehicle {
        fn submit(&self, mut descriptor: QueryDescriptor) -> Result<QueryHandle, DriverError> {
            if self.closed {
                return Err(DriverError::TransportClosed);
            }
            let key = descriptor.key();
            let (tx, rx) = oneshot::channel();
            let handle = QueryHandle::new(descriptor.id(), key, rx);
            let result = match self.payloads.get(&key) {
                Some(bytes) => {
                    descriptor.attach_response(bytes.clone(), unix_millis());
                    let _ = decode(&mut descriptor);
                    Ok(descriptor)
                }
                None => Err(DriverError::Timeout {
                    mode: key.mode,
                    pid: key.pid,
                    after_ms: 600,
                }),
            };
            let _ = tx.send(result);
            Ok(handle)
        }
    }

    fn lines(sink: JsonLinesSink<Vec<u8>>) -> Vec<serde_json::Value> {
        String::from_utf8(sink.into_inner())
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_query_writes_one_record_per_query() {
        let reader = ObdReader::new(
            ScriptedVehicle::new(&[(0x01, 0x0C, &[0x1A, 0xF8]), (0x01, 0x0D, &[0x32])]),
            CacheConfig::default(),
        );
        let sink = JsonLinesSink::new(Vec::new());

        query(&reader, &sink, &["010C".to_string(), "010D".to_string()])
            .await
            .unwrap();

        let records = lines(sink);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["items"][0]["name"], "engine_rpm");
        assert_eq!(records[1]["items"][0]["name"], "vehicle_speed");
    }

    #[tokio::test]
    async fn test_query_stops_on_bad_input() {
        let reader = ObdReader::new(ScriptedVehicle::new(&[]), CacheConfig::default());
        let sink = JsonLinesSink::new(Vec::new());
        assert!(query(&reader, &sink, &["ZZ".to_string()]).await.is_err());
        assert!(lines(sink).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_skips_timeouts() {
        let reader = ObdReader::new(
            ScriptedVehicle::new(&[(0x01, 0x0D, &[0x32])]),
            CacheConfig { ttl_ms: 0 },
        );
        let sink = JsonLinesSink::new(Vec::new());

        monitor(
            &reader,
            &sink,
            &["010D".to_string(), "015C".to_string()],
            Duration::from_millis(250),
            Some(3),
        )
        .await
        .unwrap();

        assert_eq!(lines(sink).len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_stops_when_adapter_is_gone() {
        let mut vehicle = ScriptedVehicle::new(&[]);
        vehicle.closed = true;
        let reader = ObdReader::new(vehicle, CacheConfig::default());
        let sink = JsonLinesSink::new(Vec::new());

        let result = monitor(&reader, &sink, &["010D".to_string()], Duration::from_millis(250), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_trouble_codes_without_monitor_status() {
        let reader = ObdReader::new(
            ScriptedVehicle::new(&[(0x03, 0x00, &[0x01, 0x33])]),
            CacheConfig::default(),
        );
        let sink = JsonLinesSink::new(Vec::new());

        trouble_codes(&reader, &sink).await.unwrap();

        let records = lines(sink);
        assert_eq!(records[0]["category"], "trouble_codes");
        assert_eq!(records[0]["codes"][0], "P0133");
        assert!(records[0]["mil_on"].is_null());
    }

    #[tokio::test]
    async fn test_vin_and_supported() {
        let reader = ObdReader::new(
            ScriptedVehicle::new(&[
                (0x09, 0x02, b"1G1JC5444R7252367"),
                (0x01, 0x00, &[0x00, 0x18, 0x00, 0x00]),
            ]),
            CacheConfig::default(),
        );
        let sink = JsonLinesSink::new(Vec::new());

        vin(&reader, &sink).await.unwrap();
        supported(&reader, &sink, 0x01).await.unwrap();

        let records = lines(sink);
        assert_eq!(records[0]["vin"]["vis"], "R7252367");
        assert_eq!(records[1]["pids"], serde_json::json!(["0c", "0d"]));
    }
}
