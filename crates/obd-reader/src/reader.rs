//! Query dispatch
//!
//! Typed reads on top of any [`QueryChannel`]. Each read builds its
//! descriptor from the catalog first, so unsupported PIDs fail before any
//! I/O, then consults the cache, then goes to the vehicle.

use crate::cache::{CacheConfig, CachedValue, Expiry, ResultCache};
use crate::error::ReaderError;
use elm327_driver::QueryChannel;
use obd_protocol::decode::supported_pids;
use obd_protocol::{catalog, mode, pid, QueryDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// Where a reading comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    /// Current data (mode 01)
    #[default]
    Live,
    /// Snapshot stored when a trouble code was set (mode 02)
    FreezeFrame,
}

impl DataSource {
    pub fn mode(&self) -> u8 {
        match self {
            DataSource::Live => mode::CURRENT_DATA,
            DataSource::FreezeFrame => mode::FREEZE_FRAME,
        }
    }
}

/// Fuel trim selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuelTrim {
    ShortTermBank1,
    LongTermBank1,
    ShortTermBank2,
    LongTermBank2,
}

impl FuelTrim {
    fn pid(&self) -> u8 {
        match self {
            FuelTrim::ShortTermBank1 => pid::SHORT_FUEL_TRIM_BANK_1,
            FuelTrim::LongTermBank1 => pid::LONG_FUEL_TRIM_BANK_1,
            FuelTrim::ShortTermBank2 => pid::SHORT_FUEL_TRIM_BANK_2,
            FuelTrim::LongTermBank2 => pid::LONG_FUEL_TRIM_BANK_2,
        }
    }
}

/// Engine percent torque at idle and four engine points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorqueProfile {
    pub idle: i32,
    pub points: [i32; 4],
}

/// Malfunction indicator lamp state and stored code count
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DtcStatus {
    pub mil_on: bool,
    pub dtc_count: u32,
}

/// Vehicle identification number split into its sections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vin {
    pub vin: String,
    /// World manufacturer identifier (characters 1-3)
    pub wmi: String,
    /// Vehicle descriptor section (characters 4-9)
    pub vds: String,
    /// Vehicle identifier section (characters 10-17)
    pub vis: String,
}

impl Vin {
    pub fn parse(text: &str) -> Result<Self, ReaderError> {
        let vin = text.trim();
        if vin.len() != 17 || !vin.is_ascii() {
            return Err(ReaderError::UnexpectedValue("vin"));
        }
        Ok(Self {
            vin: vin.to_string(),
            wmi: vin[0..3].to_string(),
            vds: vin[3..9].to_string(),
            vis: vin[9..17].to_string(),
        })
    }
}

/// Cache policy of a named read
#[derive(Debug, Clone, Copy)]
enum Caching {
    None,
    /// Live readings kept for the configured TTL
    Realtime(&'static str),
    /// Values that never change while connected
    Constant(&'static str),
}

/// Typed OBD-II reads over a query channel
pub struct ObdReader<C> {
    channel: C,
    cache: ResultCache,
    supported: Mutex<HashMap<u8, Vec<u8>>>,
    config: CacheConfig,
}

impl<C: QueryChannel> ObdReader<C> {
    pub fn new(channel: C, config: CacheConfig) -> Self {
        Self {
            channel,
            cache: ResultCache::new(),
            supported: Mutex::new(HashMap::new()),
            config,
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn into_channel(self) -> C {
        self.channel
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Send a descriptor and wait for a decoded response
    async fn fetch(&self, descriptor: QueryDescriptor) -> Result<QueryDescriptor, ReaderError> {
        let resolved = self.channel.submit(descriptor)?.await?;
        if let Some(message) = resolved.error_message() {
            return Err(ReaderError::Decode(format!("{}: {}", resolved.key(), message)));
        }
        Ok(resolved)
    }

    /// Run any catalog query. Mode 01 results are cached briefly.
    pub async fn execute_query(&self, mode: u8, pid: u8) -> Result<QueryDescriptor, ReaderError> {
        let descriptor = QueryDescriptor::new(mode, pid)?;
        let cache_key = (mode == mode::CURRENT_DATA).then(|| format!("execute_query@{}", descriptor.key()));

        if let Some(key) = &cache_key {
            if let Some(CachedValue::Query(cached)) = self.cache.get(key) {
                debug!("Cache hit for {}", key);
                return Ok(cached);
            }
        }

        let resolved = self.fetch(descriptor).await?;
        if let Some(key) = cache_key {
            self.cache.insert(
                key,
                CachedValue::Query(resolved.clone()),
                Expiry::After(self.config.ttl() / 3),
            );
        }
        Ok(resolved)
    }

    /// Run a query written as hex text, e.g. `010C` or `03`
    pub async fn execute_query_str(&self, query: &str) -> Result<QueryDescriptor, ReaderError> {
        let parsed = QueryDescriptor::parse(query)?;
        self.execute_query(parsed.mode(), parsed.pid()).await
    }

    async fn number(&self, mode: u8, pid: u8, caching: Caching) -> Result<f64, ReaderError> {
        let descriptor = QueryDescriptor::new(mode, pid)?;
        let (key, expiry) = match caching {
            Caching::Realtime(key) if mode == mode::CURRENT_DATA => (Some(key), Expiry::After(self.config.ttl())),
            Caching::Constant(key) => (Some(key), Expiry::Never),
            _ => (None, Expiry::Never),
        };

        if let Some(key) = key {
            if let Some(CachedValue::Number(value)) = self.cache.get(key) {
                return Ok(value);
            }
        }

        let resolved = self.fetch(descriptor).await?;
        let value = resolved
            .first_number()
            .ok_or_else(|| ReaderError::UnexpectedValue(first_item_name(&resolved)))?;
        if let Some(key) = key {
            self.cache.insert(key, CachedValue::Number(value), expiry);
        }
        Ok(value)
    }

    async fn text(&self, mode: u8, pid: u8) -> Result<String, ReaderError> {
        let resolved = self.fetch(QueryDescriptor::new(mode, pid)?).await?;
        resolved
            .first_text()
            .map(str::to_string)
            .ok_or_else(|| ReaderError::UnexpectedValue(first_item_name(&resolved)))
    }

    pub async fn vehicle_speed(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self.number(source.mode(), pid::VEHICLE_SPEED, Caching::None).await? as u32)
    }

    pub async fn engine_rpm(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::ENGINE_RPM, Caching::Realtime("engine_rpm"))
            .await
    }

    pub async fn coolant_temperature(&self, source: DataSource) -> Result<i32, ReaderError> {
        let value = self
            .number(source.mode(), pid::COOLANT_TEMP, Caching::Realtime("coolant_temperature"))
            .await?;
        Ok(value as i32)
    }

    pub async fn engine_oil_temperature(&self, source: DataSource) -> Result<i32, ReaderError> {
        let value = self
            .number(source.mode(), pid::ENGINE_OIL_TEMP, Caching::Realtime("engine_oil_temperature"))
            .await?;
        Ok(value as i32)
    }

    pub async fn engine_load(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::ENGINE_LOAD, Caching::None).await
    }

    pub async fn fuel_pressure(&self, source: DataSource) -> Result<u32, ReaderError> {
        let value = self
            .number(source.mode(), pid::FUEL_PRESSURE, Caching::Realtime("fuel_pressure"))
            .await?;
        Ok(value as u32)
    }

    pub async fn intake_manifold_pressure(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::INTAKE_MANIFOLD_PRESSURE, Caching::None)
            .await? as u32)
    }

    pub async fn throttle_position(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::THROTTLE_POSITION, Caching::None).await
    }

    pub async fn maf_air_flow_rate(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::MAF, Caching::Realtime("maf_air_flow_rate"))
            .await
    }

    pub async fn fuel_level(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::FUEL_LEVEL, Caching::Realtime("fuel_level"))
            .await
    }

    pub async fn engine_fuel_rate(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::ENGINE_FUEL_RATE, Caching::Realtime("engine_fuel_rate"))
            .await
    }

    pub async fn fuel_injection_timing(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::FUEL_INJECTION_TIMING, Caching::None)
            .await
    }

    /// Seconds since engine start
    pub async fn run_time_since_start(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self.number(source.mode(), pid::RUN_TIME, Caching::None).await? as u32)
    }

    /// Kilometres driven with the MIL on
    pub async fn distance_with_mil_on(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::DISTANCE_WITH_MIL, Caching::None)
            .await? as u32)
    }

    pub async fn ethanol_fuel(&self, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), pid::ETHANOL_FUEL, Caching::None).await
    }

    /// Fuel rail absolute pressure in kPa
    pub async fn fuel_rail_pressure(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::FUEL_RAIL_ABSOLUTE_PRESSURE, Caching::None)
            .await? as u32)
    }

    pub async fn fuel_trim(&self, trim: FuelTrim, source: DataSource) -> Result<f64, ReaderError> {
        self.number(source.mode(), trim.pid(), Caching::None).await
    }

    pub async fn driver_demand_torque(&self, source: DataSource) -> Result<i32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::DRIVER_DEMAND_TORQUE, Caching::None)
            .await? as i32)
    }

    pub async fn actual_engine_torque(&self, source: DataSource) -> Result<i32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::ACTUAL_ENGINE_TORQUE, Caching::None)
            .await? as i32)
    }

    /// Reference torque in Nm
    pub async fn engine_reference_torque(&self, source: DataSource) -> Result<u32, ReaderError> {
        Ok(self
            .number(source.mode(), pid::ENGINE_REFERENCE_TORQUE, Caching::None)
            .await? as u32)
    }

    pub async fn engine_percent_torque(&self, source: DataSource) -> Result<TorqueProfile, ReaderError> {
        let resolved = self
            .fetch(QueryDescriptor::new(source.mode(), pid::ENGINE_PERCENT_TORQUE)?)
            .await?;
        let values: Vec<i32> = resolved
            .items()
            .iter()
            .filter_map(|item| item.as_number())
            .map(|value| value as i32)
            .collect();
        match values.as_slice() {
            [idle, a, b, c, d] => Ok(TorqueProfile {
                idle: *idle,
                points: [*a, *b, *c, *d],
            }),
            _ => Err(ReaderError::UnexpectedValue("torque_idle")),
        }
    }

    /// Fuel type code (SAE J1979 table)
    pub async fn fuel_type(&self) -> Result<u8, ReaderError> {
        let value = self
            .number(mode::CURRENT_DATA, pid::FUEL_TYPE, Caching::Constant("fuel_type"))
            .await?;
        Ok(value as u8)
    }

    /// OBD standard code (SAE J1979 table)
    pub async fn obd_standard(&self) -> Result<u8, ReaderError> {
        let value = self
            .number(mode::CURRENT_DATA, pid::OBD_STANDARD, Caching::Constant("obd_standard"))
            .await?;
        Ok(value as u8)
    }

    pub async fn dtc_status(&self) -> Result<DtcStatus, ReaderError> {
        let resolved = self
            .fetch(QueryDescriptor::new(mode::CURRENT_DATA, pid::MONITOR_STATUS)?)
            .await?;
        let mil = resolved
            .item("mil")
            .and_then(|item| item.as_number())
            .ok_or(ReaderError::UnexpectedValue("mil"))?;
        let count = resolved
            .item("dtc_count")
            .and_then(|item| item.as_number())
            .ok_or(ReaderError::UnexpectedValue("dtc_count"))?;
        Ok(DtcStatus {
            mil_on: mil != 0.0,
            dtc_count: count as u32,
        })
    }

    /// Trouble code that triggered the freeze frame, if any
    pub async fn freeze_dtc(&self) -> Result<Option<String>, ReaderError> {
        let code = self.text(mode::FREEZE_FRAME, pid::FREEZE_DTC).await?;
        Ok((!code.is_empty()).then_some(code))
    }

    /// Stored trouble codes
    pub async fn trouble_codes(&self) -> Result<Vec<String>, ReaderError> {
        let codes = self.text(mode::READ_DTC, 0x00).await?;
        Ok(codes.split_whitespace().map(str::to_string).collect())
    }

    /// Clear stored trouble codes and turn the MIL off
    pub async fn clear_trouble_codes(&self) -> Result<(), ReaderError> {
        info!("Clearing trouble codes");
        self.fetch(QueryDescriptor::new(mode::CLEAR_DTC, 0x00)?).await?;
        // Monitor status and live readings are reset by the vehicle
        self.cache.clear();
        Ok(())
    }

    pub async fn vin(&self) -> Result<Vin, ReaderError> {
        if let Some(CachedValue::Text(vin)) = self.cache.get("vin") {
            return Vin::parse(&vin);
        }
        let text = self.text(mode::VEHICLE_INFO, pid::VIN).await?;
        let vin = Vin::parse(&text)?;
        self.cache.insert("vin", CachedValue::Text(vin.vin.clone()), Expiry::Never);
        Ok(vin)
    }

    /// Supported PIDs of a mode, probing bitmap groups 0x00, 0x20, ...
    /// while each bitmap flags the next group. Freeze-frame queries share
    /// the current-data result.
    pub async fn supported_pids(&self, mode: u8) -> Result<Vec<u8>, ReaderError> {
        let mode = if mode == mode::FREEZE_FRAME {
            mode::CURRENT_DATA
        } else {
            mode
        };
        if let Some(known) = self
            .supported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&mode)
        {
            return Ok(known.clone());
        }

        let mut found = Vec::new();
        let mut base: u8 = 0x00;
        loop {
            let resolved = self.fetch(QueryDescriptor::new(mode, base)?).await?;
            let bitmap = resolved
                .raw_bytes()
                .ok_or(ReaderError::UnexpectedValue("supported pid bitmap"))?;
            let group = supported_pids(base, bitmap).map_err(|e| ReaderError::Decode(e.to_string()))?;
            debug!("Mode {:02X} group {:02X}: {} PIDs", mode, base, group.len());
            found.extend_from_slice(&group);

            match base.checked_add(0x20) {
                Some(next) if group.contains(&next) && is_bitmap(mode, next) => base = next,
                _ => break,
            }
        }

        info!("Mode {:02X} supports {} PIDs", mode, found.len());
        self.supported
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(mode, found.clone());
        Ok(found)
    }
}

fn first_item_name(descriptor: &QueryDescriptor) -> &'static str {
    descriptor
        .metadata()
        .items
        .first()
        .map(|item| item.name)
        .unwrap_or("value")
}

fn is_bitmap(mode: u8, pid: u8) -> bool {
    catalog::lookup(mode, pid)
        .map(|metadata| {
            metadata
                .items
                .iter()
                .any(|item| matches!(item.formula, obd_protocol::Formula::SupportedPids { .. }))
        })
        .unwrap_or(false)
}
