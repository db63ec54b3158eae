//! Decode Engine
//!
//! Turns a descriptor's raw payload into result items by evaluating the
//! catalog formulas. Decoding is a pure function of the payload and the
//! catalog row, so decoding the same bytes twice yields identical items.

use crate::catalog::{Formula, ItemSpec, Operand, PidMetadata};
use crate::error::DecodeError;
use crate::query::{QueryDescriptor, ResultItem};
use tracing::debug;

/// Decode the descriptor's payload and attach the resulting items.
///
/// On failure the descriptor carries a single error item named after the
/// first catalog item, and the error is returned as well.
pub fn decode(descriptor: &mut QueryDescriptor) -> Result<(), DecodeError> {
    let metadata = descriptor.metadata();
    let outcome = match descriptor.raw_bytes() {
        Some(bytes) => decode_payload(metadata, bytes).map(|items| (items, bytes.len())),
        None => Err(DecodeError::MissingPayload),
    };

    match outcome {
        Ok((items, len)) => {
            if metadata.length.declared().is_none() {
                descriptor.set_effective_len(len);
            }
            descriptor.set_items(items);
            Ok(())
        }
        Err(err) => {
            debug!("Decode of {} failed: {}", descriptor.key(), err);
            let name = metadata.items.first().map(|item| item.name).unwrap_or("response");
            descriptor.set_items(vec![ResultItem::error(name, "invalid response")]);
            Err(err)
        }
    }
}

/// Evaluate every item of a catalog row against a payload
pub fn decode_payload(metadata: &PidMetadata, bytes: &[u8]) -> Result<Vec<ResultItem>, DecodeError> {
    if !metadata.length.accepts(bytes.len()) {
        return Err(DecodeError::LengthMismatch {
            expected: metadata.length.to_string(),
            actual: bytes.len(),
        });
    }

    let mut items = Vec::with_capacity(metadata.items.len());
    for spec in metadata.items {
        evaluate(spec, bytes, &mut items)?;
    }
    Ok(items)
}

fn evaluate(spec: &ItemSpec, bytes: &[u8], out: &mut Vec<ResultItem>) -> Result<(), DecodeError> {
    match spec.formula {
        Formula::Scaled {
            operand,
            mul,
            div,
            offset,
        } => {
            let x = operand_value(operand, bytes)?;
            out.push(ResultItem::number(spec.name, x * mul / div + offset, spec.unit));
        }
        Formula::SignedWord { div } => {
            let word = operand_value(Operand::AB, bytes)? as u16 as i16;
            out.push(ResultItem::number(spec.name, f64::from(word) / div, spec.unit));
        }
        Formula::SupportedPids { base } => {
            let pids = supported_pids(base, bytes)?;
            let listed: Vec<String> = pids.iter().map(|pid| format!("{:02x}", pid)).collect();
            out.push(ResultItem::text(spec.name, listed.join(" ")));
        }
        Formula::MonitorStatus { drive_cycle } => monitor_status(bytes, drive_cycle, out)?,
        Formula::Dtc => {
            let [a, b] = pair(bytes, 0)?;
            out.push(ResultItem::text(spec.name, decode_dtc(a, b)));
        }
        Formula::DtcList => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::InvalidData(format!(
                    "odd trouble code payload of {} bytes",
                    bytes.len()
                )));
            }
            let codes: Vec<String> = bytes
                .chunks_exact(2)
                .map(|pair| decode_dtc(pair[0], pair[1]))
                .filter(|code| !code.is_empty())
                .collect();
            out.push(ResultItem::text(spec.name, codes.join(" ")));
        }
        Formula::Ascii => {
            let text = String::from_utf8_lossy(bytes);
            let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
            out.push(ResultItem::text(spec.name, text));
        }
        Formula::Hex => {
            let hex: String = bytes.iter().map(|b| format!("{:02X}", b)).collect();
            out.push(ResultItem::text(spec.name, hex));
        }
        Formula::WordList => {
            if bytes.len() % 2 != 0 {
                return Err(DecodeError::InvalidData(format!(
                    "odd word list payload of {} bytes",
                    bytes.len()
                )));
            }
            let words: Vec<String> = bytes
                .chunks_exact(2)
                .map(|pair| format!("{:04X}", u16::from_be_bytes([pair[0], pair[1]])))
                .collect();
            out.push(ResultItem::text(spec.name, words.join(" ")));
        }
        Formula::Acknowledge => out.push(ResultItem::number(spec.name, 0.0, spec.unit)),
    }
    Ok(())
}

fn byte(bytes: &[u8], index: usize) -> Result<u8, DecodeError> {
    bytes
        .get(index)
        .copied()
        .ok_or_else(|| DecodeError::InvalidData(format!("missing byte {}", index)))
}

fn pair(bytes: &[u8], index: usize) -> Result<[u8; 2], DecodeError> {
    Ok([byte(bytes, index)?, byte(bytes, index + 1)?])
}

fn operand_value(operand: Operand, bytes: &[u8]) -> Result<f64, DecodeError> {
    let value = match operand {
        Operand::A => u32::from(byte(bytes, 0)?),
        Operand::B => u32::from(byte(bytes, 1)?),
        Operand::C => u32::from(byte(bytes, 2)?),
        Operand::D => u32::from(byte(bytes, 3)?),
        Operand::E => u32::from(byte(bytes, 4)?),
        Operand::AB => u32::from(u16::from_be_bytes(pair(bytes, 0)?)),
        Operand::CD => u32::from(u16::from_be_bytes(pair(bytes, 2)?)),
    };
    Ok(f64::from(value))
}

/// PIDs flagged in a 32-bit supported-PID bitmap. Bit 7 of the first byte is
/// `base + 1`, bit 0 of the last byte is `base + 32`.
pub fn supported_pids(base: u8, bytes: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if bytes.len() != 4 {
        return Err(DecodeError::LengthMismatch {
            expected: "4".to_string(),
            actual: bytes.len(),
        });
    }
    let bitmap = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    Ok((0..32u32)
        .filter(|bit| bitmap & (0x8000_0000 >> bit) != 0)
        .filter_map(|bit| base.checked_add(bit as u8 + 1))
        .collect())
}

/// Render a two-byte trouble code, e.g. `01 00` as `P0100`.
/// An all-zero pair means no code and renders empty.
pub fn decode_dtc(a: u8, b: u8) -> String {
    if a == 0 && b == 0 {
        return String::new();
    }
    let system = match a >> 6 {
        0 => 'P',
        1 => 'C',
        2 => 'B',
        _ => 'U',
    };
    format!("{}{}{:X}{:02X}", system, (a >> 4) & 0x03, a & 0x0F, b)
}

const SPARK_MONITORS: [(&str, &str); 8] = [
    ("catalyst_test_available", "catalyst_test_incomplete"),
    ("heated_catalyst_test_available", "heated_catalyst_test_incomplete"),
    ("evaporative_system_test_available", "evaporative_system_test_incomplete"),
    ("secondary_air_system_test_available", "secondary_air_system_test_incomplete"),
    ("ac_refrigerant_test_available", "ac_refrigerant_test_incomplete"),
    ("oxygen_sensor_test_available", "oxygen_sensor_test_incomplete"),
    ("oxygen_sensor_heater_test_available", "oxygen_sensor_heater_test_incomplete"),
    ("egr_system_test_available", "egr_system_test_incomplete"),
];

// Bits 2 and 4 are reserved for compression ignition.
const COMPRESSION_MONITORS: [Option<(&str, &str)>; 8] = [
    Some(("nmhc_catalyst_test_available", "nmhc_catalyst_test_incomplete")),
    Some(("nox_scr_monitor_test_available", "nox_scr_monitor_test_incomplete")),
    None,
    Some(("boost_pressure_test_available", "boost_pressure_test_incomplete")),
    None,
    Some(("exhaust_gas_sensor_test_available", "exhaust_gas_sensor_test_incomplete")),
    Some(("pm_filter_monitoring_test_available", "pm_filter_monitoring_test_incomplete")),
    Some(("egr_vvt_system_test_available", "egr_vvt_system_test_incomplete")),
];

fn flag(name: &'static str, set: bool) -> ResultItem {
    ResultItem::number(name, if set { 1.0 } else { 0.0 }, "")
}

fn monitor_status(bytes: &[u8], drive_cycle: bool, out: &mut Vec<ResultItem>) -> Result<(), DecodeError> {
    let [a, b] = pair(bytes, 0)?;
    let [c, d] = pair(bytes, 2)?;

    if !drive_cycle {
        out.push(flag("mil", a & 0x80 != 0));
        out.push(ResultItem::number("dtc_count", f64::from(a & 0x7F), ""));
    }

    let compression = b & 0x08 != 0;
    out.push(flag("compression_ignition", compression));
    out.push(flag("misfire_test_available", b & 0x01 != 0));
    out.push(flag("misfire_test_incomplete", b & 0x10 != 0));
    out.push(flag("fuel_system_test_available", b & 0x02 != 0));
    out.push(flag("fuel_system_test_incomplete", b & 0x20 != 0));
    out.push(flag("components_test_available", b & 0x04 != 0));
    out.push(flag("components_test_incomplete", b & 0x40 != 0));

    for bit in 0..8 {
        let names = if compression {
            COMPRESSION_MONITORS[bit]
        } else {
            Some(SPARK_MONITORS[bit])
        };
        if let Some((available, incomplete)) = names {
            out.push(flag(available, c & (1 << bit) != 0));
            out.push(flag(incomplete, d & (1 << bit) != 0));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::lookup;
    use crate::query::ItemValue;
    use proptest::prelude::*;

    fn decoded(mode: u8, pid: u8, payload: &[u8]) -> QueryDescriptor {
        let mut descriptor = QueryDescriptor::new(mode, pid).unwrap();
        descriptor.attach_response(payload.to_vec(), 0);
        decode(&mut descriptor).unwrap();
        descriptor
    }

    #[test]
    fn test_engine_rpm() {
        let rpm = decoded(0x01, 0x0C, &[0x1A, 0xF8]);
        assert_eq!(rpm.first_number(), Some(1726.0));
        assert_eq!(rpm.items()[0].unit, "rpm");
    }

    #[test]
    fn test_vehicle_speed_and_coolant() {
        assert_eq!(decoded(0x01, 0x0D, &[0x32]).first_number(), Some(50.0));
        assert_eq!(decoded(0x01, 0x05, &[0x00]).first_number(), Some(-40.0));
        assert_eq!(decoded(0x02, 0x05, &[0x7B]).first_number(), Some(83.0));
    }

    #[test]
    fn test_fuel_trim_and_load() {
        assert_eq!(decoded(0x01, 0x06, &[0x80]).first_number(), Some(0.0));
        assert_eq!(decoded(0x01, 0x06, &[0x00]).first_number(), Some(-100.0));
        assert_eq!(decoded(0x01, 0x04, &[0xFF]).first_number(), Some(100.0));
    }

    #[test]
    fn test_two_item_o2_sensor() {
        let o2 = decoded(0x01, 0x14, &[0xC8, 0x80]);
        assert_eq!(o2.items().len(), 2);
        assert_eq!(o2.items()[0].as_number(), Some(1.0));
        assert_eq!(o2.items()[1].as_number(), Some(0.0));
    }

    #[test]
    fn test_signed_vapor_pressure() {
        let negative = decoded(0x01, 0x32, &[0xFF, 0xFC]);
        assert_eq!(negative.first_number(), Some(-1.0));
    }

    #[test]
    fn test_fuel_injection_timing_and_rate() {
        assert_eq!(decoded(0x01, 0x5D, &[0x69, 0x00]).first_number(), Some(0.0));
        assert_eq!(decoded(0x01, 0x5E, &[0x00, 0x14]).first_number(), Some(1.0));
    }

    #[test]
    fn test_percent_torque_data() {
        let torque = decoded(0x01, 0x64, &[125, 130, 135, 140, 145]);
        let values: Vec<f64> = torque.items().iter().filter_map(ResultItem::as_number).collect();
        assert_eq!(values, vec![0.0, 5.0, 10.0, 15.0, 20.0]);
    }

    #[test]
    fn test_supported_pid_bitmap() {
        let bitmap = decoded(0x01, 0x00, &[0xBE, 0x1F, 0xA8, 0x13]);
        assert_eq!(
            bitmap.first_text(),
            Some("01 03 04 05 06 07 0c 0d 0e 0f 10 11 13 15 1c 1f 20")
        );
    }

    #[test]
    fn test_supported_pid_bitmap_is_offset_by_group() {
        let bitmap = decoded(0x01, 0x20, &[0x80, 0x00, 0x00, 0x01]);
        assert_eq!(bitmap.first_text(), Some("21 40"));
    }

    #[test]
    fn test_dtc_rendering() {
        assert_eq!(decode_dtc(0x01, 0x00), "P0100");
        assert_eq!(decode_dtc(0x41, 0x23), "C0123");
        assert_eq!(decode_dtc(0x9A, 0xBC), "B1ABC");
        assert_eq!(decode_dtc(0xC0, 0x01), "U0001");
        assert_eq!(decode_dtc(0x00, 0x00), "");
    }

    #[test]
    fn test_mode_3_list_and_effective_length() {
        let dtcs = decoded(0x03, 0x00, &[0x01, 0x00, 0x00, 0x00, 0x41, 0x23]);
        assert_eq!(dtcs.first_text(), Some("P0100 C0123"));
        assert_eq!(dtcs.effective_len(), Some(6));

        let none = decoded(0x03, 0x00, &[]);
        assert_eq!(none.first_text(), Some(""));
    }

    #[test]
    fn test_clear_dtc_acknowledges() {
        assert_eq!(decoded(0x04, 0x00, &[]).first_number(), Some(0.0));
    }

    #[test]
    fn test_vin_text() {
        let vin = decoded(0x09, 0x02, b"1G1JC5444R7252367");
        assert_eq!(vin.first_text(), Some("1G1JC5444R7252367"));

        let padded = decoded(0x09, 0x02, b"\0\0\01G1JC5444R7252367");
        assert_eq!(padded.first_text(), Some("1G1JC5444R7252367"));
    }

    #[test]
    fn test_cvn_and_tracking_words() {
        assert_eq!(decoded(0x09, 0x06, &[0x17, 0x91, 0xBC, 0x82]).first_text(), Some("1791BC82"));
        assert_eq!(
            decoded(0x09, 0x08, &[0x00, 0x10, 0x01, 0xFF]).first_text(),
            Some("0010 01FF")
        );
    }

    #[test]
    fn test_monitor_status_spark_layout() {
        // MIL on, 3 codes, spark ignition, catalyst monitor available and incomplete
        let status = decoded(0x01, 0x01, &[0x83, 0x07, 0x01, 0x01]);
        assert_eq!(status.item("mil").and_then(ResultItem::as_number), Some(1.0));
        assert_eq!(status.item("dtc_count").and_then(ResultItem::as_number), Some(3.0));
        assert_eq!(status.item("compression_ignition").and_then(ResultItem::as_number), Some(0.0));
        assert_eq!(status.item("catalyst_test_available").and_then(ResultItem::as_number), Some(1.0));
        assert_eq!(status.item("catalyst_test_incomplete").and_then(ResultItem::as_number), Some(1.0));
        assert!(status.item("nmhc_catalyst_test_available").is_none());
    }

    #[test]
    fn test_monitor_status_compression_layout() {
        let status = decoded(0x01, 0x41, &[0x00, 0x08, 0x01, 0x00]);
        assert!(status.item("mil").is_none());
        assert_eq!(status.item("compression_ignition").and_then(ResultItem::as_number), Some(1.0));
        assert_eq!(status.item("nmhc_catalyst_test_available").and_then(ResultItem::as_number), Some(1.0));
        assert!(status.item("catalyst_test_available").is_none());
    }

    #[test]
    fn test_length_mismatch_yields_single_error_item() {
        let mut rpm = QueryDescriptor::new(0x01, 0x0C).unwrap();
        rpm.attach_response(vec![0x1A], 0);
        let err = decode(&mut rpm).unwrap_err();
        assert!(matches!(err, DecodeError::LengthMismatch { actual: 1, .. }));
        assert_eq!(rpm.items().len(), 1);
        assert_eq!(rpm.items()[0].value, ItemValue::Error("invalid response".to_string()));
        assert_eq!(rpm.error_message(), Some("invalid response"));
    }

    #[test]
    fn test_missing_payload() {
        let mut speed = QueryDescriptor::new(0x01, 0x0D).unwrap();
        assert_eq!(decode(&mut speed), Err(DecodeError::MissingPayload));
        assert!(speed.error_message().is_some());
    }

    proptest! {
        #[test]
        fn prop_decode_is_idempotent(pid in 0u8..0x66, payload in proptest::collection::vec(any::<u8>(), 0..8)) {
            let metadata = lookup(0x01, pid).unwrap();
            let first = decode_payload(metadata, &payload);
            let second = decode_payload(metadata, &payload);
            prop_assert_eq!(first, second);
        }

        #[test]
        fn prop_fixed_length_rows_accept_only_their_length(pid in 0u8..0x66, len in 0usize..8) {
            let metadata = lookup(0x01, pid).unwrap();
            let payload = vec![0x41; len];
            let result = decode_payload(metadata, &payload);
            prop_assert_eq!(result.is_ok(), metadata.length.accepts(len));
        }
    }
}
