//! OBD-II PID Catalog
//!
//! Static metadata for every (mode, PID) pair the driver can query: expected
//! payload length, result items with their formulas, ranges and units. Mode 2
//! (freeze frame) shares the Mode 1 table. Formulas are only tags here; the
//! decode engine evaluates them.

use crate::error::ProtocolError;
use crate::mode;
use std::fmt;

/// Payload length accepted for a PID, excluding mode and PID bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteLength {
    /// Exactly this many bytes
    Fixed(usize),
    /// This many bytes or more (VIN)
    AtLeast(usize),
    /// Up to this many bytes (text identifiers)
    AtMost(usize),
    /// Any length (DTC lists, word lists)
    Variable,
}

impl ByteLength {
    /// Whether a payload of `len` bytes satisfies this length
    pub fn accepts(&self, len: usize) -> bool {
        match *self {
            ByteLength::Fixed(n) => len == n,
            ByteLength::AtLeast(n) => len >= n,
            ByteLength::AtMost(n) => len <= n,
            ByteLength::Variable => true,
        }
    }

    /// Declared byte count, `None` for variable length
    pub fn declared(&self) -> Option<usize> {
        match *self {
            ByteLength::Fixed(n) | ByteLength::AtLeast(n) | ByteLength::AtMost(n) => Some(n),
            ByteLength::Variable => None,
        }
    }
}

impl fmt::Display for ByteLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ByteLength::Fixed(n) => write!(f, "{}", n),
            ByteLength::AtLeast(n) => write!(f, "at least {}", n),
            ByteLength::AtMost(n) => write!(f, "at most {}", n),
            ByteLength::Variable => write!(f, "variable"),
        }
    }
}

/// Input to a scaled formula. Letters name payload bytes in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    A,
    B,
    C,
    D,
    E,
    /// `A*256+B`
    AB,
    /// `C*256+D`
    CD,
}

/// How an item's value is computed from the payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Formula {
    /// `operand * mul / div + offset`
    Scaled {
        operand: Operand,
        mul: f64,
        div: f64,
        offset: f64,
    },
    /// `AB` read as a two's-complement 16-bit value, divided by `div`
    SignedWord { div: f64 },
    /// 32-bit supported-PID bitmap for the group starting at `base`
    SupportedPids { base: u8 },
    /// Monitor status flags (PID 01 since codes cleared, PID 41 this cycle)
    MonitorStatus { drive_cycle: bool },
    /// One two-byte trouble code
    Dtc,
    /// Sequence of two-byte trouble codes
    DtcList,
    /// Bytes as text, NUL padding trimmed
    Ascii,
    /// Bytes rendered as uppercase hex text
    Hex,
    /// Byte pairs rendered as 16-bit hex words
    WordList,
    /// Payload-less acknowledgement, decodes to 0
    Acknowledge,
}

/// One named value produced by a PID
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ItemSpec {
    pub name: &'static str,
    /// Human readable formula tag, e.g. `A-40`
    pub expression: &'static str,
    pub formula: Formula,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub unit: &'static str,
}

/// Immutable catalog row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidMetadata {
    /// Table the row belongs to; freeze-frame queries reuse Mode 1 rows
    pub mode: u8,
    pub pid: u8,
    pub description: &'static str,
    pub length: ByteLength,
    pub items: &'static [ItemSpec],
    /// Payload starts with a data-item count byte on CAN
    pub count_prefix: bool,
}

impl PidMetadata {
    /// Response line count hint appended to the wire command
    pub fn line_count_hint(&self) -> Option<usize> {
        match self.length.declared() {
            Some(n) if n > 0 && (n + 4) / 4 <= 0xF => Some((n + 4) / 4),
            _ => None,
        }
    }
}

/// Look up the catalog row for a (mode, PID) pair.
///
/// Modes 3 and 4 carry no PID on the wire; any PID maps to their single row.
pub fn lookup(mode: u8, pid: u8) -> Result<&'static PidMetadata, ProtocolError> {
    let entry = match mode {
        mode::CURRENT_DATA | mode::FREEZE_FRAME => MODE1.get(pid as usize),
        mode::READ_DTC => Some(&READ_DTC),
        mode::CLEAR_DTC => Some(&CLEAR_DTC),
        mode::VEHICLE_INFO => MODE9.get(pid as usize),
        _ => None,
    };
    entry.ok_or(ProtocolError::UnsupportedPid { mode, pid })
}

/// Whether requests and responses in this mode carry a PID byte
pub fn mode_carries_pid(mode: u8) -> bool {
    !matches!(mode, mode::READ_DTC | mode::CLEAR_DTC)
}

/// All rows of a table, in PID order
pub fn entries(mode: u8) -> &'static [PidMetadata] {
    match mode {
        mode::CURRENT_DATA | mode::FREEZE_FRAME => MODE1,
        mode::READ_DTC => std::slice::from_ref(&READ_DTC),
        mode::CLEAR_DTC => std::slice::from_ref(&CLEAR_DTC),
        mode::VEHICLE_INFO => MODE9,
        _ => &[],
    }
}

use ByteLength::{AtLeast, AtMost, Fixed, Variable};
use Operand::{A, AB, B, C, CD, D, E};

const fn scaled(operand: Operand, mul: f64, div: f64, offset: f64) -> Formula {
    Formula::Scaled {
        operand,
        mul,
        div,
        offset,
    }
}

const fn num(
    name: &'static str,
    expression: &'static str,
    formula: Formula,
    min: f64,
    max: f64,
    unit: &'static str,
) -> ItemSpec {
    ItemSpec {
        name,
        expression,
        formula,
        min: Some(min),
        max: Some(max),
        unit,
    }
}

const fn text(name: &'static str, expression: &'static str, formula: Formula) -> ItemSpec {
    ItemSpec {
        name,
        expression,
        formula,
        min: None,
        max: None,
        unit: "",
    }
}

/// Bit-encoded byte reported as its raw value
const fn raw(name: &'static str, operand: Operand) -> ItemSpec {
    num(name, "bit encoded", scaled(operand, 1.0, 1.0, 0.0), 0.0, 255.0, "")
}

const fn percent(name: &'static str) -> ItemSpec {
    num(name, "A*100/255", scaled(A, 100.0, 255.0, 0.0), 0.0, 100.0, "%")
}

const fn trim(name: &'static str, operand: Operand, expression: &'static str) -> ItemSpec {
    num(name, expression, scaled(operand, 100.0, 128.0, -100.0), -100.0, 99.2, "%")
}

const fn temperature(name: &'static str) -> ItemSpec {
    num(name, "A-40", scaled(A, 1.0, 1.0, -40.0), -40.0, 215.0, "°C")
}

const fn torque(name: &'static str, operand: Operand, expression: &'static str) -> ItemSpec {
    num(name, expression, scaled(operand, 1.0, 1.0, -125.0), -125.0, 130.0, "%")
}

const fn row(pid: u8, description: &'static str, length: ByteLength, items: &'static [ItemSpec]) -> PidMetadata {
    PidMetadata {
        mode: mode::CURRENT_DATA,
        pid,
        description,
        length,
        items,
        count_prefix: false,
    }
}

const fn info(
    pid: u8,
    description: &'static str,
    length: ByteLength,
    items: &'static [ItemSpec],
    count_prefix: bool,
) -> PidMetadata {
    PidMetadata {
        mode: mode::VEHICLE_INFO,
        pid,
        description,
        length,
        items,
        count_prefix,
    }
}

macro_rules! bitmap {
    ($pid:literal, $name:literal, $description:literal) => {
        row(
            $pid,
            $description,
            Fixed(4),
            &[text($name, "bitmap", Formula::SupportedPids { base: $pid })],
        )
    };
}

macro_rules! o2_sensor {
    ($pid:literal, $description:literal, $voltage:literal, $trim:literal) => {
        row(
            $pid,
            $description,
            Fixed(2),
            &[
                num($voltage, "A/200", scaled(A, 1.0, 200.0, 0.0), 0.0, 1.275, "V"),
                trim($trim, B, "(B-128)*100/128"),
            ],
        )
    };
}

macro_rules! o2_wide_voltage {
    ($pid:literal, $description:literal, $ratio:literal, $voltage:literal) => {
        row(
            $pid,
            $description,
            Fixed(4),
            &[
                num($ratio, "((A*256)+B)*2/65535", scaled(AB, 2.0, 65535.0, 0.0), 0.0, 2.0, ""),
                num($voltage, "((C*256)+D)*8/65535", scaled(CD, 8.0, 65535.0, 0.0), 0.0, 8.0, "V"),
            ],
        )
    };
}

macro_rules! o2_wide_current {
    ($pid:literal, $description:literal, $ratio:literal, $current:literal) => {
        row(
            $pid,
            $description,
            Fixed(4),
            &[
                num($ratio, "((A*256)+B)/32768", scaled(AB, 1.0, 32768.0, 0.0), 0.0, 2.0, ""),
                num($current, "((C*256)+D)/256-128", scaled(CD, 1.0, 256.0, -128.0), -128.0, 128.0, "mA"),
            ],
        )
    };
}

macro_rules! catalyst {
    ($pid:literal, $description:literal, $name:literal) => {
        row(
            $pid,
            $description,
            Fixed(2),
            &[num($name, "((A*256)+B)/10-40", scaled(AB, 1.0, 10.0, -40.0), -40.0, 6513.5, "°C")],
        )
    };
}

macro_rules! secondary_trim {
    ($pid:literal, $description:literal, $bank_a:literal, $bank_b:literal) => {
        row(
            $pid,
            $description,
            Fixed(2),
            &[trim($bank_a, A, "(A-128)*100/128"), trim($bank_b, B, "(B-128)*100/128")],
        )
    };
}

macro_rules! message_count {
    ($pid:literal, $description:literal, $name:literal) => {
        info(
            $pid,
            $description,
            Fixed(1),
            &[num($name, "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, "")],
            false,
        )
    };
}

static MODE1: &[PidMetadata] = &[
    bitmap!(0x00, "pids_supported_01_20", "PIDs supported [01 - 20]"),
    row(
        0x01,
        "Monitor status since DTCs cleared",
        Fixed(4),
        &[text("monitor_status", "bit encoded", Formula::MonitorStatus { drive_cycle: false })],
    ),
    row(0x02, "Freeze DTC", Fixed(2), &[text("freeze_dtc", "DTC", Formula::Dtc)]),
    row(
        0x03,
        "Fuel system status",
        Fixed(2),
        &[raw("fuel_system_1", A), raw("fuel_system_2", B)],
    ),
    row(0x04, "Calculated engine load", Fixed(1), &[percent("engine_load")]),
    row(0x05, "Engine coolant temperature", Fixed(1), &[temperature("coolant_temperature")]),
    row(0x06, "Short term fuel trim - Bank 1", Fixed(1), &[trim("short_term_fuel_trim_bank_1", A, "(A-128)*100/128")]),
    row(0x07, "Long term fuel trim - Bank 1", Fixed(1), &[trim("long_term_fuel_trim_bank_1", A, "(A-128)*100/128")]),
    row(0x08, "Short term fuel trim - Bank 2", Fixed(1), &[trim("short_term_fuel_trim_bank_2", A, "(A-128)*100/128")]),
    row(0x09, "Long term fuel trim - Bank 2", Fixed(1), &[trim("long_term_fuel_trim_bank_2", A, "(A-128)*100/128")]),
    row(
        0x0A,
        "Fuel pressure",
        Fixed(1),
        &[num("fuel_pressure", "A*3", scaled(A, 3.0, 1.0, 0.0), 0.0, 765.0, "kPa")],
    ),
    row(
        0x0B,
        "Intake manifold absolute pressure",
        Fixed(1),
        &[num("intake_manifold_pressure", "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, "kPa")],
    ),
    row(
        0x0C,
        "Engine RPM",
        Fixed(2),
        &[num("engine_rpm", "((A*256)+B)/4", scaled(AB, 1.0, 4.0, 0.0), 0.0, 16383.75, "rpm")],
    ),
    row(
        0x0D,
        "Vehicle speed",
        Fixed(1),
        &[num("vehicle_speed", "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, "km/h")],
    ),
    row(
        0x0E,
        "Timing advance",
        Fixed(1),
        &[num("timing_advance", "(A-128)/2", scaled(A, 1.0, 2.0, -64.0), -64.0, 63.5, "°")],
    ),
    row(0x0F, "Intake air temperature", Fixed(1), &[temperature("intake_air_temperature")]),
    row(
        0x10,
        "MAF air flow rate",
        Fixed(2),
        &[num("maf_air_flow_rate", "((A*256)+B)/100", scaled(AB, 1.0, 100.0, 0.0), 0.0, 655.35, "g/s")],
    ),
    row(0x11, "Throttle position", Fixed(1), &[percent("throttle_position")]),
    row(0x12, "Commanded secondary air status", Fixed(1), &[raw("secondary_air_status", A)]),
    row(0x13, "Oxygen sensors present (2 banks)", Fixed(1), &[raw("o2_sensors_present", A)]),
    o2_sensor!(0x14, "Oxygen sensor 1", "o2_sensor_1_voltage", "o2_sensor_1_fuel_trim"),
    o2_sensor!(0x15, "Oxygen sensor 2", "o2_sensor_2_voltage", "o2_sensor_2_fuel_trim"),
    o2_sensor!(0x16, "Oxygen sensor 3", "o2_sensor_3_voltage", "o2_sensor_3_fuel_trim"),
    o2_sensor!(0x17, "Oxygen sensor 4", "o2_sensor_4_voltage", "o2_sensor_4_fuel_trim"),
    o2_sensor!(0x18, "Oxygen sensor 5", "o2_sensor_5_voltage", "o2_sensor_5_fuel_trim"),
    o2_sensor!(0x19, "Oxygen sensor 6", "o2_sensor_6_voltage", "o2_sensor_6_fuel_trim"),
    o2_sensor!(0x1A, "Oxygen sensor 7", "o2_sensor_7_voltage", "o2_sensor_7_fuel_trim"),
    o2_sensor!(0x1B, "Oxygen sensor 8", "o2_sensor_8_voltage", "o2_sensor_8_fuel_trim"),
    row(0x1C, "OBD standards this vehicle conforms to", Fixed(1), &[raw("obd_standard", A)]),
    row(0x1D, "Oxygen sensors present (4 banks)", Fixed(1), &[raw("o2_sensors_present_4_banks", A)]),
    row(0x1E, "Auxiliary input status", Fixed(1), &[raw("auxiliary_input_status", A)]),
    row(
        0x1F,
        "Run time since engine start",
        Fixed(2),
        &[num("run_time_since_start", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "s")],
    ),
    bitmap!(0x20, "pids_supported_21_40", "PIDs supported [21 - 40]"),
    row(
        0x21,
        "Distance traveled with MIL on",
        Fixed(2),
        &[num("distance_with_mil_on", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "km")],
    ),
    row(
        0x22,
        "Fuel rail pressure (relative to manifold vacuum)",
        Fixed(2),
        &[num("fuel_rail_pressure", "((A*256)+B)*0.079", scaled(AB, 0.079, 1.0, 0.0), 0.0, 5177.265, "kPa")],
    ),
    row(
        0x23,
        "Fuel rail gauge pressure",
        Fixed(2),
        &[num("fuel_rail_gauge_pressure", "((A*256)+B)*10", scaled(AB, 10.0, 1.0, 0.0), 0.0, 655350.0, "kPa")],
    ),
    o2_wide_voltage!(0x24, "Oxygen sensor 1 (wide range, voltage)", "o2_sensor_1_equivalence_ratio", "o2_sensor_1_voltage"),
    o2_wide_voltage!(0x25, "Oxygen sensor 2 (wide range, voltage)", "o2_sensor_2_equivalence_ratio", "o2_sensor_2_voltage"),
    o2_wide_voltage!(0x26, "Oxygen sensor 3 (wide range, voltage)", "o2_sensor_3_equivalence_ratio", "o2_sensor_3_voltage"),
    o2_wide_voltage!(0x27, "Oxygen sensor 4 (wide range, voltage)", "o2_sensor_4_equivalence_ratio", "o2_sensor_4_voltage"),
    o2_wide_voltage!(0x28, "Oxygen sensor 5 (wide range, voltage)", "o2_sensor_5_equivalence_ratio", "o2_sensor_5_voltage"),
    o2_wide_voltage!(0x29, "Oxygen sensor 6 (wide range, voltage)", "o2_sensor_6_equivalence_ratio", "o2_sensor_6_voltage"),
    o2_wide_voltage!(0x2A, "Oxygen sensor 7 (wide range, voltage)", "o2_sensor_7_equivalence_ratio", "o2_sensor_7_voltage"),
    o2_wide_voltage!(0x2B, "Oxygen sensor 8 (wide range, voltage)", "o2_sensor_8_equivalence_ratio", "o2_sensor_8_voltage"),
    row(0x2C, "Commanded EGR", Fixed(1), &[percent("commanded_egr")]),
    row(0x2D, "EGR error", Fixed(1), &[trim("egr_error", A, "(A-128)*100/128")]),
    row(0x2E, "Commanded evaporative purge", Fixed(1), &[percent("commanded_evaporative_purge")]),
    row(0x2F, "Fuel tank level input", Fixed(1), &[percent("fuel_level")]),
    row(
        0x30,
        "Warm-ups since codes cleared",
        Fixed(1),
        &[num("warm_ups_since_codes_cleared", "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, "")],
    ),
    row(
        0x31,
        "Distance traveled since codes cleared",
        Fixed(2),
        &[num("distance_since_codes_cleared", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "km")],
    ),
    row(
        0x32,
        "Evap. system vapor pressure",
        Fixed(2),
        &[num("evap_vapor_pressure", "((A*256)+B)/4 signed", Formula::SignedWord { div: 4.0 }, -8192.0, 8191.75, "Pa")],
    ),
    row(
        0x33,
        "Absolute barometric pressure",
        Fixed(1),
        &[num("barometric_pressure", "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, "kPa")],
    ),
    o2_wide_current!(0x34, "Oxygen sensor 1 (wide range, current)", "o2_sensor_1_equivalence_ratio", "o2_sensor_1_current"),
    o2_wide_current!(0x35, "Oxygen sensor 2 (wide range, current)", "o2_sensor_2_equivalence_ratio", "o2_sensor_2_current"),
    o2_wide_current!(0x36, "Oxygen sensor 3 (wide range, current)", "o2_sensor_3_equivalence_ratio", "o2_sensor_3_current"),
    o2_wide_current!(0x37, "Oxygen sensor 4 (wide range, current)", "o2_sensor_4_equivalence_ratio", "o2_sensor_4_current"),
    o2_wide_current!(0x38, "Oxygen sensor 5 (wide range, current)", "o2_sensor_5_equivalence_ratio", "o2_sensor_5_current"),
    o2_wide_current!(0x39, "Oxygen sensor 6 (wide range, current)", "o2_sensor_6_equivalence_ratio", "o2_sensor_6_current"),
    o2_wide_current!(0x3A, "Oxygen sensor 7 (wide range, current)", "o2_sensor_7_equivalence_ratio", "o2_sensor_7_current"),
    o2_wide_current!(0x3B, "Oxygen sensor 8 (wide range, current)", "o2_sensor_8_equivalence_ratio", "o2_sensor_8_current"),
    catalyst!(0x3C, "Catalyst temperature: Bank 1, Sensor 1", "catalyst_temperature_bank_1_sensor_1"),
    catalyst!(0x3D, "Catalyst temperature: Bank 2, Sensor 1", "catalyst_temperature_bank_2_sensor_1"),
    catalyst!(0x3E, "Catalyst temperature: Bank 1, Sensor 2", "catalyst_temperature_bank_1_sensor_2"),
    catalyst!(0x3F, "Catalyst temperature: Bank 2, Sensor 2", "catalyst_temperature_bank_2_sensor_2"),
    bitmap!(0x40, "pids_supported_41_60", "PIDs supported [41 - 60]"),
    row(
        0x41,
        "Monitor status this drive cycle",
        Fixed(4),
        &[text("monitor_status_this_cycle", "bit encoded", Formula::MonitorStatus { drive_cycle: true })],
    ),
    row(
        0x42,
        "Control module voltage",
        Fixed(2),
        &[num("control_module_voltage", "((A*256)+B)/1000", scaled(AB, 1.0, 1000.0, 0.0), 0.0, 65.535, "V")],
    ),
    row(
        0x43,
        "Absolute load value",
        Fixed(2),
        &[num("absolute_load", "((A*256)+B)*100/255", scaled(AB, 100.0, 255.0, 0.0), 0.0, 25700.0, "%")],
    ),
    row(
        0x44,
        "Commanded equivalence ratio",
        Fixed(2),
        &[num("commanded_equivalence_ratio", "((A*256)+B)*2/65535", scaled(AB, 2.0, 65535.0, 0.0), 0.0, 2.0, "")],
    ),
    row(0x45, "Relative throttle position", Fixed(1), &[percent("relative_throttle_position")]),
    row(0x46, "Ambient air temperature", Fixed(1), &[temperature("ambient_air_temperature")]),
    row(0x47, "Absolute throttle position B", Fixed(1), &[percent("absolute_throttle_position_b")]),
    row(0x48, "Absolute throttle position C", Fixed(1), &[percent("absolute_throttle_position_c")]),
    row(0x49, "Accelerator pedal position D", Fixed(1), &[percent("accelerator_pedal_position_d")]),
    row(0x4A, "Accelerator pedal position E", Fixed(1), &[percent("accelerator_pedal_position_e")]),
    row(0x4B, "Accelerator pedal position F", Fixed(1), &[percent("accelerator_pedal_position_f")]),
    row(0x4C, "Commanded throttle actuator", Fixed(1), &[percent("commanded_throttle_actuator")]),
    row(
        0x4D,
        "Time run with MIL on",
        Fixed(2),
        &[num("time_with_mil_on", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "min")],
    ),
    row(
        0x4E,
        "Time since trouble codes cleared",
        Fixed(2),
        &[num("time_since_codes_cleared", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "min")],
    ),
    row(
        0x4F,
        "Maximum value for equivalence ratio, O2 voltage, O2 current and intake pressure",
        Fixed(4),
        &[
            num("max_equivalence_ratio", "A", scaled(A, 1.0, 1.0, 0.0), 0.0, 255.0, ""),
            num("max_o2_sensor_voltage", "B", scaled(B, 1.0, 1.0, 0.0), 0.0, 255.0, "V"),
            num("max_o2_sensor_current", "C", scaled(C, 1.0, 1.0, 0.0), 0.0, 255.0, "mA"),
            num("max_intake_manifold_pressure", "D*10", scaled(D, 10.0, 1.0, 0.0), 0.0, 2550.0, "kPa"),
        ],
    ),
    row(
        0x50,
        "Maximum value for MAF air flow rate",
        Fixed(4),
        &[num("max_maf_air_flow_rate", "A*10", scaled(A, 10.0, 1.0, 0.0), 0.0, 2550.0, "g/s")],
    ),
    row(0x51, "Fuel type", Fixed(1), &[raw("fuel_type", A)]),
    row(0x52, "Ethanol fuel %", Fixed(1), &[percent("ethanol_fuel")]),
    row(
        0x53,
        "Absolute evap system vapor pressure",
        Fixed(2),
        &[num("absolute_evap_vapor_pressure", "((A*256)+B)/200", scaled(AB, 1.0, 200.0, 0.0), 0.0, 327.675, "kPa")],
    ),
    row(
        0x54,
        "Evap system vapor pressure",
        Fixed(2),
        &[num("evap_system_vapor_pressure", "((A*256)+B)-32767", scaled(AB, 1.0, 1.0, -32767.0), -32767.0, 32768.0, "Pa")],
    ),
    secondary_trim!(0x55, "Short term secondary oxygen sensor trim bank 1 and bank 3", "short_term_secondary_o2_trim_bank_1", "short_term_secondary_o2_trim_bank_3"),
    secondary_trim!(0x56, "Long term secondary oxygen sensor trim bank 1 and bank 3", "long_term_secondary_o2_trim_bank_1", "long_term_secondary_o2_trim_bank_3"),
    secondary_trim!(0x57, "Short term secondary oxygen sensor trim bank 2 and bank 4", "short_term_secondary_o2_trim_bank_2", "short_term_secondary_o2_trim_bank_4"),
    secondary_trim!(0x58, "Long term secondary oxygen sensor trim bank 2 and bank 4", "long_term_secondary_o2_trim_bank_2", "long_term_secondary_o2_trim_bank_4"),
    row(
        0x59,
        "Fuel rail absolute pressure",
        Fixed(2),
        &[num("fuel_rail_absolute_pressure", "((A*256)+B)*10", scaled(AB, 10.0, 1.0, 0.0), 0.0, 655350.0, "kPa")],
    ),
    row(0x5A, "Relative accelerator pedal position", Fixed(1), &[percent("relative_accelerator_pedal_position")]),
    row(0x5B, "Hybrid battery pack remaining life", Fixed(1), &[percent("hybrid_battery_remaining_life")]),
    row(0x5C, "Engine oil temperature", Fixed(1), &[temperature("engine_oil_temperature")]),
    row(
        0x5D,
        "Fuel injection timing",
        Fixed(2),
        &[num("fuel_injection_timing", "(((A*256)+B)-26880)/128", scaled(AB, 1.0, 128.0, -210.0), -210.0, 301.992, "°")],
    ),
    row(
        0x5E,
        "Engine fuel rate",
        Fixed(2),
        &[num("engine_fuel_rate", "((A*256)+B)*0.05", scaled(AB, 1.0, 20.0, 0.0), 0.0, 3276.75, "L/h")],
    ),
    row(0x5F, "Emission requirements to which vehicle is designed", Fixed(1), &[raw("emission_requirements", A)]),
    bitmap!(0x60, "pids_supported_61_80", "PIDs supported [61 - 80]"),
    row(0x61, "Driver's demand engine - percent torque", Fixed(1), &[torque("driver_demand_torque", A, "A-125")]),
    row(0x62, "Actual engine - percent torque", Fixed(1), &[torque("actual_engine_torque", A, "A-125")]),
    row(
        0x63,
        "Engine reference torque",
        Fixed(2),
        &[num("engine_reference_torque", "(A*256)+B", scaled(AB, 1.0, 1.0, 0.0), 0.0, 65535.0, "Nm")],
    ),
    row(
        0x64,
        "Engine percent torque data",
        Fixed(5),
        &[
            torque("torque_idle", A, "A-125"),
            torque("torque_point_1", B, "B-125"),
            torque("torque_point_2", C, "C-125"),
            torque("torque_point_3", D, "D-125"),
            torque("torque_point_4", E, "E-125"),
        ],
    ),
    row(
        0x65,
        "Auxiliary input / output supported",
        Fixed(2),
        &[raw("auxiliary_io_supported", A), raw("auxiliary_io_status", B)],
    ),
];

static READ_DTC: PidMetadata = PidMetadata {
    mode: mode::READ_DTC,
    pid: 0x00,
    description: "Request trouble codes",
    length: Variable,
    items: &[text("trouble_codes", "DTC list", Formula::DtcList)],
    count_prefix: true,
};

static CLEAR_DTC: PidMetadata = PidMetadata {
    mode: mode::CLEAR_DTC,
    pid: 0x00,
    description: "Clear trouble codes / malfunction indicator lamp (MIL) / check engine light",
    length: Fixed(0),
    items: &[num("clear_trouble_codes", "ack", Formula::Acknowledge, 0.0, 0.0, "")],
    count_prefix: false,
};

static MODE9: &[PidMetadata] = &[
    info(
        0x00,
        "Mode 9 supported PIDs [01 - 20]",
        Fixed(4),
        &[text("mode_9_pids_supported", "bitmap", Formula::SupportedPids { base: 0x00 })],
        false,
    ),
    message_count!(0x01, "VIN message count", "vin_message_count"),
    info(0x02, "Vehicle Identification Number (VIN)", AtLeast(17), &[text("vin", "ASCII", Formula::Ascii)], true),
    message_count!(0x03, "Calibration ID message count", "calibration_id_message_count"),
    info(0x04, "Calibration ID", AtMost(16), &[text("calibration_id", "ASCII", Formula::Ascii)], true),
    message_count!(0x05, "Calibration verification numbers (CVN) message count", "cvn_message_count"),
    info(0x06, "Calibration Verification Numbers (CVN)", Fixed(4), &[text("cvn", "hex", Formula::Hex)], true),
    message_count!(0x07, "In-use performance tracking message count", "performance_tracking_message_count"),
    info(
        0x08,
        "In-use performance tracking",
        Variable,
        &[text("performance_tracking", "word list", Formula::WordList)],
        true,
    ),
    message_count!(0x09, "ECU name message count", "ecu_name_message_count"),
    info(0x0A, "ECU name", AtMost(20), &[text("ecu_name", "ASCII", Formula::Ascii)], true),
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tables_are_indexed_by_pid() {
        for (index, entry) in MODE1.iter().enumerate() {
            assert_eq!(entry.pid as usize, index, "mode 1 row {:02X}", index);
        }
        for (index, entry) in MODE9.iter().enumerate() {
            assert_eq!(entry.pid as usize, index, "mode 9 row {:02X}", index);
        }
        assert_eq!(MODE1.len(), 0x66);
        assert_eq!(MODE9.len(), 0x0B);
    }

    #[test]
    fn test_every_row_has_items_and_expressions() {
        for mode in [0x01, 0x03, 0x04, 0x09] {
            for entry in entries(mode) {
                assert!(!entry.items.is_empty(), "{:02X}{:02X}", mode, entry.pid);
                for item in entry.items {
                    assert!(!item.expression.is_empty());
                    assert!(!item.name.is_empty());
                }
            }
        }
    }

    #[test]
    fn test_lookup_rpm() {
        let rpm = lookup(0x01, 0x0C).unwrap();
        assert_eq!(rpm.length, ByteLength::Fixed(2));
        assert_eq!(rpm.items[0].unit, "rpm");
        assert_eq!(rpm.items[0].max, Some(16383.75));
    }

    #[test]
    fn test_freeze_frame_shares_mode_1_rows() {
        assert_eq!(lookup(0x02, 0x05).unwrap(), lookup(0x01, 0x05).unwrap());
    }

    #[test]
    fn test_unsupported_pids() {
        assert_eq!(
            lookup(0x01, 0x66),
            Err(ProtocolError::UnsupportedPid { mode: 0x01, pid: 0x66 })
        );
        assert!(lookup(0x09, 0x0B).is_err());
        assert!(lookup(0x05, 0x00).is_err());
        assert!(lookup(0x22, 0x00).is_err());
    }

    #[test]
    fn test_dtc_modes_ignore_pid() {
        assert_eq!(lookup(0x03, 0x42).unwrap().pid, 0x00);
        assert_eq!(lookup(0x04, 0x00).unwrap().length, ByteLength::Fixed(0));
        assert!(!mode_carries_pid(0x03));
        assert!(mode_carries_pid(0x09));
    }

    #[test]
    fn test_fuel_level_row() {
        let fuel = lookup(0x01, 0x2F).unwrap();
        assert_eq!(fuel.items[0].name, "fuel_level");
    }

    #[test]
    fn test_line_count_hint() {
        assert_eq!(lookup(0x01, 0x0D).unwrap().line_count_hint(), Some(1));
        assert_eq!(lookup(0x01, 0x00).unwrap().line_count_hint(), Some(2));
        assert_eq!(lookup(0x09, 0x02).unwrap().line_count_hint(), Some(5));
        assert_eq!(lookup(0x03, 0x00).unwrap().line_count_hint(), None);
        assert_eq!(lookup(0x04, 0x00).unwrap().line_count_hint(), None);
    }

    #[test]
    fn test_length_acceptance() {
        assert!(ByteLength::AtLeast(17).accepts(20));
        assert!(!ByteLength::AtLeast(17).accepts(16));
        assert!(ByteLength::AtMost(16).accepts(0));
        assert!(!ByteLength::Fixed(2).accepts(3));
        assert!(ByteLength::Variable.accepts(7));
    }
}
