//! ELM327 adapter settings and initialization sequence

use serde::{Deserialize, Serialize};

/// Bus protocol the adapter is told to use, numbered as in `ATSPn`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObdProtocol {
    /// Let the adapter search (`ATSP0`)
    #[default]
    #[serde(rename = "auto")]
    Auto,
    #[serde(rename = "j1850_pwm")]
    SaeJ1850Pwm,
    #[serde(rename = "j1850_vpw")]
    SaeJ1850Vpw,
    #[serde(rename = "iso9141")]
    Iso9141,
    /// ISO 14230-4 with 5 baud init
    #[serde(rename = "kwp_slow")]
    KwpSlowInit,
    /// ISO 14230-4 with fast init
    #[serde(rename = "kwp_fast")]
    KwpFastInit,
    /// ISO 15765-4, 11 bit identifiers at 500 kbit/s
    #[serde(rename = "can_11bit_500k")]
    Can11Bit500k,
    #[serde(rename = "can_29bit_500k")]
    Can29Bit500k,
    #[serde(rename = "can_11bit_250k")]
    Can11Bit250k,
    #[serde(rename = "can_29bit_250k")]
    Can29Bit250k,
}

impl ObdProtocol {
    /// Protocol number understood by `ATSP`
    pub fn number(&self) -> u8 {
        match self {
            ObdProtocol::Auto => 0,
            ObdProtocol::SaeJ1850Pwm => 1,
            ObdProtocol::SaeJ1850Vpw => 2,
            ObdProtocol::Iso9141 => 3,
            ObdProtocol::KwpSlowInit => 4,
            ObdProtocol::KwpFastInit => 5,
            ObdProtocol::Can11Bit500k => 6,
            ObdProtocol::Can29Bit500k => 7,
            ObdProtocol::Can11Bit250k => 8,
            ObdProtocol::Can29Bit250k => 9,
        }
    }

    pub fn select_command(&self) -> String {
        format!("ATSP{}", self.number())
    }

    pub fn uses_can(&self) -> bool {
        self.number() >= 6
    }

    /// Serial speed adapters usually ship with for this bus
    pub fn default_baud_rate(&self) -> u32 {
        if self.uses_can() {
            115_200
        } else {
            38_400
        }
    }
}

/// Adapter formatting flags applied by the initialization sequence.
///
/// The same flags drive response parsing, so they must describe what the
/// adapter was actually told to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterSettings {
    /// Line feeds after carriage returns (`ATL1`, default: off)
    pub linefeeds: bool,
    /// Spaces between hex bytes (`ATS1`, default: on)
    pub spaces: bool,
    /// CAN headers shown (`ATH1`, default: on)
    pub headers: bool,
    /// Command echo (`ATE1`, default: off)
    pub echo: bool,
    /// Bus protocol selection (default: auto)
    pub protocol: ObdProtocol,
    /// Append the expected response line count to query commands (default: on)
    pub line_count_hint: bool,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            linefeeds: false,
            spaces: true,
            headers: true,
            echo: false,
            protocol: ObdProtocol::Auto,
            line_count_hint: true,
        }
    }
}

impl AdapterSettings {
    /// Commands written once at startup, in order, each terminated by `\r`
    /// when transmitted. The leading and trailing empty commands wake the
    /// adapter and flush any partial input.
    pub fn init_commands(&self) -> Vec<String> {
        vec![
            String::new(),
            "ATZ".to_string(),
            toggle("ATL", self.linefeeds),
            toggle("ATS", self.spaces),
            toggle("ATH", self.headers),
            toggle("ATE", self.echo),
            "ATAT2".to_string(),
            self.protocol.select_command(),
            String::new(),
        ]
    }
}

fn toggle(prefix: &str, on: bool) -> String {
    format!("{}{}", prefix, if on { '1' } else { '0' })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_init_sequence() {
        let commands = AdapterSettings::default().init_commands();
        assert_eq!(
            commands,
            vec!["", "ATZ", "ATL0", "ATS1", "ATH1", "ATE0", "ATAT2", "ATSP0", ""]
        );
    }

    #[test]
    fn test_init_sequence_follows_flags() {
        let settings = AdapterSettings {
            linefeeds: true,
            spaces: false,
            headers: false,
            echo: true,
            protocol: ObdProtocol::Can11Bit500k,
            line_count_hint: false,
        };
        let commands = settings.init_commands();
        assert_eq!(&commands[2..8], ["ATL1", "ATS0", "ATH0", "ATE1", "ATAT2", "ATSP6"]);
    }

    #[test]
    fn test_can_protocols() {
        assert!(ObdProtocol::Can29Bit250k.uses_can());
        assert!(!ObdProtocol::KwpFastInit.uses_can());
        assert!(!ObdProtocol::Auto.uses_can());
        assert_eq!(ObdProtocol::Can11Bit500k.default_baud_rate(), 115_200);
        assert_eq!(ObdProtocol::SaeJ1850Pwm.default_baud_rate(), 38_400);
    }

    #[test]
    fn test_protocol_names() {
        let protocol: ObdProtocol = serde_json::from_str("\"can_11bit_500k\"").unwrap();
        assert_eq!(protocol, ObdProtocol::Can11Bit500k);
        assert_eq!(protocol.select_command(), "ATSP6");
    }
}
