//! Response block parsing
//!
//! The adapter answers every command with text terminated by a `>` prompt.
//! [`BlockBuffer`] cuts the incoming text into blocks and [`parse_block`]
//! turns one block into a response frame: status noise is discarded, lines
//! from other ECUs are filtered out and ISO-TP multi-frame payloads are
//! reassembled by sequence number.

use crate::catalog;
use crate::error::ProtocolError;
use crate::protocol::AdapterSettings;
use crate::query::QueryKey;
use tracing::{debug, warn};

/// Adapter status messages that never carry vehicle data
const STATUS_TOKENS: &[&str] = &[
    "NO DATA",
    "OK",
    "?",
    "SEARCHING...",
    "ELM327",
    "STOPPED",
    "UNABLE TO CONNECT",
    "CAN ERROR",
    "BUS INIT",
    "BUS BUSY",
    "BUFFER FULL",
    "DATA ERROR",
];

/// Negative response service identifier
const NEGATIVE_RESPONSE: u8 = 0x7F;

/// Most text kept while waiting for a prompt. The largest multi-frame
/// answer is well under this.
const MAX_PENDING_TEXT: usize = 4096;

/// Accumulates adapter text and yields complete prompt-terminated blocks
#[derive(Debug, Default)]
pub struct BlockBuffer {
    pending: String,
}

impl BlockBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append received text and return every block closed by a prompt.
    /// Blank blocks (a bare prompt) are returned too, so callers can count
    /// prompts.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.pending.push_str(text);
        let mut blocks = Vec::new();
        while let Some(end) = self.pending.find('>') {
            let block: String = self.pending.drain(..=end).collect();
            blocks.push(block[..block.len() - 1].to_string());
        }
        if self.pending.len() > MAX_PENDING_TEXT {
            warn!(
                "Discarding {} bytes received without a prompt",
                self.pending.len()
            );
            self.clear();
        }
        blocks
    }

    /// Text received since the last prompt
    pub fn pending(&self) -> &str {
        &self.pending
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// A validated positive response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Arbitration ID of the answering ECU, when headers are on
    pub ecu: Option<u16>,
    /// Request mode (response mode with bit 6 cleared)
    pub mode: u8,
    /// PID, 0x00 for modes without one
    pub pid: u8,
    /// Payload after mode, PID and any item-count byte
    pub data: Vec<u8>,
}

impl ResponseFrame {
    pub fn key(&self) -> QueryKey {
        QueryKey::new(self.mode, self.pid)
    }
}

/// Outcome of parsing one response block
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedBlock {
    /// Positive response ready to be matched with a pending query
    Response(ResponseFrame),
    /// Only status text, echo or blank lines
    Status(String),
    /// The ECU rejected the request (`7F` service code)
    Negative { mode: u8, code: u8 },
    /// Data lines that could not be made into a frame
    Malformed(ProtocolError),
}

/// One tokenized data line
#[derive(Debug, Clone, PartialEq, Eq)]
enum Line {
    /// Headers on: arbitration ID followed by PCI and data bytes
    Can { id: u16, bytes: Vec<u8> },
    /// Headers off, single frame
    Plain(Vec<u8>),
    /// Headers off, multi-frame segment `N: ...`
    Indexed { index: u8, bytes: Vec<u8> },
    /// Headers off, multi-frame total length `LLL`
    TotalLength(usize),
}

/// Parse one block of adapter text (without its prompt)
pub fn parse_block(block: &str, settings: &AdapterSettings) -> ParsedBlock {
    let mut raw_lines: Vec<&str> = block
        .split(['\r', '\n'])
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();

    if settings.echo && !raw_lines.is_empty() {
        raw_lines.remove(0);
    }

    let mut lines = Vec::new();
    let mut noise = Vec::new();
    for text in raw_lines {
        if is_status(text) {
            noise.push(text);
            continue;
        }
        match tokenize(text, settings) {
            Some(line) => lines.push(line),
            None => noise.push(text),
        }
    }

    if lines.is_empty() {
        return ParsedBlock::Status(noise.join(" "));
    }
    if !noise.is_empty() {
        debug!("Ignoring non-data lines: {:?}", noise);
    }

    let payload = if settings.headers {
        reassemble_can(lines)
    } else {
        reassemble_plain(lines)
    };

    match payload.and_then(interpret) {
        Ok(block) => block,
        Err(err) => ParsedBlock::Malformed(err),
    }
}

fn is_status(line: &str) -> bool {
    let upper = line.to_ascii_uppercase();
    STATUS_TOKENS.iter().any(|token| {
        if *token == "?" || *token == "OK" {
            upper == *token
        } else {
            upper.starts_with(token)
        }
    })
}

fn hex_byte(token: &str) -> Option<u8> {
    if token.len() == 2 {
        u8::from_str_radix(token, 16).ok()
    } else {
        None
    }
}

fn hex_pairs(digits: &str) -> Option<Vec<u8>> {
    if digits.len() % 2 != 0 || !digits.is_ascii() {
        return None;
    }
    (0..digits.len())
        .step_by(2)
        .map(|i| hex_byte(&digits[i..i + 2]))
        .collect()
}

fn hex_tokens(text: &str, spaces: bool) -> Option<Vec<u8>> {
    if spaces {
        text.split_whitespace().map(hex_byte).collect()
    } else {
        let digits: String = text.split_whitespace().collect();
        hex_pairs(&digits)
    }
}

fn tokenize(line: &str, settings: &AdapterSettings) -> Option<Line> {
    if settings.headers {
        let (id, rest) = if settings.spaces {
            let (id, rest) = line.split_once(char::is_whitespace)?;
            (id, rest.trim())
        } else {
            if line.len() < 3 || !line.is_ascii() {
                return None;
            }
            line.split_at(3)
        };
        if id.len() != 3 {
            return None;
        }
        let id = u16::from_str_radix(id, 16).ok()?;
        let bytes = hex_tokens(rest, settings.spaces)?;
        if bytes.is_empty() {
            return None;
        }
        return Some(Line::Can { id, bytes });
    }

    if let Some((index, rest)) = line.split_once(':') {
        let index = u8::from_str_radix(index.trim(), 16).ok()?;
        let bytes = hex_tokens(rest.trim(), settings.spaces)?;
        return Some(Line::Indexed { index, bytes });
    }

    let compact: String = line.split_whitespace().collect();
    if compact.len() == 3 {
        return usize::from_str_radix(&compact, 16).ok().map(Line::TotalLength);
    }
    hex_tokens(line, settings.spaces)
        .filter(|bytes| !bytes.is_empty())
        .map(Line::Plain)
}

/// Response payload starting at the mode byte
struct Payload {
    ecu: Option<u16>,
    bytes: Vec<u8>,
}

fn reassemble_can(lines: Vec<Line>) -> Result<Payload, ProtocolError> {
    let frames: Vec<(u16, Vec<u8>)> = lines
        .into_iter()
        .filter_map(|line| match line {
            Line::Can { id, bytes } => Some((id, bytes)),
            _ => None,
        })
        .collect();

    let ecu = match frames.first() {
        Some((id, _)) => *id,
        None => return Err(ProtocolError::MalformedFrame("no CAN frames in response".to_string())),
    };
    let frames: Vec<Vec<u8>> = frames
        .into_iter()
        .filter(|(id, _)| *id == ecu)
        .map(|(_, bytes)| bytes)
        .collect();

    let bytes = match frames.iter().position(|f| f[0] >> 4 == 0x1) {
        Some(first) => reassemble_iso_tp(&frames, first)?,
        None => single_frame(&frames[0])?,
    };
    Ok(Payload { ecu: Some(ecu), bytes })
}

fn single_frame(frame: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let pci = frame[0];
    if pci >> 4 != 0x0 {
        return Err(ProtocolError::MalformedFrame(format!(
            "unexpected frame type {:02X}",
            pci
        )));
    }
    let len = usize::from(pci & 0x0F);
    if len == 0 || frame.len() < 1 + len {
        return Err(ProtocolError::MalformedFrame(format!(
            "single frame declares {} bytes but carries {}",
            len,
            frame.len() - 1
        )));
    }
    Ok(frame[1..=len].to_vec())
}

fn reassemble_iso_tp(frames: &[Vec<u8>], first: usize) -> Result<Vec<u8>, ProtocolError> {
    let head = &frames[first];
    if head.len() < 2 {
        return Err(ProtocolError::MalformedFrame("truncated first frame".to_string()));
    }
    let total = (usize::from(head[0] & 0x0F) << 8) | usize::from(head[1]);
    let mut payload = head[2..].to_vec();
    let mut used = vec![false; frames.len()];
    used[first] = true;

    let mut sequence: u8 = 1;
    while payload.len() < total {
        let expected = 0x20 | (sequence & 0x0F);
        let next = frames
            .iter()
            .enumerate()
            .position(|(i, frame)| !used[i] && frame[0] == expected);
        match next {
            Some(i) => {
                used[i] = true;
                payload.extend_from_slice(&frames[i][1..]);
            }
            None => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "missing consecutive frame {:02X} ({} of {} bytes)",
                    expected,
                    payload.len(),
                    total
                )))
            }
        }
        sequence = sequence.wrapping_add(1);
    }

    payload.truncate(total);
    Ok(payload)
}

fn reassemble_plain(lines: Vec<Line>) -> Result<Payload, ProtocolError> {
    let mut total = None;
    let mut segments = Vec::new();
    let mut singles = Vec::new();
    for line in lines {
        match line {
            Line::TotalLength(len) => total = Some(len),
            Line::Indexed { index, bytes } => segments.push((index, bytes)),
            Line::Plain(bytes) => singles.push(bytes),
            Line::Can { .. } => {}
        }
    }

    if segments.is_empty() {
        if singles.len() > 1 {
            debug!("{} single-frame responses without headers, using the first", singles.len());
        }
        return singles
            .into_iter()
            .next()
            .map(|bytes| Payload { ecu: None, bytes })
            .ok_or_else(|| ProtocolError::MalformedFrame("no data lines in response".to_string()));
    }

    let total = total.unwrap_or_else(|| segments.iter().map(|(_, bytes)| bytes.len()).sum());
    let mut payload = Vec::with_capacity(total);
    let mut used = vec![false; segments.len()];
    let mut index: u8 = 0;
    while payload.len() < total {
        let next = segments
            .iter()
            .enumerate()
            .position(|(i, (n, _))| !used[i] && *n == index & 0x0F);
        match next {
            Some(i) => {
                used[i] = true;
                payload.extend_from_slice(&segments[i].1);
            }
            None => {
                return Err(ProtocolError::MalformedFrame(format!(
                    "missing segment {:X} ({} of {} bytes)",
                    index & 0x0F,
                    payload.len(),
                    total
                )))
            }
        }
        index = index.wrapping_add(1);
    }
    payload.truncate(total);
    Ok(Payload { ecu: None, bytes: payload })
}

/// Recover mode and PID, strip the item-count byte and check the length
fn interpret(payload: Payload) -> Result<ParsedBlock, ProtocolError> {
    let bytes = payload.bytes;
    let service = *bytes
        .first()
        .ok_or_else(|| ProtocolError::MalformedFrame("empty payload".to_string()))?;

    if service == NEGATIVE_RESPONSE {
        let mode = bytes.get(1).copied().unwrap_or(0);
        let code = bytes.get(2).copied().unwrap_or(0);
        warn!("ECU rejected mode {:02X} with code {:02X}", mode, code);
        return Ok(ParsedBlock::Negative { mode, code });
    }
    if service & 0xC0 != 0x40 {
        return Err(ProtocolError::MalformedFrame(format!(
            "invalid response mode {:02X}",
            service
        )));
    }

    let mode = service & 0x3F;
    let (pid, mut data) = if catalog::mode_carries_pid(mode) {
        let pid = *bytes
            .get(1)
            .ok_or_else(|| ProtocolError::MalformedFrame(format!("mode {:02X} response without PID", mode)))?;
        (pid, bytes[2..].to_vec())
    } else {
        (0x00, bytes[1..].to_vec())
    };

    if let Ok(metadata) = catalog::lookup(mode, pid) {
        if metadata.count_prefix && !data.is_empty() {
            data.remove(0);
        }
        if !metadata.length.accepts(data.len()) {
            return Err(ProtocolError::MalformedFrame(format!(
                "{:02X}{:02X} payload of {} bytes, expected {}",
                mode,
                pid,
                data.len(),
                metadata.length
            )));
        }
    }

    Ok(ParsedBlock::Response(ResponseFrame {
        ecu: payload.ecu,
        mode,
        pid,
        data,
    }))
}
