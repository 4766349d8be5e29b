//! RSP packet framing
//!
//! A packet travels as `$<payload>#<checksum>`. The bytes `$`, `#` and `}`
//! inside the payload are escaped as `}` followed by the byte XOR 0x20. The
//! checksum is the mod-256 sum of the escaped payload bytes, written as two
//! uppercase hex digits.

/// Start of a packet
pub const START: u8 = b'$';
/// End of payload, followed by the checksum
pub const END: u8 = b'#';
/// Escape prefix
pub const ESCAPE: u8 = b'}';
/// Positive acknowledgement
pub const ACK: u8 = b'+';
/// Negative acknowledgement, asks the peer to resend
pub const NAK: u8 = b'-';

fn needs_escape(byte: u8) -> bool {
    matches!(byte, START | END | ESCAPE)
}

/// Escape a payload for transmission
pub fn escape(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 8);
    for &byte in payload {
        if needs_escape(byte) {
            out.push(ESCAPE);
            out.push(byte ^ 0x20);
        } else {
            out.push(byte);
        }
    }
    out
}

/// Mod-256 sum of `bytes`
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Build the wire form of a packet
pub fn frame(payload: &[u8]) -> Vec<u8> {
    let body = escape(payload);
    let mut out = Vec::with_capacity(body.len() + 4);
    out.push(START);
    out.extend_from_slice(&body);
    out.push(END);
    out.extend_from_slice(format!("{:02X}", checksum(&body)).as_bytes());
    out
}

/// Decode the first complete packet in `bytes`
///
/// Returns `None` if no valid packet is found.
pub fn deframe(bytes: &[u8]) -> Option<Vec<u8>> {
    let mut deframer = Deframer::new();
    bytes.iter().find_map(|&b| match deframer.push(b) {
        Some(Decoded::Packet(payload)) => Some(payload),
        _ => None,
    })
}

/// Result of feeding a byte that completed a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A frame with a valid checksum, unescaped
    Packet(Vec<u8>),
    /// A frame whose checksum did not match
    BadChecksum,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Body,
    Escape,
    Checksum1,
    Checksum2(u8),
}

/// Streaming packet decoder
///
/// Bytes outside a frame (acks, line noise) are ignored. A `$` always starts
/// a new frame, discarding anything accumulated so far.
#[derive(Debug, Clone)]
pub struct Deframer {
    state: State,
    payload: Vec<u8>,
    sum: u8,
}

impl Default for Deframer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deframer {
    /// Create an idle decoder
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            payload: Vec::new(),
            sum: 0,
        }
    }

    /// Whether a frame is partially accumulated
    pub fn in_frame(&self) -> bool {
        self.state != State::Idle
    }

    /// Feed one byte
    pub fn push(&mut self, byte: u8) -> Option<Decoded> {
        if byte == START {
            self.payload.clear();
            self.sum = 0;
            self.state = State::Body;
            return None;
        }

        match self.state {
            State::Idle => None,
            State::Body => {
                if byte == END {
                    self.state = State::Checksum1;
                    return None;
                }
                self.sum = self.sum.wrapping_add(byte);
                if byte == ESCAPE {
                    self.state = State::Escape;
                } else {
                    self.payload.push(byte);
                }
                None
            }
            State::Escape => {
                self.sum = self.sum.wrapping_add(byte);
                self.payload.push(byte ^ 0x20);
                self.state = State::Body;
                None
            }
            State::Checksum1 => match hex_value(byte) {
                Some(high) => {
                    self.state = State::Checksum2(high);
                    None
                }
                None => self.finish(None),
            },
            State::Checksum2(high) => {
                let received = hex_value(byte).map(|low| (high << 4) | low);
                self.finish(received)
            }
        }
    }

    fn finish(&mut self, received: Option<u8>) -> Option<Decoded> {
        self.state = State::Idle;
        let payload = std::mem::take(&mut self.payload);
        if received == Some(self.sum) {
            Some(Decoded::Packet(payload))
        } else {
            Some(Decoded::BadChecksum)
        }
    }
}

fn hex_value(byte: u8) -> Option<u8> {
    char::from(byte).to_digit(16).map(|d| d as u8)
}

/// Render a payload for log output
pub(crate) fn printable(payload: &[u8]) -> String {
    const MAX: usize = 80;
    let shown = &payload[..payload.len().min(MAX)];
    let mut out = String::from_utf8_lossy(shown).escape_debug().to_string();
    if payload.len() > MAX {
        out.push_str(&format!("... ({} bytes)", payload.len()));
    }
    out
}
