//! Fixed-width ASCII framing for the controller link.
//!
//! The Kawasaki firmware exchanges frames of exactly nine decimal integers.
//! Each field is rendered sign-aware and zero-padded to a fixed width, fields
//! are joined by single spaces and the frame ends with a trailing space; there
//! is no other delimiter, length prefix or checksum. The decoder therefore
//! counts fields: after nine parsed integers the frame is complete and the
//! field index wraps to zero. A corrupted stream can permanently shift the
//! field boundaries; this matches the firmware's own behavior and is not
//! recoverable on this side.

use tracing::warn;

/// Number of integer fields in one protocol frame.
pub const FRAME_LEN: usize = 9;

/// Field width on the controller wire.
pub const WIRE_FIELD_WIDTH: usize = 6;

/// Field width used by the plain-text tick log.
pub const LOG_FIELD_WIDTH: usize = 5;

/// One protocol frame: `[reserved, opcode, speed-or-subcode, p1..p6]`.
pub type CommandFrame = [i32; FRAME_LEN];

/// Renders one field the way the firmware expects it: the sign (if any) takes
/// one character of the width, the magnitude is zero-padded on the left, and a
/// magnitude wider than the field keeps its *first* `width` digits. The
/// truncation is a string slice, not a modulo; the firmware relies on it.
pub fn encode_field(value: i32, width: usize) -> String {
    let mut digits_width = width;
    let sign = if value < 0 {
        digits_width -= 1;
        "-"
    } else {
        ""
    };
    let digits = value.unsigned_abs().to_string();
    if digits.len() < digits_width {
        format!("{}{}{}", sign, "0".repeat(digits_width - digits.len()), digits)
    } else if digits.len() > digits_width {
        format!("{}{}", sign, &digits[..digits_width])
    } else {
        format!("{}{}", sign, digits)
    }
}

/// Renders a complete frame at wire width, trailing space included.
pub fn encode_frame(frame: &CommandFrame) -> String {
    let mut out = String::with_capacity(FRAME_LEN * (WIRE_FIELD_WIDTH + 2));
    for value in frame {
        out.push_str(&encode_field(*value, WIRE_FIELD_WIDTH));
        out.push(' ');
    }
    out
}

/// Incremental frame parser over an unbounded byte stream.
///
/// Bytes are consumed one at a time; `' '` is the sole separator. A separator
/// seen before any payload byte is skipped (the peer may open with a space).
/// A field that does not parse as an integer drops the partial frame: the
/// field index resets and decoding resumes with whatever follows the
/// separator.
pub struct FrameDecoder {
    fields: CommandFrame,
    pos: usize,
    token: String,
    prev_space: bool,
    seen_payload: bool,
}

impl FrameDecoder {
    pub fn new() -> Self {
        FrameDecoder {
            fields: [0; FRAME_LEN],
            pos: 0,
            token: String::new(),
            prev_space: false,
            seen_payload: false,
        }
    }

    /// Consumes one byte; returns a frame when this byte completed one.
    pub fn push(&mut self, byte: u8) -> Option<CommandFrame> {
        if byte == b' ' {
            let mut completed = None;
            if !self.prev_space && self.seen_payload {
                match self.token.parse::<i32>() {
                    Ok(value) => {
                        self.fields[self.pos] = value;
                        self.pos += 1;
                        if self.pos >= FRAME_LEN {
                            self.pos = 0;
                            completed = Some(self.fields);
                        }
                    }
                    Err(_) => {
                        warn!(token = %self.token, "dropping malformed frame field");
                        self.pos = 0;
                    }
                }
                self.token.clear();
            }
            self.prev_space = true;
            completed
        } else {
            self.token.push(byte as char);
            self.prev_space = false;
            self.seen_payload = true;
            None
        }
    }

    /// Feeds a whole buffer, collecting every frame completed by it.
    pub fn feed(&mut self, bytes: &[u8], out: &mut Vec<CommandFrame>) {
        for byte in bytes {
            if let Some(frame) = self.push(*byte) {
                out.push(frame);
            }
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}
