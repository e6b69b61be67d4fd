// src/can/frame.rs
//
// 29-bit extended CAN frame representation, classification, and the
// candump-style textual form used for capture files and file-replay.
// Classification matches message.go's `MessageFromFrame`; the textual
// form matches the `can.Frame.String()`/`UnmarshalString()` round trip
// the Go original relies on for its capture files, rendered the way the
// teacher's SocketCAN driver (io/socketcan/reader.rs) masks and reports
// extended 29-bit identifiers.

use std::fmt;
use std::str::FromStr;

/// Which worker queue a received frame is routed to, per spec.md §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameClass {
    Pdo,
    Rmi,
    Heartbeat,
    Unknown(u8),
}

/// A 29-bit extended CAN frame: identifier, up to 8 data bytes, length,
/// and the remote-request flag (spec.md §3 `CanFrame`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
    pub is_remote: bool,
}

impl CanFrame {
    pub fn new(id: u32, data: &[u8], is_remote: bool) -> Self {
        let mut buf = [0u8; 8];
        let n = data.len().min(8);
        buf[..n].copy_from_slice(&data[..n]);
        CanFrame { id: id & 0x1FFF_FFFF, data: buf, len: n as u8, is_remote }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// Classify by the top byte of the 29-bit identifier (spec.md §3/§4.3):
    /// `id >> 24 == 0` is PDO, `== 0x1F` is RMI, `== 0x10` is heartbeat,
    /// anything else is logged and dropped by the caller.
    pub fn class(&self) -> FrameClass {
        match self.id >> 24 {
            0x00 => FrameClass::Pdo,
            0x1F => FrameClass::Rmi,
            0x10 => FrameClass::Heartbeat,
            other => FrameClass::Unknown(other as u8),
        }
    }
}

impl fmt::Display for CanFrame {
    /// `<id>#<hexdata>`, with a trailing `R` marker for remote frames —
    /// a minimal candump-compatible rendering, sufficient to round-trip
    /// through `FromStr` for capture/replay.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08X}#", self.id)?;
        if self.is_remote {
            write!(f, "R")?;
        } else {
            for b in self.payload() {
                write!(f, "{:02X}", b)?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FrameParseError(String);

impl fmt::Display for FrameParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed captured frame: {}", self.0)
    }
}

impl std::error::Error for FrameParseError {}

impl FromStr for CanFrame {
    type Err = FrameParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (id_part, data_part) = line
            .split_once('#')
            .ok_or_else(|| FrameParseError(format!("missing '#' in '{}'", line)))?;
        let id = u32::from_str_radix(id_part, 16)
            .map_err(|e| FrameParseError(format!("bad id '{}': {}", id_part, e)))?;

        if data_part.eq_ignore_ascii_case("r") {
            return Ok(CanFrame::new(id, &[], true));
        }
        if data_part.len() % 2 != 0 {
            return Err(FrameParseError(format!("odd-length data '{}'", data_part)));
        }
        let mut data = Vec::with_capacity(data_part.len() / 2);
        for i in (0..data_part.len()).step_by(2) {
            let byte = u8::from_str_radix(&data_part[i..i + 2], 16)
                .map_err(|e| FrameParseError(format!("bad byte '{}': {}", &data_part[i..i + 2], e)))?;
            data.push(byte);
        }
        if data.len() > 8 {
            return Err(FrameParseError(format!("{} data bytes exceeds 8", data.len())));
        }
        Ok(CanFrame::new(id, &data, false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_pdo_rmi_heartbeat_and_unknown() {
        assert_eq!(CanFrame::new(0x0010C2C1, &[], false).class(), FrameClass::Pdo);
        assert_eq!(CanFrame::new(0x1F040000, &[], false).class(), FrameClass::Rmi);
        assert_eq!(CanFrame::new(0x10000022, &[], false).class(), FrameClass::Heartbeat);
        assert_eq!(CanFrame::new(0x0A000000, &[], false).class(), FrameClass::Unknown(0x0A));
    }

    #[test]
    fn round_trips_through_display_and_from_str() {
        let frame = CanFrame::new(0x104041, &[0x05], false);
        let text = frame.to_string();
        let parsed: CanFrame = text.parse().unwrap();
        assert_eq!(parsed, frame);
    }

    #[test]
    fn round_trips_remote_frames() {
        let frame = CanFrame::new(0x104041, &[], true);
        let text = frame.to_string();
        let parsed: CanFrame = text.parse().unwrap();
        assert_eq!(parsed.is_remote, true);
        assert_eq!(parsed.id, 0x104041);
    }
}
