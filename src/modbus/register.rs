// src/modbus/register.rs
//
// Modbus register descriptors and their big-endian decoding. Ported from
// the Go original's pkg/mdev/registers.go, generalised from package-level
// constants into an `Encoding` enum and from `interface{}` return values
// into the tagged `Value` the Design Notes call for.

use std::sync::RwLock;

use serde::Serialize;

/// A decoded register value, uniformly serialisable regardless of which
/// arm of `Encoding` produced it. Replaces the Go original's untyped
/// `interface{}` return from `getValue()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
}

/// Register encoding. `register_count`/`byte_count` are derived, not
/// stored, so they can never drift from the encoding that produced them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Bool,
    S16,
    U16,
    S32,
    U32,
    Ieee32,
}

impl Encoding {
    pub fn parse(s: &str) -> Option<Encoding> {
        match s {
            "bool" => Some(Encoding::Bool),
            "s16" => Some(Encoding::S16),
            "u16" => Some(Encoding::U16),
            "s32" => Some(Encoding::S32),
            "u32" => Some(Encoding::U32),
            "ieee32" => Some(Encoding::Ieee32),
            _ => None,
        }
    }

    /// Number of 16-bit Modbus registers this encoding occupies.
    pub fn register_count(self) -> u16 {
        match self {
            Encoding::S32 | Encoding::U32 | Encoding::Ieee32 => 2,
            _ => 1,
        }
    }
}

/// Register kind determines the Modbus function code used to read it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RegisterKind {
    Holding,
    Input,
    Coil,
}

/// A single Modbus register descriptor. `raw` holds the most recently read
/// bytes for this register; it is written by exactly one worker (the
/// device's poll loop) and read by the HTTP endpoint, matching the single-
/// writer cache invariant in spec.md §5.
pub struct ModbusRegister {
    pub description: String,
    pub tag: String,
    pub register: u16,
    pub encoding: Encoding,
    pub scale: u16,
    pub offset: i32,
    pub kind: RegisterKind,
    raw: RwLock<Option<Vec<u8>>>,
}

impl ModbusRegister {
    pub fn new(
        description: impl Into<String>,
        tag: impl Into<String>,
        register: u16,
        encoding: Encoding,
        scale: u16,
        offset: i32,
        kind: RegisterKind,
    ) -> Self {
        ModbusRegister {
            description: description.into(),
            tag: tag.into(),
            register,
            encoding,
            scale,
            offset,
            kind,
            raw: RwLock::new(None),
        }
    }

    /// Number of 16-bit registers this descriptor spans.
    pub fn register_count(&self) -> u16 {
        self.encoding.register_count()
    }

    /// Number of raw bytes this descriptor consumes from a call's response.
    pub fn byte_count(&self) -> usize {
        match (self.encoding, self.kind) {
            (Encoding::Bool, RegisterKind::Coil) => 1,
            (Encoding::Bool, _) => 2,
            _ => self.register_count() as usize * 2,
        }
    }

    /// Exclusive end register, i.e. `register + register_count()`.
    pub fn end_register(&self) -> u16 {
        self.register + self.register_count()
    }

    /// Replace the live byte buffer for this register (called by the
    /// planner while distributing a call's response).
    pub fn store_raw(&self, bytes: Vec<u8>) {
        let mut guard = self.raw.write().unwrap();
        *guard = Some(bytes);
    }

    /// Decode the most recently stored bytes, or `None` if nothing has
    /// been read yet.
    pub fn value(&self) -> Option<Value> {
        let guard = self.raw.read().unwrap();
        guard.as_ref().map(|bytes| decode(self.encoding, self.kind, self.scale, self.offset, bytes))
    }
}

/// Decode raw big-endian Modbus bytes per spec.md §4.1.
///
/// The `offset` semantics are applied pre-division by `factor * 10`
/// exactly as observed in the Go original — this is the Design Note's
/// open question, preserved rather than "fixed".
fn decode(encoding: Encoding, kind: RegisterKind, scale: u16, offset: i32, raw: &[u8]) -> Value {
    match encoding {
        Encoding::Bool => {
            let bit = if kind == RegisterKind::Coil {
                raw[0] == 1
            } else {
                raw[1] == 1
            };
            Value::Bool(bit)
        }
        Encoding::S16 => {
            let mut v = i32::from(i16::from_be_bytes([raw[0], raw[1]]));
            if offset != 0 {
                v += offset * (scale as i32 * 10);
            }
            if scale != 0 {
                Value::Float(v as f64 / (scale as f64 * 10.0))
            } else {
                Value::Int(v as i64)
            }
        }
        Encoding::U16 => {
            let mut v = u32::from(u16::from_be_bytes([raw[0], raw[1]]));
            if offset != 0 {
                v = v.wrapping_add((offset * (scale as i32 * 10)) as u32);
            }
            if scale != 0 {
                Value::Float(v as f64 / (scale as f64 * 10.0))
            } else {
                Value::UInt(v as u64)
            }
        }
        Encoding::S32 => {
            let mut v = i32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if offset != 0 {
                v += offset * (scale as i32 * 10);
            }
            if scale != 0 {
                Value::Float(v as f64 / (scale as f64 * 10.0))
            } else {
                Value::Int(v as i64)
            }
        }
        Encoding::U32 => {
            let mut v = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            if offset != 0 {
                v = v.wrapping_add((offset * (scale as i32 * 10)) as u32);
            }
            if scale != 0 {
                Value::Float(v as f64 / (scale as f64 * 10.0))
            } else {
                Value::UInt(v as u64)
            }
        }
        Encoding::Ieee32 => {
            let u = u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let sign = u >> 31;
            let exp = (u >> 23 & 0xff) as f64 - 0x7f as f64;
            let rem = (u & 0x7f_ffff) as u64;
            let denom: u64 = if exp != 0.0 { 0x80_0000 } else { 0x40_0000 };
            let mantissa = rem as f64 / denom as f64 + 1.0;
            let magnitude = mantissa * 2f64.powf(exp);
            Value::Float(if sign == 0 { magnitude } else { -magnitude })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ieee754_decode_matches_pi() {
        let raw = [0x40, 0x49, 0x0F, 0xDB];
        let v = decode(Encoding::Ieee32, RegisterKind::Holding, 0, 0, &raw);
        match v {
            Value::Float(f) => assert!((f - std::f64::consts::PI).abs() < 1e-5),
            other => panic!("expected float, got {:?}", other),
        }
    }

    #[test]
    fn u16_with_factor_divides_by_factor_times_ten() {
        let raw = [0x00, 0x64]; // 100
        let v = decode(Encoding::U16, RegisterKind::Holding, 5, 0, &raw);
        assert_eq!(v, Value::Float(100.0 / 50.0));
    }

    #[test]
    fn u16_without_factor_returns_integer() {
        let raw = [0x00, 0x0A];
        let v = decode(Encoding::U16, RegisterKind::Holding, 0, 0, &raw);
        assert_eq!(v, Value::UInt(10));
    }

    #[test]
    fn bool_on_coil_reads_first_byte() {
        assert_eq!(decode(Encoding::Bool, RegisterKind::Coil, 0, 0, &[1]), Value::Bool(true));
        assert_eq!(decode(Encoding::Bool, RegisterKind::Coil, 0, 0, &[0]), Value::Bool(false));
    }

    #[test]
    fn bool_on_holding_reads_second_byte() {
        assert_eq!(decode(Encoding::Bool, RegisterKind::Holding, 0, 0, &[0, 1]), Value::Bool(true));
    }

    #[test]
    fn register_counts_match_encoding_width() {
        let r32 = ModbusRegister::new("x", "x", 0, Encoding::U32, 0, 0, RegisterKind::Holding);
        assert_eq!(r32.register_count(), 2);
        assert_eq!(r32.end_register(), 2);
        assert_eq!(r32.byte_count(), 4);

        let r16 = ModbusRegister::new("y", "y", 5, Encoding::U16, 0, 0, RegisterKind::Holding);
        assert_eq!(r16.register_count(), 1);
        assert_eq!(r16.end_register(), 6);
        assert_eq!(r16.byte_count(), 2);
    }
}
