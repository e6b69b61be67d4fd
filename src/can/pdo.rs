// src/can/pdo.rs
//
// PDO sensor catalog and little-endian decoder. Ported from
// pkg/zcan/pdo.go's `sensorData` map and `PDOValue.GetData()`.

use std::collections::HashMap;
use std::sync::RwLock;

use once_cell::sync::Lazy;
use serde_json::Value as JsonValue;

use super::frame::CanFrame;

pub const UNIT_WATT: &str = "W";
pub const UNIT_KWH: &str = "kWh";
pub const UNIT_CELSIUS: &str = "\u{b0}C";
pub const UNIT_PERCENT: &str = "%";
pub const UNIT_RPM: &str = "rpm";
pub const UNIT_M3H: &str = "m\u{b3}/h";
pub const UNIT_SECONDS: &str = "seconds";
pub const UNIT_UNKNOWN: &str = "unknown";
pub const UNIT_DAYS: &str = "Days";

/// PDO payload encoding. Named to match the Go original's `ZehnderType`
/// constants (`CN_*`) since those names already describe exactly what
/// they do and appear verbatim in spec.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZehnderType {
    Bool,
    Uint8,
    Uint16,
    Uint32,
    Int8,
    Int16,
    Int64,
    String,
    Time,
    Version,
}

/// Static catalog entry: name, slug, unit, encoding, and decimal-places
/// hint (spec.md §3 `PDOSensor`).
#[derive(Debug, Clone)]
pub struct PdoSensor {
    pub name: String,
    pub slug: String,
    pub unit: &'static str,
    pub data_type: ZehnderType,
    pub decimal_places: u32,
}

/// Lower-case and replace spaces with underscores (spec.md §6 "Endpoint
/// paths"). Shared with the HTTP layer so every device endpoint path is
/// slugified the same way a PDO sensor's slug is.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "_")
}

fn entry(name: &str, unit: &'static str, data_type: ZehnderType, decimal_places: u32) -> PdoSensor {
    PdoSensor { name: name.to_string(), slug: slugify(name), unit, data_type, decimal_places }
}

/// The static catalog keyed by pdo_id. Unknown ids are synthesised and
/// inserted on first sight (see `find_sensor`), mirroring `sensorData`'s
/// mutation-on-miss behaviour in the Go original — hence the `RwLock`
/// rather than a plain `Lazy<HashMap<..>>`.
static CATALOG: Lazy<RwLock<HashMap<u32, PdoSensor>>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(49, entry("Operating Mode", UNIT_UNKNOWN, ZehnderType::Int8, 0));
    m.insert(65, entry("Fan Speed Setting", UNIT_UNKNOWN, ZehnderType::Int8, 0));
    m.insert(81, entry("Boost Period Remaining", UNIT_SECONDS, ZehnderType::Uint32, 0));
    m.insert(117, entry("Exhaust Fan Duty", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(118, entry("Supply Fan Duty", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(119, entry("Exhaust Fan Flow", UNIT_M3H, ZehnderType::Uint16, 0));
    m.insert(120, entry("Supply Fan Flow", UNIT_M3H, ZehnderType::Uint16, 0));
    m.insert(121, entry("Exhaust Fan Speed", UNIT_RPM, ZehnderType::Uint16, 0));
    m.insert(122, entry("Supply Fan Speed", UNIT_RPM, ZehnderType::Uint16, 0));
    m.insert(128, entry("Power Consumption", UNIT_WATT, ZehnderType::Uint16, 0));
    m.insert(130, entry("Power Consumption Total", UNIT_KWH, ZehnderType::Uint16, 0));
    m.insert(145, entry("Preheater Power Consumption Total", UNIT_KWH, ZehnderType::Uint16, 0));
    m.insert(146, entry("Preheater Power Consumption", UNIT_WATT, ZehnderType::Uint16, 0));
    m.insert(192, entry("Filter Replacement Days", UNIT_DAYS, ZehnderType::Uint16, 0));
    m.insert(209, entry("RMOT", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(213, entry("Avoided Heating Actual", UNIT_WATT, ZehnderType::Uint16, 2));
    m.insert(214, entry("Avoided Heating YTD", UNIT_KWH, ZehnderType::Uint16, 0));
    m.insert(220, entry("Preheated Air Temperature (pre Heating)", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(221, entry("Preheated Air Temperature (post Heating)", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(227, entry("Bypass State", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(274, entry("Extract Air Temperature", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(275, entry("Exhaust Air Temperature", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(276, entry("Outdoor Air Temperature", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(277, entry("Preheated Outside Air Temperature", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(278, entry("Supply Air Temperature", UNIT_CELSIUS, ZehnderType::Uint16, 1));
    m.insert(290, entry("Extract Humidity", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(291, entry("Exhaust Humidity", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(292, entry("Outdoor Humidity", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(293, entry("Preheated Outdoor Humidity", UNIT_PERCENT, ZehnderType::Uint8, 0));
    m.insert(294, entry("Supply Air Humidity", UNIT_PERCENT, ZehnderType::Int8, 0));
    RwLock::new(m)
});

/// Look up (or synthesise) the catalog entry for `pdo_id`. Unknown ids get
/// a generated name/slug and an encoding guessed from payload length, per
/// spec.md §4.4 "Cache update".
pub fn find_sensor(pdo_id: u32, data_len: usize) -> PdoSensor {
    if let Some(sensor) = CATALOG.read().unwrap().get(&pdo_id) {
        return sensor.clone();
    }
    let name = format!("Unknown sensor {}", pdo_id);
    let data_type = match data_len {
        1 => ZehnderType::Uint8,
        4 => ZehnderType::Uint32,
        _ => ZehnderType::Uint16,
    };
    let sensor = entry(&name, UNIT_UNKNOWN, data_type, 0);
    CATALOG.write().unwrap().insert(pdo_id, sensor.clone());
    sensor
}

/// Resolve a slug to a pdo_id for subscription requests
/// (`RequestPDOBySlug`, spec.md §4.4).
pub fn pdo_id_for_slug(slug: &str) -> Option<u32> {
    let wanted = slug.to_lowercase();
    CATALOG
        .read()
        .unwrap()
        .iter()
        .find(|(_, sensor)| sensor.slug == wanted)
        .map(|(id, _)| *id)
}

/// Fields extracted from a PDO frame's 29-bit identifier (spec.md §4.4).
pub struct PdoMessage {
    pub node_id: u32,
    pub pdo_id: u32,
    pub data: Vec<u8>,
}

pub fn pdo_from_frame(frame: &CanFrame) -> PdoMessage {
    PdoMessage {
        node_id: frame.id & 0x3F,
        pdo_id: (frame.id >> 14) & 0x7FF,
        data: frame.payload().to_vec(),
    }
}

/// Little-endian decode of a stored PDO payload against its catalog entry
/// (spec.md §4.4 "Value projection").
pub fn decode_value(sensor: &PdoSensor, raw: &[u8]) -> JsonValue {
    match sensor.data_type {
        ZehnderType::Bool => JsonValue::Bool(raw.first().copied() == Some(1)),
        ZehnderType::String => {
            let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
            JsonValue::String(String::from_utf8_lossy(&raw[..end]).into_owned())
        }
        ZehnderType::Version => {
            if raw.len() < 4 {
                return JsonValue::Null;
            }
            let v = u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
            let (major, minor) = decode_version(v);
            JsonValue::String(format!("{}.{}", major, minor))
        }
        ZehnderType::Uint8 | ZehnderType::Uint16 | ZehnderType::Uint32 => {
            let value = unsigned_number(sensor.data_type, raw);
            apply_decimal_places(sensor.decimal_places, value as f64, JsonValue::from(value))
        }
        ZehnderType::Int8 | ZehnderType::Int16 | ZehnderType::Int64 => {
            let value = signed_number(sensor.data_type, raw);
            apply_decimal_places(sensor.decimal_places, value as f64, JsonValue::from(value))
        }
        ZehnderType::Time => JsonValue::Null,
    }
}

fn apply_decimal_places(decimal_places: u32, raw_value: f64, integer_form: JsonValue) -> JsonValue {
    if decimal_places > 0 {
        let scaled = raw_value / (decimal_places as f64 * 10.0);
        serde_json::Number::from_f64(scaled).map(JsonValue::Number).unwrap_or(JsonValue::Null)
    } else {
        integer_form
    }
}

fn unsigned_number(data_type: ZehnderType, raw: &[u8]) -> u32 {
    match data_type {
        ZehnderType::Uint8 => raw.first().copied().unwrap_or(0) as u32,
        ZehnderType::Uint16 => {
            if raw.len() < 2 { 0 } else { u16::from_le_bytes([raw[0], raw[1]]) as u32 }
        }
        ZehnderType::Uint32 => {
            if raw.len() < 4 { 0 } else { u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) }
        }
        _ => 0,
    }
}

fn signed_number(data_type: ZehnderType, raw: &[u8]) -> i64 {
    match data_type {
        ZehnderType::Int8 => raw.first().map(|&b| b as i8 as i64).unwrap_or(0),
        ZehnderType::Int16 => {
            if raw.len() < 2 { 0 } else { i16::from_le_bytes([raw[0], raw[1]]) as i64 }
        }
        // Matches the Go original: a 32-bit little-endian read stored in
        // what the catalog calls CN_INT64. See DESIGN.md open question.
        ZehnderType::Int64 => {
            if raw.len() < 4 { 0 } else { i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as i64 }
        }
        _ => 0,
    }
}

/// Decompose a 32-bit LE version word as `(major, minor)` (spec.md §4.6
/// `CN_VERSION`): `major = (v >> 30) & 3`, `minor = (v >> 20) & 1023`.
pub fn decode_version(v: u32) -> (u32, u32) {
    ((v >> 30) & 3, (v >> 20) & 1023)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pdo_id_decode_matches_scenario_3() {
        let frame = CanFrame::new(0x0010C2C1, &[], false);
        let msg = pdo_from_frame(&frame);
        assert_eq!(msg.node_id, 0x01);
        assert_eq!(msg.pdo_id, 67);
    }

    #[test]
    fn fan_speed_setting_decodes_as_signed_int8() {
        let sensor = find_sensor(65, 1);
        assert_eq!(sensor.slug, "fan_speed_setting");
        let v = decode_value(&sensor, &[0x03]);
        assert_eq!(v, JsonValue::from(3));
    }

    #[test]
    fn unknown_pdo_synthesises_entry_from_length() {
        let sensor = find_sensor(9999, 4);
        assert_eq!(sensor.name, "Unknown sensor 9999");
        assert_eq!(sensor.data_type, ZehnderType::Uint32);
    }

    #[test]
    fn decimal_places_scale_integer_readings() {
        // RMOT (209) has 1 decimal place; raw little-endian u16 = 215 -> 21.5
        let sensor = find_sensor(209, 2);
        let v = decode_value(&sensor, &215u16.to_le_bytes());
        assert_eq!(v, JsonValue::from(21.5));
    }

    #[test]
    fn version_decodes_major_minor() {
        // major=1, minor=42 -> v = (1<<30)|(42<<20)
        let v: u32 = (1u32 << 30) | (42u32 << 20);
        let (major, minor) = decode_version(v);
        assert_eq!((major, minor), (1, 42));
    }

    #[test]
    fn slug_lookup_resolves_known_pdo() {
        assert_eq!(pdo_id_for_slug("fan_speed_setting"), Some(65));
        assert_eq!(pdo_id_for_slug("no_such_slug"), None);
    }
}
