// src/config.rs
//
// YAML configuration loader. Mirrors config.go's three top-level sections
// (http, zcan, modbus) plus the optional max6675 list, but as typed serde
// structs rather than a single global `cfg` — the registry that used to be
// a package-level var is now owned by whoever calls `load()` and threaded
// through explicitly (see the Design Note on global state in SPEC_FULL.md).

use serde::Deserialize;
use std::path::Path;

use crate::error::{GatewayError, GatewayResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusRegisterConfig {
    pub description: String,
    pub tag: String,
    #[serde(rename = "typ")]
    pub encoding: String,
    pub register: u16,
    #[serde(default)]
    pub factor: u16,
    #[serde(default)]
    pub offset: i32,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModbusRegisterSet {
    #[serde(default)]
    pub holding: Vec<ModbusRegisterConfig>,
    #[serde(default)]
    pub input: Vec<ModbusRegisterConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModbusNodeConfig {
    pub name: String,
    pub slave_id: u8,
    #[serde(default)]
    pub baudrate: u32,
    pub device: String,
    pub interval: u64,
    #[serde(default)]
    pub registers: ModbusRegisterSet,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZcanPdoConfig {
    pub slug: String,
    pub interval: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZcanPdoSection {
    pub node: u8,
    #[serde(default, rename = "pdo")]
    pub pdos: Vec<ZcanPdoConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZcanNodeConfig {
    pub name: String,
    pub interface: String,
    pub node_id: u8,
    #[serde(default, rename = "pdo")]
    pub pdo: Option<ZcanPdoSection>,
    /// Tee every inbound frame to this candump-style file as it arrives,
    /// in addition to normal processing (spec.md supplementary feature
    /// "capture-to-file").
    #[serde(default)]
    pub capture_path: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Max6675Config {
    pub name: String,
    pub path: String,
    pub interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub http: HttpConfig,
    #[serde(default)]
    pub zcan: Vec<ZcanNodeConfig>,
    #[serde(default)]
    pub modbus: Vec<ModbusNodeConfig>,
    #[serde(default)]
    pub max6675: Vec<Max6675Config>,
}

/// Read and parse the configuration file. A missing file or malformed YAML
/// is `GatewayError::Config`, which the caller treats as fatal.
pub fn load(path: &Path) -> GatewayResult<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| GatewayError::Config(format!("reading {}: {}", path.display(), e)))?;
    serde_yaml::from_str(&contents)
        .map_err(|e| GatewayError::Config(format!("parsing {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_document() {
        let yaml = r#"
http:
  address: 0.0.0.0
  port: 8080
zcan:
  - name: mvhr
    interface: can0
    node_id: 1
    pdo:
      node: 1
      pdo:
        - slug: fan_speed_setting
          interval: 5
modbus:
  - name: meter
    slave_id: 3
    baudrate: 9600
    device: /dev/ttyUSB0
    interval: 10
    registers:
      holding:
        - description: Voltage
          tag: voltage
          typ: u16
          register: 100
          factor: 1
"#;
        let parsed: ConfigFile = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(parsed.http.port, 8080);
        assert_eq!(parsed.zcan.len(), 1);
        assert_eq!(parsed.zcan[0].pdo.as_ref().unwrap().pdos.len(), 1);
        assert_eq!(parsed.modbus[0].registers.holding.len(), 1);
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = load(Path::new("/nonexistent/config.yaml")).unwrap_err();
        assert!(matches!(err, GatewayError::Config(_)));
    }
}
