// src/error.rs
//
// Crate-wide error kinds for the boundaries that need typed errors
// (config load, transport open, RMI decode). Hot worker loops keep using
// plain `String`s on their channels, matching the teacher's own habit of
// mixing typed errors at the edges with stringly-typed errors internally.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to read or parse configuration: {0}")]
    Config(String),

    #[error("unable to open transport for device '{device}': {reason}")]
    BusOpen { device: String, reason: String },

    #[error("malformed CAN frame: {0}")]
    FrameDecode(String),

    #[error("no PDO mapped to slug '{0}'")]
    UnknownSlug(String),

    #[error("RMI response exhausted while decoding field")]
    RmiExhausted,

    #[error("modbus call failed: {0}")]
    ModbusCall(String),

    #[error("modbus poll loop aborted after {0} consecutive failed cycles")]
    ModbusLoopAborted(u32),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_slug_renders_the_slug() {
        let err = GatewayError::UnknownSlug("fan_speed_setting".to_string());
        assert_eq!(
            err.to_string(),
            "no PDO mapped to slug 'fan_speed_setting'"
        );
    }
}
