// src/lib.rs
//
// Library surface for the gateway binary: configuration, error types,
// logging, and the two protocol engines (CAN PDO/RMI, Modbus-RTU).

pub mod can;
pub mod config;
pub mod error;
pub mod http;
pub mod logging;
pub mod modbus;
