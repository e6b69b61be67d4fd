// src/can/mod.rs
//
// Zehnder-style CAN PDO/RMI protocol engine: frame classification, the
// PDO sensor catalog, RMI request/response handling, heartbeat, bus
// transport, and the per-device worker runtime that ties them together.

pub mod device;
pub mod frame;
pub mod heartbeat;
pub mod pdo;
pub mod rmi;
pub mod transport;

pub use device::{CanDevice, DeviceInfo};
pub use frame::CanFrame;
