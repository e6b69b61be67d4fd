// src/modbus/mod.rs
//
// Modbus-RTU register model, range-coalescing planner, and device loop.

pub mod device;
pub mod planner;
pub mod register;

pub use device::ModbusRunner;
