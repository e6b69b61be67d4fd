// src/modbus/device.rs
//
// Modbus-RTU device loop: periodic bus read, fault counter, stop signal.
// Ported from pkg/mdev/core.go (ReadOnce) and pkg/mdev/looper.go
// (Start/Stop), restructured as an async task the way the teacher's
// ModbusTcpReader drives its poll groups (io/modbus_tcp/reader.rs) — but
// over RTU serial rather than TCP, and with one device owning all of its
// calls rather than one task per poll group, since an RTU device holds a
// single shared serial handle that cannot be read from concurrently.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex};
use tokio_modbus::client::rtu;
use tokio_modbus::prelude::*;

use crate::config::ModbusNodeConfig;
use crate::logging::glog;

use super::planner::Planner;
use super::register::{Encoding, ModbusRegister, RegisterKind, Value};

/// Consecutive fully-failed cycles after which the poll loop aborts
/// (spec.md §4.1 "Failure" / §4.2).
const MAX_CONSECUTIVE_FAILURES: u32 = 5;

pub struct ModbusDevice {
    pub name: String,
    device_path: String,
    baud_rate: u32,
    slave_id: u8,
    interval: Duration,
    planner: Planner,
}

impl ModbusDevice {
    pub fn new(name: impl Into<String>, device_path: impl Into<String>, slave_id: u8) -> Self {
        ModbusDevice {
            name: name.into(),
            device_path: device_path.into(),
            baud_rate: 9600,
            slave_id,
            interval: Duration::from_secs(10),
            planner: Planner::new(),
        }
    }

    pub fn set_baud_rate(&mut self, baud: u32) {
        if baud > 0 {
            self.baud_rate = baud;
        }
    }

    /// Build a device straight from a config section, sorting registers by
    /// address before insertion the way `main.go`'s `addModbus` does.
    pub fn from_config(cfg: &ModbusNodeConfig) -> Result<Self, String> {
        let mut dev = ModbusDevice::new(cfg.name.clone(), cfg.device.clone(), cfg.slave_id);
        dev.set_baud_rate(cfg.baudrate);
        dev.interval = Duration::from_secs(cfg.interval.max(1));

        let mut holding = cfg.registers.holding.clone();
        holding.sort_by_key(|r| r.register);
        for reg in holding {
            dev.add_register(&reg, RegisterKind::Holding)?;
        }

        let mut input = cfg.registers.input.clone();
        input.sort_by_key(|r| r.register);
        for reg in input {
            dev.add_register(&reg, RegisterKind::Input)?;
        }
        Ok(dev)
    }

    fn add_register(
        &mut self,
        cfg: &crate::config::ModbusRegisterConfig,
        kind: RegisterKind,
    ) -> Result<(), String> {
        let encoding = Encoding::parse(&cfg.encoding)
            .ok_or_else(|| format!("unknown register encoding '{}'", cfg.encoding))?;
        let desc = Arc::new(ModbusRegister::new(
            cfg.description.clone(),
            cfg.tag.clone(),
            cfg.register,
            encoding,
            cfg.factor,
            cfg.offset,
            kind,
        ));
        self.planner.add_register(desc);
        Ok(())
    }

    /// Perform a single synchronous pass over every call. Returns an error
    /// only when every call in the cycle failed (spec.md §4.1 "Failure").
    pub async fn read_once(&self) -> Result<(), String> {
        let builder = tokio_serial::new(&self.device_path, self.baud_rate);
        let port = tokio_serial::SerialStream::open(&builder)
            .map_err(|e| format!("unable to open {}: {}", self.device_path, e))?;
        let mut ctx = rtu::attach_slave(port, Slave(self.slave_id));

        let mut completed = 0usize;
        for (n, call) in self.planner.calls.iter().enumerate() {
            let result = match call.kind {
                RegisterKind::Holding => {
                    ctx.read_holding_registers(call.start, call.quantity()).await
                }
                RegisterKind::Input => ctx.read_input_registers(call.start, call.quantity()).await,
                RegisterKind::Coil => {
                    glog!("[modbus:{}] coil calls are not issued by the planner", self.name);
                    continue;
                }
            };
            match result {
                Ok(Ok(words)) => {
                    let bytes = registers_to_bytes(&words);
                    call.distribute(&bytes);
                    completed += 1;
                }
                Ok(Err(exc)) => glog!("[modbus:{}] call #{} exception: {}", self.name, n, exc),
                Err(e) => glog!("[modbus:{}] call #{} io error: {}", self.name, n, e),
            }
        }

        if completed == 0 && !self.planner.calls.is_empty() {
            return Err(format!("unable to read any data from {}", self.device_path));
        }
        Ok(())
    }
}

fn registers_to_bytes(words: &[u16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for w in words {
        bytes.extend_from_slice(&w.to_be_bytes());
    }
    bytes
}

/// Owns the spawned poll task and stop signal for a running device. This is
/// the async equivalent of looper.go's goroutine + `stopper` channel: a
/// single watch channel plays the role of the Go original's buffered bool
/// channel, broadcasting a stop to the one poll task.
pub struct ModbusRunner {
    device: Arc<ModbusDevice>,
    stop_tx: watch::Sender<bool>,
    handle: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ModbusRunner {
    /// Construct a device from config, run one synchronous read so the
    /// cache is populated before the HTTP endpoint is registered (matches
    /// `main.go`'s `md.ReadOnce()` before `md.Start(...)`), then spawn the
    /// periodic poll loop.
    pub async fn start(cfg: &ModbusNodeConfig) -> Result<Arc<Self>, String> {
        let device = Arc::new(ModbusDevice::from_config(cfg)?);

        if let Err(e) = device.read_once().await {
            glog!("[modbus:{}] initial read failed: {}", device.name, e);
        }

        let (stop_tx, mut stop_rx) = watch::channel(false);
        let runner_device = device.clone();
        let interval = device.interval;
        let name = device.name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately; skip it, we already read once
            let mut errors: u32 = 0;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match runner_device.read_once().await {
                            Ok(()) => errors = 0,
                            Err(e) => {
                                errors += 1;
                                glog!("[modbus:{}] poll cycle failed ({} of {}): {}", name, errors, MAX_CONSECUTIVE_FAILURES, e);
                                if errors > MAX_CONSECUTIVE_FAILURES {
                                    glog!("[modbus:{}] unable to read data repeatedly, aborting collection loop", name);
                                    break;
                                }
                            }
                        }
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            glog!("[modbus:{}] poll loop stopped", name);
        });

        Ok(Arc::new(ModbusRunner {
            device,
            stop_tx,
            handle: Mutex::new(Some(handle)),
        }))
    }

    pub fn name(&self) -> &str {
        &self.device.name
    }

    /// Signal the poll loop to stop and wait for it to exit.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.lock().await.take() {
            let _ = handle.await;
        }
    }

    /// Build the JSON document this device's HTTP endpoint serves: one
    /// entry per register with data, keyed by tag (spec.md §6, "Per
    /// configured Modbus device").
    pub fn snapshot(&self) -> JsonValue {
        let mut map = HashMap::new();
        for call in &self.device.planner.calls {
            for desc in &call.descriptors {
                if let Some(value) = desc.value() {
                    map.insert(desc.tag.clone(), value_to_json(&value));
                }
            }
        }
        serde_json::to_value(map).unwrap_or(JsonValue::Null)
    }
}

fn value_to_json(value: &Value) -> JsonValue {
    match value {
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        Value::UInt(u) => JsonValue::from(*u),
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
    }
}
