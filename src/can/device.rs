// src/can/device.rs
//
// CAN device runtime: dispatcher, PDO cache, RMI request pump with CTS
// single-slot gating, heartbeat responder, and the on-demand device-info
// query. Ported from pkg/zcan/device.go and pkg/zcan/connection.go,
// restructured as a set of cooperative tokio workers over bounded
// channels the way looper.go pairs a goroutine with a stopper channel,
// generalised to one channel per responsibility (spec.md §4.3
// "Concurrency model").

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, oneshot, watch, RwLock, Semaphore};

use crate::config::ZcanNodeConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::logging::glog;

use super::frame::{CanFrame, FrameClass};
use super::heartbeat;
use super::pdo::{self, PdoSensor};
use super::rmi::{self, PropertyType, RmiValue, ZehnderDestination, ZehnderRmi};
use super::transport::{self, Transport, CHANNEL_CAPACITY};

/// Destination queried for device identity, per device_info.go's
/// `NewZehnderDestination(1, 1, 1)`.
const DEVICE_INFO_DESTINATION: ZehnderDestination = ZehnderDestination { node: 1, unit: 1, subunit: 1 };

/// Property codes within the device-info interface, in the exact order
/// device_info.go reads them back out of the response:
/// `{4, 6, 8, 0x0B, 0x0D, 0x14}`.
const DEVICE_INFO_PROPERTIES: [(u8, PropertyType); 6] = [
    (4, PropertyType::CharArray),    // model
    (6, PropertyType::CharArray),    // serial_number
    (8, PropertyType::CharArray),    // software_version
    (0x0B, PropertyType::CharArray), // article_number
    (0x0D, PropertyType::Uint8),     // country_code
    (0x14, PropertyType::CharArray), // device_name
];

const RMI_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceInfo {
    pub model: String,
    pub serial_number: String,
    pub software_version: String,
    pub article_number: String,
    pub country_code: u8,
    pub device_name: String,
}

struct CachedPdo {
    sensor: PdoSensor,
    raw: Vec<u8>,
}

struct RmiRequest {
    dest: ZehnderDestination,
    flags: u8,
    properties: Vec<u8>,
    respond_to: oneshot::Sender<GatewayResult<ZehnderRmi>>,
}

pub struct CanDevice {
    pub name: String,
    pub node_id: u8,
    cache: Arc<RwLock<HashMap<u32, CachedPdo>>>,
    rmi_tx: mpsc::Sender<RmiRequest>,
    stop_tx: watch::Sender<bool>,
    handles: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl CanDevice {
    /// Open the transport, spawn every worker, and start any configured
    /// PDO subscriptions. `cfg.interface` starting with `file:` is
    /// replayed from a capture file instead of a live bus (spec.md
    /// supplementary feature "file-replay"); anything else is opened as
    /// a SocketCAN interface name.
    pub async fn start(cfg: &ZcanNodeConfig) -> GatewayResult<Arc<Self>> {
        let transport = if let Some(path) = cfg.interface.strip_prefix("file:") {
            Transport::from_capture_file(path)
        } else {
            Transport::open(&cfg.interface)?
        };
        let is_live = transport.is_live();

        let (frame_tx, frame_rx) = mpsc::channel::<CanFrame>(CHANNEL_CAPACITY);
        let (pdo_tx, pdo_rx) = mpsc::channel::<CanFrame>(CHANNEL_CAPACITY);
        let (rmi_frame_tx, rmi_frame_rx) = mpsc::channel::<CanFrame>(CHANNEL_CAPACITY);
        let (heartbeat_reset_tx, heartbeat_reset_rx) = mpsc::channel::<()>(CHANNEL_CAPACITY);
        let (rmi_tx, rmi_rx) = mpsc::channel::<RmiRequest>(CHANNEL_CAPACITY);
        let (stop_tx, _stop_rx) = watch::channel(false);

        let capture_path = cfg.capture_path.clone().map(std::path::PathBuf::from);
        let (reader_handle, transmit_queue) = transport::spawn_reader(transport, frame_tx, capture_path);

        let mut handles = vec![reader_handle];
        let name = cfg.name.clone();

        handles.push(spawn_dispatcher(name.clone(), frame_rx, pdo_tx, rmi_frame_tx, heartbeat_reset_tx));

        let cache = Arc::new(RwLock::new(HashMap::<u32, CachedPdo>::new()));
        handles.push(spawn_pdo_worker(name.clone(), pdo_rx, cache.clone()));

        let sequence = Arc::new(AtomicU8::new(0));
        handles.push(spawn_rmi_worker(
            name.clone(),
            cfg.node_id,
            rmi_rx,
            rmi_frame_rx,
            transmit_queue.clone(),
            sequence,
        ));

        if is_live {
            if let Some(transmit) = transmit_queue.clone() {
                handles.push(spawn_heartbeat(cfg.node_id, transmit, heartbeat_reset_rx));
            }
        }

        let device = Arc::new(CanDevice {
            name,
            node_id: cfg.node_id,
            cache,
            rmi_tx,
            stop_tx,
            handles: std::sync::Mutex::new(handles),
        });

        if let (Some(section), Some(transmit)) = (&cfg.pdo, transmit_queue) {
            for pdo_cfg in &section.pdos {
                let pdo_id = pdo::pdo_id_for_slug(&pdo_cfg.slug)
                    .ok_or_else(|| GatewayError::UnknownSlug(pdo_cfg.slug.clone()))?;
                spawn_subscription(device.name.clone(), section.node, pdo_id, pdo_cfg.interval, transmit.clone());
            }
        }

        Ok(device)
    }

    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handles: Vec<_> = self.handles.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
        }
    }

    /// JSON document for this device's HTTP endpoint: every cached PDO,
    /// keyed by slug (spec.md §6 "Per configured zcan device").
    pub async fn snapshot(&self) -> JsonValue {
        let cache = self.cache.read().await;
        let mut map = serde_json::Map::new();
        for cached in cache.values() {
            map.insert(cached.sensor.slug.clone(), pdo::decode_value(&cached.sensor, &cached.raw));
        }
        JsonValue::Object(map)
    }

    /// Block until the device answers a six-property device-info RMI
    /// query, per device_info.go.
    pub async fn device_info(&self) -> GatewayResult<DeviceInfo> {
        let properties: Vec<u8> = DEVICE_INFO_PROPERTIES.iter().map(|(idx, _)| *idx).collect();
        let (respond_to, response) = oneshot::channel();
        self.rmi_tx
            .send(RmiRequest { dest: DEVICE_INFO_DESTINATION, flags: 0, properties, respond_to })
            .await
            .map_err(|_| GatewayError::BusOpen { device: self.name.clone(), reason: "rmi worker stopped".into() })?;

        let mut message = response
            .await
            .map_err(|_| GatewayError::BusOpen { device: self.name.clone(), reason: "rmi worker dropped request".into() })??;

        let model = read_string(&mut message)?;
        let serial_number = read_string(&mut message)?;
        let software_version = read_string(&mut message)?;
        let article_number = read_string(&mut message)?;
        let country_code = match message.get_data(PropertyType::Uint8).map_err(rmi_to_gateway_error)? {
            RmiValue::UInt(v) => v as u8,
            other => return Err(GatewayError::FrameDecode(format!("unexpected country code field {:?}", other))),
        };
        let device_name = read_string(&mut message)?;

        Ok(DeviceInfo { model, serial_number, software_version, article_number, country_code, device_name })
    }
}

fn read_string(message: &mut ZehnderRmi) -> GatewayResult<String> {
    match message.get_data(PropertyType::CharArray).map_err(rmi_to_gateway_error)? {
        RmiValue::String(s) => Ok(s),
        other => Err(GatewayError::FrameDecode(format!("expected string field, got {:?}", other))),
    }
}

fn rmi_to_gateway_error(e: rmi::RmiError) -> GatewayError {
    match e {
        rmi::RmiError::Exhausted => GatewayError::RmiExhausted,
        rmi::RmiError::Remote(code) => GatewayError::FrameDecode(format!("remote rmi error {}", code)),
    }
}

fn spawn_dispatcher(
    name: String,
    mut frame_rx: mpsc::Receiver<CanFrame>,
    pdo_tx: mpsc::Sender<CanFrame>,
    rmi_tx: mpsc::Sender<CanFrame>,
    heartbeat_reset_tx: mpsc::Sender<()>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            match frame.class() {
                FrameClass::Pdo => {
                    let _ = pdo_tx.send(frame).await;
                }
                FrameClass::Rmi => {
                    let _ = rmi_tx.send(frame).await;
                }
                FrameClass::Heartbeat => {
                    let _ = heartbeat_reset_tx.send(()).await;
                }
                FrameClass::Unknown(class) => {
                    glog!("[can:{}] dropping frame with unknown class 0x{:02X} (id {:08X})", name, class, frame.id);
                }
            }
        }
    })
}

fn spawn_pdo_worker(
    name: String,
    mut pdo_rx: mpsc::Receiver<CanFrame>,
    cache: Arc<RwLock<HashMap<u32, CachedPdo>>>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = pdo_rx.recv().await {
            let msg = pdo::pdo_from_frame(&frame);
            let sensor = pdo::find_sensor(msg.pdo_id, msg.data.len());
            glog!("[can:{}] pdo {} ({}) updated", name, msg.pdo_id, sensor.name);
            let mut guard = cache.write().await;
            guard.insert(msg.pdo_id, CachedPdo { sensor, raw: msg.data });
        }
    })
}

fn spawn_heartbeat(
    node_id: u8,
    transmit: std::sync::mpsc::SyncSender<CanFrame>,
    heartbeat_reset_rx: mpsc::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    let (bridge_tx, mut bridge_rx) = mpsc::channel::<CanFrame>(CHANNEL_CAPACITY);
    tokio::spawn(async move {
        tokio::spawn(async move {
            while let Some(frame) = bridge_rx.recv().await {
                let _ = transmit.send(frame);
            }
        });
        heartbeat::run(node_id, bridge_tx, heartbeat_reset_rx).await;
    })
}

/// Periodically ask the peer to start/continue emitting a PDO: a data
/// frame whose id encodes the pdo id and this node's subscription flag
/// (`0x40`), and whose single payload byte is the requested interval in
/// seconds (spec.md §8 Scenario 6).
fn spawn_subscription(
    name: String,
    node_id: u8,
    pdo_id: u32,
    interval: u8,
    transmit: std::sync::mpsc::SyncSender<CanFrame>,
) -> tokio::task::JoinHandle<()> {
    let id = (pdo_id << 14) | (0x40 + node_id as u32);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1) as u64));
        loop {
            ticker.tick().await;
            let frame = CanFrame::new(id, &[interval], false);
            if transmit.send(frame).is_err() {
                glog!("[can:{}] subscription for pdo {} has no live transport to send on", name, pdo_id);
                break;
            }
        }
    })
}

fn spawn_rmi_worker(
    name: String,
    node_id: u8,
    mut rmi_rx: mpsc::Receiver<RmiRequest>,
    mut rmi_frame_rx: mpsc::Receiver<CanFrame>,
    transmit_queue: Option<std::sync::mpsc::SyncSender<CanFrame>>,
    sequence: Arc<AtomicU8>,
) -> tokio::task::JoinHandle<()> {
    let cts = Arc::new(Semaphore::new(1));

    tokio::spawn(async move {
        let mut pending: Option<(oneshot::Sender<GatewayResult<ZehnderRmi>>, ZehnderRmi)> = None;

        'outer: loop {
            tokio::select! {
                request = rmi_rx.recv() => {
                    let Some(request) = request else { break };
                    let Some(transmit) = transmit_queue.clone() else {
                        let _ = request.respond_to.send(Err(GatewayError::BusOpen {
                            device: name.clone(),
                            reason: "no live transport to issue rmi requests on".into(),
                        }));
                        continue;
                    };

                    let permit = cts.clone().acquire_owned().await.expect("semaphore never closed");
                    let seq = sequence.fetch_add(1, Ordering::Relaxed) & 0x03;
                    let payload = rmi::build_get_multiple(&request.dest, request.flags, &request.properties);
                    let dest_node = request.dest.node as u32;
                    let mut outbound = ZehnderRmi::new_request(node_id as u32, dest_node, seq, 0);
                    outbound.data = payload;

                    for frame in outbound.into_frames() {
                        if transmit.send(frame).is_err() {
                            let _ = request.respond_to.send(Err(GatewayError::BusOpen {
                                device: name.clone(),
                                reason: "transport closed mid-request".into(),
                            }));
                            drop(permit);
                            continue 'outer;
                        }
                    }

                    pending = Some((request.respond_to, ZehnderRmi::new_request(node_id as u32, dest_node, seq, 0)));

                    let timeout = tokio::time::sleep(RMI_RESPONSE_TIMEOUT);
                    tokio::pin!(timeout);
                    loop {
                        tokio::select! {
                            frame = rmi_frame_rx.recv() => {
                                let Some(frame) = frame else { break };
                                let decoded = ZehnderRmi::from_frame(&frame);
                                if let Some((_, assembling)) = pending.as_mut() {
                                    if assembling.data.is_empty() && !assembling.is_multi {
                                        *assembling = decoded;
                                    } else {
                                        assembling.append(&frame);
                                    }
                                    if assembling.is_complete() {
                                        if let Some((respond_to, finished)) = pending.take() {
                                            let _ = respond_to.send(Ok(finished));
                                        }
                                        break;
                                    }
                                }
                            }
                            _ = &mut timeout => {
                                if let Some((respond_to, _)) = pending.take() {
                                    let _ = respond_to.send(Err(GatewayError::BusOpen {
                                        device: name.clone(),
                                        reason: "timed out waiting for rmi response".into(),
                                    }));
                                }
                                break;
                            }
                        }
                    }
                    drop(permit);
                }
                frame = rmi_frame_rx.recv() => {
                    if frame.is_none() {
                        break;
                    }
                    glog!("[can:{}] dropping unsolicited rmi frame", name);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscription_frame_id_matches_scenario_6() {
        // id = (pdo_id << 14) | (0x40 + node_id), pdo_id 65, node_id 1
        let id = (65u32 << 14) | (0x40 + 1);
        assert_eq!(id, 0x104041);
    }
}
