// src/can/heartbeat.rs
//
// Heartbeat responder: periodically announces this node's presence and
// resets its timer whenever a peer's heartbeat (or heartbeat request) is
// seen. Ported from pkg/zcan/heartbeat.go.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant};

use super::frame::CanFrame;

/// Heartbeat frames repeat every 2 seconds, matching the original's fixed
/// interval in heartbeat.go.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(2);

/// Build this node's heartbeat frame: `0x10000000 | node_id` with no
/// payload (spec.md §4.3 "Heartbeat").
pub fn heartbeat_frame(node_id: u8) -> CanFrame {
    CanFrame::new(0x1000_0000 | node_id as u32, &[], false)
}

/// Drive the heartbeat ticker: every `HEARTBEAT_INTERVAL`, push this
/// node's heartbeat frame onto `transmit`. `reset_rx` restarts the
/// interval whenever a frame classified as `Heartbeat` arrives from the
/// bus, the same debounce behaviour as the Go original's timer reset on
/// inbound heartbeat traffic.
pub async fn run(node_id: u8, transmit: mpsc::Sender<CanFrame>, mut reset_rx: mpsc::Receiver<()>) {
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if transmit.send(heartbeat_frame(node_id)).await.is_err() {
                    break;
                }
            }
            seen = reset_rx.recv() => {
                match seen {
                    Some(()) => ticker = interval_at(Instant::now() + HEARTBEAT_INTERVAL, HEARTBEAT_INTERVAL),
                    None => break,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_frame_encodes_node_id_in_low_byte() {
        let frame = heartbeat_frame(0x22);
        assert_eq!(frame.id, 0x1000_0022);
        assert_eq!(frame.payload().len(), 0);
    }
}
