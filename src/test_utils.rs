//! Test doubles and wire builders
//!
//! [`MockTransport`] stands in for the platform BLE stack: it records every
//! write, notify toggle and scan pause, serves canned reads, can hold notify
//! requests open, and can answer connects with transport events. The builders produce device-format bytes.

#![cfg(any(test, feature = "benchmark"))]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use uuid::Uuid;

use crate::pftp::rfc76;
use crate::transport::{BleTransport, TransportEvent, TransportEventSender};
use crate::types::PmdMeasurementType;
use crate::{BleError, Result};

/// One recorded characteristic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRecord {
    pub address: String,
    pub service: Uuid,
    pub characteristic: Uuid,
    pub data: Vec<u8>,
    pub with_response: bool,
}

struct Peer {
    events: TransportEventSender,
    services: Vec<Uuid>,
}

/// Recording transport for tests and benchmarks.
pub struct MockTransport {
    writes: Mutex<Vec<WriteRecord>>,
    write_count: watch::Sender<usize>,
    reads: Mutex<HashMap<Uuid, Vec<u8>>>,
    notify_toggles: Mutex<Vec<(Uuid, bool)>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    scan_stops: AtomicUsize,
    scan_resumes: AtomicUsize,
    fail_writes: AtomicBool,
    hold_notify: watch::Sender<bool>,
    peer: Mutex<Option<Peer>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            write_count: watch::Sender::new(0),
            reads: Mutex::new(HashMap::new()),
            notify_toggles: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
            scan_stops: AtomicUsize::new(0),
            scan_resumes: AtomicUsize::new(0),
            fail_writes: AtomicBool::new(false),
            hold_notify: watch::Sender::new(false),
            peer: Mutex::new(None),
        }
    }

    /// Answer `connect` with `Connected` plus `ServicesDiscovered(services)`
    /// and `disconnect` with `Disconnected`, delivered through `events`.
    pub fn attach(&self, events: TransportEventSender, services: Vec<Uuid>) {
        *lock(&self.peer) = Some(Peer { events, services });
    }

    /// Stop answering connects; the device has gone quiet.
    pub fn detach(&self) {
        *lock(&self.peer) = None;
    }

    pub fn set_read(&self, characteristic: Uuid, value: Vec<u8>) {
        lock(&self.reads).insert(characteristic, value);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// While held, `set_notify` records the toggle and then waits for release.
    pub fn hold_notify(&self, hold: bool) {
        self.hold_notify.send_replace(hold);
    }

    pub fn writes(&self) -> Vec<WriteRecord> {
        lock(&self.writes).clone()
    }

    /// Writes to one characteristic, in order.
    pub fn writes_to(&self, characteristic: Uuid) -> Vec<Vec<u8>> {
        lock(&self.writes).iter().filter(|w| w.characteristic == characteristic).map(|w| w.data.clone()).collect()
    }

    /// Wait until at least `count` writes were recorded.
    pub async fn wait_for_writes(&self, count: usize) -> Vec<WriteRecord> {
        let mut rx = self.write_count.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = rx.wait_for(|n| *n >= count).await;
        self.writes()
    }

    pub fn notify_toggles(&self) -> Vec<(Uuid, bool)> {
        lock(&self.notify_toggles).clone()
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub fn scan_stops(&self) -> usize {
        self.scan_stops.load(Ordering::SeqCst)
    }

    pub fn scan_resumes(&self) -> usize {
        self.scan_resumes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl BleTransport for MockTransport {
    async fn connect(&self, _address: &str) -> Result<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(peer) = lock(&self.peer).as_ref() {
            peer.events.send(TransportEvent::Connected);
            peer.events.send(TransportEvent::ServicesDiscovered(peer.services.clone()));
        }
        Ok(())
    }

    async fn disconnect(&self, _address: &str) -> Result<()> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(peer) = lock(&self.peer).as_ref() {
            peer.events.send(TransportEvent::Disconnected { reason: None });
        }
        Ok(())
    }

    async fn write_characteristic(
        &self,
        address: &str,
        service: Uuid,
        characteristic: Uuid,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(BleError::transport_failed("mock write failure"));
        }
        let count = {
            let mut writes = lock(&self.writes);
            writes.push(WriteRecord {
                address: address.to_string(),
                service,
                characteristic,
                data: data.to_vec(),
                with_response,
            });
            writes.len()
        };
        self.write_count.send_replace(count);
        Ok(())
    }

    async fn read_characteristic(&self, _address: &str, _service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        lock(&self.reads).get(&characteristic).cloned().ok_or(BleError::AttributeNotFound { uuid: characteristic })
    }

    async fn set_notify(&self, _address: &str, _service: Uuid, characteristic: Uuid, enable: bool) -> Result<()> {
        lock(&self.notify_toggles).push((characteristic, enable));
        let mut held = self.hold_notify.subscribe();
        // The sender lives in self, so the channel cannot close here
        let _ = held.wait_for(|held| !*held).await;
        Ok(())
    }

    fn request_stop_scanning(&self) {
        self.scan_stops.fetch_add(1, Ordering::SeqCst);
    }

    fn resume_scanning(&self) {
        self.scan_resumes.fetch_add(1, Ordering::SeqCst);
    }
}

/// PMD data frame: header then `payload`. `frame_type` includes the compression bit.
pub fn frame_bytes(measurement_type: PmdMeasurementType, timestamp: u64, frame_type: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(10 + payload.len());
    out.push(measurement_type.id());
    out.extend(timestamp.to_le_bytes());
    out.push(frame_type);
    out.extend_from_slice(payload);
    out
}

/// First control point response notification.
pub fn cp_response(opcode: u8, measurement_type: u8, status: u8, more: bool, params: &[u8]) -> Vec<u8> {
    let mut out = vec![0xF0, opcode, measurement_type, status, more as u8];
    out.extend_from_slice(params);
    out
}

/// Fragment a device response the way the device would send it.
pub fn rfc76_fragments(message: &[u8], payload_size: usize) -> Vec<Vec<u8>> {
    rfc76::fragment(message, payload_size).into_iter().map(|f| f.to_vec()).collect()
}

/// Delta frame payload with one block of `delta_bits` wide deltas.
///
/// `reference` has one value per channel; each row of `deltas` is one sample.
pub fn delta_payload(reference: &[i32], resolution: u32, delta_bits: u32, deltas: &[Vec<i32>]) -> Vec<u8> {
    let ref_width = resolution.div_ceil(8) as usize;
    let mut out = Vec::new();
    for value in reference {
        out.extend_from_slice(&value.to_le_bytes()[..ref_width]);
    }
    if deltas.is_empty() {
        return out;
    }

    out.push(delta_bits as u8);
    out.push(deltas.len() as u8);
    let mask = if delta_bits >= 32 { u64::from(u32::MAX) } else { (1u64 << delta_bits) - 1 };
    let values: Vec<i32> = deltas.iter().flatten().copied().collect();
    let mut packed = vec![0u8; (values.len() * delta_bits as usize).div_ceil(8)];
    for (i, value) in values.iter().enumerate() {
        let raw = (*value as u32 as u64) & mask;
        for bit in 0..delta_bits as usize {
            if (raw >> bit) & 1 == 1 {
                let position = i * delta_bits as usize + bit;
                packed[position / 8] |= 1 << (position % 8);
            }
        }
    }
    out.extend(packed);
    out
}
