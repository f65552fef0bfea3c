//! In-process simulated host
//!
//! [`SimulatedBridge`] implements [`HostBridge`] without hardware so the
//! whole pipeline can run in tests and in the demo binary. It models a host
//! with a device picker: a device already selected is returned again,
//! otherwise the picker selects the single attached device matching the
//! filters and selects nothing when zero or several match.
//!
//! Bulk and interrupt endpoints are loopbacks: data written to OUT endpoint
//! `n` becomes readable from IN endpoint `n`, optionally passed through a
//! transform. Reads wait until data is available.

use crate::bridge::{BridgeError, BridgeFuture, BridgeResult, HostBridge, HostDeviceInfo};
use common::DeviceFilter;
use protocol::ControlSetup;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, trace};

/// `GET_DESCRIPTOR` standard request
const REQUEST_GET_DESCRIPTOR: u8 = 0x06;
/// `wValue` of a device descriptor request
const DEVICE_DESCRIPTOR_VALUE: u16 = 0x0100;

/// Data transform applied to looped-back bulk data
pub type LoopbackTransform = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// Failure that can be injected into the simulated host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    Open,
    Reset,
    Claim(u8),
    /// Every transfer on this endpoint number fails
    Endpoint(u8),
    /// Every transfer on this endpoint number stalls
    Stall(u8),
    /// Every device operation reports a disconnect
    Disconnect,
}

/// Call recorded by the simulated host
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeCall {
    RequestDevice,
    Open,
    Close,
    Reset,
    ClaimInterface(u8),
    ReleaseInterface(u8),
    ControlIn { request: u8, value: u16, length: u16 },
    ControlOut { request: u8, value: u16, length: usize },
    TransferIn { endpoint: u8, length: usize },
    TransferOut { endpoint: u8, length: usize },
}

struct Loopback {
    tx: async_channel::Sender<Vec<u8>>,
    rx: async_channel::Receiver<Vec<u8>>,
}

impl Loopback {
    fn new() -> Self {
        let (tx, rx) = async_channel::unbounded();
        Self { tx, rx }
    }
}

#[derive(Default)]
struct SimState {
    attached: Vec<HostDeviceInfo>,
    selected: Option<HostDeviceInfo>,
    open: bool,
    claimed: BTreeSet<u8>,
    faults: HashSet<Fault>,
    latency: HashMap<u8, Duration>,
    loopbacks: HashMap<u8, Arc<Loopback>>,
    transform: Option<LoopbackTransform>,
    control_responses: HashMap<(u8, u16), Vec<u8>>,
    control_writes: Vec<(ControlSetup, Vec<u8>)>,
    calls: Vec<BridgeCall>,
}

/// Simulated host device access
pub struct SimulatedBridge {
    available: bool,
    state: Mutex<SimState>,
}

impl Default for SimulatedBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedBridge {
    /// Host with device access and no attached devices
    pub fn new() -> Self {
        Self {
            available: true,
            state: Mutex::new(SimState::default()),
        }
    }

    /// Host without device access capability
    pub fn unavailable() -> Self {
        Self {
            available: false,
            ..Self::new()
        }
    }

    /// Attach a device to the simulated host
    pub fn with_device(self, info: HostDeviceInfo) -> Self {
        self.attach(info);
        self
    }

    /// Apply `transform` to data looped from OUT to IN endpoints
    pub fn with_loopback_transform<F>(self, transform: F) -> Self
    where
        F: Fn(&[u8]) -> Vec<u8> + Send + Sync + 'static,
    {
        self.state().transform = Some(Arc::new(transform));
        self
    }

    /// Delay every transfer on endpoint number `endpoint`
    pub fn with_latency(self, endpoint: u8, latency: Duration) -> Self {
        self.state().latency.insert(endpoint, latency);
        self
    }

    pub fn attach(&self, info: HostDeviceInfo) {
        self.state().attached.push(info);
    }

    pub fn inject(&self, fault: Fault) {
        self.state().faults.insert(fault);
    }

    pub fn clear(&self, fault: Fault) {
        self.state().faults.remove(&fault);
    }

    /// Response returned for a control IN request
    pub fn set_control_response(&self, request: u8, value: u16, data: Vec<u8>) {
        self.state().control_responses.insert((request, value), data);
    }

    /// Make `data` readable from IN endpoint `endpoint`
    pub fn queue_in(&self, endpoint: u8, data: Vec<u8>) {
        let loopback = self.loopback(endpoint);
        let _ = loopback.tx.try_send(data);
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.state().calls.clone()
    }

    pub fn control_writes(&self) -> Vec<(ControlSetup, Vec<u8>)> {
        self.state().control_writes.clone()
    }

    pub fn is_open(&self) -> bool {
        self.state().open
    }

    pub fn claimed_interfaces(&self) -> Vec<u8> {
        self.state().claimed.iter().copied().collect()
    }

    pub fn selected(&self) -> Option<HostDeviceInfo> {
        self.state().selected.clone()
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn loopback(&self, endpoint: u8) -> Arc<Loopback> {
        self.state()
            .loopbacks
            .entry(endpoint)
            .or_insert_with(|| Arc::new(Loopback::new()))
            .clone()
    }

    /// Record `call` and check the device can serve it
    fn begin(&self, call: BridgeCall) -> BridgeResult<()> {
        trace!(?call, "Simulated host call");
        let mut state = self.state();
        state.calls.push(call);
        if state.faults.contains(&Fault::Disconnect) {
            return Err(BridgeError::Disconnected);
        }
        if state.selected.is_none() {
            return Err(BridgeError::NoDeviceSelected);
        }
        Ok(())
    }

    fn require_open(&self) -> BridgeResult<()> {
        if self.state().open {
            Ok(())
        } else {
            Err(BridgeError::NotOpen)
        }
    }

    async fn endpoint_ready(&self, endpoint: u8) -> BridgeResult<()> {
        let latency = self.state().latency.get(&endpoint).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let state = self.state();
        if state.faults.contains(&Fault::Stall(endpoint)) {
            return Err(BridgeError::Stall(endpoint));
        }
        if state.faults.contains(&Fault::Endpoint(endpoint)) {
            return Err(BridgeError::Failed(format!(
                "transfer on endpoint {} failed",
                endpoint
            )));
        }
        Ok(())
    }

    fn pick(&self, filters: &[DeviceFilter]) -> Option<HostDeviceInfo> {
        let mut state = self.state();
        if let Some(selected) = &state.selected {
            return Some(selected.clone());
        }

        let mut matching = state.attached.iter().filter(|d| d.matches_any(filters));
        let picked = match (matching.next(), matching.next()) {
            (Some(only), None) => Some(only.clone()),
            (None, _) => {
                debug!("No attached device matches the filters");
                None
            }
            (Some(_), Some(_)) => {
                debug!("Several attached devices match the filters, picker cancelled");
                None
            }
        };
        state.selected = picked.clone();
        picked
    }
}

impl HostBridge for SimulatedBridge {
    fn is_available(&self) -> bool {
        self.available
    }

    fn request_device<'a>(
        &'a self,
        filters: &'a [DeviceFilter],
    ) -> BridgeFuture<'a, BridgeResult<Option<HostDeviceInfo>>> {
        Box::pin(async move {
            self.state().calls.push(BridgeCall::RequestDevice);
            if !self.available {
                return Err(BridgeError::Unavailable);
            }
            Ok(self.pick(filters))
        })
    }

    fn open(&self) -> BridgeFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.begin(BridgeCall::Open)?;
            let mut state = self.state();
            if state.faults.contains(&Fault::Open) {
                return Err(BridgeError::Failed("open refused".to_string()));
            }
            state.open = true;
            Ok(())
        })
    }

    fn close(&self) -> BridgeFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.begin(BridgeCall::Close)?;
            let mut state = self.state();
            state.open = false;
            state.claimed.clear();
            Ok(())
        })
    }

    fn reset(&self) -> BridgeFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.begin(BridgeCall::Reset)?;
            self.require_open()?;
            if self.state().faults.contains(&Fault::Reset) {
                return Err(BridgeError::Failed("reset refused".to_string()));
            }
            Ok(())
        })
    }

    fn claim_interface(&self, interface: u8) -> BridgeFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.begin(BridgeCall::ClaimInterface(interface))?;
            self.require_open()?;
            let mut state = self.state();
            if state.faults.contains(&Fault::Claim(interface)) {
                return Err(BridgeError::Failed(format!(
                    "interface {} is busy",
                    interface
                )));
            }
            state.claimed.insert(interface);
            Ok(())
        })
    }

    fn release_interface(&self, interface: u8) -> BridgeFuture<'_, BridgeResult<()>> {
        Box::pin(async move {
            self.begin(BridgeCall::ReleaseInterface(interface))?;
            self.require_open()?;
            if self.state().claimed.remove(&interface) {
                Ok(())
            } else {
                Err(BridgeError::Failed(format!(
                    "interface {} is not claimed",
                    interface
                )))
            }
        })
    }

    fn control_transfer_in(
        &self,
        setup: ControlSetup,
        length: u16,
    ) -> BridgeFuture<'_, BridgeResult<Vec<u8>>> {
        Box::pin(async move {
            self.begin(BridgeCall::ControlIn {
                request: setup.request,
                value: setup.value,
                length,
            })?;
            self.require_open()?;

            let state = self.state();
            let mut data = match state.control_responses.get(&(setup.request, setup.value)) {
                Some(data) => data.clone(),
                None if (setup.request, setup.value)
                    == (REQUEST_GET_DESCRIPTOR, DEVICE_DESCRIPTOR_VALUE) =>
                {
                    state
                        .selected
                        .as_ref()
                        .map(|d| d.descriptor().to_bytes().to_vec())
                        .unwrap_or_default()
                }
                None => return Err(BridgeError::Stall(0)),
            };
            data.truncate(length as usize);
            Ok(data)
        })
    }

    fn control_transfer_out(
        &self,
        setup: ControlSetup,
        data: Vec<u8>,
    ) -> BridgeFuture<'_, BridgeResult<usize>> {
        Box::pin(async move {
            self.begin(BridgeCall::ControlOut {
                request: setup.request,
                value: setup.value,
                length: data.len(),
            })?;
            self.require_open()?;

            let written = data.len();
            self.state().control_writes.push((setup, data));
            Ok(written)
        })
    }

    fn transfer_in(&self, endpoint: u8, length: usize) -> BridgeFuture<'_, BridgeResult<Vec<u8>>> {
        Box::pin(async move {
            self.begin(BridgeCall::TransferIn { endpoint, length })?;
            self.require_open()?;
            self.endpoint_ready(endpoint).await?;

            let loopback = self.loopback(endpoint);
            loopback
                .rx
                .recv()
                .await
                .map_err(|_| BridgeError::Disconnected)
        })
    }

    fn transfer_out(&self, endpoint: u8, data: Vec<u8>) -> BridgeFuture<'_, BridgeResult<usize>> {
        Box::pin(async move {
            self.begin(BridgeCall::TransferOut {
                endpoint,
                length: data.len(),
            })?;
            self.require_open()?;
            self.endpoint_ready(endpoint).await?;

            let written = data.len();
            let transform = self.state().transform.clone();
            let looped = match transform {
                Some(transform) => transform(&data),
                None => data,
            };
            let loopback = self.loopback(endpoint);
            loopback
                .tx
                .send(looped)
                .await
                .map_err(|_| BridgeError::Disconnected)?;
            Ok(written)
        })
    }
}
