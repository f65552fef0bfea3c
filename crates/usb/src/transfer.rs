//! Asynchronous transfers
//!
//! A [`Transfer`] is filled by the caller, submitted, and handed back through
//! its callback once finished. Between submission and delivery the transfer
//! is owned by the host-side future performing the I/O and then by the
//! context's completion queue, so it cannot be touched, freed or completed
//! twice while in flight.
//!
//! ```text
//!  submit ──► host future ──► bridge transfer_in/out
//!                 │
//!                 ▼ record terminal status
//!          completion queue ──► handle_events ──► callback(Box<Transfer>)
//! ```

use crate::bridge::BridgeResult;
use crate::context::ContextInner;
use crate::handle::DeviceHandle;
use protocol::{
    EndpointAddress, RawIsoPacketDescriptor, TransferStatus, TransferType, UsbError,
};
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

static NEXT_TRANSFER_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique transfer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransferId(pub u64);

impl TransferId {
    fn next() -> Self {
        Self(NEXT_TRANSFER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for TransferId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "transfer#{}", self.0)
    }
}

/// Completion callback, receives ownership of the finished transfer
pub type TransferCallback = Box<dyn FnOnce(Box<Transfer>) + Send>;

/// Rejected submission
///
/// The transfer is handed back untouched; no completion will be delivered.
#[derive(Debug, Error)]
#[error("Failed to submit {}: {error}", .transfer.id())]
pub struct SubmitError {
    pub error: UsbError,
    pub transfer: Box<Transfer>,
}

pub struct Transfer {
    id: TransferId,
    handle: Option<DeviceHandle>,
    endpoint: EndpointAddress,
    transfer_type: TransferType,
    timeout: Duration,
    status: TransferStatus,
    buffer: Vec<u8>,
    length: usize,
    actual_length: usize,
    callback: Option<TransferCallback>,
    user_data: usize,
    iso_packets: Vec<RawIsoPacketDescriptor>,
}

impl std::fmt::Debug for Transfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transfer")
            .field("id", &self.id)
            .field("endpoint", &format_args!("{:#04x}", self.endpoint.0))
            .field("transfer_type", &self.transfer_type)
            .field("status", &self.status)
            .field("length", &self.length)
            .field("actual_length", &self.actual_length)
            .field("has_callback", &self.callback.is_some())
            .field("iso_packets", &self.iso_packets.len())
            .finish()
    }
}

impl Transfer {
    /// Zero-initialized transfer with `iso_packets` packet descriptors
    pub fn alloc(iso_packets: usize) -> Box<Self> {
        Box::new(Self {
            id: TransferId::next(),
            handle: None,
            endpoint: EndpointAddress(0),
            transfer_type: TransferType::Control,
            timeout: Duration::ZERO,
            status: TransferStatus::Pending,
            buffer: Vec::new(),
            length: 0,
            actual_length: 0,
            callback: None,
            user_data: 0,
            iso_packets: vec![RawIsoPacketDescriptor::default(); iso_packets],
        })
    }

    /// Prepare a bulk transfer
    ///
    /// For OUT endpoints `buffer` holds the data to send; for IN endpoints
    /// its length is the number of bytes requested.
    pub fn fill_bulk(
        &mut self,
        handle: &DeviceHandle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: TransferCallback,
        timeout: Duration,
    ) {
        self.fill(handle, TransferType::Bulk, endpoint, buffer, callback, timeout);
    }

    /// Prepare an interrupt transfer
    pub fn fill_interrupt(
        &mut self,
        handle: &DeviceHandle,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: TransferCallback,
        timeout: Duration,
    ) {
        self.fill(
            handle,
            TransferType::Interrupt,
            endpoint,
            buffer,
            callback,
            timeout,
        );
    }

    fn fill(
        &mut self,
        handle: &DeviceHandle,
        transfer_type: TransferType,
        endpoint: u8,
        buffer: Vec<u8>,
        callback: TransferCallback,
        timeout: Duration,
    ) {
        self.handle = Some(handle.clone());
        self.transfer_type = transfer_type;
        self.endpoint = EndpointAddress(endpoint);
        self.set_buffer(buffer);
        self.callback = Some(callback);
        self.timeout = timeout;
    }

    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn handle(&self) -> Option<&DeviceHandle> {
        self.handle.as_ref()
    }

    pub fn set_handle(&mut self, handle: DeviceHandle) {
        self.handle = Some(handle);
    }

    pub fn endpoint(&self) -> EndpointAddress {
        self.endpoint
    }

    pub fn set_endpoint(&mut self, endpoint: u8) {
        self.endpoint = EndpointAddress(endpoint);
    }

    pub fn transfer_type(&self) -> TransferType {
        self.transfer_type
    }

    pub fn set_transfer_type(&mut self, transfer_type: TransferType) {
        self.transfer_type = transfer_type;
    }

    /// Accepted but not enforced
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Replace the buffer; the requested length becomes the buffer length
    pub fn set_buffer(&mut self, buffer: Vec<u8>) {
        self.length = buffer.len();
        self.buffer = buffer;
    }

    /// Requested length, at most the buffer length
    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Bytes actually transferred
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(self.buffer.len())]
    }

    pub fn into_buffer(self: Box<Self>) -> Vec<u8> {
        self.buffer
    }

    pub fn set_callback(&mut self, callback: TransferCallback) {
        self.callback = Some(callback);
    }

    pub fn user_data(&self) -> usize {
        self.user_data
    }

    pub fn set_user_data(&mut self, user_data: usize) {
        self.user_data = user_data;
    }

    pub fn iso_packets(&self) -> &[RawIsoPacketDescriptor] {
        &self.iso_packets
    }

    /// Start the transfer
    ///
    /// Returns as soon as the I/O has been handed to the host. The result is
    /// delivered by a later `handle_events` on the owning context. Only bulk
    /// and interrupt transfers are supported; any other type fails with
    /// [`UsbError::Io`].
    pub fn submit(mut self: Box<Self>) -> Result<TransferId, SubmitError> {
        debug!(id = %self.id, endpoint = self.endpoint.0, transfer_type = ?self.transfer_type, "libusb_submit_transfer");

        if !matches!(
            self.transfer_type,
            TransferType::Bulk | TransferType::Interrupt
        ) {
            warn!("Transfer type not implemented: {:?}", self.transfer_type);
            return Err(SubmitError {
                error: UsbError::Io,
                transfer: self,
            });
        }
        if self.length > self.buffer.len() {
            return Err(SubmitError {
                error: UsbError::InvalidParam,
                transfer: self,
            });
        }
        let context = match self.handle.as_ref().map(|h| h.device().context()) {
            Some(Ok(context)) => context,
            Some(Err(error)) => {
                return Err(SubmitError {
                    error,
                    transfer: self,
                });
            }
            None => {
                return Err(SubmitError {
                    error: UsbError::InvalidParam,
                    transfer: self,
                });
            }
        };

        self.status = TransferStatus::Pending;
        self.actual_length = 0;

        let id = self.id;
        let bridge = context.bridge.clone();
        let completions = Arc::downgrade(&context);
        context.host.spawn(async move {
            let endpoint = self.endpoint.number();
            if self.endpoint.is_in() {
                let result = bridge.transfer_in(endpoint, self.length).await;
                self.record_in(result);
            } else {
                let data = self.buffer[..self.length].to_vec();
                let result = bridge.transfer_out(endpoint, data).await;
                self.record_out(result);
            }
            Self::enqueue(self, &completions);
        });

        Ok(id)
    }

    fn record_in(&mut self, result: BridgeResult<Vec<u8>>) {
        match result {
            Ok(data) => {
                let n = data.len().min(self.length);
                self.buffer[..n].copy_from_slice(&data[..n]);
                let status = if data.len() > self.length {
                    TransferStatus::Overflow
                } else {
                    TransferStatus::Completed
                };
                self.record(status, n);
            }
            Err(e) => {
                warn!("{} IN failed: {}", self.id, e);
                self.record(e.transfer_status(), 0);
            }
        }
    }

    fn record_out(&mut self, result: BridgeResult<usize>) {
        match result {
            Ok(written) => self.record(TransferStatus::Completed, written.min(self.length)),
            Err(e) => {
                warn!("{} OUT failed: {}", self.id, e);
                self.record(e.transfer_status(), 0);
            }
        }
    }

    fn record(&mut self, status: TransferStatus, actual_length: usize) {
        debug_assert!(!self.status.is_terminal(), "terminal status recorded twice");
        self.status = status;
        self.actual_length = actual_length;
        trace!(id = %self.id, ?status, actual_length, "Transfer finished");
    }

    fn enqueue(transfer: Box<Self>, completions: &Weak<ContextInner>) {
        match completions.upgrade() {
            Some(context) => context.completed.push(transfer),
            None => warn!("Context released before {} finished, dropping it", transfer.id),
        }
    }

    /// Hand the finished transfer to its callback
    pub(crate) fn deliver(mut self: Box<Self>) {
        match self.callback.take() {
            Some(callback) => callback(self),
            None => trace!(id = %self.id, "Finished transfer has no callback"),
        }
    }
}
