//! `libusb_*` C ABI
//!
//! Thin `extern "C"` wrappers over [`Context`], [`Device`], [`DeviceHandle`]
//! and [`Transfer`]. Opaque C handles are Rust objects behind raw pointers:
//!
//! - `libusb_context *` is a boxed [`Context`]
//! - `libusb_device *` is an `Arc<Device>` (one strong count per reference)
//! - `libusb_device_handle *` is a boxed [`DeviceHandle`]
//! - `struct libusb_transfer *` is a [`RawTransfer`] allocated here with its
//!   trailing isochronous packet descriptors
//!
//! Calls that talk to the host block the calling thread on the host context,
//! so they must not be made from the host thread. The bridge and host
//! handle are installed once per process with [`install`].

use crate::bridge::HostBridge;
use crate::context::{Context, ContextOptions};
use crate::device::Device;
use crate::handle::DeviceHandle;
use crate::transfer::Transfer;
use common::HostHandle;
use protocol::abi::{TRANSFER_FREE_BUFFER, TRANSFER_FREE_TRANSFER};
use protocol::status::SUCCESS;
use protocol::{
    LIBRARY_VERSION, RawDeviceDescriptor, RawIsoPacketDescriptor, RawTransfer, RawVersion,
    TransferStatus, TransferType, UsbError, UsbResult,
};
use std::alloc::{Layout, alloc_zeroed, dealloc};
use std::ffi::{c_char, c_int, c_uint, c_void};
use std::mem::{align_of, offset_of, size_of};
use std::ptr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::{debug, warn};

unsafe extern "C" {
    fn free(ptr: *mut c_void);
}

struct FfiRuntime {
    bridge: Arc<dyn HostBridge>,
    host: HostHandle,
    options: ContextOptions,
}

static RUNTIME: OnceLock<FfiRuntime> = OnceLock::new();

/// Bind the C ABI to a bridge and host context
///
/// Returns `false` if a runtime was already installed; the first
/// installation stays in effect.
pub fn install(bridge: Arc<dyn HostBridge>, host: HostHandle, options: ContextOptions) -> bool {
    let installed = RUNTIME
        .set(FfiRuntime {
            bridge,
            host,
            options,
        })
        .is_ok();
    if !installed {
        warn!("libusb runtime already installed");
    }
    installed
}

fn code(result: UsbResult<()>) -> c_int {
    match result {
        Ok(()) => SUCCESS,
        Err(e) => e.code(),
    }
}

fn block_on<F, T>(host: &HostHandle, future: F) -> UsbResult<T>
where
    F: Future<Output = UsbResult<T>> + Send + 'static,
    T: Send + 'static,
{
    host.block_on(future).unwrap_or_else(|e| {
        warn!("Host call failed: {}", e);
        Err(UsbError::Other)
    })
}

// ============================================================================
// Context
// ============================================================================

/// # Safety
/// `ctx` must be null or valid for writing a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_init(ctx: *mut *mut Context) -> c_int {
    if ctx.is_null() {
        return UsbError::InvalidParam.code();
    }
    let Some(runtime) = RUNTIME.get() else {
        debug!("libusb_init without an installed runtime");
        return UsbError::NotSupported.code();
    };

    match Context::init_with_options(
        runtime.bridge.clone(),
        runtime.host.clone(),
        runtime.options.clone(),
    ) {
        Ok(context) => {
            unsafe { *ctx = Box::into_raw(Box::new(context)) };
            SUCCESS
        }
        Err(e) => e.code(),
    }
}

/// # Safety
/// `ctx` must be null or a pointer returned by `libusb_init` not yet passed
/// to `libusb_exit`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_exit(ctx: *mut Context) {
    if !ctx.is_null() {
        unsafe { Box::from_raw(ctx) }.exit();
    }
}

/// # Safety
/// `ctx` must be null or a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_set_debug(ctx: *mut Context, level: c_int) {
    if let Some(context) = unsafe { ctx.as_ref() } {
        context.set_debug(level);
    }
}

struct StaticVersion(RawVersion);

// The record only points at string literals.
unsafe impl Sync for StaticVersion {}

static VERSION: StaticVersion = StaticVersion(RawVersion {
    major: LIBRARY_VERSION.major,
    minor: LIBRARY_VERSION.minor,
    micro: LIBRARY_VERSION.micro,
    nano: LIBRARY_VERSION.nano,
    rc: c"".as_ptr(),
    describe: c"http://libusb.info".as_ptr(),
});

#[unsafe(no_mangle)]
pub extern "C" fn libusb_get_version() -> *const RawVersion {
    &VERSION.0
}

#[unsafe(no_mangle)]
pub extern "C" fn libusb_error_name(error_code: c_int) -> *const c_char {
    if error_code == SUCCESS {
        return c"LIBUSB_SUCCESS".as_ptr();
    }
    match UsbError::from_code(error_code) {
        Ok(e) => e.name().as_ptr(),
        Err(_) => c"**UNKNOWN**".as_ptr(),
    }
}

/// # Safety
/// `ctx` must be a live context.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_handle_events(ctx: *mut Context) -> c_int {
    match unsafe { ctx.as_ref() } {
        Some(context) => code(context.handle_events()),
        None => UsbError::InvalidParam.code(),
    }
}

// ============================================================================
// Devices
// ============================================================================

/// # Safety
/// `ctx` must be a live context and `list` valid for writing a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_device_list(
    ctx: *mut Context,
    list: *mut *mut *mut Device,
) -> isize {
    let Some(context) = (unsafe { ctx.as_ref() }) else {
        return UsbError::InvalidParam.code() as isize;
    };
    if list.is_null() {
        return UsbError::InvalidParam.code() as isize;
    }

    let devices = {
        let host = context.host().clone();
        let context = context.clone();
        block_on(&host, async move { context.get_device_list().await })
    };
    let devices = match devices {
        Ok(devices) => devices,
        Err(e) => return e.code() as isize,
    };

    let count = devices.len();
    let entries: Box<[*mut Device]> = devices
        .into_iter()
        .map(|d| Arc::into_raw(d).cast_mut())
        .chain(std::iter::once(ptr::null_mut()))
        .collect();
    unsafe { *list = Box::into_raw(entries).cast::<*mut Device>() };
    count as isize
}

/// # Safety
/// `list` must be null or a list returned by `libusb_get_device_list` not
/// yet freed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_free_device_list(list: *mut *mut Device, unref_devices: c_int) {
    if list.is_null() {
        return;
    }

    let mut len = 0;
    while !unsafe { *list.add(len) }.is_null() {
        if unref_devices != 0 {
            unsafe { Arc::decrement_strong_count(*list.add(len)) };
        }
        len += 1;
    }
    drop(unsafe { Box::from_raw(ptr::slice_from_raw_parts_mut(list, len + 1)) });
}

/// # Safety
/// `dev` must be a live device reference.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_ref_device(dev: *mut Device) -> *mut Device {
    if !dev.is_null() {
        unsafe { Arc::increment_strong_count(dev) };
    }
    dev
}

/// # Safety
/// `dev` must be null or a live device reference owned by the caller.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_unref_device(dev: *mut Device) {
    if !dev.is_null() {
        unsafe { Arc::decrement_strong_count(dev) };
    }
}

/// # Safety
/// `dev` must be a live device and `desc` valid for writing a descriptor.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_device_descriptor(
    dev: *mut Device,
    desc: *mut RawDeviceDescriptor,
) -> c_int {
    let Some(device) = (unsafe { dev.as_ref() }) else {
        return UsbError::InvalidParam.code();
    };
    if desc.is_null() {
        return UsbError::InvalidParam.code();
    }
    unsafe { *desc = RawDeviceDescriptor::from(&device.descriptor()) };
    SUCCESS
}

/// # Safety
/// `dev` must be a live device.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_bus_number(dev: *mut Device) -> u8 {
    unsafe { dev.as_ref() }.map_or(0, Device::bus_number)
}

/// # Safety
/// `dev` must be a live device.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_port_number(dev: *mut Device) -> u8 {
    unsafe { dev.as_ref() }.map_or(0, Device::port_number)
}

/// # Safety
/// `dev` must be a live device and `port_numbers` valid for writing
/// `port_numbers_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_port_numbers(
    dev: *mut Device,
    port_numbers: *mut u8,
    port_numbers_len: c_int,
) -> c_int {
    let Some(device) = (unsafe { dev.as_ref() }) else {
        return UsbError::InvalidParam.code();
    };
    if port_numbers.is_null() || port_numbers_len <= 0 {
        return UsbError::InvalidParam.code();
    }
    let ports =
        unsafe { std::slice::from_raw_parts_mut(port_numbers, port_numbers_len as usize) };
    match device.port_numbers(ports) {
        Ok(n) => n as c_int,
        Err(e) => e.code(),
    }
}

/// # Safety
/// `dev` must be a live device.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_device_speed(dev: *mut Device) -> c_int {
    unsafe { dev.as_ref() }.map_or(0, |d| d.speed().code())
}

// ============================================================================
// Device handles
// ============================================================================

/// # Safety
/// `dev` must be a live device and `handle` valid for writing a pointer.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_open(dev: *mut Device, handle: *mut *mut DeviceHandle) -> c_int {
    if dev.is_null() || handle.is_null() {
        return UsbError::InvalidParam.code();
    }
    let device = unsafe {
        Arc::increment_strong_count(dev);
        Arc::from_raw(dev)
    };
    let host = match device.context() {
        Ok(context) => context.host.clone(),
        Err(e) => return e.code(),
    };

    match block_on(&host, async move { DeviceHandle::open(device).await }) {
        Ok(opened) => {
            unsafe { *handle = Box::into_raw(Box::new(opened)) };
            SUCCESS
        }
        Err(e) => e.code(),
    }
}

/// # Safety
/// `dev_handle` must be null or a handle returned by `libusb_open` not yet
/// closed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_close(dev_handle: *mut DeviceHandle) {
    if !dev_handle.is_null() {
        unsafe { Box::from_raw(dev_handle) }.close();
    }
}

/// Device of an open handle, without taking a reference
///
/// # Safety
/// `dev_handle` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_get_device(dev_handle: *mut DeviceHandle) -> *mut Device {
    unsafe { dev_handle.as_ref() }.map_or(ptr::null_mut(), |h| Arc::as_ptr(h.device()).cast_mut())
}

/// Run an awaited handle operation on the host context
///
/// # Safety
/// `dev_handle` must be null or a live handle.
unsafe fn with_handle<F, Fut, T>(dev_handle: *mut DeviceHandle, f: F) -> UsbResult<T>
where
    F: FnOnce(DeviceHandle) -> Fut,
    Fut: Future<Output = UsbResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let Some(handle) = (unsafe { dev_handle.as_ref() }) else {
        return Err(UsbError::InvalidParam);
    };
    let host = handle.device().context()?.host.clone();
    block_on(&host, f(handle.clone()))
}

/// # Safety
/// `dev_handle` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_claim_interface(
    dev_handle: *mut DeviceHandle,
    interface_number: c_int,
) -> c_int {
    let Ok(interface) = u8::try_from(interface_number) else {
        return UsbError::InvalidParam.code();
    };
    code(unsafe {
        with_handle(dev_handle, move |h| async move {
            h.claim_interface(interface).await
        })
    })
}

/// # Safety
/// `dev_handle` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_release_interface(
    dev_handle: *mut DeviceHandle,
    interface_number: c_int,
) -> c_int {
    let Ok(interface) = u8::try_from(interface_number) else {
        return UsbError::InvalidParam.code();
    };
    code(unsafe {
        with_handle(dev_handle, move |h| async move {
            h.release_interface(interface).await
        })
    })
}

/// # Safety
/// `dev_handle` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_reset_device(dev_handle: *mut DeviceHandle) -> c_int {
    code(unsafe { with_handle(dev_handle, |h| async move { h.reset().await }) })
}

/// # Safety
/// `dev_handle` must be a live handle.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_set_configuration(
    dev_handle: *mut DeviceHandle,
    configuration: c_int,
) -> c_int {
    match unsafe { dev_handle.as_ref() } {
        Some(handle) => code(handle.set_configuration(configuration)),
        None => UsbError::InvalidParam.code(),
    }
}

/// # Safety
/// `dev_handle` must be a live handle and `data` valid for reading and
/// writing `w_length` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_control_transfer(
    dev_handle: *mut DeviceHandle,
    request_type: u8,
    b_request: u8,
    w_value: u16,
    w_index: u16,
    data: *mut u8,
    w_length: u16,
    timeout: c_uint,
) -> c_int {
    let length = w_length as usize;
    if data.is_null() && length > 0 {
        return UsbError::InvalidParam.code();
    }
    let mut buffer = if length > 0 {
        unsafe { std::slice::from_raw_parts(data, length) }.to_vec()
    } else {
        Vec::new()
    };
    let timeout = Duration::from_millis(timeout as u64);

    let result = unsafe {
        with_handle(dev_handle, move |h| async move {
            let n = h
                .control_transfer(request_type, b_request, w_value, w_index, &mut buffer, timeout)
                .await?;
            Ok((n, buffer))
        })
    };

    match result {
        Ok((n, buffer)) => {
            if n > 0 && request_type & 0x80 != 0 {
                unsafe { ptr::copy_nonoverlapping(buffer.as_ptr(), data, n) };
            }
            n as c_int
        }
        Err(e) => e.code(),
    }
}

/// # Safety
/// Pointer arguments are not accessed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_bulk_transfer(
    dev_handle: *mut DeviceHandle,
    endpoint: u8,
    _data: *mut u8,
    _length: c_int,
    _actual_length: *mut c_int,
    timeout: c_uint,
) -> c_int {
    match unsafe { dev_handle.as_ref() } {
        Some(handle) => handle
            .bulk_transfer(endpoint, &mut [], Duration::from_millis(timeout as u64))
            .map_or_else(UsbError::code, |n| n as c_int),
        None => UsbError::InvalidParam.code(),
    }
}

/// # Safety
/// Pointer arguments are not accessed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_interrupt_transfer(
    dev_handle: *mut DeviceHandle,
    endpoint: u8,
    _data: *mut u8,
    _length: c_int,
    _actual_length: *mut c_int,
    timeout: c_uint,
) -> c_int {
    match unsafe { dev_handle.as_ref() } {
        Some(handle) => handle
            .interrupt_transfer(endpoint, &mut [], Duration::from_millis(timeout as u64))
            .map_or_else(UsbError::code, |n| n as c_int),
        None => UsbError::InvalidParam.code(),
    }
}

// ============================================================================
// Transfers
// ============================================================================

/// Allocation backing a `struct libusb_transfer *`
///
/// The capacity header lets `libusb_free_transfer` rebuild the layout the
/// transfer was allocated with.
#[repr(C)]
struct TransferAllocation {
    iso_capacity: usize,
    transfer: RawTransfer,
}

const TRANSFER_OFFSET: usize = offset_of!(TransferAllocation, transfer);

fn transfer_layout(iso_packets: usize) -> Option<Layout> {
    let iso_bytes = size_of::<RawIsoPacketDescriptor>().checked_mul(iso_packets)?;
    let size = (TRANSFER_OFFSET + offset_of!(RawTransfer, iso_packet_desc))
        .checked_add(iso_bytes)?
        .max(size_of::<TransferAllocation>());
    Layout::from_size_align(size, align_of::<TransferAllocation>()).ok()
}

#[unsafe(no_mangle)]
pub extern "C" fn libusb_alloc_transfer(iso_packets: c_int) -> *mut RawTransfer {
    let Ok(iso_packets) = usize::try_from(iso_packets) else {
        return ptr::null_mut();
    };
    let Some(layout) = transfer_layout(iso_packets) else {
        return ptr::null_mut();
    };

    let allocation = unsafe { alloc_zeroed(layout) }.cast::<TransferAllocation>();
    if allocation.is_null() {
        return ptr::null_mut();
    }
    unsafe {
        (*allocation).iso_capacity = iso_packets;
        (*allocation).transfer.num_iso_packets = iso_packets as c_int;
        ptr::addr_of_mut!((*allocation).transfer)
    }
}

/// # Safety
/// `transfer` must be null or a pointer returned by `libusb_alloc_transfer`
/// that is not in flight.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_free_transfer(transfer: *mut RawTransfer) {
    if transfer.is_null() {
        return;
    }
    unsafe {
        if (*transfer).flags & TRANSFER_FREE_BUFFER != 0 && !(*transfer).buffer.is_null() {
            free((*transfer).buffer.cast());
        }

        let allocation = transfer
            .cast::<u8>()
            .sub(TRANSFER_OFFSET)
            .cast::<TransferAllocation>();
        let iso_capacity = (*allocation).iso_capacity;
        if let Some(layout) = transfer_layout(iso_capacity) {
            dealloc(allocation.cast(), layout);
        }
    }
}

/// C transfer completed from the callback of its Rust counterpart
struct PendingRawTransfer(*mut RawTransfer);

// The C caller keeps the transfer alive and untouched until its callback
// runs; only the completing thread accesses it.
unsafe impl Send for PendingRawTransfer {}

impl PendingRawTransfer {
    /// Copy results back, run the C callback, free if requested
    ///
    /// # Safety
    /// The pointer must still reference the submitted transfer.
    unsafe fn complete(self, done: &Transfer) {
        let raw = self.0;
        unsafe {
            let status = done.status();
            (*raw).status = status.code();
            (*raw).actual_length = done.actual_length() as c_int;

            if done.endpoint().is_in() && !(*raw).buffer.is_null() {
                let data = done.data();
                ptr::copy_nonoverlapping(data.as_ptr(), (*raw).buffer, data.len());
            }

            let free_after = (*raw).flags & TRANSFER_FREE_TRANSFER != 0;
            match (*raw).callback {
                Some(callback) => callback(raw),
                None => debug!(?status, "C transfer finished without a callback"),
            }
            if free_after {
                libusb_free_transfer(raw);
            }
        }
    }
}

/// # Safety
/// `transfer` must be a live transfer whose `dev_handle` is a live handle
/// and whose buffer is valid for `length` bytes until the callback runs.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_submit_transfer(transfer: *mut RawTransfer) -> c_int {
    let Some(raw) = (unsafe { transfer.as_mut() }) else {
        return UsbError::InvalidParam.code();
    };
    let transfer_type = match TransferType::from_code(raw.transfer_type) {
        Ok(transfer_type @ (TransferType::Bulk | TransferType::Interrupt)) => transfer_type,
        _ => {
            warn!("Transfer type not implemented: {}", raw.transfer_type);
            return UsbError::Io.code();
        }
    };
    let Some(handle) = (unsafe { raw.dev_handle.cast::<DeviceHandle>().as_ref() }) else {
        return UsbError::InvalidParam.code();
    };
    let Ok(length) = usize::try_from(raw.length) else {
        return UsbError::InvalidParam.code();
    };
    if raw.buffer.is_null() && length > 0 {
        return UsbError::InvalidParam.code();
    }

    let mut submitted = Transfer::alloc(0);
    submitted.set_handle(handle.clone());
    submitted.set_transfer_type(transfer_type);
    submitted.set_endpoint(raw.endpoint);
    submitted.set_timeout(Duration::from_millis(raw.timeout as u64));
    submitted.set_buffer(if submitted.endpoint().is_in() || length == 0 {
        vec![0; length]
    } else {
        unsafe { std::slice::from_raw_parts(raw.buffer, length) }.to_vec()
    });

    raw.status = TransferStatus::Pending.code();
    raw.actual_length = 0;

    let pending = PendingRawTransfer(transfer);
    submitted.set_callback(Box::new(move |done: Box<Transfer>| unsafe {
        pending.complete(&done)
    }));

    match submitted.submit() {
        Ok(_) => SUCCESS,
        Err(e) => e.error.code(),
    }
}

/// # Safety
/// `transfer` is not accessed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn libusb_cancel_transfer(_transfer: *mut RawTransfer) -> c_int {
    debug!("libusb_cancel_transfer not supported");
    UsbError::NotSupported.code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;

    #[test]
    fn test_error_name() {
        let name = |code| unsafe { CStr::from_ptr(libusb_error_name(code)) };
        assert_eq!(name(0), c"LIBUSB_SUCCESS");
        assert_eq!(name(-12), c"LIBUSB_ERROR_NOT_SUPPORTED");
        assert_eq!(name(-1000), c"**UNKNOWN**");
    }

    #[test]
    fn test_version_record() {
        let version = unsafe { &*libusb_get_version() };
        assert_eq!(
            (version.major, version.minor, version.micro, version.nano),
            (1, 0, 24, 0)
        );
        let describe = unsafe { CStr::from_ptr(version.describe) };
        assert_eq!(describe, c"http://libusb.info");
        assert_eq!(unsafe { CStr::from_ptr(version.rc) }, c"");
    }

    #[test]
    fn test_alloc_transfer_layout() {
        for iso in [0, 1, 5] {
            let transfer = libusb_alloc_transfer(iso);
            assert!(!transfer.is_null());
            unsafe {
                assert_eq!((*transfer).num_iso_packets, iso);
                assert_eq!((*transfer).status, 0);
                assert!((*transfer).callback.is_none());

                let packets = std::slice::from_raw_parts(
                    ptr::addr_of!((*transfer).iso_packet_desc).cast::<RawIsoPacketDescriptor>(),
                    iso as usize,
                );
                assert!(packets.iter().all(|p| *p == RawIsoPacketDescriptor::default()));
                libusb_free_transfer(transfer);
            }
        }
        assert!(libusb_alloc_transfer(-1).is_null());
    }

    #[test]
    fn test_null_arguments_are_rejected() {
        unsafe {
            assert_eq!(libusb_init(ptr::null_mut()), UsbError::InvalidParam.code());
            assert_eq!(
                libusb_submit_transfer(ptr::null_mut()),
                UsbError::InvalidParam.code()
            );
            assert_eq!(
                libusb_claim_interface(ptr::null_mut(), 0),
                UsbError::InvalidParam.code()
            );
            assert_eq!(
                libusb_handle_events(ptr::null_mut()),
                UsbError::InvalidParam.code()
            );
            assert!(libusb_get_device(ptr::null_mut()).is_null());
        }
    }

    #[test]
    fn test_submit_without_handle() {
        let transfer = libusb_alloc_transfer(0);
        unsafe {
            (*transfer).transfer_type = TransferType::Bulk.code();
            assert_eq!(
                libusb_submit_transfer(transfer),
                UsbError::InvalidParam.code()
            );
            libusb_free_transfer(transfer);
        }
    }
}
