//! `repr(C)` records shared with C callers
//!
//! Field order, widths and padding follow `libusb.h` exactly; the size
//! assertions at the bottom of this file pin the layout.

#![allow(non_snake_case)]

use std::ffi::{c_char, c_int, c_uint, c_void};

/// `struct libusb_device_descriptor`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawDeviceDescriptor {
    pub bLength: u8,
    pub bDescriptorType: u8,
    pub bcdUSB: u16,
    pub bDeviceClass: u8,
    pub bDeviceSubClass: u8,
    pub bDeviceProtocol: u8,
    pub bMaxPacketSize0: u8,
    pub idVendor: u16,
    pub idProduct: u16,
    pub bcdDevice: u16,
    pub iManufacturer: u8,
    pub iProduct: u8,
    pub iSerialNumber: u8,
    pub bNumConfigurations: u8,
}

/// `struct libusb_iso_packet_descriptor`
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RawIsoPacketDescriptor {
    pub length: c_uint,
    pub actual_length: c_uint,
    pub status: c_int,
}

/// `libusb_transfer_cb_fn`
pub type RawTransferCallback = Option<unsafe extern "C" fn(transfer: *mut RawTransfer)>;

/// `LIBUSB_TRANSFER_SHORT_NOT_OK`
pub const TRANSFER_SHORT_NOT_OK: u8 = 1 << 0;
/// `LIBUSB_TRANSFER_FREE_BUFFER`
pub const TRANSFER_FREE_BUFFER: u8 = 1 << 1;
/// `LIBUSB_TRANSFER_FREE_TRANSFER`
pub const TRANSFER_FREE_TRANSFER: u8 = 1 << 2;
/// `LIBUSB_TRANSFER_ADD_ZERO_PACKET`
pub const TRANSFER_ADD_ZERO_PACKET: u8 = 1 << 3;

/// `struct libusb_transfer`
///
/// Allocated with `num_iso_packets` trailing [`RawIsoPacketDescriptor`]s that
/// start at the offset of `iso_packet_desc`.
#[repr(C)]
#[derive(Debug)]
pub struct RawTransfer {
    /// `libusb_device_handle *`, opaque to this crate
    pub dev_handle: *mut c_void,
    pub flags: u8,
    pub endpoint: u8,
    /// `type` in C
    pub transfer_type: u8,
    pub timeout: c_uint,
    /// `enum libusb_transfer_status`
    pub status: c_int,
    pub length: c_int,
    pub actual_length: c_int,
    pub callback: RawTransferCallback,
    pub user_data: *mut c_void,
    pub buffer: *mut u8,
    pub num_iso_packets: c_int,
    pub iso_packet_desc: [RawIsoPacketDescriptor; 0],
}

/// `struct libusb_version`
#[repr(C)]
#[derive(Debug)]
pub struct RawVersion {
    pub major: u16,
    pub minor: u16,
    pub micro: u16,
    pub nano: u16,
    pub rc: *const c_char,
    pub describe: *const c_char,
}

const _: () = assert!(std::mem::size_of::<RawDeviceDescriptor>() == 18);
const _: () = assert!(std::mem::size_of::<RawIsoPacketDescriptor>() == 12);
const _: () = assert!(std::mem::offset_of!(RawDeviceDescriptor, idVendor) == 8);
const _: () = assert!(std::mem::offset_of!(RawDeviceDescriptor, bNumConfigurations) == 17);

#[cfg(target_pointer_width = "64")]
const _: () = {
    assert!(std::mem::offset_of!(RawTransfer, timeout) == 12);
    assert!(std::mem::offset_of!(RawTransfer, callback) == 32);
    assert!(std::mem::offset_of!(RawTransfer, iso_packet_desc) == 60);
    assert!(std::mem::size_of::<RawTransfer>() == 64);
};

#[cfg(target_pointer_width = "32")]
const _: () = {
    assert!(std::mem::offset_of!(RawTransfer, callback) == 24);
    assert!(std::mem::offset_of!(RawTransfer, iso_packet_desc) == 40);
    assert!(std::mem::size_of::<RawTransfer>() == 40);
};
