//! Standard USB device descriptor
//!
//! The descriptor has two fixed representations: the 18-byte little-endian
//! wire form returned by `GET_DESCRIPTOR(Device)`, and the `repr(C)` record
//! [`RawDeviceDescriptor`] filled in by `libusb_get_device_descriptor`.
//! [`DeviceDescriptor`] is the typed record both convert from and to.

use crate::abi::RawDeviceDescriptor;
use crate::error::{ProtocolError, Result};
use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// `LIBUSB_DT_DEVICE`
pub const DT_DEVICE: u8 = 0x01;

/// `LIBUSB_DT_DEVICE_SIZE`
pub const DT_DEVICE_SIZE: usize = 18;

/// Control endpoint packet size reported for every emulated device
pub const MAX_PACKET_SIZE_0: u8 = 64;

/// String descriptor indices reported for every emulated device
pub const MANUFACTURER_INDEX: u8 = 1;
pub const PRODUCT_INDEX: u8 = 2;
pub const SERIAL_NUMBER_INDEX: u8 = 3;

/// Binary-coded decimal version number (`bcdUSB`, `bcdDevice`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BcdVersion(pub u16);

impl BcdVersion {
    /// `bcdUSB` layout: major in the high byte, minor in the low byte
    pub fn from_usb(major: u8, minor: u8) -> Self {
        Self(((major as u16) << 8) | minor as u16)
    }

    /// `bcdDevice` layout: major byte, then minor and sub-minor nibbles
    pub fn from_device(major: u8, minor: u8, sub_minor: u8) -> Self {
        Self(((major as u16) << 8) | (((minor as u16) << 4) | sub_minor as u16))
    }

    pub fn major(self) -> u8 {
        (self.0 >> 8) as u8
    }

    pub fn minor(self) -> u8 {
        ((self.0 >> 4) & 0x0f) as u8
    }

    pub fn sub_minor(self) -> u8 {
        (self.0 & 0x0f) as u8
    }
}

/// Typed device descriptor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// USB specification release (`bcdUSB`)
    pub usb_version: BcdVersion,
    /// USB device class
    pub class: u8,
    /// USB device subclass
    pub subclass: u8,
    /// USB device protocol
    pub protocol: u8,
    /// Maximum packet size for endpoint 0
    pub max_packet_size: u8,
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Device release number (`bcdDevice`)
    pub device_version: BcdVersion,
    /// Index of the manufacturer string descriptor
    pub manufacturer_index: u8,
    /// Index of the product string descriptor
    pub product_index: u8,
    /// Index of the serial number string descriptor
    pub serial_number_index: u8,
    /// Number of configurations
    pub num_configurations: u8,
}

impl Default for DeviceDescriptor {
    fn default() -> Self {
        Self {
            usb_version: BcdVersion::default(),
            class: 0,
            subclass: 0,
            protocol: 0,
            max_packet_size: MAX_PACKET_SIZE_0,
            vendor_id: 0,
            product_id: 0,
            device_version: BcdVersion::default(),
            manufacturer_index: MANUFACTURER_INDEX,
            product_index: PRODUCT_INDEX,
            serial_number_index: SERIAL_NUMBER_INDEX,
            num_configurations: 0,
        }
    }
}

impl DeviceDescriptor {
    pub fn builder() -> DeviceDescriptorBuilder {
        DeviceDescriptorBuilder::default()
    }

    /// Encode into the 18-byte wire form
    pub fn to_bytes(&self) -> [u8; DT_DEVICE_SIZE] {
        let mut buf = [0u8; DT_DEVICE_SIZE];
        buf[0] = DT_DEVICE_SIZE as u8;
        buf[1] = DT_DEVICE;
        LittleEndian::write_u16(&mut buf[2..4], self.usb_version.0);
        buf[4] = self.class;
        buf[5] = self.subclass;
        buf[6] = self.protocol;
        buf[7] = self.max_packet_size;
        LittleEndian::write_u16(&mut buf[8..10], self.vendor_id);
        LittleEndian::write_u16(&mut buf[10..12], self.product_id);
        LittleEndian::write_u16(&mut buf[12..14], self.device_version.0);
        buf[14] = self.manufacturer_index;
        buf[15] = self.product_index;
        buf[16] = self.serial_number_index;
        buf[17] = self.num_configurations;
        buf
    }

    /// Decode the 18-byte wire form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DT_DEVICE_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: DT_DEVICE_SIZE,
                available: bytes.len(),
            });
        }

        let mut reader = Cursor::new(bytes);
        let length = reader.read_u8()?;
        if length as usize != DT_DEVICE_SIZE {
            return Err(ProtocolError::InvalidDescriptor {
                field: "bLength",
                value: length as u32,
            });
        }
        let descriptor_type = reader.read_u8()?;
        if descriptor_type != DT_DEVICE {
            return Err(ProtocolError::InvalidDescriptor {
                field: "bDescriptorType",
                value: descriptor_type as u32,
            });
        }

        Ok(Self {
            usb_version: BcdVersion(reader.read_u16::<LittleEndian>()?),
            class: reader.read_u8()?,
            subclass: reader.read_u8()?,
            protocol: reader.read_u8()?,
            max_packet_size: reader.read_u8()?,
            vendor_id: reader.read_u16::<LittleEndian>()?,
            product_id: reader.read_u16::<LittleEndian>()?,
            device_version: BcdVersion(reader.read_u16::<LittleEndian>()?),
            manufacturer_index: reader.read_u8()?,
            product_index: reader.read_u8()?,
            serial_number_index: reader.read_u8()?,
            num_configurations: reader.read_u8()?,
        })
    }
}

impl From<&DeviceDescriptor> for RawDeviceDescriptor {
    fn from(d: &DeviceDescriptor) -> Self {
        RawDeviceDescriptor {
            bLength: DT_DEVICE_SIZE as u8,
            bDescriptorType: DT_DEVICE,
            bcdUSB: d.usb_version.0,
            bDeviceClass: d.class,
            bDeviceSubClass: d.subclass,
            bDeviceProtocol: d.protocol,
            bMaxPacketSize0: d.max_packet_size,
            idVendor: d.vendor_id,
            idProduct: d.product_id,
            bcdDevice: d.device_version.0,
            iManufacturer: d.manufacturer_index,
            iProduct: d.product_index,
            iSerialNumber: d.serial_number_index,
            bNumConfigurations: d.num_configurations,
        }
    }
}

impl From<&RawDeviceDescriptor> for DeviceDescriptor {
    fn from(raw: &RawDeviceDescriptor) -> Self {
        DeviceDescriptor {
            usb_version: BcdVersion(raw.bcdUSB),
            class: raw.bDeviceClass,
            subclass: raw.bDeviceSubClass,
            protocol: raw.bDeviceProtocol,
            max_packet_size: raw.bMaxPacketSize0,
            vendor_id: raw.idVendor,
            product_id: raw.idProduct,
            device_version: BcdVersion(raw.bcdDevice),
            manufacturer_index: raw.iManufacturer,
            product_index: raw.iProduct,
            serial_number_index: raw.iSerialNumber,
            num_configurations: raw.bNumConfigurations,
        }
    }
}

/// Builder for descriptors of emulated devices
///
/// Fields a host does not report (packet size, string indices) keep their
/// fixed values.
#[derive(Debug, Clone, Default)]
pub struct DeviceDescriptorBuilder {
    descriptor: DeviceDescriptor,
}

impl DeviceDescriptorBuilder {
    pub fn usb_version(mut self, version: BcdVersion) -> Self {
        self.descriptor.usb_version = version;
        self
    }

    pub fn class(mut self, class: u8, subclass: u8, protocol: u8) -> Self {
        self.descriptor.class = class;
        self.descriptor.subclass = subclass;
        self.descriptor.protocol = protocol;
        self
    }

    pub fn vendor_id(mut self, vendor_id: u16) -> Self {
        self.descriptor.vendor_id = vendor_id;
        self
    }

    pub fn product_id(mut self, product_id: u16) -> Self {
        self.descriptor.product_id = product_id;
        self
    }

    pub fn device_version(mut self, version: BcdVersion) -> Self {
        self.descriptor.device_version = version;
        self
    }

    pub fn num_configurations(mut self, count: u8) -> Self {
        self.descriptor.num_configurations = count;
        self
    }

    pub fn build(self) -> DeviceDescriptor {
        self.descriptor
    }
}
