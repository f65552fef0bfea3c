//! USB type definitions
//!
//! Typed views of the bit-packed bytes that cross the device-access API:
//! endpoint addresses, transfer types, speeds and control setup fields.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};

/// Direction bit of endpoint addresses and `bmRequestType`
pub const DIRECTION_MASK: u8 = 0x80;

/// Endpoint number bits of an endpoint address
pub const ENDPOINT_NUMBER_MASK: u8 = 0x7f;

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

impl Direction {
    /// Decode direction from the high bit of an endpoint or request type byte
    pub fn from_bit(byte: u8) -> Self {
        if byte & DIRECTION_MASK == DIRECTION_MASK {
            Direction::In
        } else {
            Direction::Out
        }
    }
}

/// Endpoint address (direction bit + endpoint number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    /// Direction encoded in bit 7
    pub fn direction(self) -> Direction {
        Direction::from_bit(self.0)
    }

    /// Endpoint number without the direction bit
    pub fn number(self) -> u8 {
        self.0 & ENDPOINT_NUMBER_MASK
    }

    pub fn is_in(self) -> bool {
        self.direction() == Direction::In
    }
}

/// Transfer types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferType {
    /// Control transfer (endpoint 0)
    #[default]
    Control,
    /// Isochronous transfer
    Isochronous,
    /// Bulk transfer
    Bulk,
    /// Interrupt transfer
    Interrupt,
    /// Bulk stream transfer
    BulkStream,
}

impl TransferType {
    /// Published `LIBUSB_TRANSFER_TYPE_*` value
    pub fn code(self) -> u8 {
        match self {
            TransferType::Control => 0,
            TransferType::Isochronous => 1,
            TransferType::Bulk => 2,
            TransferType::Interrupt => 3,
            TransferType::BulkStream => 4,
        }
    }

    /// Parse a published `LIBUSB_TRANSFER_TYPE_*` value
    pub fn from_code(code: u8) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => TransferType::Control,
            1 => TransferType::Isochronous,
            2 => TransferType::Bulk,
            3 => TransferType::Interrupt,
            4 => TransferType::BulkStream,
            other => return Err(ProtocolError::UnknownTransferType(other)),
        })
    }
}

/// USB device speed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceSpeed {
    /// Speed not reported
    Unknown,
    /// Low speed - 1.5 Mbps (USB 1.0)
    Low,
    /// Full speed - 12 Mbps (USB 1.1)
    Full,
    /// High speed - 480 Mbps (USB 2.0)
    High,
    /// SuperSpeed - 5 Gbps (USB 3.0)
    Super,
    /// SuperSpeed+ - 10 Gbps (USB 3.1)
    SuperPlus,
}

impl DeviceSpeed {
    /// Published `LIBUSB_SPEED_*` value
    pub fn code(self) -> i32 {
        match self {
            DeviceSpeed::Unknown => 0,
            DeviceSpeed::Low => 1,
            DeviceSpeed::Full => 2,
            DeviceSpeed::High => 3,
            DeviceSpeed::Super => 4,
            DeviceSpeed::SuperPlus => 5,
        }
    }
}

/// Request type encoded in bits 5..6 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestKind {
    Standard,
    Class,
    Vendor,
    Reserved,
}

/// Request recipient encoded in bits 0..4 of `bmRequestType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recipient {
    Device,
    Interface,
    Endpoint,
    Other,
}

/// Decoded control transfer setup
///
/// `wLength` is carried separately by the transfer call because it describes
/// the data stage rather than the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlSetup {
    /// Data stage direction (bit 7)
    pub direction: Direction,
    /// Standard, class or vendor request (bits 5..6)
    pub kind: RequestKind,
    /// Request recipient (bits 0..4)
    pub recipient: Recipient,
    /// `bRequest`
    pub request: u8,
    /// `wValue`
    pub value: u16,
    /// `wIndex`
    pub index: u16,
}

impl ControlSetup {
    /// Decode the packed `bmRequestType` byte and the request fields
    pub fn new(request_type: u8, request: u8, value: u16, index: u16) -> Self {
        let kind = match (request_type & 0x60) >> 5 {
            0 => RequestKind::Standard,
            1 => RequestKind::Class,
            2 => RequestKind::Vendor,
            _ => RequestKind::Reserved,
        };
        let recipient = match request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        };

        Self {
            direction: Direction::from_bit(request_type),
            kind,
            recipient,
            request,
            value,
            index,
        }
    }

    /// Re-pack direction, kind and recipient into `bmRequestType`
    pub fn request_type(&self) -> u8 {
        let direction = match self.direction {
            Direction::In => DIRECTION_MASK,
            Direction::Out => 0,
        };
        let kind = match self.kind {
            RequestKind::Standard => 0,
            RequestKind::Class => 1,
            RequestKind::Vendor => 2,
            RequestKind::Reserved => 3,
        } << 5;
        let recipient = match self.recipient {
            Recipient::Device => 0,
            Recipient::Interface => 1,
            Recipient::Endpoint => 2,
            Recipient::Other => 3,
        };
        direction | kind | recipient
    }
}
