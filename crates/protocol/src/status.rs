//! Status codes and transfer status values
//!
//! Numeric values are the published libusb 1.0 constants so that C callers
//! linked against the emulation see exactly what the native library returns.

use crate::error::ProtocolError;
use serde::{Deserialize, Serialize};
use std::ffi::CStr;
use thiserror::Error;

/// `LIBUSB_SUCCESS`
pub const SUCCESS: i32 = 0;

/// Error status of a device-access call
///
/// Every variant maps to one negative `LIBUSB_ERROR_*` code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum UsbError {
    /// Input/output error
    #[error("Input/Output Error")]
    Io,
    /// Invalid parameter
    #[error("Invalid parameter")]
    InvalidParam,
    /// Access denied (insufficient permissions)
    #[error("Access denied (insufficient permissions)")]
    Access,
    /// No such device (it may have been disconnected)
    #[error("No such device (it may have been disconnected)")]
    NoDevice,
    /// Entity not found
    #[error("Entity not found")]
    NotFound,
    /// Resource busy
    #[error("Resource busy")]
    Busy,
    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
    /// Overflow
    #[error("Overflow")]
    Overflow,
    /// Pipe error (endpoint stalled)
    #[error("Pipe error")]
    Pipe,
    /// System call interrupted
    #[error("System call interrupted (perhaps due to signal)")]
    Interrupted,
    /// Insufficient memory
    #[error("Insufficient memory")]
    NoMem,
    /// Operation not supported or unimplemented on this platform
    #[error("Operation not supported or unimplemented on this platform")]
    NotSupported,
    /// Other error
    #[error("Other error")]
    Other,
}

/// Result of a device-access call
pub type UsbResult<T> = std::result::Result<T, UsbError>;

impl UsbError {
    /// Published negative status code
    pub fn code(self) -> i32 {
        match self {
            UsbError::Io => -1,
            UsbError::InvalidParam => -2,
            UsbError::Access => -3,
            UsbError::NoDevice => -4,
            UsbError::NotFound => -5,
            UsbError::Busy => -6,
            UsbError::Timeout => -7,
            UsbError::Overflow => -8,
            UsbError::Pipe => -9,
            UsbError::Interrupted => -10,
            UsbError::NoMem => -11,
            UsbError::NotSupported => -12,
            UsbError::Other => -99,
        }
    }

    /// Parse a negative status code
    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        Ok(match code {
            -1 => UsbError::Io,
            -2 => UsbError::InvalidParam,
            -3 => UsbError::Access,
            -4 => UsbError::NoDevice,
            -5 => UsbError::NotFound,
            -6 => UsbError::Busy,
            -7 => UsbError::Timeout,
            -8 => UsbError::Overflow,
            -9 => UsbError::Pipe,
            -10 => UsbError::Interrupted,
            -11 => UsbError::NoMem,
            -12 => UsbError::NotSupported,
            -99 => UsbError::Other,
            other => return Err(ProtocolError::UnknownStatus(other)),
        })
    }

    /// Symbolic constant name, as returned by `libusb_error_name`
    pub fn name(self) -> &'static CStr {
        match self {
            UsbError::Io => c"LIBUSB_ERROR_IO",
            UsbError::InvalidParam => c"LIBUSB_ERROR_INVALID_PARAM",
            UsbError::Access => c"LIBUSB_ERROR_ACCESS",
            UsbError::NoDevice => c"LIBUSB_ERROR_NO_DEVICE",
            UsbError::NotFound => c"LIBUSB_ERROR_NOT_FOUND",
            UsbError::Busy => c"LIBUSB_ERROR_BUSY",
            UsbError::Timeout => c"LIBUSB_ERROR_TIMEOUT",
            UsbError::Overflow => c"LIBUSB_ERROR_OVERFLOW",
            UsbError::Pipe => c"LIBUSB_ERROR_PIPE",
            UsbError::Interrupted => c"LIBUSB_ERROR_INTERRUPTED",
            UsbError::NoMem => c"LIBUSB_ERROR_NO_MEM",
            UsbError::NotSupported => c"LIBUSB_ERROR_NOT_SUPPORTED",
            UsbError::Other => c"LIBUSB_ERROR_OTHER",
        }
    }
}

/// Collapse a call result into the integer a C caller expects
///
/// Successful results carry a non-negative count (bytes, devices, ports).
pub fn status_code(result: UsbResult<usize>) -> i32 {
    match result {
        Ok(count) => i32::try_from(count).unwrap_or(i32::MAX),
        Err(e) => e.code(),
    }
}

/// Status of a transfer
///
/// `Pending` exists only on the Rust side: it is the state between submission
/// and the single terminal transition recorded by the bridge completion.
/// It is reported to C callers as `LIBUSB_TRANSFER_ERROR` should they ever
/// observe a transfer that never completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TransferStatus {
    /// Submitted, no terminal status recorded yet
    #[default]
    Pending,
    /// Transfer completed without error
    Completed,
    /// Transfer failed
    Error,
    /// Transfer timed out
    TimedOut,
    /// Transfer was cancelled
    Cancelled,
    /// Endpoint stalled
    Stall,
    /// Device was disconnected
    NoDevice,
    /// Device sent more data than requested
    Overflow,
}

impl TransferStatus {
    /// Published `LIBUSB_TRANSFER_*` value
    pub fn code(self) -> i32 {
        match self {
            TransferStatus::Completed => 0,
            TransferStatus::Error | TransferStatus::Pending => 1,
            TransferStatus::TimedOut => 2,
            TransferStatus::Cancelled => 3,
            TransferStatus::Stall => 4,
            TransferStatus::NoDevice => 5,
            TransferStatus::Overflow => 6,
        }
    }

    /// Parse a published `LIBUSB_TRANSFER_*` value
    pub fn from_code(code: i32) -> Result<Self, ProtocolError> {
        Ok(match code {
            0 => TransferStatus::Completed,
            1 => TransferStatus::Error,
            2 => TransferStatus::TimedOut,
            3 => TransferStatus::Cancelled,
            4 => TransferStatus::Stall,
            5 => TransferStatus::NoDevice,
            6 => TransferStatus::Overflow,
            other => return Err(ProtocolError::UnknownTransferStatus(other)),
        })
    }

    /// Whether a terminal status has been recorded
    pub fn is_terminal(self) -> bool {
        self != TransferStatus::Pending
    }
}
