//! Protocol error types

use thiserror::Error;

/// Errors raised while converting between wire/ABI values and typed records
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Buffer too small for operation
    #[error("Buffer too small: needed {needed}, got {available}")]
    BufferTooSmall { needed: usize, available: usize },

    /// A descriptor field carries a value the layout does not allow
    #[error("Invalid descriptor: {field} = {value:#x}")]
    InvalidDescriptor { field: &'static str, value: u32 },

    /// Integer is not one of the published status codes
    #[error("Unknown status code: {0}")]
    UnknownStatus(i32),

    /// Integer is not one of the published transfer status values
    #[error("Unknown transfer status: {0}")]
    UnknownTransferStatus(i32),

    /// Byte is not one of the published transfer type values
    #[error("Unknown transfer type: {0}")]
    UnknownTransferType(u8),

    /// I/O error while reading or writing a record
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
