//! Test utilities for edge-bridge
//!
//! Helpers shared by the unit and integration tests of every crate.
//!
//! # Example
//!
//! ```
//! use common::test_utils::create_mock_device_descriptor;
//!
//! let bytes = create_mock_device_descriptor();
//! assert_eq!(bytes.len(), 18);
//! assert_eq!(&bytes[8..10], &[0xd1, 0x18]);
//! ```

use protocol::{BcdVersion, DeviceDescriptor};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Vendor/product pair of the accelerator the bridge targets by default
pub const MOCK_VENDOR_ID: u16 = 0x18d1;
pub const MOCK_PRODUCT_ID: u16 = 0x9302;

/// Timeout wrapper for async tests
///
/// # Example
/// ```ignore
/// use common::test_utils::{with_timeout, DEFAULT_TEST_TIMEOUT};
///
/// #[tokio::test]
/// async fn test_with_timeout() {
///     let result = with_timeout(DEFAULT_TEST_TIMEOUT, async { 42 }).await.unwrap();
///     assert_eq!(result, 42);
/// }
/// ```
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Error returned when a test times out
#[derive(Debug, Error)]
#[error("Test timed out after {duration:?}")]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

/// Poll `condition` from a blocking test until it holds or `timeout` elapses
///
/// Returns whether the condition became true.
pub fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Typed descriptor of the default mock device (USB 3.1, vendor class)
pub fn create_mock_descriptor() -> DeviceDescriptor {
    DeviceDescriptor::builder()
        .usb_version(BcdVersion::from_usb(3, 0x10))
        .class(0xff, 0xff, 0xff)
        .vendor_id(MOCK_VENDOR_ID)
        .product_id(MOCK_PRODUCT_ID)
        .device_version(BcdVersion::from_device(1, 0, 0))
        .num_configurations(1)
        .build()
}

/// Create a mock USB descriptor response (GET_DESCRIPTOR Device)
///
/// Returns the 18-byte wire form of [`create_mock_descriptor`]
pub fn create_mock_device_descriptor() -> Vec<u8> {
    vec![
        0x12, // bLength
        0x01, // bDescriptorType (Device)
        0x10, 0x03, // bcdUSB (3.10)
        0xff, // bDeviceClass
        0xff, // bDeviceSubClass
        0xff, // bDeviceProtocol
        0x40, // bMaxPacketSize0 (64 bytes)
        0xd1, 0x18, // idVendor (0x18d1)
        0x02, 0x93, // idProduct (0x9302)
        0x00, 0x01, // bcdDevice (1.00)
        0x01, // iManufacturer
        0x02, // iProduct
        0x03, // iSerialNumber
        0x01, // bNumConfigurations
    ]
}

/// Create mock bulk transfer data of specified size
pub fn create_mock_bulk_data(size: usize) -> Vec<u8> {
    (0..size).map(|i| (i & 0xFF) as u8).collect()
}
