//! Device model integration tests
//!
//! Discovery, descriptors, sessions and control transfers against the
//! simulated host, with the test runtime acting as host context.
//!
//! Run with: `cargo test -p usb --test device_tests`

use common::HostHandle;
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MOCK_PRODUCT_ID, MOCK_VENDOR_ID, create_mock_descriptor,
    create_mock_device_descriptor, with_timeout,
};
use protocol::{DeviceSpeed, UsbError};
use std::sync::Arc;
use std::time::Duration;
use usb::{BridgeCall, Context, Fault, HostDeviceInfo, SimulatedBridge};

fn mock_info() -> HostDeviceInfo {
    HostDeviceInfo {
        usb_version_major: 3,
        usb_version_minor: 0x10,
        product_name: Some("Coral USB Accelerator".to_string()),
        ..HostDeviceInfo::new(MOCK_VENDOR_ID, MOCK_PRODUCT_ID)
    }
}

fn context_with(bridge: &Arc<SimulatedBridge>) -> Context {
    Context::init(bridge.clone(), HostHandle::current().unwrap()).unwrap()
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_no_matching_device_gives_empty_list() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(HostDeviceInfo::new(0x1a6e, 0x089a)));
    let context = context_with(&bridge);

    let list = context.get_device_list().await.unwrap();
    assert!(list.is_empty());
    assert_eq!(bridge.calls(), vec![BridgeCall::RequestDevice]);
}

#[tokio::test]
async fn test_ambiguous_match_gives_empty_list() {
    let bridge = Arc::new(
        SimulatedBridge::new()
            .with_device(mock_info())
            .with_device(mock_info()),
    );
    let context = context_with(&bridge);

    assert_eq!(context.get_device_list().await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_single_device_descriptor() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);

    let list = context.get_device_list().await.unwrap();
    assert_eq!(list.len(), 1);

    let device = &list[0];
    assert_eq!(device.bus_number(), 0);
    assert_eq!(device.port_number(), 1);
    assert_eq!(device.speed(), DeviceSpeed::Super);
    assert_eq!(device.descriptor(), create_mock_descriptor());
    assert_eq!(
        device.descriptor().to_bytes().to_vec(),
        create_mock_device_descriptor()
    );
}

#[tokio::test]
async fn test_repeated_discovery_reuses_device() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);

    let first = context.get_device_list().await.unwrap();
    let second = context.get_device_list().await.unwrap();
    assert!(Arc::ptr_eq(&first[0], &second[0]));
    assert_eq!(bridge.selected(), Some(mock_info()));
}

#[tokio::test]
async fn test_device_outlives_context() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);

    let device = context.get_device_list().await.unwrap().into_vec().remove(0);
    drop(context);

    assert_eq!(device.open().await.unwrap_err(), UsbError::NoDevice);
    assert_eq!(device.descriptor().vendor_id, MOCK_VENDOR_ID);
}

// ============================================================================
// Sessions
// ============================================================================

#[tokio::test]
async fn test_open_resets_and_tolerates_reset_failure() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    bridge.inject(Fault::Reset);
    let context = context_with(&bridge);

    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();

    assert!(bridge.is_open());
    assert!(bridge.calls().ends_with(&[BridgeCall::Open, BridgeCall::Reset]));
    assert!(Arc::ptr_eq(handle.device(), &list[0]));
    assert_eq!(handle.reset().await, Ok(()));
}

#[tokio::test]
async fn test_open_failure_is_io() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    bridge.inject(Fault::Open);
    let context = context_with(&bridge);

    let list = context.get_device_list().await.unwrap();
    assert_eq!(list[0].open().await.unwrap_err(), UsbError::Io);
    assert!(!bridge.is_open());
}

#[tokio::test]
async fn test_claim_and_release() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);
    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();

    handle.claim_interface(0).await.unwrap();
    assert_eq!(handle.claimed_interfaces(), vec![0]);
    assert_eq!(bridge.claimed_interfaces(), vec![0]);

    bridge.inject(Fault::Claim(1));
    assert_eq!(handle.claim_interface(1).await, Err(UsbError::Io));
    assert_eq!(handle.claimed_interfaces(), vec![0]);

    handle.release_interface(0).await.unwrap();
    assert!(handle.claimed_interfaces().is_empty());
    assert_eq!(handle.release_interface(0).await, Err(UsbError::Io));
}

#[tokio::test]
async fn test_close_reaches_host() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);
    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();
    handle.claim_interface(0).await.unwrap();

    handle.close();

    let closed = with_timeout(DEFAULT_TEST_TIMEOUT, async {
        while bridge.is_open() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(closed.is_ok());
    assert!(bridge.claimed_interfaces().is_empty());
}

#[tokio::test]
async fn test_synchronous_transfers_not_supported() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);
    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();

    let mut data = [0u8; 8];
    assert_eq!(
        handle.bulk_transfer(0x81, &mut data, Duration::ZERO),
        Err(UsbError::NotSupported)
    );
    assert_eq!(
        handle.interrupt_transfer(0x01, &mut data, Duration::ZERO),
        Err(UsbError::NotSupported)
    );
    assert_eq!(handle.set_configuration(1), Ok(()));
}

// ============================================================================
// Control transfers
// ============================================================================

#[tokio::test]
async fn test_control_in_reads_device_descriptor() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);
    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();

    let mut data = [0u8; 64];
    let n = handle
        .control_transfer(0x80, 0x06, 0x0100, 0, &mut data, Duration::from_millis(100))
        .await
        .unwrap();
    assert_eq!(n, 18);
    assert_eq!(data[..n].to_vec(), create_mock_device_descriptor());

    let mut short = [0u8; 8];
    let n = handle
        .control_transfer(0x80, 0x06, 0x0100, 0, &mut short, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(n, 8);
    assert_eq!(short.to_vec(), create_mock_device_descriptor()[..8].to_vec());
}

#[tokio::test]
async fn test_control_out_and_stall() {
    let bridge = Arc::new(SimulatedBridge::new().with_device(mock_info()));
    let context = context_with(&bridge);
    let list = context.get_device_list().await.unwrap();
    let handle = list[0].open().await.unwrap();

    let mut payload = [0xde, 0xad, 0xbe, 0xef];
    let n = handle
        .control_transfer(0x40, 0x01, 0x0002, 0x0003, &mut payload, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(n, 4);

    let writes = bridge.control_writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0.request, 0x01);
    assert_eq!(writes[0].1, vec![0xde, 0xad, 0xbe, 0xef]);

    let mut data = [0u8; 4];
    assert_eq!(
        handle
            .control_transfer(0xc0, 0x42, 0, 0, &mut data, Duration::ZERO)
            .await,
        Err(UsbError::Pipe)
    );

    bridge.set_control_response(0x42, 0, vec![7, 7]);
    let n = handle
        .control_transfer(0xc0, 0x42, 0, 0, &mut data, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!((n, &data[..n]), (2, &[7u8, 7][..]));
}
