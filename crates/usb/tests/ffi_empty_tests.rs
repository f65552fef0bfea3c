//! C ABI behavior with no attached device
//!
//! Runs in its own test binary so the installed runtime has an empty bridge.
//!
//! Run with: `cargo test -p usb --test ffi_empty_tests`

use common::HostRuntime;
use std::ptr;
use std::sync::Arc;
use usb::ffi::*;
use usb::{ContextOptions, SimulatedBridge};

#[test]
fn test_empty_device_list_is_terminator_only() {
    let host = HostRuntime::start().unwrap();
    assert!(install(
        Arc::new(SimulatedBridge::new()),
        host.handle(),
        ContextOptions::default()
    ));

    unsafe {
        let mut ctx = ptr::null_mut();
        assert_eq!(libusb_init(&mut ctx), 0);

        let mut list = ptr::null_mut();
        assert_eq!(libusb_get_device_list(ctx, &mut list), 0);
        assert!(!list.is_null());
        assert!((*list).is_null());

        libusb_free_device_list(list, 1);
        libusb_exit(ctx);
    }
}
