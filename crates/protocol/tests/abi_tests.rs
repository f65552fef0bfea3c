//! ABI record integration tests
//!
//! Tests the published surface C callers rely on:
//! - Descriptor population through the wire form and the `repr(C)` record
//! - Status code tables
//! - Control setup packing
//!
//! Run with: `cargo test -p protocol --test abi_tests`

use proptest::prelude::*;
use protocol::{
    BcdVersion, ControlSetup, DeviceDescriptor, Direction, LIBRARY_VERSION, ProtocolError,
    RawDeviceDescriptor, Recipient, RequestKind, TransferStatus, TransferType, UsbError,
};

fn coral_descriptor() -> DeviceDescriptor {
    DeviceDescriptor::builder()
        .usb_version(BcdVersion::from_usb(3, 0x10))
        .class(0xff, 0xff, 0xff)
        .vendor_id(0x18d1)
        .product_id(0x9302)
        .device_version(BcdVersion::from_device(1, 0, 0))
        .num_configurations(1)
        .build()
}

mod descriptor {
    use super::*;

    #[test]
    fn test_wire_layout() {
        let bytes = coral_descriptor().to_bytes();
        assert_eq!(
            bytes,
            [
                18, 0x01, 0x10, 0x03, 0xff, 0xff, 0xff, 64, 0xd1, 0x18, 0x02, 0x93, 0x00, 0x01,
                1, 2, 3, 1
            ]
        );
    }

    #[test]
    fn test_raw_record_matches_wire_form() {
        let descriptor = coral_descriptor();
        let raw = RawDeviceDescriptor::from(&descriptor);

        assert_eq!(raw.bLength, 18);
        assert_eq!(raw.bDescriptorType, 1);
        assert_eq!(raw.bcdUSB, 0x0310);
        assert_eq!(raw.idVendor, 0x18d1);
        assert_eq!(raw.bcdDevice, 0x0100);
        assert_eq!(DeviceDescriptor::from(&raw), descriptor);
    }

    #[test]
    fn test_decode_rejects_bad_header() {
        let mut bytes = coral_descriptor().to_bytes();
        bytes[1] = 0x02;
        assert!(matches!(
            DeviceDescriptor::from_bytes(&bytes),
            Err(ProtocolError::InvalidDescriptor {
                field: "bDescriptorType",
                ..
            })
        ));

        assert!(matches!(
            DeviceDescriptor::from_bytes(&bytes[..10]),
            Err(ProtocolError::BufferTooSmall {
                needed: 18,
                available: 10
            })
        ));
    }

    #[test]
    fn test_bcd_packing() {
        assert_eq!(BcdVersion::from_usb(2, 0).0, 0x0200);
        assert_eq!(BcdVersion::from_device(1, 2, 3).0, 0x0123);

        let version = BcdVersion::from_device(4, 5, 6);
        assert_eq!(
            (version.major(), version.minor(), version.sub_minor()),
            (4, 5, 6)
        );
    }
}

mod status {
    use super::*;

    #[test]
    fn test_error_code_table() {
        let table = [
            (UsbError::Io, -1, "LIBUSB_ERROR_IO"),
            (UsbError::InvalidParam, -2, "LIBUSB_ERROR_INVALID_PARAM"),
            (UsbError::NoDevice, -4, "LIBUSB_ERROR_NO_DEVICE"),
            (UsbError::Pipe, -9, "LIBUSB_ERROR_PIPE"),
            (UsbError::NotSupported, -12, "LIBUSB_ERROR_NOT_SUPPORTED"),
            (UsbError::Other, -99, "LIBUSB_ERROR_OTHER"),
        ];
        for (error, code, name) in table {
            assert_eq!(error.code(), code);
            assert_eq!(UsbError::from_code(code).unwrap(), error);
            assert_eq!(error.name().to_str().unwrap(), name);
        }
        assert!(matches!(
            UsbError::from_code(-50),
            Err(ProtocolError::UnknownStatus(-50))
        ));
    }

    #[test]
    fn test_transfer_status_values() {
        assert_eq!(TransferStatus::Completed.code(), 0);
        assert_eq!(TransferStatus::Stall.code(), 4);
        assert_eq!(TransferStatus::NoDevice.code(), 5);
        assert_eq!(TransferStatus::Pending.code(), TransferStatus::Error.code());
        assert!(!TransferStatus::Pending.is_terminal());
        assert!(TransferStatus::Overflow.is_terminal());
        assert!(TransferStatus::from_code(7).is_err());
    }

    #[test]
    fn test_transfer_type_values() {
        assert_eq!(TransferType::from_code(2).unwrap(), TransferType::Bulk);
        assert_eq!(TransferType::Interrupt.code(), 3);
        assert!(matches!(
            TransferType::from_code(9),
            Err(ProtocolError::UnknownTransferType(9))
        ));
    }

    #[test]
    fn test_library_version() {
        assert_eq!(
            (
                LIBRARY_VERSION.major,
                LIBRARY_VERSION.minor,
                LIBRARY_VERSION.micro,
                LIBRARY_VERSION.nano
            ),
            (1, 0, 24, 0)
        );
        assert_eq!(LIBRARY_VERSION.rc, "");
    }
}

mod setup {
    use super::*;

    #[test]
    fn test_vendor_interface_in_request() {
        let setup = ControlSetup::new(0xc1, 0x01, 0x1234, 0x0002);
        assert_eq!(setup.direction, Direction::In);
        assert_eq!(setup.kind, RequestKind::Vendor);
        assert_eq!(setup.recipient, Recipient::Interface);
        assert_eq!(setup.request_type(), 0xc1);
    }

    #[test]
    fn test_standard_device_out_request() {
        let setup = ControlSetup::new(0x00, 0x09, 1, 0);
        assert_eq!(setup.direction, Direction::Out);
        assert_eq!(setup.kind, RequestKind::Standard);
        assert_eq!(setup.recipient, Recipient::Device);
    }
}

proptest! {
    /// Property: populated descriptor fields read back identically
    #[test]
    fn prop_descriptor_fields_survive_encoding(
        vendor_id in any::<u16>(),
        product_id in any::<u16>(),
        class in any::<(u8, u8, u8)>(),
        usb in (0u8..=0xff, 0u8..=0xff),
        device in (0u8..=0xff, 0u8..=0x0f, 0u8..=0x0f),
        configurations in any::<u8>(),
    ) {
        let descriptor = DeviceDescriptor::builder()
            .usb_version(BcdVersion::from_usb(usb.0, usb.1))
            .class(class.0, class.1, class.2)
            .vendor_id(vendor_id)
            .product_id(product_id)
            .device_version(BcdVersion::from_device(device.0, device.1, device.2))
            .num_configurations(configurations)
            .build();

        let decoded = DeviceDescriptor::from_bytes(&descriptor.to_bytes()).unwrap();
        prop_assert_eq!(decoded, descriptor);
        prop_assert_eq!(decoded.vendor_id, vendor_id);
        prop_assert_eq!(decoded.device_version.sub_minor(), device.2);
    }
}
