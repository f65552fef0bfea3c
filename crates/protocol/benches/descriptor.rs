//! Benchmarks for descriptor encoding
//!
//! Measures the 18-byte wire form in both directions and the conversion to
//! the `repr(C)` record handed to C callers.

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use protocol::{BcdVersion, DeviceDescriptor, RawDeviceDescriptor};

fn accelerator_descriptor() -> DeviceDescriptor {
    DeviceDescriptor::builder()
        .usb_version(BcdVersion::from_usb(3, 0x10))
        .class(0xff, 0xff, 0xff)
        .vendor_id(0x18d1)
        .product_id(0x9302)
        .device_version(BcdVersion::from_device(1, 0, 0))
        .num_configurations(1)
        .build()
}

fn benchmark_wire_form(c: &mut Criterion) {
    let mut group = c.benchmark_group("wire_form");
    let descriptor = accelerator_descriptor();
    let bytes = descriptor.to_bytes();

    group.throughput(Throughput::Bytes(bytes.len() as u64));
    group.bench_function("encode", |b| b.iter(|| black_box(&descriptor).to_bytes()));
    group.bench_function("decode", |b| {
        b.iter(|| DeviceDescriptor::from_bytes(black_box(&bytes)))
    });

    group.finish();
}

fn benchmark_raw_record(c: &mut Criterion) {
    let descriptor = accelerator_descriptor();
    c.bench_function("to_raw", |b| {
        b.iter(|| RawDeviceDescriptor::from(black_box(&descriptor)))
    });
}

criterion_group!(benches, benchmark_wire_form, benchmark_raw_record);
criterion_main!(benches);
