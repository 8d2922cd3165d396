//! Guarded-call overhead: trap install, frame push, restore.

use std::ffi::c_void;

use criterion::{Criterion, criterion_group, criterion_main};
use oslayer_abi::safe_call_abi::os_safe_call;
use oslayer_core::safe_call;

extern "C" fn noop_handler(_ptr: *mut c_void) {}

unsafe extern "C" fn noop_func(_ptr: *mut c_void) {}

fn bench_safe_call(c: &mut Criterion) {
    let mut group = c.benchmark_group("safe_call");

    group.bench_function("direct", |b| {
        b.iter(|| criterion::black_box(42u64));
    });

    group.bench_function("core", |b| {
        b.iter(|| {
            safe_call(|| criterion::black_box(42u64), Some(noop_handler), std::ptr::null_mut())
                .unwrap()
        });
    });

    group.bench_function("core_nested", |b| {
        b.iter(|| {
            safe_call(
                || safe_call(|| criterion::black_box(42u64), None, std::ptr::null_mut()),
                Some(noop_handler),
                std::ptr::null_mut(),
            )
            .unwrap()
            .unwrap()
        });
    });

    group.bench_function("abi", |b| {
        // SAFETY: `noop_func` ignores its argument.
        b.iter(|| unsafe { os_safe_call(Some(noop_func), Some(noop_handler), std::ptr::null_mut()) });
    });
    group.finish();
}

criterion_group!(benches, bench_safe_call);
criterion_main!(benches);
