//! Clock and sleep entry points.

use oslayer_core::time;

/// Microseconds on the monotonic clock; the time base of `endt_us` deadlines.
#[unsafe(no_mangle)]
pub extern "C" fn os_now_microseconds() -> u64 {
    time::now_microseconds()
}

#[unsafe(no_mangle)]
pub extern "C" fn os_sleep_milliseconds(msec: u32) {
    time::sleep_milliseconds(msec);
}
