#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(frame) = chargesync::solarman::decode_frame(data) {
        let _ = frame.rtu_response();
    }
});
