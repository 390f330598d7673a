#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // First byte selects the expected register count
    let Some((count, frame)) = data.split_first() else {
        return;
    };
    if let Ok(words) = chargesync::modbus::parse_read_holding_response(frame, 1, *count as u16) {
        assert_eq!(words.len(), *count as usize);
    }
});
