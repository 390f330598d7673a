#![no_main]
use chargesync::tuya::cipher::TuyaCipher;
use chargesync::tuya::frame;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(message) = frame::decode(data) else {
        return;
    };
    // Decrypting attacker-controlled bytes must fail cleanly
    if let Ok(cipher) = TuyaCipher::new(b"0123456789abcdef") {
        let _ = cipher.decrypt(frame::strip_version_header(&message.payload));
    }
});
