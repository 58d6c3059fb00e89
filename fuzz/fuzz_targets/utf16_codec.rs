#![no_main]

use libfuzzer_sys::fuzz_target;
use uregex::codec;

fuzz_target!(|data: &[u8]| {
    let data = if data.len() > 64 * 1024 {
        &data[..64 * 1024]
    } else {
        data
    };

    let units = codec::le_bytes_to_units(data);
    match codec::decode(&units) {
        Ok(text) => assert_eq!(codec::encode(&text), units),
        Err(_) => assert!(char::decode_utf16(units.iter().copied()).any(|c| c.is_err())),
    }
});
