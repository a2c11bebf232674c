#![no_main]

use libfuzzer_sys::fuzz_target;
use statelog_docstore::codec;

fuzz_target!(|data: &[u8]| {
    // Limit input size to prevent timeout
    if data.len() > 1_000_000 {
        return;
    }

    // Header and frame decoding must reject garbage without panicking
    let _ = codec::decode_header(data);

    let mut offset = 0;
    while offset < data.len() {
        match codec::decode_batch(&data[offset..]) {
            Ok(Some((_, consumed))) if consumed > 0 => offset += consumed,
            _ => break,
        }
    }
});
