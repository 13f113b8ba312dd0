#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::decoder::decode_all;

fuzz_target!(|data: &[u8]| {
    // Arbitrary bytes must only ever produce errors, never panics.
    let _ = decode_all(&[], data);

    // Also with a non-empty dictionary.
    if data.len() >= 2 {
        let split = data.len() / 2;
        let (dict, delta) = data.split_at(split);
        let _ = decode_all(dict, delta);
    }
});
