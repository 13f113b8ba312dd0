#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::decoder::{StreamingDecoder, decode_all};

fuzz_target!(|data: &[u8]| {
    // Chunked feeding must agree with whole-buffer decoding: same output
    // on success, and an error on one side implies an error on the other
    // (possibly deferred to finish_decoding).
    let whole = decode_all(&[], data);

    let mut decoder = StreamingDecoder::new();
    decoder.start_decoding(&[]);
    let mut out = Vec::new();
    let mut failed = false;
    for chunk in data.chunks(3) {
        if decoder.decode_chunk(chunk, &mut out).is_err() {
            failed = true;
            break;
        }
    }
    if !failed {
        failed = decoder.finish_decoding().is_err();
    }

    match whole {
        Ok(expected) => {
            assert!(!failed, "chunked decode failed where whole-buffer succeeded");
            assert_eq!(out, expected);
        }
        Err(_) => assert!(failed, "chunked decode succeeded where whole-buffer failed"),
    }
});
