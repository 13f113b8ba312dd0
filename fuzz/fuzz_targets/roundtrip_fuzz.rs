#![no_main]
use libfuzzer_sys::fuzz_target;
use vcdelta::checksum::adler32;
use vcdelta::decoder::decode_all;
use vcdelta::encoder::WindowEncoder;
use vcdelta::header::FormatExtensions;

// Interpret the fuzz input as an instruction script: (tag, a, b) triples
// drive ADD/COPY/RUN against a small fixed dictionary.  Whatever the
// script, encode-then-decode must reproduce the simulated target exactly.
fuzz_target!(|data: &[u8]| {
    let dict: Vec<u8> = (0..=255u8).cycle().take(1024).collect();
    let interleaved = data.first().is_some_and(|b| b & 1 == 1);

    let mut delta = Vec::new();
    let mut enc = WindowEncoder::new(interleaved);
    enc.write_header(&mut delta, FormatExtensions::CHECKSUM).unwrap();
    enc.init(dict.len() as u64).unwrap();

    let mut target = Vec::new();
    for triple in data.chunks_exact(3) {
        let (tag, a, b) = (triple[0], triple[1], triple[2]);
        match tag % 3 {
            0 => {
                let len = usize::from(a % 32) + 1;
                let payload: Vec<u8> = (0..len).map(|i| b.wrapping_add(i as u8)).collect();
                enc.add(&payload).unwrap();
                target.extend_from_slice(&payload);
            }
            1 => {
                let space = (dict.len() + target.len()) as u64;
                let offset = u64::from(a) * 7 % space;
                let len = u32::from(b % 48) + 1;
                enc.copy(offset, len).unwrap();
                for i in 0..u64::from(len) {
                    let pos = (offset + i) as usize;
                    let byte = if pos < dict.len() {
                        dict[pos]
                    } else {
                        target[pos - dict.len()]
                    };
                    target.push(byte);
                }
            }
            _ => {
                let len = u32::from(a) + 1;
                enc.run(len, b).unwrap();
                target.extend(std::iter::repeat_n(b, len as usize));
            }
        }
    }

    enc.add_checksum(adler32(&target)).unwrap();
    enc.output(&mut delta).unwrap();

    let decoded = decode_all(&dict, &delta).expect("own output must decode");
    assert_eq!(decoded, target);
});
