// Adler-32 over a decoded target window (RFC 1950 definition).
//
// Backed by simd-adler32 when the `adler32` feature is enabled (the
// default); otherwise a scalar implementation.  On the wire the checksum
// is a variable-length integer, not a fixed four-byte field.

/// Compute the Adler-32 checksum of `data`.
#[cfg(feature = "adler32")]
pub fn adler32(data: &[u8]) -> u32 {
    let mut hasher = simd_adler32::Adler32::new();
    hasher.write(data);
    hasher.finish()
}

/// Compute the Adler-32 checksum of `data`.
#[cfg(not(feature = "adler32"))]
pub fn adler32(data: &[u8]) -> u32 {
    const MOD_ADLER: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += u32::from(byte);
            b += a;
        }
        a %= MOD_ADLER;
        b %= MOD_ADLER;
    }
    (b << 16) | a
}
