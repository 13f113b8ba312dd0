// NEAR/SAME address cache (RFC 3284, Section 5.3).
//
// A small stateful predictor that shortens COPY addresses.  Encoder and
// decoder update it identically after every COPY, so both sides stay in
// lockstep without any cache state on the wire.  `init` is called at the
// start of every window.

use thiserror::Error;

use crate::varint::{self, VarintError};

/// Absolute address mode.
pub const VCD_SELF: u8 = 0;
/// Address encoded as distance below the current position.
pub const VCD_HERE: u8 = 1;

/// NEAR/SAME address cache.
///
/// With the default geometry (near 4, same 3) the address modes are:
///   0      SELF — varint, absolute
///   1      HERE — varint, here - value
///   2..=5  NEAR — varint, near[mode - 2] + value
///   6..=8  SAME — one byte b, same[(mode - 6) * 256 + b]
#[derive(Clone)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    /// Cache with the given geometry.  `new(4, 3)` is the RFC default.
    pub fn new(s_near: usize, s_same: usize) -> Self {
        Self {
            s_near,
            s_same,
            near: vec![0; s_near],
            same: vec![0; s_same * 256],
            next_slot: 0,
        }
    }

    /// Reset all cache state to zero.  Called per window.
    pub fn init(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// Total number of address modes (2 + near + same).
    #[inline]
    pub fn mode_count(&self) -> usize {
        2 + self.s_near + self.s_same
    }

    /// The first SAME mode index.
    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Record a successfully coded address.  Must be applied identically
    /// on both sides after every COPY.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            self.same[idx] = addr;
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encode `addr` given the current position `here` in the combined
    /// source-and-target address space.  Returns the chosen mode and the
    /// encoded bytes, and updates the cache.
    ///
    /// Selection: fewest encoded bytes wins; on equal length the lowest
    /// mode index wins, which keeps the output deterministic.
    pub fn encode(&mut self, addr: u64, here: u64) -> (u8, EncodedAddress) {
        debug_assert!(addr < here, "COPY address {addr} not below here {here}");

        let mut best_mode = VCD_SELF;
        let mut best_val = addr;
        let mut best_len = varint::sizeof_u64(addr);

        let here_delta = here - addr;
        if varint::sizeof_u64(here_delta) < best_len {
            best_mode = VCD_HERE;
            best_val = here_delta;
            best_len = varint::sizeof_u64(here_delta);
        }

        for (i, &cached) in self.near.iter().enumerate() {
            if cached <= addr {
                let d = addr - cached;
                if varint::sizeof_u64(d) < best_len {
                    best_mode = 2 + i as u8;
                    best_val = d;
                    best_len = varint::sizeof_u64(d);
                }
            }
        }

        if self.s_same > 0 && best_len > 1 {
            let idx = (addr % (self.s_same as u64 * 256)) as usize;
            if self.same[idx] == addr {
                let mode = (self.same_start() + idx / 256) as u8;
                self.update(addr);
                return (mode, EncodedAddress::SameByte((idx % 256) as u8));
            }
        }

        self.update(addr);
        let mut buf = [0u8; 10];
        let len = varint::encode_u64(best_val, &mut buf);
        (best_mode, EncodedAddress::Varint { buf, len })
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Decode an address for `mode` from the front of `addr_data`, with
    /// `here` the current position in the address space.  Returns the
    /// address and bytes consumed, and updates the cache.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), AddressError> {
        let mode = mode as usize;
        if mode >= self.mode_count() {
            return Err(AddressError::BadMode(mode as u8));
        }

        let (addr, consumed) = if mode < self.same_start() {
            let (raw, consumed) = varint::read_u64(addr_data).map_err(|e| match e {
                VarintError::Truncated => AddressError::SectionUnderflow,
                VarintError::Overflow => AddressError::OutOfRange,
            })?;
            let addr = match mode {
                0 => raw,
                1 => here.checked_sub(raw).ok_or(AddressError::OutOfRange)?,
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or(AddressError::OutOfRange)?,
            };
            (addr, consumed)
        } else {
            let &byte = addr_data.first().ok_or(AddressError::SectionUnderflow)?;
            let slot = mode - self.same_start();
            let idx = slot * 256 + byte as usize;
            let addr = self.same[idx];
            // The slot must hold an address that actually hashes to it;
            // anything else means the encoder never wrote it.
            if (addr % (self.s_same as u64 * 256)) as usize != idx {
                return Err(AddressError::SameCacheMiss);
            }
            (addr, 1)
        };

        if addr >= here {
            return Err(AddressError::OutOfRange);
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

// ---------------------------------------------------------------------------
// Encoded address representation
// ---------------------------------------------------------------------------

/// The wire form of one COPY address.
#[derive(Debug, Clone)]
pub enum EncodedAddress {
    /// SELF, HERE and NEAR modes: a varint.
    Varint { buf: [u8; 10], len: usize },
    /// SAME modes: the low byte of the address.
    SameByte(u8),
}

impl EncodedAddress {
    /// Encoded bytes as a slice.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            EncodedAddress::Varint { buf, len } => &buf[..*len],
            EncodedAddress::SameByte(b) => std::slice::from_ref(b),
        }
    }

    /// Encoded byte length.
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    /// Always false; present for slice-like symmetry.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Address decoding failures.  All of these are terminal: the window is
/// fully buffered before decode, so running out of section bytes means the
/// stream is malformed, not truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("address section underflow")]
    SectionUnderflow,
    #[error("SAME cache entry does not match its slot")]
    SameCacheMiss,
    #[error("COPY address out of range")]
    OutOfRange,
    #[error("address mode {0} out of range for cache geometry")]
    BadMode(u8),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::code_table::{DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE};

    fn default_cache() -> AddressCache {
        AddressCache::new(DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE)
    }

    #[test]
    fn default_geometry() {
        let c = default_cache();
        assert_eq!(c.mode_count(), 9);
    }

    #[test]
    fn self_mode_roundtrip() {
        let mut enc = default_cache();
        let mut dec = default_cache();

        let (mode, bytes) = enc.encode(42, 1000);
        assert_eq!(mode, VCD_SELF);
        let (addr, consumed) = dec.decode(mode, bytes.as_bytes(), 1000).unwrap();
        assert_eq!(addr, 42);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn here_mode_wins_when_shorter() {
        let mut enc = default_cache();
        let mut dec = default_cache();

        // addr 990 near here 1000: HERE distance 10 is one byte, SELF 990
        // is two.
        let (mode, bytes) = enc.encode(990, 1000);
        assert_eq!(mode, VCD_HERE);
        assert_eq!(bytes.len(), 1);
        let (addr, _) = dec.decode(mode, bytes.as_bytes(), 1000).unwrap();
        assert_eq!(addr, 990);
    }

    #[test]
    fn equal_length_prefers_lower_mode() {
        let mut enc = default_cache();
        // addr 100, here 200: SELF and HERE both need one byte; SELF (mode
        // 0) must win.
        let (mode, _) = enc.encode(100, 200);
        assert_eq!(mode, VCD_SELF);
    }

    #[test]
    fn near_mode_roundtrip() {
        let mut enc = default_cache();
        let mut dec = default_cache();

        enc.update(500_000);
        dec.update(500_000);

        let (mode, bytes) = enc.encode(500_010, 1_000_000);
        assert!((2..6).contains(&mode), "expected NEAR, got {mode}");
        assert_eq!(bytes.len(), 1);
        let (addr, _) = dec.decode(mode, bytes.as_bytes(), 1_000_000).unwrap();
        assert_eq!(addr, 500_010);
    }

    #[test]
    fn same_mode_roundtrip() {
        let mut enc = default_cache();
        let mut dec = default_cache();

        // Prime the SAME cache, then push the address out of the NEAR ring.
        enc.update(123_456);
        dec.update(123_456);
        for i in 1..=4u64 {
            enc.update(i * 10_000_000);
            dec.update(i * 10_000_000);
        }

        let (mode, bytes) = enc.encode(123_456, 100_000_000);
        assert!(mode >= 6, "expected SAME, got {mode}");
        assert_eq!(bytes.len(), 1);
        let (addr, consumed) = dec.decode(mode, bytes.as_bytes(), 100_000_000).unwrap();
        assert_eq!(addr, 123_456);
        assert_eq!(consumed, 1);
    }

    #[test]
    fn same_cache_miss_is_rejected() {
        let mut dec = default_cache();
        // Slot 7 of group 0 was never written; its entry (0) is not
        // congruent with index 7.
        let err = dec.decode(6, &[7], 1000).unwrap_err();
        assert_eq!(err, AddressError::SameCacheMiss);
    }

    #[test]
    fn decoded_address_must_be_below_here() {
        let mut dec = default_cache();
        let mut buf = [0u8; 10];
        let len = varint::encode_u64(50, &mut buf);
        assert_eq!(
            dec.decode(VCD_SELF, &buf[..len], 50).unwrap_err(),
            AddressError::OutOfRange
        );
    }

    #[test]
    fn here_underflow_is_rejected() {
        let mut dec = default_cache();
        let mut buf = [0u8; 10];
        let len = varint::encode_u64(500, &mut buf);
        assert_eq!(
            dec.decode(VCD_HERE, &buf[..len], 100).unwrap_err(),
            AddressError::OutOfRange
        );
    }

    #[test]
    fn empty_section_underflows() {
        let mut dec = default_cache();
        assert_eq!(
            dec.decode(VCD_SELF, &[], 100).unwrap_err(),
            AddressError::SectionUnderflow
        );
        assert_eq!(
            dec.decode(6, &[], 100).unwrap_err(),
            AddressError::SectionUnderflow
        );
    }

    #[test]
    fn near_ring_is_circular() {
        let mut c = default_cache();
        for i in 0..5u64 {
            c.update(i * 100);
        }
        assert_eq!(c.near[0], 400);
        assert_eq!(c.near[1], 100);
        assert_eq!(c.near[2], 200);
        assert_eq!(c.near[3], 300);
    }

    #[test]
    fn degenerate_geometry() {
        // near 0 / same 0 leaves only SELF and HERE.
        let mut enc = AddressCache::new(0, 0);
        let mut dec = AddressCache::new(0, 0);
        assert_eq!(enc.mode_count(), 2);
        for (addr, here) in [(0u64, 1u64), (10, 2000), (1999, 2000)] {
            let (mode, bytes) = enc.encode(addr, here);
            assert!(mode < 2);
            let (decoded, _) = dec.decode(mode, bytes.as_bytes(), here).unwrap();
            assert_eq!(decoded, addr);
        }
    }

    #[test]
    fn caches_stay_in_lockstep() {
        let mut enc = default_cache();
        let mut dec = default_cache();

        let addresses = [0u64, 4, 100, 4, 100, 50_000, 50_004, 50_000, 1, 99_999];
        let mut here = 100_000u64;
        for &addr in &addresses {
            let (mode, bytes) = enc.encode(addr, here);
            let (decoded, _) = dec.decode(mode, bytes.as_bytes(), here).unwrap();
            assert_eq!(decoded, addr, "mismatch at here={here}");
            here += 100;
        }
        assert_eq!(enc.near, dec.near);
        assert_eq!(enc.same, dec.same);
        assert_eq!(enc.next_slot, dec.next_slot);
    }
}
