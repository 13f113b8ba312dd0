// File and window header layout (RFC 3284, Sections 4.1-4.3, plus the
// SDCH extensions: 'S' version byte and the varint Adler-32 field).
//
// Parsing here is slice-based and restartable: every function reports
// either a parsed value with its consumed length, or "need more bytes"
// without consuming anything.  The streaming driver re-runs a parse after
// appending input, so progress is only committed on success.

use bitflags::bitflags;

use crate::error::DecodeError;
use crate::varint::{self, VarintError};

/// The first three magic bytes: "VCD" with the high bit set.
pub const VCDIFF_MAGIC: [u8; 3] = [0xD6, 0xC3, 0xC4];

/// Fourth header byte for the standard RFC 3284 format.
pub const VCDIFF_VERSION: u8 = 0x00;

/// Fourth header byte when SDCH extensions are in use.
pub const VCDIFF_EXT_VERSION: u8 = b'S';

/// Fixed size of the file header: magic, version, Hdr_Indicator.
pub const HEADER_SIZE: usize = 5;

bitflags! {
    /// Hdr_Indicator bits.  Reserved bits must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct HdrIndicator: u8 {
        /// A secondary compressor ID follows (unsupported here).
        const SECONDARY = 1 << 0;
        /// A custom code table follows as a nested delta.
        const CODETABLE = 1 << 1;
    }
}

bitflags! {
    /// Win_Indicator bits.  Reserved bits must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WinIndicator: u8 {
        /// The source segment is a slice of the dictionary.
        const SOURCE = 1 << 0;
        /// The source segment is a slice of the decoded target.
        const TARGET = 1 << 1;
        /// The delta encoding carries an Adler-32 of the target window.
        const CHECKSUM = 1 << 2;
    }
}

bitflags! {
    /// Delta_Indicator bits: per-section secondary compression.  All are
    /// unsupported; the whole byte must be zero.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DeltaIndicator: u8 {
        const DATACOMP = 1 << 0;
        const INSTCOMP = 1 << 1;
        const ADDRCOMP = 1 << 2;
    }
}

bitflags! {
    /// Encoder output extensions.  Any non-empty set selects the 'S'
    /// version byte in the file header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatExtensions: u8 {
        /// Emit windows in the interleaved layout.
        const INTERLEAVED = 1 << 0;
        /// Emit per-window Adler-32 checksums.
        const CHECKSUM = 1 << 1;
    }
}

// ---------------------------------------------------------------------------
// Restartable parsing
// ---------------------------------------------------------------------------

/// `Ok(None)` means the buffer ends before the unit completes; feed more
/// bytes and retry.  Nothing is consumed until `Ok(Some(..))`.
pub(crate) type ParseResult<T> = Result<Option<(T, usize)>, DecodeError>;

/// Read one varint, translating truncation into "need more".
pub(crate) fn parse_varint(buf: &[u8], what: &str) -> ParseResult<u64> {
    match varint::read_u64(buf) {
        Ok((val, len)) => Ok(Some((val, len))),
        Err(VarintError::Truncated) => Ok(None),
        Err(VarintError::Overflow) => Err(DecodeError::Format(format!("{what} varint overflow"))),
    }
}

/// Parse the five fixed header bytes.  The custom-code-table preamble, if
/// any, is handled by the driver after this.
pub(crate) fn parse_file_header(buf: &[u8]) -> ParseResult<HdrIndicator> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }
    if buf[..3] != VCDIFF_MAGIC {
        return Err(DecodeError::Header(format!(
            "bad magic {:02X} {:02X} {:02X}",
            buf[0], buf[1], buf[2]
        )));
    }
    if buf[3] != VCDIFF_VERSION && buf[3] != VCDIFF_EXT_VERSION {
        return Err(DecodeError::Header(format!(
            "unknown format version byte {:#04X}",
            buf[3]
        )));
    }
    let hdr = HdrIndicator::from_bits(buf[4]).ok_or_else(|| {
        DecodeError::Header(format!("reserved Hdr_Indicator bits set: {:#04X}", buf[4]))
    })?;
    Ok(Some((hdr, HEADER_SIZE)))
}

/// Everything before the delta encoding: Win_Indicator, the optional
/// source segment, and the delta-encoding length.
#[derive(Debug, Clone, Copy)]
pub(crate) struct WindowPrefix {
    pub win_ind: WinIndicator,
    /// (size, position) of the source segment, when SOURCE or TARGET set.
    pub segment: Option<(u64, u64)>,
    /// Byte length of the delta encoding that follows the prefix.
    pub enc_len: u64,
}

pub(crate) fn parse_window_prefix(buf: &[u8]) -> ParseResult<WindowPrefix> {
    let Some(&ind_byte) = buf.first() else {
        return Ok(None);
    };
    let win_ind = WinIndicator::from_bits(ind_byte).ok_or_else(|| {
        DecodeError::Format(format!("reserved Win_Indicator bits set: {ind_byte:#04X}"))
    })?;
    if win_ind.contains(WinIndicator::SOURCE | WinIndicator::TARGET) {
        return Err(DecodeError::Format(
            "window sets both VCD_SOURCE and VCD_TARGET".into(),
        ));
    }
    let mut pos = 1usize;

    let segment = if win_ind.intersects(WinIndicator::SOURCE | WinIndicator::TARGET) {
        let Some((size, len)) = parse_varint(&buf[pos..], "source segment size")? else {
            return Ok(None);
        };
        pos += len;
        let Some((offset, len)) = parse_varint(&buf[pos..], "source segment position")? else {
            return Ok(None);
        };
        pos += len;
        Some((size, offset))
    } else {
        None
    };

    let Some((enc_len, len)) = parse_varint(&buf[pos..], "delta encoding length")? else {
        return Ok(None);
    };
    pos += len;

    Ok(Some((
        WindowPrefix {
            win_ind,
            segment,
            enc_len,
        },
        pos,
    )))
}

/// The fixed part of a delta encoding: target length, Delta_Indicator,
/// section lengths, optional checksum.  `sections_start` is the offset of
/// the first section byte within the delta encoding.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DeltaHeader {
    pub target_len: u64,
    pub data_len: usize,
    pub inst_len: usize,
    pub addr_len: usize,
    pub checksum: Option<u32>,
    pub sections_start: usize,
}

impl DeltaHeader {
    /// Interleaved windows advertise zero-length data and address
    /// sections; all three byte kinds share the instruction section.
    #[inline]
    pub fn is_interleaved(&self) -> bool {
        self.data_len == 0 && self.addr_len == 0
    }
}

/// Parse the delta-encoding header out of `body`, which must hold the
/// complete delta encoding (exactly `enc_len` bytes).  Truncation inside a
/// fully buffered body is malformed data, not a retry.
pub(crate) fn parse_delta_header(
    body: &[u8],
    win_ind: WinIndicator,
) -> Result<DeltaHeader, DecodeError> {
    let underflow = || DecodeError::Format("delta encoding shorter than its header".into());
    let read = |pos: &mut usize, what: &str| -> Result<u64, DecodeError> {
        let (val, len) = match varint::read_u64(&body[*pos..]) {
            Ok(ok) => ok,
            Err(VarintError::Truncated) => return Err(underflow()),
            Err(VarintError::Overflow) => {
                return Err(DecodeError::Format(format!("{what} varint overflow")));
            }
        };
        *pos += len;
        Ok(val)
    };

    let mut pos = 0usize;
    let target_len = read(&mut pos, "target window length")?;

    let &delta_ind = body.get(pos).ok_or_else(underflow)?;
    pos += 1;
    let delta_ind = DeltaIndicator::from_bits(delta_ind).ok_or_else(|| {
        DecodeError::Format(format!("reserved Delta_Indicator bits set: {delta_ind:#04X}"))
    })?;
    if !delta_ind.is_empty() {
        return Err(DecodeError::Unsupported(
            "secondary section compression (Delta_Indicator != 0)".into(),
        ));
    }

    let data_len = read(&mut pos, "data section length")?;
    let inst_len = read(&mut pos, "instructions section length")?;
    let addr_len = read(&mut pos, "addresses section length")?;

    let checksum = if win_ind.contains(WinIndicator::CHECKSUM) {
        // The checksum is a 32-bit value: at most five varint bytes.
        let (val, len) = match varint::read_u32(&body[pos..]) {
            Ok(ok) => ok,
            Err(VarintError::Truncated) => return Err(underflow()),
            Err(VarintError::Overflow) => {
                return Err(DecodeError::Format("checksum varint overflow".into()));
            }
        };
        pos += len;
        Some(val)
    } else {
        None
    };

    let section_total = data_len
        .checked_add(inst_len)
        .and_then(|v| v.checked_add(addr_len))
        .ok_or_else(|| DecodeError::Format("section lengths overflow".into()))?;
    let expected = pos as u64 + section_total;
    if expected != body.len() as u64 {
        return Err(DecodeError::Format(format!(
            "delta encoding length mismatch: declared {}, computed {expected}",
            body.len()
        )));
    }

    Ok(DeltaHeader {
        target_len,
        data_len: data_len as usize,
        inst_len: inst_len as usize,
        addr_len: addr_len as usize,
        checksum,
        sections_start: pos,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
