// Delta-window decoder and streaming driver.
//
// The driver buffers incoming bytes and is restartable at any byte
// boundary, down to single-byte feeds.  A window is decoded only once its
// delta encoding is fully buffered, so parsing inside a window never has
// to suspend; the configured caps bound how much a hostile stream can make
// the driver buffer.
//
// Custom code tables arrive as a nested delta against the default table's
// serialized image and are decoded by a second `StreamingDecoder` with a
// recursion depth of one.

use std::io::Write;

use log::{debug, trace};

use crate::address_cache::AddressCache;
use crate::checksum;
use crate::code_table::{
    self, CodeTable, DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE, SERIALIZED_SIZE, VCD_ADD,
    VCD_COPY, VCD_NOOP, VCD_RUN,
};
use crate::error::DecodeError;
use crate::header::{self, DeltaHeader, HdrIndicator, WinIndicator};
use crate::varint::{self, VarintError};

/// Default cap on the total decoded output of one delta file.
pub const DEFAULT_MAX_TARGET_FILE_SIZE: u64 = 64 << 20;
/// Default cap on one window's decoded size.
pub const DEFAULT_MAX_TARGET_WINDOW_SIZE: u32 = 64 << 20;
/// Default cap on each of a window's three sections.
pub const DEFAULT_MAX_SECTION_SIZE: u32 = 64 << 20;

// ---------------------------------------------------------------------------
// Section cursors
// ---------------------------------------------------------------------------

/// Cursor over a window's three sections.  In the interleaved layout the
/// instruction cursor serves all three roles; the separate data and
/// address slices are empty.
struct Sections<'a> {
    data: &'a [u8],
    inst: &'a [u8],
    addr: &'a [u8],
    data_pos: usize,
    inst_pos: usize,
    addr_pos: usize,
    interleaved: bool,
}

impl<'a> Sections<'a> {
    fn new(body: &'a [u8], dh: &DeltaHeader) -> Self {
        let sections = &body[dh.sections_start..];
        let (data, rest) = sections.split_at(dh.data_len);
        let (inst, addr) = rest.split_at(dh.inst_len);
        Self {
            data,
            inst,
            addr,
            data_pos: 0,
            inst_pos: 0,
            addr_pos: 0,
            interleaved: dh.is_interleaved(),
        }
    }

    #[inline]
    fn next_opcode(&mut self) -> Option<u8> {
        let b = self.inst.get(self.inst_pos).copied();
        if b.is_some() {
            self.inst_pos += 1;
        }
        b
    }

    /// Explicit instruction size from the instruction stream.
    fn read_size(&mut self) -> Result<u32, DecodeError> {
        let (val, consumed) = varint::read_u32(&self.inst[self.inst_pos..]).map_err(|e| match e {
            VarintError::Truncated => {
                DecodeError::Format("instructions section ends mid-size".into())
            }
            VarintError::Overflow => DecodeError::Format("instruction size varint overflow".into()),
        })?;
        self.inst_pos += consumed;
        Ok(val)
    }

    /// `n` payload bytes for ADD/RUN, from the data section or inline.
    fn read_data(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let (buf, pos) = if self.interleaved {
            (self.inst, &mut self.inst_pos)
        } else {
            (self.data, &mut self.data_pos)
        };
        let end = pos
            .checked_add(n)
            .filter(|&end| end <= buf.len())
            .ok_or_else(|| DecodeError::Format("data section underflow".into()))?;
        let out = &buf[*pos..end];
        *pos = end;
        Ok(out)
    }

    /// Decode one COPY address through the cache, from the address section
    /// or inline.
    fn read_addr(
        &mut self,
        cache: &mut AddressCache,
        mode: u8,
        here: u64,
    ) -> Result<u64, DecodeError> {
        let (buf, pos) = if self.interleaved {
            (self.inst, &mut self.inst_pos)
        } else {
            (self.addr, &mut self.addr_pos)
        };
        let (addr, consumed) = cache
            .decode(mode, &buf[*pos..], here)
            .map_err(|e| DecodeError::Format(e.to_string()))?;
        *pos += consumed;
        Ok(addr)
    }

    /// All three cursors exhausted exactly.
    fn fully_consumed(&self) -> bool {
        self.data_pos == self.data.len()
            && self.inst_pos == self.inst.len()
            && self.addr_pos == self.addr.len()
    }
}

// ---------------------------------------------------------------------------
// Window body execution
// ---------------------------------------------------------------------------

/// Append `size` bytes starting at `addr` in the combined address space
/// `seg || output` onto `output`.  The cache guarantees `addr < here`, and
/// the readable region grows ahead of the read position, so every byte-wise
/// access is in bounds; overlapping self-copies are how RLE expansion works.
fn copy_from_address_space(seg: &[u8], output: &mut Vec<u8>, addr: u64, size: usize) {
    let seg_len = seg.len() as u64;
    if addr + size as u64 <= seg_len {
        let start = addr as usize;
        output.extend_from_slice(&seg[start..start + size]);
    } else if addr >= seg_len {
        let start = (addr - seg_len) as usize;
        if start + size <= output.len() {
            output.extend_from_within(start..start + size);
        } else {
            for i in 0..size {
                let b = output[start + i];
                output.push(b);
            }
        }
    } else {
        // Straddles the segment/target boundary.
        for i in 0..size {
            let pos = addr + i as u64;
            let b = if pos < seg_len {
                seg[pos as usize]
            } else {
                output[(pos - seg_len) as usize]
            };
            output.push(b);
        }
    }
}

/// Replay one window's instructions against `seg` (the source segment)
/// into `output`, which must be empty on entry.
fn decode_window_body(
    table: &CodeTable,
    cache: &mut AddressCache,
    seg: &[u8],
    body: &[u8],
    dh: &DeltaHeader,
    output: &mut Vec<u8>,
) -> Result<(), DecodeError> {
    let target_len = dh.target_len as usize;
    output.reserve(target_len);
    cache.init();

    let mut secs = Sections::new(body, dh);

    while let Some(opcode) = secs.next_opcode() {
        let entry = *table.entry(opcode);
        let halves = [
            (entry.inst1, entry.size1, entry.mode1),
            (entry.inst2, entry.size2, entry.mode2),
        ];
        for (inst, table_size, mode) in halves {
            if inst == VCD_NOOP {
                continue;
            }
            let size = if table_size == 0 {
                let s = secs.read_size()?;
                if s == 0 {
                    return Err(DecodeError::Format(format!(
                        "zero-size instruction (opcode {opcode})"
                    )));
                }
                s
            } else {
                u32::from(table_size)
            };

            if output.len() as u64 + u64::from(size) > target_len as u64 {
                return Err(DecodeError::Format(
                    "instructions overrun the declared target window length".into(),
                ));
            }

            match inst {
                VCD_RUN => {
                    let byte = secs.read_data(1)?[0];
                    output.resize(output.len() + size as usize, byte);
                }
                VCD_ADD => {
                    let payload = secs.read_data(size as usize)?;
                    output.extend_from_slice(payload);
                }
                VCD_COPY => {
                    let here = seg.len() as u64 + output.len() as u64;
                    let addr = secs.read_addr(cache, mode, here)?;
                    copy_from_address_space(seg, output, addr, size as usize);
                }
                other => {
                    return Err(DecodeError::Format(format!(
                        "unknown instruction type {other} (opcode {opcode})"
                    )));
                }
            }
        }
    }

    if !secs.fully_consumed() {
        return Err(DecodeError::Format(
            "window sections not fully consumed".into(),
        ));
    }
    if output.len() != target_len {
        return Err(DecodeError::Format(format!(
            "target window length mismatch: declared {target_len}, produced {}",
            output.len()
        )));
    }
    if let Some(expected) = dh.checksum {
        let actual = checksum::adler32(output);
        if actual != expected {
            return Err(DecodeError::ChecksumMismatch { expected, actual });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Streaming driver
// ---------------------------------------------------------------------------

/// The code table in effect for this delta file.
enum ActiveTable {
    Default,
    Custom(Box<CodeTable>),
}

impl ActiveTable {
    #[inline]
    fn get(&self) -> &CodeTable {
        match self {
            ActiveTable::Default => code_table::default_table(),
            ActiveTable::Custom(t) => t,
        }
    }
}

/// In-flight nested decode of a custom code table.
struct TableDecode {
    remaining: usize,
    near: usize,
    same: usize,
    nested: Box<StreamingDecoder<'static>>,
    image: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the five fixed header bytes.
    FileHeader,
    /// Waiting for the custom-table preamble (cache sizes, lengths).
    TablePreamble,
    /// Feeding the embedded table delta to the nested decoder.
    TableDelta,
    /// Between windows, or mid-window with bytes pending in the buffer.
    Windows,
    /// A terminal error was reported; the decoder is poisoned.
    Failed,
}

/// Streaming VCDIFF decoder.
///
/// Feed arbitrary chunks with `decode_chunk`; reconstructed target bytes
/// are written to the sink as each window completes.  `finish_decoding`
/// verifies the stream ended between windows.
pub struct StreamingDecoder<'d> {
    dictionary: Option<&'d [u8]>,
    state: State,
    buffer: Vec<u8>,

    allow_vcd_target: bool,
    allow_custom_table: bool,
    max_target_file_size: u64,
    max_target_window_size: u32,
    max_section_size: u32,

    table: ActiveTable,
    cache: AddressCache,
    table_decode: Option<TableDecode>,

    /// Decoded target so far; retained only while VCD_TARGET windows are
    /// allowed, since only those can reference it.
    decoded_target: Vec<u8>,
    total_decoded: u64,
    /// Reusable per-window output scratch.
    window_buf: Vec<u8>,
}

impl<'d> StreamingDecoder<'d> {
    pub fn new() -> Self {
        Self {
            dictionary: None,
            state: State::FileHeader,
            buffer: Vec::new(),
            allow_vcd_target: true,
            allow_custom_table: true,
            max_target_file_size: DEFAULT_MAX_TARGET_FILE_SIZE,
            max_target_window_size: DEFAULT_MAX_TARGET_WINDOW_SIZE,
            max_section_size: DEFAULT_MAX_SECTION_SIZE,
            table: ActiveTable::Default,
            cache: AddressCache::new(DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE),
            table_decode: None,
            decoded_target: Vec::new(),
            total_decoded: 0,
            window_buf: Vec::new(),
        }
    }

    /// Accept or reject windows whose source segment is the decoded
    /// target (default: accept).
    pub fn set_allow_vcd_target(&mut self, allow: bool) {
        self.allow_vcd_target = allow;
    }

    /// Cap the total decoded output of one delta file.
    pub fn set_max_target_file_size(&mut self, max: u64) {
        self.max_target_file_size = max;
    }

    /// Cap one window's decoded size.
    pub fn set_max_target_window_size(&mut self, max: u32) {
        self.max_target_window_size = max;
    }

    /// Cap each window section (protects the input buffer against
    /// hostile length fields).
    pub fn set_max_section_size(&mut self, max: u32) {
        self.max_section_size = max;
    }

    /// Begin decoding a delta file against `dictionary`.  Resets all
    /// streaming state; limits and the VCD_TARGET gate persist.
    pub fn start_decoding(&mut self, dictionary: &'d [u8]) {
        self.dictionary = Some(dictionary);
        self.state = State::FileHeader;
        self.buffer.clear();
        self.table = ActiveTable::Default;
        self.cache = AddressCache::new(DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE);
        self.table_decode = None;
        self.decoded_target.clear();
        self.total_decoded = 0;
    }

    /// Feed one chunk.  Decoded window bytes are written to `sink`.  All
    /// errors are terminal; truncation is silent here and reported by
    /// `finish_decoding`.
    pub fn decode_chunk<W: Write>(&mut self, chunk: &[u8], sink: &mut W) -> Result<(), DecodeError> {
        if self.dictionary.is_none() {
            return Err(DecodeError::Usage(
                "decode_chunk called before start_decoding".into(),
            ));
        }
        if self.state == State::Failed {
            return Err(DecodeError::Usage(
                "decoder previously reported a terminal error".into(),
            ));
        }
        self.buffer.extend_from_slice(chunk);
        match self.drive(sink) {
            Ok(()) => Ok(()),
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Verify the stream ended cleanly between windows.
    pub fn finish_decoding(&mut self) -> Result<(), DecodeError> {
        match self.state {
            State::Windows if self.buffer.is_empty() => Ok(()),
            State::Windows => Err(DecodeError::Truncated(format!(
                "{} bytes of an incomplete window pending",
                self.buffer.len()
            ))),
            State::FileHeader => Err(DecodeError::Truncated(
                "stream ended before the file header completed".into(),
            )),
            State::TablePreamble | State::TableDelta => Err(DecodeError::Truncated(
                "stream ended inside the custom code table".into(),
            )),
            State::Failed => Err(DecodeError::Usage(
                "decoder previously reported a terminal error".into(),
            )),
        }
    }

    /// Total target bytes produced so far.
    pub fn total_decoded(&self) -> u64 {
        self.total_decoded
    }

    // -----------------------------------------------------------------------
    // Driver
    // -----------------------------------------------------------------------

    fn drive<W: Write>(&mut self, sink: &mut W) -> Result<(), DecodeError> {
        loop {
            let progressed = match self.state {
                State::FileHeader => self.step_file_header()?,
                State::TablePreamble => self.step_table_preamble()?,
                State::TableDelta => self.step_table_delta()?,
                State::Windows => self.step_window(sink)?,
                State::Failed => {
                    return Err(DecodeError::Usage(
                        "decoder previously reported a terminal error".into(),
                    ));
                }
            };
            if !progressed {
                return Ok(());
            }
        }
    }

    fn step_file_header(&mut self) -> Result<bool, DecodeError> {
        let Some((hdr, consumed)) = header::parse_file_header(&self.buffer)? else {
            return Ok(false);
        };
        self.buffer.drain(..consumed);
        if hdr.contains(HdrIndicator::SECONDARY) {
            return Err(DecodeError::Unsupported(
                "secondary compressor selected in Hdr_Indicator".into(),
            ));
        }
        if hdr.contains(HdrIndicator::CODETABLE) {
            if !self.allow_custom_table {
                return Err(DecodeError::Format(
                    "custom code table nested inside a custom code table".into(),
                ));
            }
            debug!("file header carries a custom code table");
            self.state = State::TablePreamble;
        } else {
            self.state = State::Windows;
        }
        Ok(true)
    }

    fn step_table_preamble(&mut self) -> Result<bool, DecodeError> {
        let mut pos = 0usize;
        let Some((near, len)) = header::parse_varint(&self.buffer[pos..], "near cache size")?
        else {
            return Ok(false);
        };
        pos += len;
        let Some((same, len)) = header::parse_varint(&self.buffer[pos..], "same cache size")?
        else {
            return Ok(false);
        };
        pos += len;
        let Some(&max_mode) = self.buffer.get(pos) else {
            return Ok(false);
        };
        pos += 1;
        let Some((delta_len, len)) =
            header::parse_varint(&self.buffer[pos..], "code table delta length")?
        else {
            return Ok(false);
        };
        pos += len;

        if near.checked_add(same).is_none_or(|s| s > 254) {
            return Err(DecodeError::Header(format!(
                "cache sizes too large: near {near} + same {same} exceeds the mode space"
            )));
        }
        if u64::from(max_mode) != 1 + near + same {
            return Err(DecodeError::Header(format!(
                "max_mode byte {max_mode} does not match cache sizes (near {near}, same {same})"
            )));
        }
        if delta_len > u64::from(self.max_section_size) {
            return Err(DecodeError::Policy(format!(
                "embedded code table delta of {delta_len} bytes exceeds the section cap"
            )));
        }

        self.buffer.drain(..pos);

        let mut nested = Box::new(StreamingDecoder::new());
        nested.allow_custom_table = false;
        nested.set_max_target_file_size(SERIALIZED_SIZE as u64);
        nested.set_max_target_window_size(SERIALIZED_SIZE as u32);
        nested.start_decoding(code_table::default_table_image().as_slice());

        self.table_decode = Some(TableDecode {
            remaining: delta_len as usize,
            near: near as usize,
            same: same as usize,
            nested,
            image: Vec::with_capacity(SERIALIZED_SIZE),
        });
        self.state = State::TableDelta;
        Ok(true)
    }

    fn step_table_delta(&mut self) -> Result<bool, DecodeError> {
        let Some(mut td) = self.table_decode.take() else {
            return Err(DecodeError::Usage("inconsistent driver state".into()));
        };

        let take = td.remaining.min(self.buffer.len());
        if take > 0 {
            td.nested.decode_chunk(&self.buffer[..take], &mut td.image)?;
            self.buffer.drain(..take);
            td.remaining -= take;
        }

        if td.remaining == 0 {
            // The embedded delta's extent was declared by the preamble, so
            // an unfinished nested decode is malformed data, not a retry.
            td.nested.finish_decoding().map_err(|e| match e {
                DecodeError::Truncated(msg) => {
                    DecodeError::Format(format!("embedded code table delta incomplete: {msg}"))
                }
                other => other,
            })?;
            self.install_custom_table(&td.image, td.near, td.same)?;
            self.state = State::Windows;
            Ok(true)
        } else {
            self.table_decode = Some(td);
            Ok(false)
        }
    }

    fn install_custom_table(
        &mut self,
        image: &[u8],
        near: usize,
        same: usize,
    ) -> Result<(), DecodeError> {
        let image: &[u8; SERIALIZED_SIZE] = image.try_into().map_err(|_| {
            DecodeError::Format(format!(
                "custom code table decoded to {} bytes, expected {SERIALIZED_SIZE}",
                image.len()
            ))
        })?;
        let table = CodeTable::from_bytes(image);
        let max_mode = (1 + near + same) as u8;
        table.validate(max_mode).map_err(DecodeError::Format)?;
        debug!("installed custom code table (near {near}, same {same})");
        self.table = ActiveTable::Custom(Box::new(table));
        self.cache = AddressCache::new(near, same);
        Ok(())
    }

    fn step_window<W: Write>(&mut self, sink: &mut W) -> Result<bool, DecodeError> {
        let Some((prefix, prefix_len)) = header::parse_window_prefix(&self.buffer)? else {
            return Ok(false);
        };

        let enc_cap = 3 * u64::from(self.max_section_size) + 1024;
        if prefix.enc_len > enc_cap {
            return Err(DecodeError::Policy(format!(
                "delta encoding of {} bytes exceeds the window cap",
                prefix.enc_len
            )));
        }
        let enc_len = prefix.enc_len as usize;
        if self.buffer.len() < prefix_len + enc_len {
            // The whole window must be buffered before decoding starts.
            return Ok(false);
        }

        let body = &self.buffer[prefix_len..prefix_len + enc_len];
        let dh = header::parse_delta_header(body, prefix.win_ind)?;

        if dh.target_len > u64::from(self.max_target_window_size) {
            return Err(DecodeError::Policy(format!(
                "target window of {} bytes exceeds the window size cap",
                dh.target_len
            )));
        }
        if self.total_decoded + dh.target_len > self.max_target_file_size {
            return Err(DecodeError::Policy(format!(
                "decoded output would exceed the file size cap of {} bytes",
                self.max_target_file_size
            )));
        }
        let section_cap = self.max_section_size as usize;
        if dh.data_len > section_cap || dh.inst_len > section_cap || dh.addr_len > section_cap {
            return Err(DecodeError::Policy("window section exceeds the cap".into()));
        }

        // Resolve the source segment.
        let seg: &[u8] = if prefix.win_ind.contains(WinIndicator::SOURCE) {
            let (size, offset) = prefix.segment.unwrap_or((0, 0));
            let dict = self.dictionary.unwrap_or(&[]);
            let end = offset.checked_add(size).filter(|&e| e <= dict.len() as u64);
            let Some(end) = end else {
                return Err(DecodeError::Format(format!(
                    "source segment [{offset}, +{size}) outside the {}-byte dictionary",
                    dict.len()
                )));
            };
            &dict[offset as usize..end as usize]
        } else if prefix.win_ind.contains(WinIndicator::TARGET) {
            if !self.allow_vcd_target {
                return Err(DecodeError::Policy(
                    "window uses VCD_TARGET, which is disallowed".into(),
                ));
            }
            let (size, offset) = prefix.segment.unwrap_or((0, 0));
            let end = offset
                .checked_add(size)
                .filter(|&e| e <= self.decoded_target.len() as u64);
            let Some(end) = end else {
                return Err(DecodeError::Format(format!(
                    "target segment [{offset}, +{size}) outside the {} bytes decoded so far",
                    self.decoded_target.len()
                )));
            };
            &self.decoded_target[offset as usize..end as usize]
        } else {
            &[]
        };

        trace!(
            "window: win_ind {:#04X}, segment {} bytes, target {} bytes",
            prefix.win_ind.bits(),
            seg.len(),
            dh.target_len
        );

        let mut window_buf = std::mem::take(&mut self.window_buf);
        window_buf.clear();
        let result = decode_window_body(
            self.table.get(),
            &mut self.cache,
            seg,
            body,
            &dh,
            &mut window_buf,
        );
        if let Err(e) = result {
            return Err(e);
        }

        sink.write_all(&window_buf)?;
        self.total_decoded += window_buf.len() as u64;
        if self.allow_vcd_target {
            self.decoded_target.extend_from_slice(&window_buf);
        }
        self.window_buf = window_buf;
        self.buffer.drain(..prefix_len + enc_len);
        Ok(true)
    }
}

impl Default for StreamingDecoder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Convenience
// ---------------------------------------------------------------------------

/// Decode a complete in-memory delta file against `dictionary`.
pub fn decode_all(dictionary: &[u8], delta: &[u8]) -> Result<Vec<u8>, DecodeError> {
    let mut decoder = StreamingDecoder::new();
    decoder.start_decoding(dictionary);
    let mut out = Vec::new();
    decoder.decode_chunk(delta, &mut out)?;
    decoder.finish_decoding()?;
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder::WindowEncoder;
    use crate::header::{FormatExtensions, VCDIFF_MAGIC, VCDIFF_VERSION};

    /// Encode a header plus one ADD-everything window.
    fn add_only_delta(dictionary_size: u64, target: &[u8], interleaved: bool) -> Vec<u8> {
        let mut enc = WindowEncoder::new(interleaved);
        let mut out = Vec::new();
        enc.write_header(&mut out, FormatExtensions::empty()).unwrap();
        enc.init(dictionary_size).unwrap();
        enc.add(target).unwrap();
        enc.add_checksum(checksum::adler32(target)).unwrap();
        enc.output(&mut out).unwrap();
        out
    }

    #[test]
    fn roundtrip_segregated_and_interleaved() {
        let target = b"The quick brown fox jumps over the lazy dog";
        for interleaved in [false, true] {
            let delta = add_only_delta(0, target, interleaved);
            let decoded = decode_all(&[], &delta).unwrap();
            assert_eq!(decoded, target);
        }
    }

    #[test]
    fn roundtrip_with_dictionary_copy() {
        let dict = b"Hello, world!";
        let mut enc = WindowEncoder::new(true);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::INTERLEAVED)
            .unwrap();
        enc.init(dict.len() as u64).unwrap();
        enc.copy(0, dict.len() as u32).unwrap();
        enc.add_checksum(checksum::adler32(dict)).unwrap();
        enc.output(&mut delta).unwrap();

        assert!(delta.len() < dict.len() + 5 + 16);
        let decoded = decode_all(dict, &delta).unwrap();
        assert_eq!(decoded, dict);
    }

    #[test]
    fn single_byte_chunks_match_whole_file() {
        let target = b"chunked decoding must be restartable at every byte";
        let delta = add_only_delta(0, target, true);

        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(&[]);
        let mut out = Vec::new();
        for &b in &delta {
            decoder.decode_chunk(&[b], &mut out).unwrap();
        }
        decoder.finish_decoding().unwrap();
        assert_eq!(out, target);
    }

    #[test]
    fn rle_self_copy() {
        // dictionary = "", target = "aaaa" via RUN(1,'a') + COPY(0, 3).
        let mut enc = WindowEncoder::new(false);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::empty()).unwrap();
        enc.init(0).unwrap();
        enc.run(1, b'a').unwrap();
        enc.copy(0, 3).unwrap();
        enc.output(&mut delta).unwrap();
        assert_eq!(decode_all(&[], &delta).unwrap(), b"aaaa");
    }

    #[test]
    fn copy_straddles_segment_boundary() {
        // Segment "abc", window starts with ADD "xy"; a COPY at address 1
        // spanning into the target region reads "bcxy".
        let dict = b"abc";
        let mut enc = WindowEncoder::new(false);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::empty()).unwrap();
        enc.init(dict.len() as u64).unwrap();
        enc.add(b"xy").unwrap();
        enc.copy(1, 4).unwrap();
        enc.output(&mut delta).unwrap();
        assert_eq!(decode_all(dict, &delta).unwrap(), b"xybcxy");
    }

    #[test]
    fn checksum_mismatch_is_detected() {
        let target = b"some window payload";
        let mut delta = add_only_delta(0, target, false);
        // Sections are emitted data-then-inst-then-addr; the ADD needs an
        // explicit size here (19 > 17), so the last three bytes are the
        // final data byte followed by [opcode, size].  Flip the data byte.
        let n = delta.len();
        delta[n - 3] ^= 0x01;
        match decode_all(&[], &delta) {
            Err(DecodeError::ChecksumMismatch { .. }) => {}
            other => panic!("expected checksum mismatch, got {other:?}"),
        }
    }

    #[test]
    fn finish_before_any_input_is_truncation() {
        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(&[]);
        assert!(matches!(
            decoder.finish_decoding(),
            Err(DecodeError::Truncated(_))
        ));
    }

    #[test]
    fn every_prefix_fails_only_at_finish() {
        let target = b"truncate me anywhere";
        let delta = add_only_delta(0, target, true);
        for cut in 0..delta.len() {
            let mut decoder = StreamingDecoder::new();
            decoder.start_decoding(&[]);
            let mut out = Vec::new();
            for &b in &delta[..cut] {
                decoder
                    .decode_chunk(&[b], &mut out)
                    .expect("prefix feeding must never fail mid-stream");
            }
            assert!(
                decoder.finish_decoding().is_err(),
                "cut at {cut} should leave the decoder unfinished"
            );
        }
    }

    #[test]
    fn decode_chunk_requires_start() {
        let mut decoder = StreamingDecoder::new();
        let mut out = Vec::new();
        assert!(matches!(
            decoder.decode_chunk(&[0xD6], &mut out),
            Err(DecodeError::Usage(_))
        ));
    }

    #[test]
    fn terminal_error_poisons_decoder() {
        let mut decoder = StreamingDecoder::new();
        decoder.start_decoding(&[]);
        let mut out = Vec::new();
        assert!(decoder.decode_chunk(b"not a delta", &mut out).is_err());
        assert!(matches!(
            decoder.decode_chunk(&[0x00], &mut out),
            Err(DecodeError::Usage(_))
        ));
        assert!(matches!(
            decoder.finish_decoding(),
            Err(DecodeError::Usage(_))
        ));
    }

    fn hand_built_target_window() -> Vec<u8> {
        // VCD_TARGET window copying the first 4 already-decoded bytes.
        let mut w = vec![WinIndicator::TARGET.bits()];
        varint::write_int(&mut w, 4u64).unwrap(); // segment size
        varint::write_int(&mut w, 0u64).unwrap(); // segment position
        let mut body = Vec::new();
        varint::write_int(&mut body, 4u64).unwrap(); // target_len
        body.push(0x00); // Delta_Indicator
        varint::write_int(&mut body, 0u64).unwrap(); // data_len
        varint::write_int(&mut body, 2u64).unwrap(); // inst_len
        varint::write_int(&mut body, 0u64).unwrap(); // addr_len
        body.push(20); // COPY size 4, mode SELF
        body.push(0x00); // address 0 (interleaved)
        varint::write_usize(&mut w, body.len()).unwrap();
        w.extend_from_slice(&body);
        w
    }

    #[test]
    fn vcd_target_window_chains_on_decoded_output() {
        let mut delta = add_only_delta(0, b"WXYZ", false);
        delta.extend_from_slice(&hand_built_target_window());
        let decoded = decode_all(&[], &delta).unwrap();
        assert_eq!(decoded, b"WXYZWXYZ");
    }

    #[test]
    fn vcd_target_gate_rejects_when_disallowed() {
        let mut delta = add_only_delta(0, b"WXYZ", false);
        delta.extend_from_slice(&hand_built_target_window());

        let mut decoder = StreamingDecoder::new();
        decoder.set_allow_vcd_target(false);
        decoder.start_decoding(&[]);
        let mut out = Vec::new();
        let err = decoder.decode_chunk(&delta, &mut out).unwrap_err();
        assert!(matches!(err, DecodeError::Policy(_)), "got {err:?}");
        // The first window decoded fine before the gate tripped.
        assert_eq!(out, b"WXYZ");
    }

    #[test]
    fn window_size_cap_is_enforced() {
        let delta = add_only_delta(0, &[0xAA; 100], false);
        let mut decoder = StreamingDecoder::new();
        decoder.set_max_target_window_size(99);
        decoder.start_decoding(&[]);
        let mut out = Vec::new();
        assert!(matches!(
            decoder.decode_chunk(&delta, &mut out),
            Err(DecodeError::Policy(_))
        ));
    }

    #[test]
    fn file_size_cap_is_enforced() {
        let mut enc = WindowEncoder::new(false);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::empty()).unwrap();
        for _ in 0..3 {
            enc.init(0).unwrap();
            enc.add(&[0x11; 50]).unwrap();
            enc.output(&mut delta).unwrap();
        }
        let mut decoder = StreamingDecoder::new();
        decoder.set_max_target_file_size(120);
        decoder.start_decoding(&[]);
        let mut out = Vec::new();
        assert!(matches!(
            decoder.decode_chunk(&delta, &mut out),
            Err(DecodeError::Policy(_))
        ));
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn source_segment_must_fit_dictionary() {
        let mut delta = VCDIFF_MAGIC.to_vec();
        delta.push(VCDIFF_VERSION);
        delta.push(0x00);
        delta.push(WinIndicator::SOURCE.bits());
        varint::write_int(&mut delta, 100u64).unwrap(); // segment size
        varint::write_int(&mut delta, 0u64).unwrap();
        varint::write_int(&mut delta, 7u64).unwrap(); // enc_len
        // Consistent body: target 1, data 1, inst 1, addr 0, then "x" and
        // an ADD(1) opcode.  The segment check must fire before execution.
        delta.extend_from_slice(&[0x01, 0x00, 0x01, 0x01, 0x00, b'x', 0x02]);
        let err = decode_all(b"tiny", &delta).unwrap_err();
        assert!(matches!(err, DecodeError::Format(_)), "got {err:?}");
    }

    #[test]
    fn two_windows_concatenate() {
        let mut enc = WindowEncoder::new(true);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::INTERLEAVED)
            .unwrap();
        enc.init(0).unwrap();
        enc.add(b"first-").unwrap();
        enc.output(&mut delta).unwrap();
        enc.init(0).unwrap();
        enc.add(b"second").unwrap();
        enc.output(&mut delta).unwrap();
        assert_eq!(decode_all(&[], &delta).unwrap(), b"first-second");
    }

    #[test]
    fn empty_delta_file_decodes_to_nothing() {
        let enc = WindowEncoder::new(false);
        let mut delta = Vec::new();
        enc.write_header(&mut delta, FormatExtensions::empty()).unwrap();
        assert_eq!(decode_all(b"dictionary", &delta).unwrap(), b"");
    }
}
