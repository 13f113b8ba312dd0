// Window encoder: accumulates ADD/COPY/RUN instructions and emits framed
// delta windows.
//
// The matching engine that decides instruction boundaries is an external
// collaborator; it drives `add`/`copy`/`run`/`add_checksum`/`output` in
// stream order.  This module is concerned purely with format-level
// encoding: opcode selection (including retroactive compound upgrades),
// address-cache-driven COPY addresses, and window framing.
//
// Section routing: in the segregated layout each of the three sections has
// its own buffer.  In the interleaved layout ADD/RUN payloads and COPY
// addresses are routed into the instruction buffer at emit time, so the
// separate buffers stay empty and the window header naturally advertises
// zero-length data and address sections.

use std::io::Write;

use log::warn;

use crate::address_cache::AddressCache;
use crate::code_table::{
    CodeTable, DEFAULT_NEAR_CACHE_SIZE, DEFAULT_SAME_CACHE_SIZE, VCD_ADD, VCD_COPY, VCD_RUN,
};
use crate::error::EncodeError;
use crate::header::{
    FormatExtensions, VCDIFF_EXT_VERSION, VCDIFF_MAGIC, VCDIFF_VERSION, WinIndicator,
};
use crate::instruction_map::{self, InstructionMap};
use crate::varint;

/// Code table configuration: the shared default, or a borrowed custom
/// table with its cache geometry.
#[derive(Clone, Copy)]
enum TableConfig<'a> {
    Default,
    Custom { table: &'a CodeTable, max_mode: u8 },
}

/// Accumulates instructions for one delta window and frames it on
/// `output`.  Reusable across windows: `output` re-initializes.
pub struct WindowEncoder<'a> {
    interleaved: bool,
    config: TableConfig<'a>,
    /// Built on first `init` for custom tables; the default table shares a
    /// static map.
    map: Option<InstructionMap>,
    cache: AddressCache,

    dictionary_size: u64,
    target_len: u64,
    inst: Vec<u8>,
    data: Vec<u8>,
    addr: Vec<u8>,

    /// Index into `inst` of the most recent single-instruction opcode that
    /// is still eligible for a compound upgrade.  Kept as an index, not a
    /// reference: the buffer may reallocate.  Invalidated whenever a size
    /// varint lands after the opcode, which would detach an upgrade from
    /// its payload.
    last_opcode_index: Option<usize>,
    last_inst_was_add: bool,

    checksum: Option<u32>,
    initialized: bool,
}

impl<'a> WindowEncoder<'a> {
    /// Encoder over the default RFC 3284 code table (near 4, same 3).
    pub fn new(interleaved: bool) -> Self {
        Self::build(
            interleaved,
            TableConfig::Default,
            DEFAULT_NEAR_CACHE_SIZE,
            DEFAULT_SAME_CACHE_SIZE,
        )
    }

    /// Encoder over a custom code table, borrowed for the encoder's
    /// lifetime.  `max_mode` must equal `1 + near_size + same_size`; the
    /// table is validated on the first `init`.
    pub fn with_code_table(
        interleaved: bool,
        table: &'a CodeTable,
        near_size: usize,
        same_size: usize,
        max_mode: u8,
    ) -> Self {
        Self::build(
            interleaved,
            TableConfig::Custom { table, max_mode },
            near_size,
            same_size,
        )
    }

    fn build(
        interleaved: bool,
        config: TableConfig<'a>,
        near_size: usize,
        same_size: usize,
    ) -> Self {
        Self {
            interleaved,
            config,
            map: None,
            cache: AddressCache::new(near_size, same_size),
            dictionary_size: 0,
            target_len: 0,
            inst: Vec::new(),
            data: Vec::new(),
            addr: Vec::new(),
            last_opcode_index: None,
            last_inst_was_add: false,
            checksum: None,
            initialized: false,
        }
    }

    /// Prepare for a new window against a dictionary of `dictionary_size`
    /// bytes.  Re-callable: resets all per-window state.  On the first
    /// call with a custom table, validates it and builds its instruction
    /// map.
    pub fn init(&mut self, dictionary_size: u64) -> Result<(), EncodeError> {
        if self.map.is_none()
            && let TableConfig::Custom { table, max_mode } = self.config
        {
            if usize::from(max_mode) + 1 != self.cache.mode_count() {
                return Err(EncodeError::InvalidCodeTable(format!(
                    "max_mode {max_mode} does not match cache geometry ({} modes)",
                    self.cache.mode_count()
                )));
            }
            table
                .validate(max_mode)
                .map_err(EncodeError::InvalidCodeTable)?;
            self.map = Some(InstructionMap::new(table, max_mode));
        }
        self.dictionary_size = dictionary_size;
        self.reset_window();
        self.initialized = true;
        Ok(())
    }

    fn reset_window(&mut self) {
        self.cache.init();
        self.target_len = 0;
        self.inst.clear();
        self.data.clear();
        self.addr.clear();
        self.last_opcode_index = None;
        self.last_inst_was_add = false;
        self.checksum = None;
    }

    /// Target bytes contributed by the current window so far.
    #[inline]
    pub fn target_len(&self) -> u64 {
        self.target_len
    }

    fn ensure_init(&self) -> Result<(), EncodeError> {
        if self.initialized {
            Ok(())
        } else {
            Err(EncodeError::NotInitialized)
        }
    }

    // -----------------------------------------------------------------------
    // Instruction input
    // -----------------------------------------------------------------------

    /// Append `data` as an ADD instruction.  A zero-length slice is a
    /// no-op.
    pub fn add(&mut self, data: &[u8]) -> Result<(), EncodeError> {
        self.ensure_init()?;
        if data.is_empty() {
            return Ok(());
        }
        if self.last_inst_was_add {
            // Legal but wasteful; the matcher should have merged them.
            warn!("encoding two consecutive ADD instructions");
        }
        let size = u32::try_from(data.len())
            .map_err(|_| EncodeError::Internal("ADD payload exceeds u32 range".into()))?;
        self.encode_instruction(VCD_ADD, size, 0)?;
        if self.interleaved {
            self.inst.extend_from_slice(data);
        } else {
            self.data.extend_from_slice(data);
        }
        self.target_len += u64::from(size);
        self.last_inst_was_add = true;
        Ok(())
    }

    /// Append a RUN of `size` copies of `byte`.  The data section gains
    /// exactly one byte.  A zero size is a no-op.
    pub fn run(&mut self, size: u32, byte: u8) -> Result<(), EncodeError> {
        self.ensure_init()?;
        if size == 0 {
            return Ok(());
        }
        self.encode_instruction(VCD_RUN, size, 0)?;
        if self.interleaved {
            self.inst.push(byte);
        } else {
            self.data.push(byte);
        }
        self.target_len += u64::from(size);
        self.last_inst_was_add = false;
        Ok(())
    }

    /// Append a COPY of `size` bytes from `offset` in the combined
    /// dictionary-and-target address space.  A zero size is a no-op.
    pub fn copy(&mut self, offset: u64, size: u32) -> Result<(), EncodeError> {
        self.ensure_init()?;
        if size == 0 {
            return Ok(());
        }
        let here = self.dictionary_size + self.target_len;
        if offset >= here {
            return Err(EncodeError::OffsetOutOfBounds { offset, here });
        }
        let (mode, encoded) = self.cache.encode(offset, here);
        self.encode_instruction(VCD_COPY, size, mode)?;
        if self.interleaved {
            self.inst.extend_from_slice(encoded.as_bytes());
        } else {
            self.addr.extend_from_slice(encoded.as_bytes());
        }
        self.target_len += u64::from(size);
        self.last_inst_was_add = false;
        Ok(())
    }

    /// Record the Adler-32 of the current window's target bytes.  Written
    /// into the window header as a varint.
    pub fn add_checksum(&mut self, checksum: u32) -> Result<(), EncodeError> {
        self.ensure_init()?;
        self.checksum = Some(checksum);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Opcode selection
    // -----------------------------------------------------------------------

    /// Choose and emit the opcode for (inst, size, mode), upgrading the
    /// previous single-instruction opcode to a compound one when the code
    /// table allows it.
    fn encode_instruction(&mut self, inst: u8, size: u32, mode: u8) -> Result<(), EncodeError> {
        let map = match &self.map {
            Some(m) => m,
            None => instruction_map::default_map(),
        };

        if let Some(idx) = self.last_opcode_index {
            let last_opcode = self.inst[idx];
            if size <= 255
                && let Some(compound) = map.lookup_second(last_opcode, inst, size as u8, mode)
            {
                // Both halves implicit: overwrite in place, no varint.
                self.inst[idx] = compound;
                self.last_opcode_index = None;
                return Ok(());
            }
            if let Some(compound) = map.lookup_second(last_opcode, inst, 0, mode) {
                self.inst[idx] = compound;
                self.last_opcode_index = None;
                varint::write_int(&mut self.inst, size)?;
                return Ok(());
            }
        }

        if size <= 255
            && let Some(opcode) = map.lookup_first(inst, size as u8, mode)
        {
            self.last_opcode_index = Some(self.inst.len());
            self.inst.push(opcode);
            return Ok(());
        }

        // Explicit size.  Every valid table has this opcode; its absence
        // is a table defect.
        let Some(opcode) = map.lookup_first(inst, 0, mode) else {
            return Err(EncodeError::NoMatchingOpcode { inst, mode });
        };
        self.inst.push(opcode);
        // The size varint sits between this opcode and any later payload,
        // so a compound upgrade is no longer possible.
        self.last_opcode_index = None;
        varint::write_int(&mut self.inst, size)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Window framing
    // -----------------------------------------------------------------------

    /// Length of the delta encoding (the `L` field): everything after the
    /// length field itself.
    fn delta_encoding_len(&self) -> usize {
        let mut len = varint::sizeof_u64(self.target_len);
        len += 1; // Delta_Indicator
        len += varint::sizeof_u64(self.data.len() as u64);
        len += varint::sizeof_u64(self.inst.len() as u64);
        len += varint::sizeof_u64(self.addr.len() as u64);
        if let Some(c) = self.checksum {
            len += varint::sizeof_u64(u64::from(c));
        }
        len + self.data.len() + self.inst.len() + self.addr.len()
    }

    /// Exact byte size the next `output` call will produce (0 when no
    /// instruction has been emitted).
    pub fn delta_window_size(&self) -> usize {
        if self.inst.is_empty() {
            return 0;
        }
        let enc_len = self.delta_encoding_len();
        1 + varint::sizeof_u64(self.dictionary_size)
            + varint::sizeof_u64(0)
            + varint::sizeof_u64(enc_len as u64)
            + enc_len
    }

    /// Frame and flush the current window, then reset for the next one.
    /// Emits nothing when no instruction was accumulated.  Returns the
    /// number of bytes written.
    pub fn output<W: Write>(&mut self, sink: &mut W) -> Result<usize, EncodeError> {
        self.ensure_init()?;
        if self.inst.is_empty() {
            self.reset_window();
            return Ok(0);
        }

        let expected = self.delta_window_size();
        let enc_len = self.delta_encoding_len();

        let mut win_ind = WinIndicator::SOURCE;
        if self.checksum.is_some() {
            win_ind |= WinIndicator::CHECKSUM;
        }

        // Assemble into a scratch buffer so a failing sink never sees a
        // partial window.
        let mut out = Vec::with_capacity(expected);
        out.push(win_ind.bits());
        varint::write_int(&mut out, self.dictionary_size)?;
        varint::write_int(&mut out, 0u64)?; // source segment position
        varint::write_usize(&mut out, enc_len)?;
        varint::write_int(&mut out, self.target_len)?;
        out.push(0x00); // Delta_Indicator
        varint::write_usize(&mut out, self.data.len())?;
        varint::write_usize(&mut out, self.inst.len())?;
        varint::write_usize(&mut out, self.addr.len())?;
        if let Some(c) = self.checksum {
            varint::write_int(&mut out, c)?;
        }
        out.extend_from_slice(&self.data);
        out.extend_from_slice(&self.inst);
        out.extend_from_slice(&self.addr);

        if out.len() != expected {
            return Err(EncodeError::Internal(format!(
                "window size mismatch: computed {expected}, assembled {}",
                out.len()
            )));
        }

        sink.write_all(&out)?;
        self.reset_window();
        Ok(out.len())
    }

    /// Emit the five-byte file header.  An empty extension set selects the
    /// standard version byte; any extension selects `'S'`.  The
    /// Hdr_Indicator is always zero: custom code tables are encoder
    /// configuration, never emitted.
    pub fn write_header<W: Write>(
        &self,
        sink: &mut W,
        extensions: FormatExtensions,
    ) -> Result<(), EncodeError> {
        let version = if extensions.is_empty() {
            VCDIFF_VERSION
        } else {
            VCDIFF_EXT_VERSION
        };
        sink.write_all(&VCDIFF_MAGIC)?;
        sink.write_all(&[version, 0x00])?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
