// VCDIFF code table data (RFC 3284, Sections 5.4-5.6).
//
// A code table maps each of the 256 opcodes to one or two delta
// instructions.  The default table is the single standardized assignment
// from RFC 3284; custom tables travel as a delta against the default
// table's serialized image (the "code table of code tables"), so the
// serialized layout here must match that image byte for byte: six 256-byte
// planes in the order inst1, inst2, size1, size2, mode1, mode2.

use std::sync::LazyLock;

/// Instruction type: no instruction in this slot.
pub const VCD_NOOP: u8 = 0;
/// Instruction type: append literal bytes from the data section.
pub const VCD_ADD: u8 = 1;
/// Instruction type: repeat one data-section byte.
pub const VCD_RUN: u8 = 2;
/// Instruction type: copy from the source segment or target-so-far.
pub const VCD_COPY: u8 = 3;

/// NEAR cache slots in the default configuration.
pub const DEFAULT_NEAR_CACHE_SIZE: usize = 4;
/// SAME cache groups in the default configuration.
pub const DEFAULT_SAME_CACHE_SIZE: usize = 3;
/// Highest COPY mode in the default configuration (2 + 4 + 3 modes, 0-based).
pub const DEFAULT_MAX_MODE: u8 = 8;

/// Serialized size of a code table: 6 planes of 256 bytes.
pub const SERIALIZED_SIZE: usize = 1536;

/// One row of the 256-entry code table.
///
/// `size == 0` means the actual size follows the opcode as a varint in the
/// instruction stream.  `mode` is meaningful only for COPY entries.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub inst1: u8,
    pub size1: u8,
    pub mode1: u8,
    pub inst2: u8,
    pub size2: u8,
    pub mode2: u8,
}

impl CodeTableEntry {
    const fn single(inst: u8, size: u8, mode: u8) -> Self {
        Self {
            inst1: inst,
            size1: size,
            mode1: mode,
            inst2: VCD_NOOP,
            size2: 0,
            mode2: 0,
        }
    }

    /// Does this opcode encode two instructions?
    #[inline]
    pub fn is_compound(&self) -> bool {
        self.inst2 != VCD_NOOP
    }
}

/// A complete 256-entry code table.
#[derive(Clone, PartialEq, Eq)]
pub struct CodeTable {
    entries: [CodeTableEntry; 256],
}

impl CodeTable {
    /// Build a table from raw entries.  Call `validate` before use.
    pub fn from_entries(entries: [CodeTableEntry; 256]) -> Self {
        Self { entries }
    }

    #[inline]
    pub fn entry(&self, opcode: u8) -> &CodeTableEntry {
        &self.entries[opcode as usize]
    }

    #[inline]
    pub fn entries(&self) -> &[CodeTableEntry; 256] {
        &self.entries
    }

    #[inline]
    pub fn entries_mut(&mut self) -> &mut [CodeTableEntry; 256] {
        &mut self.entries
    }

    // -----------------------------------------------------------------------
    // Wire image
    // -----------------------------------------------------------------------

    /// Serialize to the 1536-byte wire image.
    pub fn to_bytes(&self) -> [u8; SERIALIZED_SIZE] {
        let mut out = [0u8; SERIALIZED_SIZE];
        for (i, e) in self.entries.iter().enumerate() {
            out[i] = e.inst1;
            out[256 + i] = e.inst2;
            out[512 + i] = e.size1;
            out[768 + i] = e.size2;
            out[1024 + i] = e.mode1;
            out[1280 + i] = e.mode2;
        }
        out
    }

    /// Rebuild a table from its 1536-byte wire image.
    pub fn from_bytes(image: &[u8; SERIALIZED_SIZE]) -> Self {
        let mut entries = [CodeTableEntry::default(); 256];
        for (i, e) in entries.iter_mut().enumerate() {
            e.inst1 = image[i];
            e.inst2 = image[256 + i];
            e.size1 = image[512 + i];
            e.size2 = image[768 + i];
            e.mode1 = image[1024 + i];
            e.mode2 = image[1280 + i];
        }
        Self { entries }
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check the table invariants for a given highest COPY mode.
    ///
    /// - every entry is well formed (known instruction types; mode only on
    ///   COPY and within range; NOOP carries no size or mode);
    /// - compound rows have a non-NOOP first entry with an implicit size;
    /// - every instruction the encoder might need has an escape hatch: an
    ///   opcode whose first entry is that (inst, mode) with size 0.
    pub fn validate(&self, max_mode: u8) -> Result<(), String> {
        for (opcode, e) in self.entries.iter().enumerate() {
            Self::validate_half(opcode, "first", e.inst1, e.size1, e.mode1, max_mode)?;
            Self::validate_half(opcode, "second", e.inst2, e.size2, e.mode2, max_mode)?;
            if e.is_compound() {
                if e.inst1 == VCD_NOOP {
                    return Err(format!("opcode {opcode}: compound row with NOOP first entry"));
                }
                if e.size1 == 0 {
                    return Err(format!("opcode {opcode}: compound row with explicit first size"));
                }
            }
        }

        // Explicit-size coverage: without these the encoder cannot express
        // sizes beyond the implicit range.
        for (inst, mode_limit) in [(VCD_ADD, 0), (VCD_RUN, 0), (VCD_COPY, max_mode)] {
            for mode in 0..=mode_limit {
                let covered = self.entries.iter().any(|e| {
                    e.inst1 == inst && e.size1 == 0 && e.mode1 == mode && !e.is_compound()
                });
                if !covered {
                    return Err(format!(
                        "no explicit-size opcode for inst {inst} mode {mode}"
                    ));
                }
            }
        }
        Ok(())
    }

    fn validate_half(
        opcode: usize,
        which: &str,
        inst: u8,
        size: u8,
        mode: u8,
        max_mode: u8,
    ) -> Result<(), String> {
        match inst {
            VCD_NOOP => {
                if size != 0 || mode != 0 {
                    return Err(format!("opcode {opcode}: {which} NOOP with size or mode"));
                }
            }
            VCD_ADD | VCD_RUN => {
                if mode != 0 {
                    return Err(format!("opcode {opcode}: {which} entry has mode on non-COPY"));
                }
            }
            VCD_COPY => {
                if mode > max_mode {
                    return Err(format!(
                        "opcode {opcode}: {which} COPY mode {mode} exceeds max {max_mode}"
                    ));
                }
            }
            other => {
                return Err(format!(
                    "opcode {opcode}: {which} entry has unknown instruction type {other}"
                ));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Default table (RFC 3284, Section 5.6)
// ---------------------------------------------------------------------------

/// Build the standardized default code table.
fn build_default_table() -> CodeTable {
    let mut entries = [CodeTableEntry::default(); 256];
    let mut idx: usize = 0;

    // Descriptor constants from RFC 3284 Section 5.6.
    const ADD_SIZES: u8 = 17;
    const COPY_SIZES: u8 = 15;
    const COPY_MIN: u8 = 4;
    const MODES: u8 = 2 + (DEFAULT_NEAR_CACHE_SIZE as u8) + (DEFAULT_SAME_CACHE_SIZE as u8);
    const NEAR_MODE_LIMIT: u8 = 2 + DEFAULT_NEAR_CACHE_SIZE as u8;

    // Opcode 0: RUN, explicit size.
    entries[idx] = CodeTableEntry::single(VCD_RUN, 0, 0);
    idx += 1;

    // Opcode 1: ADD, explicit size.
    entries[idx] = CodeTableEntry::single(VCD_ADD, 0, 0);
    idx += 1;

    // Opcodes 2..=18: ADD with implicit sizes 1..=17.
    for size in 1..=ADD_SIZES {
        entries[idx] = CodeTableEntry::single(VCD_ADD, size, 0);
        idx += 1;
    }

    // Per COPY mode: explicit size, then implicit sizes 4..=18.
    for mode in 0..MODES {
        entries[idx] = CodeTableEntry::single(VCD_COPY, 0, mode);
        idx += 1;
        for size in COPY_MIN..COPY_MIN + COPY_SIZES {
            entries[idx] = CodeTableEntry::single(VCD_COPY, size, mode);
            idx += 1;
        }
    }

    // ADD+COPY compounds: add sizes 1..=4, copy sizes 4..=6 for SELF/HERE/
    // NEAR modes, copy size 4 only for SAME modes.
    for mode in 0..MODES {
        let copy_max = if mode < NEAR_MODE_LIMIT { 6 } else { 4 };
        for add_size in 1..=4u8 {
            for copy_size in COPY_MIN..=copy_max {
                entries[idx] = CodeTableEntry {
                    inst1: VCD_ADD,
                    size1: add_size,
                    mode1: 0,
                    inst2: VCD_COPY,
                    size2: copy_size,
                    mode2: mode,
                };
                idx += 1;
            }
        }
    }

    // COPY+ADD compounds: copy size 4, add size 1, all modes.
    for mode in 0..MODES {
        entries[idx] = CodeTableEntry {
            inst1: VCD_COPY,
            size1: 4,
            mode1: mode,
            inst2: VCD_ADD,
            size2: 1,
            mode2: 0,
        };
        idx += 1;
    }

    debug_assert_eq!(idx, 256, "default code table must fill all 256 opcodes");
    CodeTable { entries }
}

/// The default RFC 3284 code table.
pub fn default_table() -> &'static CodeTable {
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build_default_table);
    &TABLE
}

/// The default table's 1536-byte image: the dictionary for nested
/// custom-code-table decoding.
pub fn default_table_image() -> &'static [u8; SERIALIZED_SIZE] {
    static IMAGE: LazyLock<[u8; SERIALIZED_SIZE]> =
        LazyLock::new(|| default_table().to_bytes());
    &IMAGE
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_validates() {
        default_table().validate(DEFAULT_MAX_MODE).unwrap();
    }

    #[test]
    fn opcode_0_is_run_explicit() {
        let e = default_table().entry(0);
        assert_eq!((e.inst1, e.size1, e.mode1), (VCD_RUN, 0, 0));
        assert_eq!(e.inst2, VCD_NOOP);
    }

    #[test]
    fn opcode_1_is_add_explicit() {
        let e = default_table().entry(1);
        assert_eq!((e.inst1, e.size1), (VCD_ADD, 0));
    }

    #[test]
    fn opcodes_2_to_18_are_implicit_adds() {
        let t = default_table();
        for (opcode, size) in (2..=18u8).zip(1..=17u8) {
            let e = t.entry(opcode);
            assert_eq!((e.inst1, e.size1, e.inst2), (VCD_ADD, size, VCD_NOOP));
        }
    }

    #[test]
    fn copy_blocks_start_at_19() {
        let t = default_table();
        for mode in 0..=DEFAULT_MAX_MODE {
            let base = 19 + 16 * mode;
            let e = t.entry(base);
            assert_eq!((e.inst1, e.size1, e.mode1), (VCD_COPY, 0, mode));
            let e = t.entry(base + 1);
            assert_eq!((e.inst1, e.size1, e.mode1), (VCD_COPY, 4, mode));
            let e = t.entry(base + 15);
            assert_eq!((e.inst1, e.size1, e.mode1), (VCD_COPY, 18, mode));
        }
    }

    #[test]
    fn add_copy_compounds_start_at_163() {
        let t = default_table();
        let e = t.entry(163);
        assert_eq!((e.inst1, e.size1), (VCD_ADD, 1));
        assert_eq!((e.inst2, e.size2, e.mode2), (VCD_COPY, 4, 0));

        // SAME-mode block: 4 entries per mode starting at 235.
        let e = t.entry(235);
        assert_eq!((e.inst1, e.size1), (VCD_ADD, 1));
        assert_eq!((e.inst2, e.size2, e.mode2), (VCD_COPY, 4, 6));
    }

    #[test]
    fn copy_add_compounds_fill_247_to_255() {
        let t = default_table();
        for mode in 0..=DEFAULT_MAX_MODE {
            let e = t.entry(247 + mode);
            assert_eq!((e.inst1, e.size1, e.mode1), (VCD_COPY, 4, mode));
            assert_eq!((e.inst2, e.size2), (VCD_ADD, 1));
        }
    }

    #[test]
    fn compound_rows_have_implicit_sizes() {
        for (i, e) in default_table().entries().iter().enumerate() {
            if e.is_compound() {
                assert_ne!(e.size1, 0, "opcode {i}");
                assert_ne!(e.size2, 0, "opcode {i}");
            }
        }
    }

    #[test]
    fn image_roundtrip() {
        let t = default_table();
        let image = t.to_bytes();
        let rebuilt = CodeTable::from_bytes(&image);
        assert!(rebuilt == *t);
    }

    #[test]
    fn image_plane_layout() {
        let image = default_table_image();
        // Plane 0 is inst1: opcode 0 is RUN, opcode 1 is ADD.
        assert_eq!(image[0], VCD_RUN);
        assert_eq!(image[1], VCD_ADD);
        // Plane 2 (offset 512) is size1: opcode 2 is ADD with size 1.
        assert_eq!(image[512 + 2], 1);
        // Plane 4 (offset 1024) is mode1: opcode 35 is COPY mode 1.
        assert_eq!(image[1024 + 35], 1);
    }

    #[test]
    fn validation_rejects_missing_escape_opcode() {
        let mut t = default_table().clone();
        // Repurpose the explicit-size RUN opcode.
        t.entries_mut()[0] = CodeTableEntry::single(VCD_ADD, 0, 0);
        assert!(t.validate(DEFAULT_MAX_MODE).is_err());
    }

    #[test]
    fn validation_rejects_bad_mode() {
        let mut t = default_table().clone();
        t.entries_mut()[20].mode1 = DEFAULT_MAX_MODE + 1;
        assert!(t.validate(DEFAULT_MAX_MODE).is_err());
    }

    #[test]
    fn validation_rejects_unknown_instruction() {
        let mut t = default_table().clone();
        t.entries_mut()[5].inst1 = 9;
        assert!(t.validate(DEFAULT_MAX_MODE).is_err());
    }
}
