// Opcode lookup indices derived from a code table (encoder side).
//
// Two levels, mirroring the two halves of a compound opcode:
//
// - first:  (inst, mode, size) -> opcode whose first entry matches and
//           whose second entry is NOOP;
// - second: (first_opcode, inst, mode, size) -> compound opcode whose
//           first half is what `first_opcode` encodes and whose second
//           half matches.
//
// Size index 0 stands for "explicit varint size follows"; 1..=255 are
// implicit sizes.  Lower opcodes win ties, so derived maps are
// deterministic and output is reproducible across implementations.  A map
// is stateless once built and can be shared freely.

use std::sync::LazyLock;

use crate::code_table::{self, CodeTable, DEFAULT_MAX_MODE, VCD_COPY, VCD_NOOP};

/// One (inst, mode) plane: opcode per size index 0..=255.
type SizePlane = [Option<u8>; 256];

/// Lookup keyed by (inst, mode) slot and size.
struct OpcodePlanes {
    planes: Vec<SizePlane>,
}

impl OpcodePlanes {
    fn new(num_slots: usize) -> Self {
        Self {
            planes: vec![[None; 256]; num_slots],
        }
    }

    #[inline]
    fn get(&self, slot: usize, size: u8) -> Option<u8> {
        self.planes[slot][size as usize]
    }

    #[inline]
    fn set_if_empty(&mut self, slot: usize, size: u8, opcode: u8) {
        let cell = &mut self.planes[slot][size as usize];
        if cell.is_none() {
            *cell = Some(opcode);
        }
    }
}

/// Map (inst, mode) to a plane index.  ADD and RUN ignore mode; COPY
/// occupies one slot per mode.
#[inline]
fn slot(inst: u8, mode: u8) -> usize {
    if inst == VCD_COPY {
        (VCD_COPY + mode) as usize
    } else {
        inst as usize
    }
}

/// Forward and inverse opcode indices for one code table.
pub struct InstructionMap {
    first: OpcodePlanes,
    /// Sparse second level: only opcodes that start some compound row get
    /// a plane set.
    second: Vec<Option<Box<OpcodePlanes>>>,
    num_slots: usize,
}

impl InstructionMap {
    /// Build the lookup indices for `table` with COPY modes 0..=max_mode.
    pub fn new(table: &CodeTable, max_mode: u8) -> Self {
        let num_slots = slot(VCD_COPY, max_mode) + 1;
        let mut first = OpcodePlanes::new(num_slots);

        // Pass 1: single-instruction rows.  Ascending opcode order plus
        // set_if_empty gives the lower opcode on ties.  Rows whose mode
        // exceeds max_mode are unreachable and skipped.
        for opcode in 0..=255u8 {
            let e = table.entry(opcode);
            if e.inst1 != VCD_NOOP && !e.is_compound() {
                let s = slot(e.inst1, e.mode1);
                if s < num_slots {
                    first.set_if_empty(s, e.size1, opcode);
                }
            }
        }

        // Pass 2: compound rows, keyed by the single opcode the encoder
        // would have emitted for the first half.
        let mut second: Vec<Option<Box<OpcodePlanes>>> = (0..256).map(|_| None).collect();
        for opcode in 0..=255u8 {
            let e = table.entry(opcode);
            if !e.is_compound() {
                continue;
            }
            let s1 = slot(e.inst1, e.mode1);
            let s2 = slot(e.inst2, e.mode2);
            if s1 >= num_slots || s2 >= num_slots {
                continue;
            }
            let Some(first_opcode) = first.get(s1, e.size1) else {
                // No single opcode can produce this first half; the row is
                // unreachable for this encoder.
                continue;
            };
            let planes = second[first_opcode as usize]
                .get_or_insert_with(|| Box::new(OpcodePlanes::new(num_slots)));
            planes.set_if_empty(s2, e.size2, opcode);
        }

        Self {
            first,
            second,
            num_slots,
        }
    }

    /// Opcode for a standalone (inst, size, mode), or `None`.
    /// `size == 0` selects the explicit-size row.
    #[inline]
    pub fn lookup_first(&self, inst: u8, size: u8, mode: u8) -> Option<u8> {
        let s = slot(inst, mode);
        if s >= self.num_slots {
            return None;
        }
        self.first.get(s, size)
    }

    /// Compound opcode extending `first_opcode` with (inst, size, mode),
    /// or `None`.
    #[inline]
    pub fn lookup_second(&self, first_opcode: u8, inst: u8, size: u8, mode: u8) -> Option<u8> {
        let planes = self.second[first_opcode as usize].as_deref()?;
        let s = slot(inst, mode);
        if s >= self.num_slots {
            return None;
        }
        planes.get(s, size)
    }
}

/// The shared map for the default code table.
pub fn default_map() -> &'static InstructionMap {
    static MAP: LazyLock<InstructionMap> =
        LazyLock::new(|| InstructionMap::new(code_table::default_table(), DEFAULT_MAX_MODE));
    &MAP
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
