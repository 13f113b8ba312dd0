// Error types for the encoder and decoder.
//
// The decoder distinguishes recoverable truncation (stream ended mid-unit;
// more input may arrive) from terminal format errors.  `decode_chunk` never
// surfaces truncation: the driver buffers and waits.  `finish_decoding`
// reports it when the stream ends in the wrong state.

use thiserror::Error;

/// Errors produced while building or emitting delta windows.
#[derive(Debug, Error)]
pub enum EncodeError {
    /// `add`/`run`/`copy`/`add_checksum`/`output` called before `init`.
    #[error("encoder not initialized: call init() first")]
    NotInitialized,

    /// COPY offset outside `[0, dictionary_size + target_len)`.
    #[error("COPY offset {offset} out of bounds (address space is {here} bytes)")]
    OffsetOutOfBounds { offset: u64, here: u64 },

    /// The configured code table failed validation.
    #[error("invalid code table: {0}")]
    InvalidCodeTable(String),

    /// The code table has no opcode for (inst, mode) with an explicit size.
    /// A valid table always has one; this is an internal invariant failure.
    #[error("code table has no explicit-size opcode for inst {inst} mode {mode}")]
    NoMatchingOpcode { inst: u8, mode: u8 },

    /// Computed window size disagrees with the bytes actually produced.
    #[error("internal error: {0}")]
    Internal(String),

    /// The output sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors produced while decoding a delta stream.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Bad magic, unknown version byte, reserved indicator bits, bad
    /// custom-code-table preamble.
    #[error("malformed header: {0}")]
    Header(String),

    /// Malformed window or instruction stream: section overruns, bad
    /// opcodes, out-of-range COPY addresses, SAME cache misses, declared
    /// vs produced target length mismatch.
    #[error("malformed delta: {0}")]
    Format(String),

    /// A configured limit was exceeded or a gated feature was used
    /// (VCD_TARGET while disallowed, oversized window or section).
    #[error("policy violation: {0}")]
    Policy(String),

    /// The stream uses a feature this decoder does not implement
    /// (secondary compression).
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// Adler-32 of the produced window disagrees with the declared value.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    /// The stream ended mid-unit.  Only reported by `finish_decoding`.
    #[error("truncated input: {0}")]
    Truncated(String),

    /// API misuse: `decode_chunk` before `start_decoding`, or continued
    /// use of a poisoned decoder.
    #[error("usage error: {0}")]
    Usage(String),

    /// The output sink failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
