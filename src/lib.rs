//! Vcdelta: a VCDIFF (RFC 3284) delta codec with the SDCH extensions:
//! interleaved windows, per-window Adler-32 checksums carried as varints,
//! and custom code tables delivered as nested deltas.
//!
//! The crate implements the format layer only.  The matching engine that
//! chooses ADD/COPY/RUN boundaries, file handling, and dictionary
//! management are the caller's concern: drive a [`WindowEncoder`] with
//! instructions in stream order, and feed a [`StreamingDecoder`] chunks of
//! any size (single bytes included).
//!
//! # Quick Start
//!
//! ```
//! use vcdelta::{FormatExtensions, WindowEncoder, decode_all};
//!
//! let dictionary = b"hello old world";
//!
//! let mut delta = Vec::new();
//! let mut enc = WindowEncoder::new(true);
//! enc.write_header(&mut delta, FormatExtensions::INTERLEAVED).unwrap();
//! enc.init(dictionary.len() as u64).unwrap();
//! enc.copy(0, 6).unwrap(); // "hello "
//! enc.add(b"new").unwrap();
//! enc.copy(9, 6).unwrap(); // " world"
//! enc.output(&mut delta).unwrap();
//!
//! let target = decode_all(dictionary, &delta).unwrap();
//! assert_eq!(target, b"hello new world");
//! ```

pub mod address_cache;
pub mod checksum;
pub mod code_table;
pub mod decoder;
pub mod encoder;
pub mod error;
pub mod header;
pub mod instruction_map;
pub mod varint;

// Re-export the main entry points.
pub use decoder::{StreamingDecoder, decode_all};
pub use encoder::WindowEncoder;
pub use error::{DecodeError, EncodeError};
pub use header::FormatExtensions;
