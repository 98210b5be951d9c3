//! HPACK header compression (RFC 7541).
//!
//! Static table of 61 well-known fields, a bounded dynamic table, prefix
//! integer coding and Huffman-coded string literals.

mod decode;
mod encode;
mod huffman;
mod table;

pub use decode::{HpackDecoder, HpackError};
pub use encode::HpackEncoder;
pub use huffman::HuffmanError;
pub use table::HeaderField;

/// Default dynamic table size (RFC 7541 Section 6.5.2 default).
pub const DEFAULT_TABLE_SIZE: usize = 4096;
