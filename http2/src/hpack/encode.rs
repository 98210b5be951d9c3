//! HPACK encoding.

use super::huffman;
use super::table::{self, DynamicTable, HeaderField};

/// HPACK encoder with a dynamic table and optional Huffman string coding.
pub struct HpackEncoder {
    dynamic_table: DynamicTable,
    use_huffman: bool,
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            dynamic_table: DynamicTable::new(super::DEFAULT_TABLE_SIZE),
            use_huffman: true,
        }
    }

    pub fn set_huffman(&mut self, use_huffman: bool) {
        self.use_huffman = use_huffman;
    }

    /// Apply the peer's SETTINGS_HEADER_TABLE_SIZE.
    pub fn set_table_size(&mut self, size: usize) {
        self.dynamic_table.set_max_size(size);
    }

    /// Encode a header list into an HPACK block.
    pub fn encode(&mut self, headers: &[HeaderField], buf: &mut Vec<u8>) {
        for header in headers {
            self.encode_field(header, buf);
        }
    }

    fn encode_field(&mut self, header: &HeaderField, buf: &mut Vec<u8>) {
        let static_hit = table::static_find(&header.name, &header.value);
        let dynamic_hit = self.dynamic_table.find(&header.name, &header.value);

        match (static_hit, dynamic_hit) {
            // Indexed representation (Section 6.1).
            (Some((idx, true)), _) => encode_integer(idx, 7, 0x80, buf),
            (_, Some((dyn_idx, true))) => {
                encode_integer(table::STATIC_LEN + 1 + dyn_idx, 7, 0x80, buf)
            }
            // Literal with incremental indexing, indexed name (Section 6.2.1).
            (Some((idx, false)), _) => {
                encode_integer(idx, 6, 0x40, buf);
                self.encode_string(&header.value, buf);
                self.dynamic_table.insert(header.clone());
            }
            (_, Some((dyn_idx, false))) => {
                encode_integer(table::STATIC_LEN + 1 + dyn_idx, 6, 0x40, buf);
                self.encode_string(&header.value, buf);
                self.dynamic_table.insert(header.clone());
            }
            // Literal with incremental indexing, new name.
            (None, None) => {
                buf.push(0x40);
                self.encode_string(&header.name, buf);
                self.encode_string(&header.value, buf);
                self.dynamic_table.insert(header.clone());
            }
        }
    }

    fn encode_string(&self, data: &[u8], buf: &mut Vec<u8>) {
        if self.use_huffman {
            let coded = huffman::encoded_len(data);
            if coded < data.len() {
                encode_integer(coded, 7, 0x80, buf);
                huffman::encode(data, buf);
                return;
            }
        }
        encode_integer(data.len(), 7, 0x00, buf);
        buf.extend_from_slice(data);
    }
}

/// Prefix integer encoding (RFC 7541 Section 5.1).
fn encode_integer(mut value: usize, prefix_bits: u8, prefix: u8, buf: &mut Vec<u8>) {
    let max_prefix: usize = (1 << prefix_bits) - 1;
    if value < max_prefix {
        buf.push(prefix | value as u8);
        return;
    }
    buf.push(prefix | max_prefix as u8);
    value -= max_prefix;
    while value >= 128 {
        buf.push((value % 128) as u8 | 0x80);
        value /= 128;
    }
    buf.push(value as u8);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_small() {
        let mut buf = Vec::new();
        encode_integer(10, 5, 0x00, &mut buf);
        assert_eq!(buf, [10]);
    }

    #[test]
    fn integer_1337_with_5bit_prefix() {
        // RFC 7541 Appendix C.1.2.
        let mut buf = Vec::new();
        encode_integer(1337, 5, 0x00, &mut buf);
        assert_eq!(buf, [31, 154, 10]);
    }

    #[test]
    fn integer_at_prefix_boundary() {
        let mut buf = Vec::new();
        encode_integer(31, 5, 0x00, &mut buf);
        assert_eq!(buf, [31, 0]);
    }

    #[test]
    fn static_exact_match_is_one_byte() {
        let mut enc = HpackEncoder::new();
        let mut buf = Vec::new();
        enc.encode(
            &[HeaderField::new(&b":method"[..], &b"GET"[..])],
            &mut buf,
        );
        assert_eq!(buf, [0x82]);
    }

    #[test]
    fn repeated_custom_header_hits_dynamic_table() {
        let mut enc = HpackEncoder::new();
        let field = HeaderField::new(&b"x-request-id"[..], &b"abc123"[..]);

        let mut first = Vec::new();
        enc.encode(std::slice::from_ref(&field), &mut first);

        let mut second = Vec::new();
        enc.encode(std::slice::from_ref(&field), &mut second);

        // Second emission is a single indexed byte referencing entry 62.
        assert_eq!(second, [0x80 | 62]);
        assert!(first.len() > second.len());
    }
}
