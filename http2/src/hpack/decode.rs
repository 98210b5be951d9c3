//! HPACK decoding.

use super::huffman::{self, HuffmanError};
use super::table::{self, DynamicTable, HeaderField};

/// HPACK decoding errors.
#[derive(Debug)]
pub enum HpackError {
    /// Block ended in the middle of a representation.
    Truncated,
    /// Integer exceeds the supported range.
    IntegerOverflow,
    /// Huffman-coded string failed to decode.
    Huffman(HuffmanError),
    /// Index outside both tables.
    InvalidIndex(usize),
    /// Dynamic table size update above the negotiated limit.
    TableSizeUpdate(usize),
}

impl std::fmt::Display for HpackError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HpackError::Truncated => write!(f, "truncated header block"),
            HpackError::IntegerOverflow => write!(f, "integer overflow in header block"),
            HpackError::Huffman(e) => write!(f, "huffman: {}", e),
            HpackError::InvalidIndex(idx) => write!(f, "invalid table index {}", idx),
            HpackError::TableSizeUpdate(size) => {
                write!(f, "table size update {} exceeds limit", size)
            }
        }
    }
}

impl std::error::Error for HpackError {}

impl From<HuffmanError> for HpackError {
    fn from(e: HuffmanError) -> Self {
        HpackError::Huffman(e)
    }
}

/// HPACK decoder with a dynamic table.
pub struct HpackDecoder {
    dynamic_table: DynamicTable,
    max_table_size: usize,
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            dynamic_table: DynamicTable::new(super::DEFAULT_TABLE_SIZE),
            max_table_size: super::DEFAULT_TABLE_SIZE,
        }
    }

    /// Raise the ceiling the peer may set via a table size update.
    pub fn set_max_table_size(&mut self, size: usize) {
        self.max_table_size = size;
    }

    /// Decode a complete header block.
    pub fn decode(&mut self, block: &[u8]) -> Result<Vec<HeaderField>, HpackError> {
        let mut headers = Vec::new();
        let mut pos = 0;

        while pos < block.len() {
            let rest = &block[pos..];
            let first = rest[0];

            let consumed = if first & 0x80 != 0 {
                // Indexed (Section 6.1).
                let (index, used) = decode_integer(rest, 7)?;
                if index == 0 {
                    return Err(HpackError::InvalidIndex(0));
                }
                headers.push(self.field_at(index)?);
                used
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing (Section 6.2.1).
                let (field, used) = self.decode_literal(rest, 6)?;
                self.dynamic_table.insert(field.clone());
                headers.push(field);
                used
            } else if first & 0x20 != 0 {
                // Dynamic table size update (Section 6.3).
                let (size, used) = decode_integer(rest, 5)?;
                if size > self.max_table_size {
                    return Err(HpackError::TableSizeUpdate(size));
                }
                self.dynamic_table.set_max_size(size);
                used
            } else {
                // Literal without indexing / never indexed (Sections 6.2.2-3).
                let (field, used) = self.decode_literal(rest, 4)?;
                headers.push(field);
                used
            };

            pos += consumed;
        }

        Ok(headers)
    }

    fn decode_literal(
        &self,
        data: &[u8],
        prefix_bits: u8,
    ) -> Result<(HeaderField, usize), HpackError> {
        let (name_index, mut consumed) = decode_integer(data, prefix_bits)?;

        let name = if name_index > 0 {
            self.field_at(name_index)?.name
        } else {
            let (name, used) = decode_string(&data[consumed..])?;
            consumed += used;
            name
        };

        let (value, used) = decode_string(&data[consumed..])?;
        consumed += used;

        Ok((HeaderField { name, value }, consumed))
    }

    fn field_at(&self, index: usize) -> Result<HeaderField, HpackError> {
        if index <= table::STATIC_LEN {
            let (name, value) =
                table::static_entry(index).ok_or(HpackError::InvalidIndex(index))?;
            Ok(HeaderField::new(name, value))
        } else {
            self.dynamic_table
                .get(index - table::STATIC_LEN - 1)
                .cloned()
                .ok_or(HpackError::InvalidIndex(index))
        }
    }
}

/// Prefix integer decoding (RFC 7541 Section 5.1).
fn decode_integer(data: &[u8], prefix_bits: u8) -> Result<(usize, usize), HpackError> {
    if data.is_empty() {
        return Err(HpackError::Truncated);
    }

    let max_prefix = (1usize << prefix_bits) - 1;
    let mut value = data[0] as usize & max_prefix;
    let mut consumed = 1;

    if value < max_prefix {
        return Ok((value, consumed));
    }

    let mut shift = 0u32;
    loop {
        let byte = *data.get(consumed).ok_or(HpackError::Truncated)? as usize;
        consumed += 1;
        value += (byte & 0x7f) << shift;
        shift += 7;
        if byte & 0x80 == 0 {
            return Ok((value, consumed));
        }
        if shift > 28 {
            return Err(HpackError::IntegerOverflow);
        }
    }
}

/// String literal decoding (RFC 7541 Section 5.2).
fn decode_string(data: &[u8]) -> Result<(Vec<u8>, usize), HpackError> {
    if data.is_empty() {
        return Err(HpackError::Truncated);
    }

    let huffman_coded = data[0] & 0x80 != 0;
    let (length, mut consumed) = decode_integer(data, 7)?;

    let raw = data
        .get(consumed..consumed + length)
        .ok_or(HpackError::Truncated)?;
    consumed += length;

    let value = if huffman_coded {
        let mut decoded = Vec::with_capacity(length * 2);
        huffman::decode(raw, &mut decoded)?;
        decoded
    } else {
        raw.to_vec()
    };

    Ok((value, consumed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hpack::HpackEncoder;

    #[test]
    fn decode_indexed_static() {
        let mut dec = HpackDecoder::new();
        let headers = dec.decode(&[0x82, 0x87]).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], HeaderField::new(&b":method"[..], &b"GET"[..]));
        assert_eq!(headers[1], HeaderField::new(&b":scheme"[..], &b"https"[..]));
    }

    #[test]
    fn rfc_c_2_1_literal_with_indexing() {
        // "custom-key: custom-header", RFC 7541 Appendix C.2.1.
        let block: &[u8] = &[
            0x40, 0x0a, b'c', b'u', b's', b't', b'o', b'm', b'-', b'k', b'e',
            b'y', 0x0d, b'c', b'u', b's', b't', b'o', b'm', b'-', b'h', b'e',
            b'a', b'd', b'e', b'r',
        ];
        let mut dec = HpackDecoder::new();
        let headers = dec.decode(block).unwrap();
        assert_eq!(
            headers,
            [HeaderField::new(&b"custom-key"[..], &b"custom-header"[..])]
        );
        // The field is now entry 62.
        let again = dec.decode(&[0x80 | 62]).unwrap();
        assert_eq!(again[0].name, b"custom-key");
    }

    #[test]
    fn rfc_c_2_2_literal_without_indexing() {
        // ":path: /sample/path", RFC 7541 Appendix C.2.2.
        let block: &[u8] = &[
            0x04, 0x0c, b'/', b's', b'a', b'm', b'p', b'l', b'e', b'/', b'p',
            b'a', b't', b'h',
        ];
        let mut dec = HpackDecoder::new();
        let headers = dec.decode(block).unwrap();
        assert_eq!(
            headers,
            [HeaderField::new(&b":path"[..], &b"/sample/path"[..])]
        );
    }

    #[test]
    fn roundtrip_through_encoder() {
        let mut enc = HpackEncoder::new();
        let mut dec = HpackDecoder::new();
        let headers = vec![
            HeaderField::new(&b":method"[..], &b"GET"[..]),
            HeaderField::new(&b":path"[..], &b"/static/app.css"[..]),
            HeaderField::new(&b":scheme"[..], &b"https"[..]),
            HeaderField::new(&b":authority"[..], &b"example.org"[..]),
            HeaderField::new(&b"user-agent"[..], &b"h2d-test/1.0"[..]),
        ];

        let mut block = Vec::new();
        enc.encode(&headers, &mut block);
        assert_eq!(dec.decode(&block).unwrap(), headers);

        // A second block exercises both dynamic tables.
        let mut block2 = Vec::new();
        enc.encode(&headers, &mut block2);
        assert!(block2.len() < block.len());
        assert_eq!(dec.decode(&block2).unwrap(), headers);
    }

    #[test]
    fn invalid_index_rejected() {
        let mut dec = HpackDecoder::new();
        assert!(matches!(
            dec.decode(&[0x80 | 99]),
            Err(HpackError::InvalidIndex(99))
        ));
        assert!(matches!(
            dec.decode(&[0x80]),
            Err(HpackError::InvalidIndex(0))
        ));
    }

    #[test]
    fn truncated_block_rejected() {
        let mut dec = HpackDecoder::new();
        // Literal announces a 12-byte name but the block ends.
        assert!(matches!(
            dec.decode(&[0x40, 0x0c, b'x']),
            Err(HpackError::Truncated)
        ));
    }

    #[test]
    fn table_size_update_over_limit_rejected() {
        let mut dec = HpackDecoder::new();
        // 0x3f with 5-bit prefix then continuation: 31 + 0xe1*... encode 8192.
        let mut block = vec![0x20 | 0x1f];
        let mut rest = 8192usize - 31;
        while rest >= 128 {
            block.push((rest % 128) as u8 | 0x80);
            rest /= 128;
        }
        block.push(rest as u8);
        assert!(matches!(
            dec.decode(&block),
            Err(HpackError::TableSizeUpdate(8192))
        ));
    }
}
