//! Decoding device words into canonical string values.
//!
//! Every register value travels through the rest of the service as a string:
//! change detection, gate expressions and persistence parameters all compare
//! and store the rendered form. Rendering happens exactly once, here, and is
//! deliberately not normalized afterwards: `"1.0"` and `"1"` stay distinct
//! wherever the device or an operator produces them.

use crate::config::DataType;
use crate::error::{LogSrvError, Result};

/// Decodes words read from the device into the canonical string value.
///
/// A bit index (from a `D100.3`-style address) selects a single bit of the
/// first word and renders `"1"`/`"0"` regardless of the declared data type.
pub fn decode_value(
    data_type: DataType,
    bit: Option<u8>,
    length: u16,
    words: &[u16],
) -> Result<String> {
    let needed = usize::from(data_type.word_count(length));
    if words.len() < needed {
        return Err(LogSrvError::Data(format!(
            "expected {needed} words for {data_type:?}, got {}",
            words.len()
        )));
    }

    if let Some(bit) = bit {
        let set = (words[0] >> bit) & 1 == 1;
        return Ok(render_bool(set));
    }

    let value = match data_type {
        DataType::Int => (words[0] as i16).to_string(),
        DataType::Uint => words[0].to_string(),
        DataType::Bool => render_bool(words[0] != 0),
        DataType::Float => {
            // Two words, low word first.
            let bits = (u32::from(words[1]) << 16) | u32::from(words[0]);
            f32::from_bits(bits).to_string()
        },
        DataType::String => decode_string(&words[..needed]),
    };
    Ok(value)
}

fn render_bool(set: bool) -> String {
    if set { "1" } else { "0" }.to_string()
}

/// Two ASCII characters per word, low byte first; trailing NULs trimmed.
fn decode_string(words: &[u16]) -> String {
    let mut bytes = Vec::with_capacity(words.len() * 2);
    for word in words {
        bytes.push((word & 0xFF) as u8);
        bytes.push((word >> 8) as u8);
    }
    while bytes.last() == Some(&0) {
        bytes.pop();
    }
    String::from_utf8_lossy(&bytes).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_is_signed() {
        assert_eq!(decode_value(DataType::Int, None, 1, &[0xFFFF]).unwrap(), "-1");
        assert_eq!(decode_value(DataType::Int, None, 1, &[1234]).unwrap(), "1234");
    }

    #[test]
    fn uint_is_unsigned() {
        assert_eq!(decode_value(DataType::Uint, None, 1, &[0xFFFF]).unwrap(), "65535");
    }

    #[test]
    fn bool_whole_word() {
        assert_eq!(decode_value(DataType::Bool, None, 1, &[0]).unwrap(), "0");
        assert_eq!(decode_value(DataType::Bool, None, 1, &[7]).unwrap(), "1");
    }

    #[test]
    fn bit_index_selects_single_bit() {
        // 0b0000_0010: bit 1 set, bit 0 clear
        assert_eq!(decode_value(DataType::Bool, Some(1), 1, &[0b10]).unwrap(), "1");
        assert_eq!(decode_value(DataType::Bool, Some(0), 1, &[0b10]).unwrap(), "0");
        assert_eq!(decode_value(DataType::Uint, Some(15), 1, &[0x8000]).unwrap(), "1");
    }

    #[test]
    fn float_low_word_first() {
        let bits = 25.5f32.to_bits();
        let words = [(bits & 0xFFFF) as u16, (bits >> 16) as u16];
        assert_eq!(decode_value(DataType::Float, None, 1, &words).unwrap(), "25.5");
    }

    #[test]
    fn float_renders_whole_numbers_without_fraction() {
        let bits = 1.0f32.to_bits();
        let words = [(bits & 0xFFFF) as u16, (bits >> 16) as u16];
        // The rendered form is what change detection compares; this pins it.
        assert_eq!(decode_value(DataType::Float, None, 1, &words).unwrap(), "1");
    }

    #[test]
    fn string_low_byte_first_with_nul_trim() {
        // "Hi!" packed as [0x6948, 0x0021], padded with a NUL word
        let words = [0x6948, 0x0021, 0x0000];
        assert_eq!(
            decode_value(DataType::String, None, 3, &words).unwrap(),
            "Hi!"
        );
    }

    #[test]
    fn short_word_slice_is_an_error() {
        assert!(decode_value(DataType::Float, None, 1, &[1]).is_err());
        assert!(decode_value(DataType::String, None, 4, &[1, 2]).is_err());
    }
}
