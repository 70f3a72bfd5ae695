//! Device address parsing.
//!
//! Addresses are written as `<area><word>[.<bit>]`, e.g. `D100` for a whole
//! word or `D3115.1` for bit 1 of word 3115. Area selection is fixed to the
//! data-register area; the leading letter is accepted and stripped but does
//! not change the device code on the wire.

use crate::error::{McError, Result};

/// A parsed device address: word number plus optional bit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceAddress {
    /// Word address within the memory area.
    pub word: u32,
    /// Bit position (0-15) for bit access, `None` for word access.
    pub bit: Option<u8>,
}

impl DeviceAddress {
    /// Creates a word address.
    pub fn word(word: u32) -> Self {
        Self { word, bit: None }
    }

    /// Creates a bit address.
    ///
    /// # Errors
    ///
    /// Returns [`McError::BitOutOfRange`] if `bit > 15`.
    pub fn bit(word: u32, bit: u8) -> Result<Self> {
        if bit > 15 {
            return Err(McError::BitOutOfRange {
                address: format!("{word}.{bit}"),
                bit: u32::from(bit),
            });
        }
        Ok(Self {
            word,
            bit: Some(bit),
        })
    }

    /// Parses a human-readable address string.
    ///
    /// The input is trimmed and upper-cased, a single leading non-digit area
    /// prefix is stripped, and the rest is split on `.` into word address and
    /// optional bit index.
    ///
    /// # Example
    ///
    /// ```
    /// use mcproto::DeviceAddress;
    ///
    /// let addr = DeviceAddress::parse("D3115.1").unwrap();
    /// assert_eq!(addr.word, 3115);
    /// assert_eq!(addr.bit, Some(1));
    /// ```
    pub fn parse(address: &str) -> Result<Self> {
        let normalized = address.trim().to_ascii_uppercase();

        let invalid = |reason: &str| McError::InvalidAddress {
            address: address.to_string(),
            reason: reason.to_string(),
        };

        if normalized.is_empty() {
            return Err(invalid("empty address"));
        }

        // Strip exactly one leading area letter ("D100" -> "100"); a bare
        // numeric address is accepted as-is.
        let body = match normalized.chars().next() {
            Some(c) if !c.is_ascii_digit() => &normalized[c.len_utf8()..],
            _ => normalized.as_str(),
        };

        let mut segments = body.split('.');
        let word_part = segments.next().unwrap_or("");
        let bit_part = segments.next();
        if segments.next().is_some() {
            return Err(invalid("more than one '.' separator"));
        }

        if word_part.is_empty() {
            return Err(invalid("missing word address"));
        }
        let word: u32 = word_part
            .parse()
            .map_err(|_| invalid("word address is not a decimal number"))?;

        match bit_part {
            None => Ok(Self::word(word)),
            Some("") => Err(invalid("empty bit index")),
            Some(text) => {
                let bit: u32 = text
                    .parse()
                    .map_err(|_| invalid("bit index is not a decimal number"))?;
                if bit > 15 {
                    // Distinct from a malformed bit so callers can log it as
                    // a range problem rather than a syntax problem.
                    return Err(McError::BitOutOfRange {
                        address: address.to_string(),
                        bit,
                    });
                }
                Ok(Self {
                    word,
                    bit: Some(bit as u8),
                })
            },
        }
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.bit {
            Some(bit) => write!(f, "D{}.{}", self.word, bit),
            None => write!(f, "D{}", self.word),
        }
    }
}
