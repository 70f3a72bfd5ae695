//! Error types for the MC-protocol client.

use thiserror::Error;

/// MC-protocol error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum McError {
    /// Device address string could not be parsed
    #[error("invalid device address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    /// Bit index outside the 0-15 range of a word
    #[error("bit index {bit} out of range in device address '{address}'")]
    BitOutOfRange { address: String, bit: u32 },

    /// Request parameters cannot be framed (count or address out of range)
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connect attempt exceeded its budget; the PLC is unreachable,
    /// as opposed to reachable but answering with an error
    #[error("connect to {addr} timed out after {timeout_ms} ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },

    /// Read or write on an established connection exceeded its budget
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// TCP connection could not be established
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Socket-level I/O failure mid-exchange
    #[error("I/O error: {0}")]
    Io(String),

    /// Device answered with a nonzero completion code
    #[error("device returned error code 0x{code:02X}")]
    DeviceError { code: u8 },

    /// Response shorter than the declared layout
    #[error("short response: expected {expected} bytes, got {actual}")]
    ShortResponse { expected: usize, actual: usize },
}

/// Result type alias for MC-protocol operations
pub type Result<T> = std::result::Result<T, McError>;

impl McError {
    /// True for failures where the device never answered at all,
    /// false when it answered but the exchange was invalid.
    pub fn is_timeout(&self) -> bool {
        matches!(self, McError::ConnectTimeout { .. } | McError::Timeout(_))
    }
}

impl From<std::io::Error> for McError {
    fn from(err: std::io::Error) -> Self {
        McError::Io(err.to_string())
    }
}
