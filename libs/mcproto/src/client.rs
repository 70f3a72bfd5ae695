//! MC-protocol TCP client.
//!
//! The protocol is strictly request/response with no request identifiers, so
//! interleaving two requests corrupts decoding. [`McClient`] therefore funnels
//! every device access through one mutex gate: a call acquires the gate, opens
//! a fresh connection, performs exactly one exchange, and tears the socket
//! down again. There is no pooling and no automatic retry; callers that
//! want backoff implement it themselves.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{McError, Result};
use crate::frame;

/// Default connect budget; a silent PLC is diagnosed as unreachable after this.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(6);
/// Default budget for each read/write on an established connection.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(2);

/// MC client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McClientConfig {
    /// Device host address
    pub host: String,
    /// Device port number
    pub port: u16,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Per-operation read/write timeout
    pub io_timeout: Duration,
}

impl Default for McClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl McClientConfig {
    /// Validates the configuration before a client is built from it.
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(McError::InvalidRequest("host cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(McError::InvalidRequest("port cannot be zero".to_string()));
        }
        if self.connect_timeout.is_zero() || self.io_timeout.is_zero() {
            return Err(McError::InvalidRequest(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// MC-protocol client with gate-serialized device access.
pub struct McClient {
    /// Target for the next connection; retargeting never disturbs a call
    /// already in flight, which works on its own captured copy.
    target: RwLock<(String, u16)>,
    /// The single system-wide exclusion gate for device access.
    gate: Mutex<()>,
    connect_timeout: Duration,
    io_timeout: Duration,
}

impl McClient {
    /// Creates a new client; no connection is opened until the first call.
    pub fn new(config: McClientConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            target: RwLock::new((config.host, config.port)),
            gate: Mutex::new(()),
            connect_timeout: config.connect_timeout,
            io_timeout: config.io_timeout,
        })
    }

    /// Retargets subsequent calls. Takes effect on the next connection.
    pub async fn set_target(&self, host: impl Into<String>, port: u16) {
        let host = host.into();
        info!("Retargeting PLC connection to {host}:{port}");
        *self.target.write().await = (host, port);
    }

    /// Reads `count` consecutive words starting at `start`.
    pub async fn read_words(&self, start: u32, count: u16) -> Result<Vec<u16>> {
        let request = frame::build_read_request(start, count)?;

        let _gate = self.gate.lock().await;
        let mut stream = self.connect().await?;
        self.send(&mut stream, &request).await?;

        let expected = frame::read_response_size(count);
        let mut raw = vec![0u8; expected];

        let header_len = self
            .read_full(&mut stream, &mut raw[..frame::RESPONSE_HEADER_SIZE])
            .await?;
        if header_len < frame::RESPONSE_HEADER_SIZE {
            warn!(raw_len = header_len, "Read response header truncated");
            return Err(McError::ShortResponse {
                expected: frame::RESPONSE_HEADER_SIZE,
                actual: header_len,
            });
        }

        let code = raw[frame::COMPLETION_CODE_OFFSET];
        if code != 0 {
            warn!(raw_len = header_len, "Device reported error code 0x{code:02X}");
            return Err(McError::DeviceError { code });
        }

        let payload_len = self
            .read_full(&mut stream, &mut raw[frame::RESPONSE_HEADER_SIZE..])
            .await?;
        let total = frame::RESPONSE_HEADER_SIZE + payload_len;
        if total < expected {
            warn!(raw_len = total, expected, "Read response payload truncated");
            return Err(McError::ShortResponse {
                expected,
                actual: total,
            });
        }

        debug!(raw = %hex::encode(&raw), direction = "recv", "Raw frame");
        frame::parse_read_response(&raw, count)
    }

    /// Reads a single word.
    pub async fn read_word(&self, address: u32) -> Result<u16> {
        let words = self.read_words(address, 1).await?;
        Ok(words[0])
    }

    /// Writes a single word. The acknowledgement is awaited but not
    /// validated; only a missing response fails the call.
    pub async fn write_word(&self, address: u32, value: u16) -> Result<()> {
        let request = frame::build_write_request(address, value)?;

        let _gate = self.gate.lock().await;
        let mut stream = self.connect().await?;
        self.send(&mut stream, &request).await?;

        let mut ack = [0u8; frame::RESPONSE_HEADER_SIZE];
        let n = self.read_full(&mut stream, &mut ack).await?;
        debug!(ack_len = n, "Write acknowledged");
        Ok(())
    }

    /// Opens a fresh connection to the current target, racing the attempt
    /// against the connect timeout so an unreachable PLC is reported
    /// distinctly from one that answers with an error.
    async fn connect(&self) -> Result<TcpStream> {
        let (host, port) = self.target.read().await.clone();
        let addr = format!("{host}:{port}");
        debug!("Connecting to PLC at {addr}");

        match timeout(self.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    warn!("Failed to set TCP_NODELAY: {e}");
                }
                Ok(stream)
            },
            Ok(Err(e)) => Err(McError::ConnectionFailed(format!("{addr}: {e}"))),
            Err(_) => Err(McError::ConnectTimeout {
                addr,
                timeout_ms: self.connect_timeout.as_millis() as u64,
            }),
        }
    }

    async fn send(&self, stream: &mut TcpStream, data: &[u8]) -> Result<()> {
        debug!(raw = %hex::encode(data), direction = "send", "Raw frame");
        timeout(self.io_timeout, stream.write_all(data))
            .await
            .map_err(|_| McError::Timeout(format!("send timed out after {:?}", self.io_timeout)))??;
        Ok(())
    }

    /// Reads until `buf` is full or the peer closes the stream; returns the
    /// number of bytes actually read.
    async fn read_full(&self, stream: &mut TcpStream, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = timeout(self.io_timeout, stream.read(&mut buf[filled..]))
                .await
                .map_err(|_| {
                    McError::Timeout(format!("receive timed out after {:?}", self.io_timeout))
                })??;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl std::fmt::Debug for McClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McClient")
            .field("connect_timeout", &self.connect_timeout)
            .field("io_timeout", &self.io_timeout)
            .finish()
    }
}
