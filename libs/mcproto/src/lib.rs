//! # mcproto - MC-protocol client for MELSEC-family PLCs
//!
//! A small Tokio-based client for the word-oriented binary request/response
//! protocol spoken by MELSEC-family programmable controllers (3E frame).
//!
//! ## Features
//!
//! - **Byte-exact framing**: fixed little-endian 3E request frames and
//!   response decoding, covered by layout tests
//! - **Serialized device access**: one mutex gate guarantees at most one
//!   request in flight, which the identifier-less protocol requires
//! - **Fresh connection per call**: no pooling and no stale-socket states,
//!   trading a little latency for a lot of simplicity
//! - **Staged timeouts**: a connect budget distinguishes "PLC unreachable"
//!   from "PLC answered with an error"; separate I/O budgets cover the
//!   byte exchange
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use mcproto::{DeviceAddress, McClient, McClientConfig};
//!
//! #[tokio::main]
//! async fn main() -> mcproto::Result<()> {
//!     let client = McClient::new(McClientConfig {
//!         host: "192.168.3.39".to_string(),
//!         port: 5000,
//!         ..Default::default()
//!     })?;
//!
//!     let addr = DeviceAddress::parse("D3115")?;
//!     let value = client.read_word(addr.word).await?;
//!     println!("D3115 = {value}");
//!     Ok(())
//! }
//! ```

/// Device address parsing (`D100`, `D3115.1`)
pub mod address;

/// MC client with gate-serialized access
pub mod client;

/// Error types and result handling
pub mod error;

/// Request framing and response decoding
pub mod frame;

pub use address::DeviceAddress;
pub use client::{McClient, McClientConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IO_TIMEOUT};
pub use error::{McError, Result};
