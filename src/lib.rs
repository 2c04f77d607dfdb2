//! # SSR local gateway
//!
//! A local SOCKS5 proxy that relays each TCP stream to a remote
//! Shadowsocks/ShadowsocksR server through a three-stage transformation
//! pipeline.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │            SOCKS5 front end (loopback, no-auth)          │
//! ├─────────────────────────────────────────────────────────┤
//! │  Protocol layer (auth framing: lengths, HMACs, padding)  │
//! ├─────────────────────────────────────────────────────────┤
//! │  Stream cipher layer (RC4 / AES-CFB / AES-CTR / …)       │
//! ├─────────────────────────────────────────────────────────┤
//! │  Obfs layer (wire shaping, e.g. HTTP request mimicry)    │
//! ├─────────────────────────────────────────────────────────┤
//! │  TCP upstream to the SSR server                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! Egress traffic runs top to bottom; ingress runs the inverse pipeline.
//! One tunnel exists per client connection, driven by an explicit state
//! machine through handshake, request, resolve, connect, initial-package
//! delivery and the bidirectional relay.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

pub mod buffer;
pub mod crypto;
pub mod error;
pub mod obfs;
pub mod pipeline;
pub mod server;
pub mod socks5;
pub mod tunnel;

pub use error::{Error, Result};

/// Size of the per-socket I/O buffer, and the largest chunk that enters the
/// cipher pipeline in one piece.
pub const SSR_BUFF_SIZE: usize = 2048;

/// TCP maximum segment size assumed by the plugins.
pub const TCP_MSS: u16 = 1452;
