//! # mycat-codec
//!
//! Async framing layer for the MySQL binary message protocol.
//!
//! This crate turns raw byte streams into typed envelopes, handling message
//! reassembly across TCP segment boundaries, and exposes the
//! [`PacketTransport`] seam the protocol engine runs over.
//!
//! ## Features
//!
//! - Envelope reassembly across TCP segments
//! - Message size limits
//! - Legacy packet framing with sequence checking
//! - Integration with tokio-util's codec framework

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod framed;
pub mod legacy_codec;
pub mod transport;
pub mod x_codec;

pub use error::CodecError;
pub use framed::PacketStream;
pub use legacy_codec::{LegacyCodec, LegacyPacket};
pub use transport::PacketTransport;
pub use x_codec::{DEFAULT_MAX_MESSAGE_SIZE, Packet, XCodec};
