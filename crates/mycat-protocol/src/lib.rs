//! # mycat-protocol
//!
//! Pure implementation of the MySQL binary message protocol used by the
//! mycat driver, plus the legacy packet protocol constants.
//!
//! This crate provides the message payloads and their encoding without any
//! I/O. It is designed to be the foundation layer that higher-level crates
//! build upon.
//!
//! ## Layout
//!
//! - [`codec`]: varints, length-prefixed strings and the [`Encode`]/[`Decode`] traits
//! - [`message`]: client and server message type ids
//! - [`session`]: capability, authentication and session messages
//! - [`notice`]: server push notices
//! - [`resultset`]: column metadata, rows and result terminators
//! - [`crud`], [`expr`], [`datatypes`]: CRUD messages and expression trees
//! - [`prepare`]: prepared statement messages
//! - [`classic`]: legacy protocol flags and opcodes
//!
//! ## Example
//!
//! ```
//! use mycat_protocol::codec::{Decode, Encode};
//! use mycat_protocol::session::OkMessage;
//!
//! let ok = OkMessage { msg: Some("bye!".into()) };
//! let decoded = OkMessage::decode_exact(ok.to_bytes()).unwrap();
//! assert_eq!(decoded.msg.as_deref(), Some("bye!"));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

macro_rules! empty_message {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
        pub struct $name;

        impl $crate::codec::Encode for $name {
            fn encode(&self, _buf: &mut ::bytes::BytesMut) {}
        }

        impl $crate::codec::Decode for $name {
            fn decode(
                _src: &mut ::bytes::Bytes,
            ) -> Result<Self, $crate::error::ProtocolError> {
                Ok(Self)
            }
        }
    };
}

pub mod classic;
pub mod codec;
pub mod crud;
pub mod datatypes;
pub mod error;
pub mod expr;
pub mod message;
pub mod notice;
pub mod prepare;
pub mod resultset;
pub mod session;

pub use codec::{Decode, Encode};
pub use datatypes::{Any, Scalar};
pub use error::ProtocolError;
pub use message::{
    ClientMessage, ClientMessageType, LEGACY_PROTOCOL_MARKER, ServerMessage, ServerMessageType,
};
