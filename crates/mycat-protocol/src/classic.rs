//! Legacy packet protocol constants.
//!
//! The legacy protocol frames every packet with a 3-byte little-endian
//! payload length followed by a 1-byte sequence number. The driver only
//! speaks the binary message protocol on the wire, but the legacy status
//! bits are reported through result sets and the capability flags are
//! still negotiated for session attributes.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Legacy packet header size in bytes.
pub const PACKET_HEADER_SIZE: usize = 4;

/// Largest payload a single legacy packet can carry.
pub const MAX_PACKET_PAYLOAD: usize = 0x00FF_FFFF;

bitflags! {
    /// Client capability bitmask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClientFlags: u32 {
        /// New more secure passwords.
        const LONG_PASSWORD = 1;
        /// Found instead of affected rows.
        const FOUND_ROWS = 2;
        /// Get all column flags.
        const LONG_FLAG = 4;
        /// One can specify db on connect.
        const CONNECT_WITH_DB = 8;
        /// Don't allow db.table.column.
        const NO_SCHEMA = 16;
        /// Client can use compression protocol.
        const COMPRESS = 32;
        /// ODBC client.
        const ODBC = 64;
        /// Can use LOAD DATA LOCAL.
        const LOCAL_FILES = 128;
        /// Ignore spaces before '('.
        const IGNORE_SPACE = 256;
        /// Support the new protocol.
        const PROTOCOL_41 = 512;
        /// This is an interactive client.
        const INTERACTIVE = 1024;
        /// Switch to SSL after handshake.
        const SSL = 2048;
        /// Ignore sigpipes.
        const IGNORE_SIGPIPE = 4096;
        /// Client knows about transactions.
        const TRANSACTIONS = 8192;
        /// Old flag for the 4.1 protocol.
        const RESERVED = 16384;
        /// New 4.1 authentication.
        const SECURE_CONNECTION = 32768;
        /// Allow multi-statement support.
        const MULTI_STATEMENTS = 65536;
        /// Allow multiple result sets.
        const MULTI_RESULTS = 131_072;
        /// Allow multiple result sets from prepared statements.
        const PS_MULTI_RESULTS = 1 << 18;
        /// Client supports plugin authentication.
        const PLUGIN_AUTH = 1 << 19;
        /// Client sends connection attributes.
        const CONNECT_ATTRS = 1 << 20;
        /// Client can handle an expired password.
        const CAN_HANDLE_EXPIRED_PASSWORD = 1 << 22;
        /// Verify the server certificate.
        const SSL_VERIFY_SERVER_CERT = 1 << 30;
        /// Don't reset the options after an unsuccessful connect.
        const REMEMBER_OPTIONS = 1 << 31;
    }
}

bitflags! {
    /// Server status bitmask carried by OK and EOF packets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ServerStatus: u16 {
        /// A transaction is currently active.
        const IN_TRANSACTION = 1;
        /// Autocommit mode is set.
        const AUTO_COMMIT = 2;
        /// More results are on the way.
        const MORE_RESULTS = 4;
        /// Another query follows in the batch.
        const ANOTHER_QUERY = 8;
        /// The query used an index badly.
        const BAD_INDEX = 16;
        /// The query used no index.
        const NO_INDEX = 32;
        /// A read-only cursor is open.
        const CURSOR_EXISTS = 64;
        /// The last row of the cursor was sent.
        const LAST_ROW_SENT = 128;
        /// Output parameters are present.
        const OUTPUT_PARAMETERS = 4096;
    }
}

/// Legacy command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
#[allow(missing_docs)]
pub enum Command {
    Sleep = 0,
    Quit = 1,
    InitDb = 2,
    Query = 3,
    FieldList = 4,
    CreateDb = 5,
    DropDb = 6,
    Reload = 7,
    Shutdown = 8,
    Statistics = 9,
    ProcessInfo = 10,
    Connect = 11,
    ProcessKill = 12,
    Debug = 13,
    Ping = 14,
    Time = 15,
    DelayedInsert = 16,
    ChangeUser = 17,
    BinlogDump = 18,
    TableDump = 19,
    ConnectOut = 20,
    RegisterSlave = 21,
    Prepare = 22,
    Execute = 23,
    LongData = 24,
    CloseStmt = 25,
    ResetStmt = 26,
    SetOption = 27,
    Fetch = 28,
}

impl Command {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        Ok(match value {
            0 => Self::Sleep,
            1 => Self::Quit,
            2 => Self::InitDb,
            3 => Self::Query,
            4 => Self::FieldList,
            5 => Self::CreateDb,
            6 => Self::DropDb,
            7 => Self::Reload,
            8 => Self::Shutdown,
            9 => Self::Statistics,
            10 => Self::ProcessInfo,
            11 => Self::Connect,
            12 => Self::ProcessKill,
            13 => Self::Debug,
            14 => Self::Ping,
            15 => Self::Time,
            16 => Self::DelayedInsert,
            17 => Self::ChangeUser,
            18 => Self::BinlogDump,
            19 => Self::TableDump,
            20 => Self::ConnectOut,
            21 => Self::RegisterSlave,
            22 => Self::Prepare,
            23 => Self::Execute,
            24 => Self::LongData,
            25 => Self::CloseStmt,
            26 => Self::ResetStmt,
            27 => Self::SetOption,
            28 => Self::Fetch,
            other => {
                return Err(ProtocolError::InvalidTag {
                    kind: "command",
                    tag: u64::from(other),
                });
            }
        })
    }
}

/// Legacy packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Payload length (24 bits).
    pub length: u32,
    /// Sequence number, wrapping at 255.
    pub sequence: u8,
}

impl PacketHeader {
    /// Create a header, rejecting lengths that do not fit in 24 bits.
    pub fn new(length: usize, sequence: u8) -> Result<Self, ProtocolError> {
        if length > MAX_PACKET_PAYLOAD {
            return Err(ProtocolError::InvalidField {
                field: "packet length",
                value: length.to_string(),
            });
        }
        Ok(Self {
            length: length as u32,
            sequence,
        })
    }

    /// Write the 4 header bytes.
    pub fn encode(&self, buf: &mut BytesMut) {
        let len = self.length.to_le_bytes();
        buf.put_slice(&len[..3]);
        buf.put_u8(self.sequence);
    }

    /// Read the 4 header bytes.
    pub fn decode(src: &mut Bytes) -> Result<Self, ProtocolError> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::IncompletePayload {
                expected: PACKET_HEADER_SIZE,
                actual: src.remaining(),
            });
        }
        let b0 = u32::from(src.get_u8());
        let b1 = u32::from(src.get_u8());
        let b2 = u32::from(src.get_u8());
        let sequence = src.get_u8();
        Ok(Self {
            length: b0 | (b1 << 8) | (b2 << 16),
            sequence,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_status_bits() {
        let status = ServerStatus::from_bits_truncate(4 | 32);
        assert!(status.contains(ServerStatus::MORE_RESULTS));
        assert!(status.contains(ServerStatus::NO_INDEX));
        assert!(!status.contains(ServerStatus::IN_TRANSACTION));
    }

    #[test]
    fn test_command_opcodes() {
        assert_eq!(Command::Query as u8, 3);
        assert_eq!(Command::Ping as u8, 14);
        assert_eq!(Command::Fetch as u8, 28);
        assert_eq!(Command::from_u8(25).unwrap(), Command::CloseStmt);
        assert!(Command::from_u8(29).is_err());
    }

    #[test]
    fn test_packet_header() {
        let header = PacketHeader::new(0x01_02_03, 7).unwrap();
        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(&buf[..], &[0x03, 0x02, 0x01, 7]);
        assert_eq!(PacketHeader::decode(&mut buf.freeze()).unwrap(), header);
    }

    #[test]
    fn test_packet_header_too_long() {
        assert!(PacketHeader::new(MAX_PACKET_PAYLOAD + 1, 0).is_err());
    }

    #[test]
    fn test_client_flags_high_bits() {
        let flags = ClientFlags::PLUGIN_AUTH | ClientFlags::REMEMBER_OPTIONS;
        assert_eq!(flags.bits(), (1 << 19) | (1 << 31));
    }
}
