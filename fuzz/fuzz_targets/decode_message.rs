//! Message bodies must decode or fail cleanly.

#![no_main]

use bytes::Bytes;
use libfuzzer_sys::fuzz_target;
use mycat_protocol::Decode;
use mycat_protocol::crud::{Find, Insert, StmtExecute};
use mycat_protocol::notice::Frame;
use mycat_protocol::prepare::PreparableMessage;
use mycat_protocol::resultset::ColumnMetaData;
use mycat_protocol::session::ServerError;

fuzz_target!(|data: &[u8]| {
    let Some((&selector, body)) = data.split_first() else {
        return;
    };
    let body = Bytes::copy_from_slice(body);
    match selector % 7 {
        0 => {
            let _ = Frame::decode_exact(body);
        }
        1 => {
            let _ = ColumnMetaData::decode_exact(body);
        }
        2 => {
            let _ = ServerError::decode_exact(body);
        }
        3 => {
            let _ = StmtExecute::decode_exact(body);
        }
        4 => {
            let _ = Find::decode_exact(body);
        }
        5 => {
            let _ = Insert::decode_exact(body);
        }
        _ => {
            if let Ok(message) = PreparableMessage::decode_exact(body) {
                let _ = message.resolve();
            }
        }
    }
});
