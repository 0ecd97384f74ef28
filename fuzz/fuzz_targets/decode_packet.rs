//! Envelope reassembly must never panic on arbitrary input.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use mycat_codec::XCodec;
use tokio_util::codec::Decoder;

fuzz_target!(|data: &[u8]| {
    let mut codec = XCodec::new().with_max_message_size(64 * 1024);
    let mut buf = BytesMut::from(data);
    while let Ok(Some(_packet)) = codec.decode(&mut buf) {}
});
