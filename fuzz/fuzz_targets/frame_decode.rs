//! Arbitrary bytes must never panic the decoder, and anything it accepts
//! must encode back to a frame that decodes identically.

#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use resumux_proto::Frame;

fuzz_target!(|data: &[u8]| {
    let mut buffer = BytesMut::from(data);
    while let Ok(Some(frame)) = Frame::decode(&mut buffer) {
        let mut encoded = BytesMut::new();
        if frame.encode(&mut encoded).is_err() {
            continue;
        }
        let decoded = Frame::decode(&mut encoded);
        assert_eq!(decoded, Ok(Some(frame)));
        assert!(encoded.is_empty());
    }
});
