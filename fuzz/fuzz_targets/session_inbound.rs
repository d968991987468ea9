//! Whatever frames a peer sends, a server session either handles them or
//! abandons itself; it never panics and never writes a stream frame after
//! abandoning.

#![no_main]

use std::time::{Duration, Instant};

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use resumux_core::{Session, SessionConfig};
use resumux_proto::{Frame, Payload, Setup};

fuzz_target!(|data: &[u8]| {
    let setup = Setup {
        keepalive_interval_ms: 1_000,
        max_lifetime_ms: 10_000,
        lease: data.first().is_some_and(|byte| byte & 1 == 1),
        resume_token: Some(bytes::Bytes::from_static(b"fuzz")),
        data_mime: String::new(),
        metadata_mime: String::new(),
        payload: Payload::default(),
    };
    let mut now = Instant::now();
    let Ok(mut session) = Session::accept(&setup, SessionConfig::server(), now) else {
        return;
    };

    let mut buffer = BytesMut::from(data);
    while let Ok(Some(frame)) = Frame::decode(&mut buffer) {
        now += Duration::from_millis(10);
        if session.handle_frame(frame, now).is_err() {
            assert!(session.is_abandoned());
            break;
        }
        session.tick(now);
        while let Some(out) = session.poll_outbound() {
            if session.is_abandoned() {
                assert_eq!(out.stream_id, 0, "stream frame {:?} after abandoning", out.frame_type());
            }
        }
    }
});
