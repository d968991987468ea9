//! Transport loss, replay and the resume window.

use std::time::Duration;

use resumux_core::{ResumeConfig, SessionConfig, StreamEvent, resume::ResumeState};
use resumux_harness::scenario::{Scenario, Side, World, oracle};
use resumux_proto::{ErrorCode, FrameType, Payload, StreamId};

const STREAM: StreamId = 1;

fn open_stream(world: &mut World, n: u32) -> Result<(), String> {
    let id = world.with_session(Side::Client, |session, now| session.request_stream(Payload::new("items"), n, now))?;
    assert_eq!(id, STREAM);
    world.run_until_idle()
}

fn emit(world: &mut World, range: std::ops::Range<u8>, complete_last: bool) -> Result<(), String> {
    let last = range.end.saturating_sub(1);
    world.with_session(Side::Server, |session, _| {
        for item in range {
            session.send(STREAM, Payload::new(vec![item]), complete_last && item == last)?;
        }
        Ok(())
    })
}

fn received_items(world: &World) -> Vec<u8> {
    world
        .client()
        .events()
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Next { payload, .. } => payload.data.first().copied(),
            _ => None,
        })
        .collect()
}

fn stream_positions(world: &World) -> Vec<u64> {
    world
        .client()
        .received()
        .iter()
        .filter(|record| record.frame_type == FrameType::Payload)
        .map(|record| record.position)
        .collect()
}

#[test]
fn lost_frames_are_replayed_in_order_after_resume() {
    let result = Scenario::new("mid-stream disconnect")
        .step(|world| open_stream(world, 16))
        .step(|world| {
            emit(world, 0..10, true)?;
            world.flush()?;
            let delivered = world.deliver(Side::Client, 7)?;
            assert_eq!(delivered, 7);
            world.disconnect()?;
            world.run_until_idle()
        })
        .oracle(oracle::all_of(vec![
            oracle::sessions_alive(),
            oracle::positions_agree(),
            oracle::resumed(Side::Client),
            oracle::resumed(Side::Server),
            oracle::no_stream_errors(Side::Client),
            Box::new(|world: &World| {
                let positions = stream_positions(world);
                if positions == (1..=10).collect::<Vec<u64>>() {
                    Ok(())
                } else {
                    Err(format!("client saw positions {positions:?}"))
                }
            }),
            Box::new(|world: &World| {
                let items = received_items(world);
                if items == (0..10).collect::<Vec<u8>>() { Ok(()) } else { Err(format!("client got {items:?}")) }
            }),
            Box::new(|world: &World| {
                let completed =
                    world.client().events().iter().any(|event| matches!(event, StreamEvent::Complete { .. }));
                if completed { Ok(()) } else { Err("stream never completed".to_string()) }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn frames_produced_during_partition_are_replayed_when_it_heals() {
    let result = Scenario::new("partition")
        .step(|world| open_stream(world, 16))
        .step(|world| {
            world.set_network(false);
            world.disconnect()?;
            assert_eq!(world.reconnect_attempts(), &[1]);
            assert_eq!(world.client().session().state(), ResumeState::Disconnected);

            // Both sides keep producing while nothing can be written.
            emit(world, 0..3, false)?;
            world.with_session(Side::Client, |session, _| session.request_n(STREAM, 4))?;
            world.advance_in_steps(Duration::from_secs(3), Duration::from_secs(1))?;
            assert!(received_items(world).is_empty());

            world.set_network(true);
            world.advance_in_steps(Duration::from_secs(3), Duration::from_secs(1))
        })
        .oracle(oracle::all_of(vec![
            oracle::sessions_alive(),
            oracle::positions_agree(),
            oracle::resumed(Side::Client),
            Box::new(|world: &World| {
                if world.reconnect_attempts() == [1, 2] {
                    Ok(())
                } else {
                    Err(format!("attempts {:?}", world.reconnect_attempts()))
                }
            }),
            Box::new(|world: &World| {
                let items = received_items(world);
                if items == vec![0, 1, 2] { Ok(()) } else { Err(format!("client got {items:?}")) }
            }),
            Box::new(|world: &World| {
                let demand = world.server().map(|server| {
                    server.events().iter().any(|event| matches!(event, StreamEvent::Demand { n: 4, .. }))
                });
                if demand == Some(true) { Ok(()) } else { Err("parked REQUEST_N never arrived".to_string()) }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn resume_window_expiry_abandons_both_sides() {
    let result = Scenario::new("window expiry")
        .step(|world| open_stream(world, 16))
        .step(|world| {
            world.set_network(false);
            world.disconnect()?;
            world.advance_in_steps(Duration::from_secs(40), Duration::from_secs(1))
        })
        .step(|world| {
            let late = world.with_session(Side::Client, |session, now| session.request_response(Payload::new("late"), now));
            assert!(late.is_err(), "abandoned session accepted a request");
            Ok(())
        })
        .oracle(oracle::all_of(vec![
            Box::new(|world: &World| {
                let attempts = world.reconnect_attempts();
                if attempts == [1, 2, 3, 4, 5, 6] { Ok(()) } else { Err(format!("attempts {attempts:?}")) }
            }),
            Box::new(|world: &World| {
                let error = world.client().events().iter().find_map(|event| match event {
                    StreamEvent::Error { stream_id: STREAM, error } => Some(error.clone()),
                    _ => None,
                });
                match error {
                    Some(error) if error.code == ErrorCode::ConnectionError && error.message == "connection lost" => {
                        Ok(())
                    },
                    other => Err(format!("stream ended with {other:?}")),
                }
            }),
            Box::new(|world: &World| {
                let server = world.server().ok_or("server missing")?;
                if world.client().abandoned() && server.abandoned() {
                    Ok(())
                } else {
                    Err("both sessions must be abandoned".to_string())
                }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn evicted_replay_frames_make_resume_fail() {
    let small_buffer = SessionConfig {
        resume: ResumeConfig { buffer_capacity: 2, ..ResumeConfig::default() },
        ..SessionConfig::server()
    };

    let result = Scenario::new("eviction")
        .server_config(small_buffer)
        .step(|world| open_stream(world, 16))
        .step(|world| {
            emit(world, 0..5, false)?;
            world.flush()?;
            world.deliver(Side::Client, 1)?;
            world.disconnect()?;
            world.run_until_idle()
        })
        .oracle(oracle::all_of(vec![
            Box::new(|world: &World| {
                let server = world.server().ok_or("server missing")?;
                if world.client().abandoned() && server.abandoned() {
                    Ok(())
                } else {
                    Err("resume past the retained range must abandon both sides".to_string())
                }
            }),
            Box::new(|world: &World| {
                let rejected = world
                    .client()
                    .received()
                    .iter()
                    .any(|record| record.stream_id == 0 && record.frame_type == FrameType::Error);
                if rejected { Ok(()) } else { Err("client never saw the rejection".to_string()) }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn server_without_resume_refuses_resumable_setup() {
    let no_resume = SessionConfig {
        resume: ResumeConfig { enabled: false, ..ResumeConfig::default() },
        ..SessionConfig::server()
    };

    let result = Scenario::new("setup rejection")
        .server_config(no_resume)
        .oracle(Box::new(|world: &World| {
            let rejection = world.setup_rejection().ok_or("server accepted SETUP")?;
            if rejection.code != ErrorCode::UnsupportedSetup {
                return Err(format!("rejected with {:?}", rejection.code));
            }
            if world.server().is_some() {
                return Err("server kept a session".to_string());
            }
            if !world.client().abandoned() {
                return Err("client session survived the rejection".to_string());
            }
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn keepalive_acknowledgement_trims_the_replay_buffer() {
    let result = Scenario::new("acknowledgement")
        .step(|world| open_stream(world, 16))
        .step(|world| {
            emit(world, 0..4, false)?;
            world.run_until_idle()?;
            let retained = world.server().map(|server| server.session().retained());
            assert_eq!(retained, Some(4));

            // Client keepalive interval defaults to 20 seconds.
            world.advance(Duration::from_secs(20))
        })
        .oracle(oracle::all_of(vec![
            oracle::sessions_alive(),
            Box::new(|world: &World| {
                let server = world.server().ok_or("server missing")?;
                if !server.received().iter().any(|record| record.frame_type == FrameType::Keepalive) {
                    return Err("no keepalive reached the server".to_string());
                }
                match server.session().retained() {
                    0 => Ok(()),
                    n => Err(format!("{n} acknowledged frames still retained")),
                }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn resume_reaching_a_server_that_missed_the_loss_takes_over_the_session() {
    let result = Scenario::new("half-open transport")
        .step(|world| open_stream(world, 16))
        .step(|world| {
            emit(world, 0..10, true)?;
            world.flush()?;
            world.deliver(Side::Client, 4)?;

            world.half_open()?;
            assert_eq!(world.reconnect_attempts(), &[1]);
            let server_state = world.server().map(|server| server.session().state());
            assert_eq!(server_state, Some(ResumeState::Connected));

            world.run_until_idle()
        })
        .oracle(oracle::all_of(vec![
            oracle::sessions_alive(),
            oracle::positions_agree(),
            oracle::resumed(Side::Client),
            oracle::resumed(Side::Server),
            Box::new(|world: &World| {
                let items = received_items(world);
                if items == (0..10).collect::<Vec<u8>>() { Ok(()) } else { Err(format!("client got {items:?}")) }
            }),
            Box::new(|world: &World| {
                let state = world.server().map(|server| server.session().state());
                if state == Some(ResumeState::Resumed) { Ok(()) } else { Err(format!("server left in {state:?}")) }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}
