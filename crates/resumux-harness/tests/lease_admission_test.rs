//! Lease admission through a live session pair.

use std::time::Duration;

use resumux_core::{AdmissionError, LeaseConfig, SessionConfig, SessionError, StreamEvent};
use resumux_harness::scenario::{Scenario, Side, World, oracle};
use resumux_proto::{ErrorCode, Payload};

fn leased_client() -> SessionConfig {
    SessionConfig { lease: Some(LeaseConfig::default()), ..SessionConfig::client() }
}

fn request(world: &mut World) -> Result<u32, String> {
    world.with_session(Side::Client, |session, now| session.request_response(Payload::new("ping"), now))
}

#[test]
fn sixth_request_is_rejected_locally_until_fresh_lease() {
    let result = Scenario::new("lease exhaustion")
        .client_config(leased_client())
        .step(|world| {
            for _ in 0..5 {
                request(world)?;
            }
            let sixth = world.with_session(Side::Client, |session, now| {
                match session.request_response(Payload::new("ping"), now) {
                    Err(SessionError::Admission(AdmissionError::Exhausted)) => Ok(()),
                    other => panic!("sixth request should be refused locally, got {other:?}"),
                }
            });
            sixth?;
            world.run_until_idle()
        })
        .step(|world| {
            let requests = world
                .server()
                .map(|server| {
                    server.events().iter().filter(|event| matches!(event, StreamEvent::Request { .. })).count()
                })
                .unwrap_or_default();
            assert_eq!(requests, 5, "refused request never reached the wire");

            // Server re-issues on its next tick once its lease is used up.
            world.advance(Duration::from_secs(1))?;
            request(world)?;
            world.run_until_idle()
        })
        .oracle(oracle::all_of(vec![oracle::sessions_alive(), oracle::positions_agree()]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn server_grants_configured_lease_on_setup() {
    let result = Scenario::new("initial grant")
        .client_config(leased_client())
        .oracle(Box::new(|world: &World| {
            let server = world.server().ok_or("server missing")?;
            let issued = server.session().leases().sender().issued().map(|lease| lease.count);
            if issued != Some(5) {
                return Err(format!("server issued {issued:?}"));
            }
            let remaining = world.client().session().leases().receiver().remaining();
            if remaining != 5 {
                return Err(format!("client holds {remaining} requests"));
            }
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn sessions_without_leasing_admit_everything() {
    let result = Scenario::new("no leasing")
        .server_config(SessionConfig { lease: Some(LeaseConfig { count: 1, ..LeaseConfig::default() }), ..SessionConfig::server() })
        .step(|world| {
            for _ in 0..20 {
                request(world)?;
            }
            world.run_until_idle()
        })
        .oracle(Box::new(|world: &World| {
            let server = world.server().ok_or("server missing")?;
            let requests = server.events().iter().filter(|event| matches!(event, StreamEvent::Request { .. })).count();
            let rejected = world
                .client()
                .events()
                .iter()
                .any(|event| matches!(event, StreamEvent::Error { error, .. } if error.code == ErrorCode::Rejected));
            if requests != 20 || rejected {
                return Err(format!("{requests} requests delivered, rejected: {rejected}"));
            }
            Ok(())
        }))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

#[test]
fn lease_is_reissued_after_resume() {
    let result = Scenario::new("lease after resume")
        .client_config(leased_client())
        .step(|world| {
            world.disconnect()?;
            world.run_until_idle()
        })
        .step(|world| {
            let server = world.server().ok_or("server missing")?;
            let leases_sent = server.session().leases().sender().issued().map(|lease| lease.count);
            assert_eq!(leases_sent, Some(5));
            assert_eq!(world.client().session().leases().receiver().remaining(), 5);
            Ok(())
        })
        .oracle(oracle::all_of(vec![oracle::resumed(Side::Client), oracle::sessions_alive()]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}

fn fire(world: &mut World, count: usize) -> Result<(), String> {
    for _ in 0..count {
        world.with_session(Side::Client, |session, now| session.fire_and_forget(Payload::new("note"), now))?;
    }
    Ok(())
}

#[test]
fn requests_in_flight_across_a_reissue_are_admitted() {
    let result = Scenario::new("reissue with requests in flight")
        .client_config(leased_client())
        .step(|world| {
            fire(world, 5)?;
            world.flush()?;
            assert_eq!(world.deliver(Side::Server, 4)?, 4);

            // The server re-issues on one request left; the fifth is still on
            // the wire and was admitted under the first lease.
            world.advance(Duration::from_millis(1))?;
            assert_eq!(world.client().session().leases().receiver().remaining(), 5);

            fire(world, 5)?;
            world.run_until_idle()
        })
        .oracle(oracle::all_of(vec![
            oracle::sessions_alive(),
            oracle::positions_agree(),
            Box::new(|world: &World| {
                let server = world.server().ok_or("server missing")?;
                let requests =
                    server.events().iter().filter(|event| matches!(event, StreamEvent::Request { .. })).count();
                if requests == 10 { Ok(()) } else { Err(format!("server admitted {requests} of 10 requests")) }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario should succeed: {result:?}");
}
