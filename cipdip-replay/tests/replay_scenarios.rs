//! End-to-end replay scenarios against fake link-layer collaborators

mod common;

use common::*;
use cipdip_core::Error;
use cipdip_packet::{ethernet, ipv4};
use cipdip_replay::{
    BindingSource, PacingMode, ReplayComponents, ReplayConfig, ReplayEngine, RewritePolicy, RunState,
};
use parking_lot::Mutex;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn config_for(input: PathBuf) -> ReplayConfig {
    ReplayConfig {
        input: Some(input),
        pacing: PacingMode::Burst,
        ..Default::default()
    }
}

fn ip_checksum(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[24], frame[25]])
}

fn tcp_checksum(frame: &[u8]) -> u16 {
    u16::from_be_bytes([frame[14 + 20 + 16], frame[14 + 20 + 17]])
}

#[tokio::test]
async fn realtime_replay_follows_capture_deltas() {
    let dir = tempfile::tempdir().unwrap();
    let base = Duration::from_secs(1_700_000_000);
    let input = write_capture(
        dir.path(),
        &[
            (base, enip_request(0)),
            (base + Duration::from_millis(50), enip_request(1)),
            (base + Duration::from_millis(60), enip_request(2)),
        ],
    );
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        pacing: PacingMode::realtime(),
        ..config_for(input)
    })
    .unwrap();

    let started = Instant::now();
    let report = engine.execute(components(None, &sink)).await;
    let elapsed = started.elapsed();

    assert!(report.is_success());
    assert_eq!(report.stats.frames_sent, 3);
    assert_eq!(report.stats.planned_duration_ms, 60);
    assert!(elapsed >= Duration::from_millis(60), "finished after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(400), "finished after {:?}", elapsed);
}

#[tokio::test]
async fn limit_caps_frames_in_every_pacing_mode() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(100, Duration::from_millis(1)));

    for pacing in [
        PacingMode::Burst,
        PacingMode::Fixed { interval_ms: 1 },
        PacingMode::realtime(),
    ] {
        let sink = RecordingSink::default();
        let engine = ReplayEngine::new(ReplayConfig {
            pacing,
            limit: Some(5),
            ..config_for(input.clone())
        })
        .unwrap();

        let report = engine.execute(components(None, &sink)).await;
        assert_eq!(report.stats.frames_planned, 5, "{:?}", pacing);
        assert_eq!(report.stats.frames_sent, 5, "{:?}", pacing);
        assert_eq!(sink.frames().len(), 5);
    }
}

#[tokio::test]
async fn silent_target_fails_after_every_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(3, Duration::from_millis(1)));
    let probe = ScriptedProbe::silent();
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        arp_target: Some(LIVE),
        arp_timeout_ms: 50,
        arp_retries: 2,
        arp_required: true,
        ..config_for(input)
    })
    .unwrap();

    let started = Instant::now();
    let report = engine.execute(components(Some(probe.clone()), &sink)).await;
    let elapsed = started.elapsed();

    assert!(matches!(
        report.failure,
        Some(Error::TargetUnreachable { target, attempts: 3 }) if target == LIVE
    ));
    assert!(elapsed >= Duration::from_millis(150), "gave up after {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(600), "gave up after {:?}", elapsed);
    assert_eq!(*probe.calls.lock(), 3);
    assert_eq!(report.stats.state, RunState::Aborted);
    assert_eq!(report.stats.frames_sent, 0);
    assert!(sink.frames().is_empty());
}

#[tokio::test]
async fn drift_with_auto_rewrite_retargets_later_frames() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(20, Duration::from_millis(10)));
    let probe = ScriptedProbe::new(vec![Some(LIVE_MAC), Some(FAILOVER_MAC)]);
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        pacing: PacingMode::Fixed { interval_ms: 10 },
        arp_timeout_ms: 20,
        arp_refresh_ms: 40,
        arp_auto_rewrite: true,
        rewrite: RewritePolicy {
            dst_ip: Some(IpAddr::V4(LIVE)),
            ..Default::default()
        },
        ..config_for(input)
    })
    .unwrap();

    let report = engine.execute(components(Some(probe), &sink)).await;
    assert!(report.is_success(), "{:?}", report.failure);
    assert_eq!(report.stats.drift_events, 1);
    assert_eq!(report.stats.resolution.unwrap().mac, FAILOVER_MAC);

    let frames = sink.frames();
    assert_eq!(frames.len(), 20);
    assert_eq!(ethernet::destination(&frames[0]), Some(LIVE_MAC));
    assert_eq!(ethernet::destination(frames.last().unwrap()), Some(FAILOVER_MAC));
    // Each frame carries exactly one of the two bindings, switching once
    let switches = frames
        .windows(2)
        .filter(|pair| ethernet::destination(&pair[0]) != ethernet::destination(&pair[1]))
        .count();
    assert_eq!(switches, 1);
}

#[tokio::test]
async fn drift_fail_aborts_run() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(40, Duration::from_millis(10)));
    let probe = ScriptedProbe::new(vec![Some(LIVE_MAC), Some(FAILOVER_MAC)]);
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        arp_target: Some(LIVE),
        pacing: PacingMode::Fixed { interval_ms: 10 },
        arp_timeout_ms: 20,
        arp_refresh_ms: 30,
        arp_drift_fail: true,
        ..config_for(input)
    })
    .unwrap();

    let report = engine.execute(components(Some(probe), &sink)).await;
    assert!(matches!(report.failure, Some(Error::TargetDrifted { .. })));
    assert_eq!(report.stats.state, RunState::Aborted);
    assert_eq!(report.stats.drift_events, 1);
    assert!(report.stats.frames_sent < report.stats.frames_planned);
}

#[tokio::test]
async fn preflight_only_sends_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(10, Duration::from_millis(5)));
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        server_ip: Some(LIVE),
        preflight_only: true,
        rewrite: RewritePolicy {
            dst_ip: Some(IpAddr::V4(LIVE)),
            ..Default::default()
        },
        ..config_for(input)
    })
    .unwrap();

    let report = engine
        .execute(components(Some(ScriptedProbe::new(vec![Some(LIVE_MAC)])), &sink))
        .await;
    assert!(report.is_success());
    assert_eq!(report.stats.state, RunState::Preflighted);
    assert_eq!(report.stats.frames_sent, 0);
    assert_eq!(report.stats.frames_rewritten, 0);
    assert_eq!(report.stats.frames_planned, 10);
    let resolution = report.stats.resolution.unwrap();
    assert_eq!(resolution.mac, LIVE_MAC);
    assert_eq!(resolution.source, BindingSource::Arp);
    assert!(sink.frames().is_empty());
}

#[tokio::test]
async fn cancellation_stops_before_next_frame() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(50, Duration::from_millis(1)));
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        pacing: PacingMode::Fixed { interval_ms: 20 },
        ..config_for(input)
    })
    .unwrap();

    let token = engine.cancel_token();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        token.cancel();
    });

    let report = engine.execute(components(None, &sink)).await;
    assert!(matches!(report.failure, Some(Error::Interrupted(_))));
    assert_eq!(report.stats.state, RunState::Aborted);
    assert!(report.stats.frames_sent > 0);
    assert!(report.stats.frames_sent < report.stats.frames_planned);
    assert_eq!(report.stats.frames_sent as usize, sink.frames().len());
    assert!(report.stats.finished_at.is_some());
    assert!(report.stats.abort_reason.is_some());
}

#[tokio::test]
async fn empty_policy_replays_bytes_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let frames = evenly_spaced(5, Duration::from_millis(1));
    let input = write_capture(dir.path(), &frames);
    let sink = RecordingSink::default();

    let report = ReplayEngine::new(config_for(input))
        .unwrap()
        .execute(components(Some(ScriptedProbe::new(vec![Some(LIVE_MAC)])), &sink))
        .await;
    assert!(report.is_success());
    assert_eq!(report.stats.frames_rewritten, 0);
    let expected: Vec<Vec<u8>> = frames.into_iter().map(|(_, data)| data).collect();
    assert_eq!(sink.frames(), expected);
}

#[tokio::test]
async fn destination_rewrite_keeps_payload() {
    let dir = tempfile::tempdir().unwrap();
    let original = enip_request(0);
    let input = write_capture(dir.path(), &[(Duration::from_secs(1), original.clone())]);
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        rewrite: RewritePolicy {
            dst_ip: Some(IpAddr::V4(LIVE)),
            ..Default::default()
        },
        ..config_for(input)
    })
    .unwrap();

    let report = engine.execute(components(None, &sink)).await;
    assert_eq!(report.stats.frames_rewritten, 1);

    let sent = &sink.frames()[0];
    assert_eq!(sent.len(), original.len());
    assert_ne!(ip_checksum(sent), ip_checksum(&original));
    assert_ne!(tcp_checksum(sent), tcp_checksum(&original));
    assert_eq!(ipv4::parse(&sent[14..]).unwrap().destination, LIVE);
    let app = 14 + 20 + 20;
    assert_eq!(&sent[app..], &original[app..]);
}

#[tokio::test]
async fn enip_only_passes_other_traffic_through() {
    let dir = tempfile::tempdir().unwrap();
    let http = http_request();
    let input = write_capture(
        dir.path(),
        &[(Duration::from_secs(1), http.clone()), (Duration::from_secs(2), enip_request(1))],
    );
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        rewrite: RewritePolicy {
            dst_ip: Some(IpAddr::V4(LIVE)),
            enip_only: true,
            ..Default::default()
        },
        ..config_for(input)
    })
    .unwrap();

    let report = engine.execute(components(None, &sink)).await;
    let sent = sink.frames();
    assert_eq!(sent[0], http);
    assert_eq!(ipv4::parse(&sent[1][14..]).unwrap().destination, LIVE);
    assert_eq!(report.stats.frames_sent, 2);
    assert_eq!(report.stats.frames_rewritten, 1);
}

#[tokio::test]
async fn responses_counted_and_capture_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let input = write_capture(dir.path(), &evenly_spaced(4, Duration::from_millis(1)));

    let stopped = Arc::new(Mutex::new(false));
    let sink = RecordingSink::default();
    let engine = ReplayEngine::new(ReplayConfig {
        include_responses: true,
        ..config_for(input.clone())
    })
    .unwrap();
    let report = engine
        .execute(ReplayComponents {
            tap: Some(Box::new(FakeTap {
                replies: 3,
                fail: false,
                stopped: Arc::clone(&stopped),
            })),
            ..components(None, &sink)
        })
        .await;
    assert_eq!(report.stats.responses_captured, 3);
    assert!(*stopped.lock());

    let engine = ReplayEngine::new(ReplayConfig {
        include_responses: true,
        ..config_for(input)
    })
    .unwrap();
    let report = engine
        .execute(ReplayComponents {
            tap: Some(Box::new(FakeTap {
                replies: 0,
                fail: true,
                stopped: Arc::new(Mutex::new(false)),
            })),
            ..components(None, &RecordingSink::default())
        })
        .await;
    assert!(report.is_success());
    assert_eq!(report.stats.response_capture_errors, 1);
    assert_eq!(report.stats.frames_sent, 4);
}

#[tokio::test]
async fn unsupported_capture_is_rejected_up_front() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("notes.pcap");
    std::fs::write(&input, b"this is not a capture file at all").unwrap();
    let sink = RecordingSink::default();

    let report = ReplayEngine::new(config_for(input))
        .unwrap()
        .execute(components(None, &sink))
        .await;
    assert!(matches!(report.failure, Some(Error::UnsupportedFormat(_))));
    assert!(report.failure.as_ref().is_some_and(Error::is_input_error));
    assert!(sink.frames().is_empty());
}
