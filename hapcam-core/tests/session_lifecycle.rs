mod support;

use hapcam_core::{
    AddressFamily, AudioRequest, FfmpegSection, PrepareRequest, SessionError, SessionManager,
    StartOutcome, StopOutcome, StreamRequest, StreamRequestOutcome, VideoRequest,
};

use support::{endpoint, init_tracing, session, value_after, RecordingSpawner, SharedLog};

const SOURCE: &str = "-re -i rtsp://10.0.0.8/live";

fn manager() -> (SessionManager, SharedLog) {
    init_tracing();
    let (spawner, log) = RecordingSpawner::build();
    let manager = SessionManager::new(SOURCE, FfmpegSection::default(), Some(spawner));
    (manager, log)
}

fn prepare_request(n: u8) -> PrepareRequest {
    PrepareRequest {
        session_id: session(n),
        target_address: "192.168.1.20".into(),
        local_address: "192.168.1.5".into(),
        video: Some(endpoint(5000, 1)),
        audio: Some(endpoint(5001, 3)),
    }
}

fn video_request(fps: u32) -> VideoRequest {
    VideoRequest {
        width: Some(640),
        height: Some(360),
        fps: Some(fps),
        max_bit_rate: Some(299),
    }
}

fn audio_request() -> AudioRequest {
    AudioRequest {
        codec: Some("OPUS".into()),
        sample_rate: Some(24),
        max_bit_rate: Some(128),
        packet_time: Some(20),
    }
}

fn last_args(log: &SharedLog) -> Vec<String> {
    log.lock().unwrap().spawns.last().expect("a spawn").1.clone()
}

#[test]
fn prepare_echoes_endpoints_with_fixed_ssrcs() {
    let (manager, _) = manager();
    let response = manager.prepare(&prepare_request(1));

    let video = response.video.as_ref().unwrap();
    assert_eq!(video.port, 5000);
    assert_eq!(video.ssrc, 1);
    assert_eq!(video.srtp_key, vec![1; 16]);
    assert_eq!(video.srtp_salt, vec![2; 14]);

    let audio = response.audio.as_ref().unwrap();
    assert_eq!(audio.port, 5001);
    assert_eq!(audio.ssrc, 2);
    assert_eq!(audio.srtp_key, vec![3; 16]);
    assert_eq!(audio.srtp_salt, vec![4; 14]);

    assert_eq!(response.address.address, "192.168.1.5");
    assert_eq!(response.address.family, AddressFamily::V4);

    let pending = manager.pending_session(session(1)).unwrap();
    assert_eq!(pending.address, "192.168.1.20");
    assert_eq!(pending.video.as_ref().unwrap().key.len(), 30);
    assert_eq!(pending.audio.as_ref().unwrap().port, 5001);
}

#[test]
fn prepare_response_serializes_to_wire_shape() {
    let (manager, _) = manager();
    let mut request = prepare_request(2);
    request.audio = None;
    request.local_address = "fe80::1".into();
    let response = manager.prepare(&request);

    let json = serde_json::to_value(&response).unwrap();
    assert_eq!(json["video"]["port"], 5000);
    assert_eq!(json["video"]["ssrc"], 1);
    assert!(json.get("audio").is_none());
    assert_eq!(json["address"]["address"], "fe80::1");
    assert_eq!(json["address"]["type"], "v6");
}

#[test]
fn start_without_prepare_spawns_nothing() {
    let (manager, log) = manager();
    let outcome = manager
        .start(session(3), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();
    assert_eq!(outcome, StartOutcome::NoPendingSession);
    assert!(!manager.is_ongoing(session(3)));
    assert!(log.lock().unwrap().spawns.is_empty());
}

#[test]
fn stop_after_prepare_leaves_pending_untouched() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(4));
    assert_eq!(manager.stop(session(4)), StopOutcome::NotOngoing);
    assert!(manager.is_pending(session(4)));
    assert!(!manager.is_ongoing(session(4)));
    assert!(log.lock().unwrap().kills.is_empty());
}

#[test]
fn start_promotes_pending_to_ongoing() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(5));
    let outcome = manager
        .start(session(5), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();

    assert_eq!(outcome, StartOutcome::Started { pid: Some(1000) });
    assert!(!manager.is_pending(session(5)));
    assert!(manager.is_ongoing(session(5)));

    let sessions = manager.ongoing_sessions();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, session(5));
    assert_eq!(sessions[0].pid, Some(1000));

    let log = log.lock().unwrap();
    assert_eq!(log.spawns.len(), 1);
    let (program, args) = &log.spawns[0];
    assert_eq!(program.to_str(), Some("ffmpeg"));
    assert_eq!(&args[..3], &["-re", "-i", "rtsp://10.0.0.8/live"]);
    assert_eq!(value_after(args, "-vf"), vec!["scale=w=640:h=360"]);
    assert_eq!(value_after(args, "-b:v"), vec!["299k"]);
    assert_eq!(value_after(args, "-frame_duration"), vec!["20"]);
    assert!(args
        .iter()
        .any(|arg| arg == "srtp://192.168.1.20:5000?rtcpport=5000&pkt_size=1378"));
    assert!(args
        .iter()
        .any(|arg| arg == "srtp://192.168.1.20:5001?rtcpport=5001"));
}

#[test]
fn stop_kills_transcoder_exactly_once() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(6));
    manager
        .start(session(6), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();

    assert_eq!(manager.stop(session(6)), StopOutcome::Stopped);
    assert!(!manager.is_ongoing(session(6)));
    assert_eq!(manager.stop(session(6)), StopOutcome::NotOngoing);

    let log = log.lock().unwrap();
    assert_eq!(log.kills.get(&1000), Some(&1));
}

#[test]
fn frame_rate_is_capped_at_thirty() {
    let (manager, log) = manager();

    manager.prepare(&prepare_request(7));
    manager
        .start(session(7), Some(&video_request(60)), Some(&audio_request()))
        .unwrap();
    assert_eq!(value_after(&last_args(&log), "-framerate"), vec!["30"]);

    manager.prepare(&prepare_request(8));
    manager
        .start(session(8), Some(&video_request(10)), Some(&audio_request()))
        .unwrap();
    assert_eq!(value_after(&last_args(&log), "-framerate"), vec!["10"]);
}

#[test]
fn audio_bitrate_ignores_requested_value() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(9));
    let audio = AudioRequest {
        max_bit_rate: Some(256),
        ..audio_request()
    };
    manager
        .start(session(9), Some(&video_request(30)), Some(&audio))
        .unwrap();
    assert_eq!(value_after(&last_args(&log), "-b:a"), vec!["64k"]);
}

#[test]
fn missing_video_request_uses_defaults() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(10));
    manager
        .start(session(10), None, Some(&audio_request()))
        .unwrap();

    let args = last_args(&log);
    assert_eq!(value_after(&args, "-vf"), vec!["scale=w=1280:h=720"]);
    assert_eq!(value_after(&args, "-framerate"), vec!["30"]);
    assert_eq!(value_after(&args, "-b:v"), vec!["300k"]);
}

#[test]
fn missing_audio_request_streams_video_only() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(11));
    let outcome = manager
        .start(session(11), Some(&video_request(30)), None)
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }));

    let args = last_args(&log);
    assert!(!args.iter().any(|arg| arg == "libopus"));
    assert_eq!(value_after(&args, "-ssrc"), vec!["1"]);
}

#[test]
fn malformed_audio_request_fails_only_that_session() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(12));
    manager.prepare(&prepare_request(13));

    let broken = AudioRequest {
        packet_time: None,
        ..audio_request()
    };
    let err = manager
        .start(session(12), Some(&video_request(30)), Some(&broken))
        .unwrap_err();
    assert_eq!(
        err,
        SessionError::MissingField {
            session: session(12),
            media: "audio",
            field: "packet_time",
        }
    );
    assert!(!manager.is_pending(session(12)));
    assert!(!manager.is_ongoing(session(12)));
    assert!(log.lock().unwrap().spawns.is_empty());

    let outcome = manager
        .start(session(13), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }));
}

#[test]
fn malformed_video_request_is_rejected() {
    let (manager, _) = manager();
    manager.prepare(&prepare_request(14));
    let video = VideoRequest {
        max_bit_rate: None,
        ..video_request(30)
    };
    let err = manager
        .start(session(14), Some(&video), Some(&audio_request()))
        .unwrap_err();
    assert!(matches!(
        err,
        SessionError::MissingField {
            media: "video",
            field: "max_bit_rate",
            ..
        }
    ));
}

#[test]
fn spawn_failure_clears_pending_without_ongoing_entry() {
    init_tracing();
    let (spawner, log) = RecordingSpawner::failing();
    let manager = SessionManager::new(SOURCE, FfmpegSection::default(), Some(spawner));

    manager.prepare(&prepare_request(15));
    let outcome = manager
        .start(session(15), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();
    assert_eq!(outcome, StartOutcome::SpawnFailed);
    assert!(!manager.is_pending(session(15)));
    assert!(!manager.is_ongoing(session(15)));
    assert_eq!(manager.stop(session(15)), StopOutcome::NotOngoing);
    assert_eq!(log.lock().unwrap().spawns.len(), 1);
}

#[test]
fn start_without_runtime_reports_spawn_failure() {
    init_tracing();
    let ffmpeg = FfmpegSection {
        binary: "sleep".into(),
        ..FfmpegSection::default()
    };
    let manager = SessionManager::new(SOURCE, ffmpeg, None);

    manager.prepare(&prepare_request(60));
    let outcome = manager.start(session(60), None, None).unwrap();
    assert_eq!(outcome, StartOutcome::SpawnFailed);
    assert!(!manager.is_pending(session(60)));
    assert_eq!(manager.ongoing_count(), 0);
}

#[test]
fn session_without_negotiated_media_spawns_nothing() {
    let (manager, log) = manager();
    let mut request = prepare_request(16);
    request.video = None;
    request.audio = None;
    manager.prepare(&request);

    let outcome = manager
        .start(session(16), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();
    assert_eq!(outcome, StartOutcome::NothingToStream);
    assert!(!manager.is_pending(session(16)));
    assert!(log.lock().unwrap().spawns.is_empty());
}

#[test]
fn repeated_prepare_keeps_last_write() {
    let (manager, _) = manager();
    manager.prepare(&prepare_request(17));
    let mut second = prepare_request(17);
    second.video = Some(endpoint(6000, 9));
    manager.prepare(&second);

    assert_eq!(manager.pending_count(), 1);
    let pending = manager.pending_session(session(17)).unwrap();
    assert_eq!(pending.video.unwrap().port, 6000);
}

#[test]
fn stream_requests_dispatch_on_type() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(18));

    let start = StreamRequest::start(session(18), Some(video_request(30)), Some(audio_request()));
    let outcome = manager.handle_stream_request(&start).unwrap();
    assert!(matches!(
        outcome,
        StreamRequestOutcome::Start(StartOutcome::Started { .. })
    ));

    let outcome = manager
        .handle_stream_request(&StreamRequest::stop(session(18)))
        .unwrap();
    assert_eq!(outcome, StreamRequestOutcome::Stop(StopOutcome::Stopped));
    assert_eq!(log.lock().unwrap().kills.len(), 1);
}

#[test]
fn reap_drops_sessions_whose_process_exited() {
    let (manager, log) = manager();
    for n in [19, 20] {
        manager.prepare(&prepare_request(n));
        manager
            .start(session(n), Some(&video_request(30)), Some(&audio_request()))
            .unwrap();
    }
    assert!(manager.reap_exited().is_empty());

    log.lock().unwrap().exited.insert(1000);
    let reaped = manager.reap_exited();
    assert_eq!(reaped.len(), 1);
    assert_eq!(reaped[0].0, session(19));
    assert!(reaped[0].1.success());
    assert!(!manager.is_ongoing(session(19)));
    assert!(manager.is_ongoing(session(20)));
    assert!(log.lock().unwrap().kills.is_empty());
}

#[test]
fn stop_all_counts_only_ongoing_sessions() {
    let (manager, log) = manager();
    for n in [21, 22] {
        manager.prepare(&prepare_request(n));
        manager
            .start(session(n), Some(&video_request(30)), Some(&audio_request()))
            .unwrap();
    }
    let stopped = manager.stop_all([session(21), session(22), session(99)]);
    assert_eq!(stopped, 2);
    assert_eq!(manager.ongoing_count(), 0);
    assert_eq!(log.lock().unwrap().kills.len(), 2);
}

#[test]
fn dropping_manager_kills_remaining_transcoders() {
    let (manager, log) = manager();
    manager.prepare(&prepare_request(23));
    manager
        .start(session(23), Some(&video_request(30)), Some(&audio_request()))
        .unwrap();
    drop(manager);
    assert_eq!(log.lock().unwrap().kills.get(&1000), Some(&1));
}

#[test]
fn distinct_sessions_negotiate_concurrently() {
    let (manager, log) = manager();
    std::thread::scope(|scope| {
        for n in 30..46u8 {
            let manager = &manager;
            scope.spawn(move || {
                manager.prepare(&prepare_request(n));
                manager
                    .start(session(n), Some(&video_request(30)), Some(&audio_request()))
                    .unwrap();
            });
        }
    });
    assert_eq!(manager.pending_count(), 0);
    assert_eq!(manager.ongoing_count(), 16);
    assert_eq!(log.lock().unwrap().spawns.len(), 16);
}
