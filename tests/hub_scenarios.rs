//! Integration tests driving the hub directly through the worker-side ends
//! of its channels — no real SIP/RTP/VAD/TTS stack involved (spec §8).

use serial_test::serial;
use tempfile::tempdir;

use switchboard_hub::audio::{AudioFrame, PlaybackItem};
use switchboard_hub::command::Command;
use switchboard_hub::config::SwitchboardConfig;
use switchboard_hub::db::{now_secs, CallDatabase};
use switchboard_hub::hub::Hub;
use switchboard_hub::workers::tts::tts_channel;
use switchboard_hub::workers::vad::vad_channel;
use switchboard_hub::workers::voipio::voipio_channel;

fn policy(overrides: impl FnOnce(&mut SwitchboardConfig)) -> SwitchboardConfig {
    let mut cfg = SwitchboardConfig {
        introduction: vec!["Welcome.".into(), "This call is recorded.".into(), "Enter a number.".into()],
        closing: "Goodbye, max length reached.".into(),
        rejected: "Too many calls recently.".into(),
        noanswer: "The other party did not answer.".into(),
        calling: "Calling ".into(),
        call_db: "unused.json".into(),
        last24_max_num_calls: 50,
        last24_max_total_time: 3600.0,
        blacklist_for: 86400.0,
        max_call_length: 1800.0,
        wait_time_before_calling_back: 5.0,
        call_back_uri: None,
        call_back_uri_subs: None,
    };
    overrides(&mut cfg);
    cfg
}

struct Harness {
    hub: Hub,
    voipio1: switchboard_hub::workers::voipio::VoipioWorkerEnd,
    vad1: switchboard_hub::workers::vad::VadWorkerEnd,
    tts1: switchboard_hub::workers::tts::TtsWorkerEnd,
    voipio2: switchboard_hub::workers::voipio::VoipioWorkerEnd,
    vad2: switchboard_hub::workers::vad::VadWorkerEnd,
    tts2: switchboard_hub::workers::tts::TtsWorkerEnd,
    db_path: std::path::PathBuf,
}

fn build_harness(policy1: SwitchboardConfig, policy2: SwitchboardConfig, db_path: std::path::PathBuf) -> Harness {
    let (voipio1_handle, voipio1_worker) = voipio_channel();
    let (vad1_handle, vad1_worker) = vad_channel();
    let (tts1_handle, tts1_worker) = tts_channel();
    let (voipio2_handle, voipio2_worker) = voipio_channel();
    let (vad2_handle, vad2_worker) = vad_channel();
    let (tts2_handle, tts2_worker) = tts_channel();

    let db = CallDatabase::load(&db_path);
    let hub = Hub::new(
        policy1,
        policy2,
        0.01,
        db,
        voipio1_handle,
        vad1_handle,
        tts1_handle,
        voipio2_handle,
        vad2_handle,
        tts2_handle,
    );

    Harness {
        hub,
        voipio1: voipio1_worker,
        vad1: vad1_worker,
        tts1: tts1_worker,
        voipio2: voipio2_worker,
        vad2: vad2_worker,
        tts2: tts2_worker,
        db_path,
    }
}

fn event(name: &str) -> Command {
    Command::new(name, "VoipIO", "HUB")
}

#[test]
#[serial]
fn clean_bridged_call_records_one_call() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");
    let mut h = build_harness(policy(|_| {}), policy(|_| {}), db_path.clone());

    let now = 1_000_000.0;

    h.voipio1.command_tx.try_send(event("incoming_call").with_arg("remote_uri", "sip:alice@example.com")).unwrap();
    h.hub.tick(now);

    h.voipio1.command_tx.try_send(event("rejected_call").with_arg("remote_uri", "sip:alice@example.com")).unwrap();
    h.hub.tick(now);

    // Before the deadline: no call-back yet.
    h.hub.tick(now + 1.0);
    assert!(h.voipio1.command_rx.try_recv().is_err());

    // After the deadline: call-back fires.
    h.hub.tick(now + 10.0);
    let call_back = h.voipio1.command_rx.try_recv().expect("call-back command");
    assert_eq!(call_back.name, "make_call");
    assert_eq!(call_back.arg("destination"), Some("sip:alice@example.com"));

    h.voipio1.command_tx.try_send(event("call_confirmed").with_arg("remote_uri", "sip:alice@example.com")).unwrap();
    h.hub.tick(now + 10.0);

    let intro: Vec<_> = std::iter::from_fn(|| h.tts1.command_rx.try_recv().ok()).collect();
    assert_eq!(intro.len(), 3);
    assert_eq!(intro[2].arg("user_id"), Some("2"));

    h.voipio1.command_tx.try_send(event("play_utterance_end").with_arg("user_id", "2")).unwrap();
    h.hub.tick(now + 10.0);

    for digit in ["1", "2", "3", "#"] {
        h.voipio1.command_tx.try_send(event("dtmf_digit").with_arg("digit", digit)).unwrap();
    }
    h.hub.tick(now + 10.0); // drains digits, sets buffer + callee_entered
    h.hub.tick(now + 10.0); // dials on the *next* tick

    let synth = h.tts1.command_rx.try_recv().expect("calling announcement");
    assert_eq!(synth.arg("text"), Some("Calling 1 2 3"));
    let dial = h.voipio2.command_rx.try_recv().expect("callee dial");
    assert_eq!(dial.name, "make_call");
    assert_eq!(dial.arg("destination"), Some("123"));

    h.voipio2.command_tx.try_send(event("call_confirmed")).unwrap();
    h.hub.tick(now + 10.0);
    let intro2: Vec<_> = std::iter::from_fn(|| h.tts2.command_rx.try_recv().ok()).collect();
    assert_eq!(intro2.len(), 3);

    h.voipio2.command_tx.try_send(event("play_utterance_end").with_arg("user_id", "2")).unwrap();
    h.hub.tick(now + 10.0);

    // Leg 1's VAD audio bridges to leg 2's playback once leg 2's intro has played.
    h.vad1.audio_tx.try_send(AudioFrame::new(&b"hello"[..])).unwrap();
    h.hub.tick(now + 10.0);
    match h.voipio2.play_rx.try_recv().unwrap() {
        PlaybackItem::Control(c) => assert_eq!(c.name, "utterance_start"),
        other => panic!("expected utterance_start, got {other:?}"),
    }
    match h.voipio2.play_rx.try_recv().unwrap() {
        PlaybackItem::Audio(frame) => assert_eq!(frame.data.as_ref(), b"hello".as_slice()),
        other => panic!("expected audio frame, got {other:?}"),
    }

    h.voipio1.command_tx.try_send(event("call_disconnected").with_arg("remote_uri", "sip:alice@example.com")).unwrap();
    h.hub.tick(now + 10.0);

    let db = CallDatabase::load(&db_path);
    let stats = db.get_stats("sip:alice@example.com", now + 10.0);
    assert_eq!(stats.total_calls, 1);
    assert!(stats.total_seconds >= 0.0);
}

#[test]
#[serial]
fn blacklist_on_confirm_skips_database_record() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");

    let now = 1_000_000.0;
    {
        let mut seed = CallDatabase::load(&db_path);
        for i in 0..100 {
            let start = now - i as f64 * 10.0;
            seed.open_call("sip:mallory@example.com", start);
            seed.close_last_open_call("sip:mallory@example.com", start + 1.0);
        }
        seed.save_to(&db_path).unwrap();
    }

    let mut h = build_harness(
        policy(|p| p.last24_max_num_calls = 50),
        policy(|_| {}),
        db_path.clone(),
    );

    h.voipio1.command_tx.try_send(event("call_confirmed").with_arg("remote_uri", "sip:mallory@example.com")).unwrap();
    h.hub.tick(now);

    let rejected = h.tts1.command_rx.try_recv().expect("rejected announcement");
    assert_eq!(rejected.arg("text"), Some("Too many calls recently."));
    let blacklist = h.voipio1.command_rx.try_recv().expect("black_list command");
    assert_eq!(blacklist.name, "black_list");
    assert_eq!(blacklist.arg("remote_uri"), Some("sip:mallory@example.com"));

    // Reject utterance finishes (silence falls).
    h.voipio1.command_tx.try_send(event("play_utterance_end").with_arg("user_id", "999")).unwrap();
    h.hub.tick(now);
    h.hub.tick(now);

    let hangup = h.voipio1.command_rx.try_recv().expect("post-reject hangup");
    assert_eq!(hangup.name, "hangup");

    let db = CallDatabase::load(&db_path);
    // 100 pre-existing records remain; no 101st was appended.
    assert_eq!(db.get_stats("sip:mallory@example.com", now).total_calls, 100);
}

#[test]
#[serial]
fn callee_no_answer_triggers_noanswer_and_hangup1() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");
    let mut h = build_harness(policy(|_| {}), policy(|_| {}), db_path);

    let now = 1_000_000.0;
    h.voipio2.command_tx.try_send(event("call_disconnected").with_arg("code", "486")).unwrap();
    h.hub.tick(now);

    let announcement = h.tts1.command_rx.try_recv().expect("noanswer announcement");
    assert_eq!(announcement.arg("text"), Some("The other party did not answer."));

    // Silence on leg 1 for long enough: deferred hangup fires.
    h.hub.tick(now + 5.0);
    let hangup = h.voipio1.command_rx.try_recv().expect("leg 1 hangup");
    assert_eq!(hangup.name, "hangup");
}

#[test]
#[serial]
fn max_call_length_terminates_leg1() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");
    let mut h = build_harness(policy(|p| p.max_call_length = 10.0), policy(|_| {}), db_path);

    let now = 1_000_000.0;
    h.voipio1.command_tx.try_send(event("call_confirmed").with_arg("remote_uri", "sip:alice@example.com")).unwrap();
    h.hub.tick(now);
    for _ in 0..3 {
        h.tts1.command_rx.try_recv().unwrap();
    }
    h.voipio1.command_tx.try_send(event("play_utterance_end").with_arg("user_id", "2")).unwrap();
    h.hub.tick(now);

    // Past max_call_length with the leg quiet: first pass speaks the closing text.
    h.hub.tick(now + 20.0);
    let closing = h.tts1.command_rx.try_recv().expect("closing announcement");
    assert_eq!(closing.arg("text"), Some("Goodbye, max length reached."));

    // Closing utterance finishes: second pass terminates the leg.
    h.voipio1.command_tx.try_send(event("play_utterance_end").with_arg("user_id", "2")).unwrap();
    h.hub.tick(now + 20.0);
    let hangup = h.voipio1.command_rx.try_recv().expect("leg 1 hangup");
    assert_eq!(hangup.name, "hangup");
}

#[test]
#[serial]
fn call_back_uri_subs_rewrite_the_destination() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");
    let mut h = build_harness(
        policy(|p| {
            p.call_back_uri_subs = Some(vec![("^sip:(.+)@.*$".to_string(), "sip:$1@relay".to_string())]);
        }),
        policy(|_| {}),
        db_path,
    );

    let now = 1_000_000.0;
    h.voipio1.command_tx.try_send(event("rejected_call").with_arg("remote_uri", "sip:bob@x")).unwrap();
    h.hub.tick(now);
    h.hub.tick(now + 10.0);

    let call_back = h.voipio1.command_rx.try_recv().expect("call-back command");
    assert_eq!(call_back.arg("destination"), Some("sip:bob@relay"));
}

#[test]
#[serial]
fn startup_scan_blacklists_uris_already_over_limit() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("call_db.json");
    {
        let mut seed = CallDatabase::load(&db_path);
        let now = now_secs();
        for i in 0..60 {
            seed.open_call("sip:overlimit@example.com", now - i as f64 * 10.0);
            seed.close_last_open_call("sip:overlimit@example.com", now - i as f64 * 10.0 + 1.0);
        }
        seed.save_to(&db_path).unwrap();
    }

    let mut h = build_harness(policy(|p| p.last24_max_num_calls = 50), policy(|_| {}), db_path);
    h.hub.startup_policy_scan();

    let blacklist = h.voipio1.command_rx.try_recv().expect("startup black_list");
    assert_eq!(blacklist.name, "black_list");
    assert_eq!(blacklist.arg("remote_uri"), Some("sip:overlimit@example.com"));
}
