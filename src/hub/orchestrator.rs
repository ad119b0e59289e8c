//! The hub orchestrator: the event loop and state machine that bridges two
//! call legs (spec §4.1). This is the core of the crate.

use chrono::Utc;
use regex::Regex;
use tokio::sync::{mpsc, watch};
use tokio::time::Duration;
use tracing::{debug, info, info_span, trace, warn};

use crate::audio::{AudioFrame, PlaybackItem};
use crate::command::Command;
use crate::config::SwitchboardConfig;
use crate::db::{now_secs, CallDatabase};
use crate::error::HubError;
use crate::workers::{TtsHandle, VadHandle, VoipioHandle};

use super::state::{BridgeState, LegState};

/// Silence guard before a deferred hangup actually fires, so tail audio
/// isn't cut off (spec §4.1 "Deferred hangup").
const HANGUP_SILENCE_GUARD: f64 = 2.0;

/// SIP final-response codes on leg 2 that mean the callee didn't answer
/// (busy / decline / not-available family, spec §4.1).
const LEG2_NOANSWER_CODES: &[&str] = &["486", "600", "603", "604", "606"];

/// The seventh component: owns no audio, only routes control messages,
/// bridges VAD output into the peer leg's playback, drives the two leg
/// state machines, and owns the policy database (spec §2).
pub struct Hub {
    policy1: SwitchboardConfig,
    policy2: SwitchboardConfig,
    main_loop_sleep_time: Duration,

    leg1: LegState,
    leg2: LegState,
    bridge: BridgeState,
    db: CallDatabase,

    voipio1: VoipioHandle,
    vad1: VadHandle,
    tts1: TtsHandle,
    voipio2: VoipioHandle,
    vad2: VadHandle,
    tts2: TtsHandle,
}

impl Hub {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        policy1: SwitchboardConfig,
        policy2: SwitchboardConfig,
        main_loop_sleep_time: f64,
        db: CallDatabase,
        voipio1: VoipioHandle,
        vad1: VadHandle,
        tts1: TtsHandle,
        voipio2: VoipioHandle,
        vad2: VadHandle,
        tts2: TtsHandle,
    ) -> Self {
        Hub {
            policy1,
            policy2,
            main_loop_sleep_time: Duration::from_secs_f64(main_loop_sleep_time.max(0.0)),
            leg1: LegState::new(super::state::LegNumber::One),
            leg2: LegState::new(super::state::LegNumber::Two),
            bridge: BridgeState::new(),
            db,
            voipio1,
            vad1,
            tts1,
            voipio2,
            vad2,
            tts2,
        }
    }

    /// At process start, recompute stats for every known URI and
    /// blacklist any that already exceed limits (spec §4.1 "Startup
    /// policy scan").
    pub fn startup_policy_scan(&mut self) {
        info!("Switchboard system starting up");
        let now = now_secs();
        let uris: Vec<String> = self.db.uris().map(str::to_owned).collect();
        for remote_uri in uris {
            let stats = self.db.get_stats(&remote_uri, now);
            let over_limit = exceeds_limits(stats, &self.policy1);

            info!(
                remote_uri = %remote_uri,
                total_calls = stats.total_calls,
                total_seconds = stats.total_seconds,
                last24_calls = stats.last24_calls,
                last24_seconds = stats.last24_seconds,
                blacklisted = over_limit,
                "startup policy scan"
            );

            if over_limit {
                self.blacklist_uri_on_voipio1(&remote_uri, now);
            }
        }
    }

    /// Run until `shutdown` reports `true`, then tear down all six
    /// workers' channels (spec §4.1 "Shutdown").
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.main_loop_sleep_time) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
            if *shutdown.borrow() {
                break;
            }
            self.tick(now_secs());
        }
        self.shutdown();
    }

    /// One iteration of the main loop (spec §4.1 steps ii–vi). Exposed
    /// directly so tests can drive the hub deterministically without
    /// waiting on real sleeps.
    pub fn tick(&mut self, now: f64) {
        self.bridge_audio();
        self.service_call_back(now);
        self.service_callee_dial(now);
        self.drain_voipio1_commands(now);
        self.drain_voipio2_commands(now);
        self.drain_vad_commands(now);
        self.drain_tts_commands();
        self.time_driven_transitions(now);
    }

    // ---- audio bridging (spec §4.1 "Audio bridging") ----

    fn bridge_audio(&mut self) {
        for frame in drain_all(&mut self.vad1.audio_rx) {
            forward_bridged_frame(&mut self.leg2, &self.voipio2.play_tx, frame, "VoipIO2");
        }
        for frame in drain_all(&mut self.vad2.audio_rx) {
            forward_bridged_frame(&mut self.leg1, &self.voipio1.play_tx, frame, "VoipIO1");
        }
    }

    // ---- call-back scheduling (spec §4.1 "Call-back scheduling") ----

    fn service_call_back(&mut self, now: f64) {
        let Some(deadline) = self.bridge.call_back_deadline else { return };
        if deadline > now {
            return;
        }
        if let Some(uri) = self.bridge.call_back_uri.take() {
            info!(destination = %uri, "placing deferred call-back");
            let cmd = Command::new("make_call", "HUB", "VoipIO1").with_arg("destination", &uri);
            send_best_effort(&self.voipio1.command_tx, cmd, "VoipIO1");
        }
        self.bridge.call_back_deadline = None;
    }

    // ---- callee dialling (spec §4.1 "Callee dialling") ----

    fn service_callee_dial(&mut self, _now: f64) {
        if !(self.bridge.callee_entered && !self.bridge.callee_digits_buffer.is_empty()) {
            return;
        }
        let digits = std::mem::take(&mut self.bridge.callee_digits_buffer);
        self.bridge.callee_entered = false;

        // Intentionally plays the raw buffer as a space-joined sequence of
        // keypad characters (spec §4.1).
        let spaced: String = digits.chars().map(|c| c.to_string()).collect::<Vec<_>>().join(" ");
        let announcement = format!("{}{}", self.policy1.calling, spaced);

        // Primed here, ahead of TTS's own play_utterance_start event, so a
        // deferred/post-reject hangup can't sneak in during the single tick
        // before TTS acknowledges (see SPEC_FULL.md).
        self.leg1.s_voice_activity = true;
        let synth = Command::new("synthesize", "HUB", "TTS1").with_arg("text", &announcement);
        send_best_effort(&self.tts1.command_tx, synth, "TTS1");

        self.leg2.span = info_span!("call", leg = 2, destination = %digits);
        let make_call = Command::new("make_call", "HUB", "VoipIO2").with_arg("destination", &digits);
        send_best_effort(&self.voipio2.command_tx, make_call, "VoipIO2");
    }

    // ---- VoipIO1 control events (spec §4.1 "Leg-1 state machine") ----

    fn drain_voipio1_commands(&mut self, now: f64) {
        for cmd in drain_all(&mut self.voipio1.command_rx) {
            match cmd.name.as_str() {
                "incoming_call" | "make_call" => {
                    let Some(remote_uri) = required_arg(&cmd, "remote_uri") else { continue };
                    self.leg1.span = info_span!("call", leg = 1, remote_uri = %remote_uri);
                    self.leg1.span.in_scope(|| info!("call accept pending"));
                }
                "rejected_call" => {
                    let Some(remote_uri) = required_arg(&cmd, "remote_uri") else { continue };
                    let uri = compute_call_back_uri(&remote_uri, &self.policy1);
                    self.bridge.call_back_deadline = Some(now + self.policy1.wait_time_before_calling_back);
                    self.bridge.call_back_uri = Some(uri.clone());
                    self.leg1.span.in_scope(|| info!(call_back_uri = %uri, "rejected, scheduling call-back"));
                }
                "rejected_call_from_blacklisted_uri" => {
                    if let Some(remote_uri) = cmd.arg("remote_uri") {
                        info!(remote_uri, "rejected blacklisted uri");
                    }
                }
                "call_connecting" => {
                    self.leg1.span.in_scope(|| info!("connecting"));
                }
                "call_confirmed" => {
                    let Some(remote_uri) = required_arg(&cmd, "remote_uri") else { continue };
                    self.handle_leg1_confirmed(&remote_uri, now);
                }
                "call_disconnected" => {
                    let Some(remote_uri) = required_arg(&cmd, "remote_uri") else { continue };
                    self.handle_leg1_disconnected(&remote_uri, now);
                }
                "play_utterance_start" => {
                    self.leg1.s_voice_activity = true;
                }
                "play_utterance_end" => {
                    self.leg1.s_voice_activity = false;
                    self.leg1.s_last_voice_activity_time = now;
                    if utterance_id_matches(&cmd, self.leg1.last_intro_id) {
                        self.leg1.intro_played = true;
                    }
                }
                "dtmf_digit" => {
                    let Some(digit) = cmd.arg("digit") else { continue };
                    if !self.bridge.callee_entered {
                        if digit == "*" || digit == "#" {
                            self.bridge.callee_entered = true;
                        } else {
                            self.bridge.callee_digits_buffer.push_str(digit);
                        }
                    }
                }
                other => trace!(command = other, "voipio1 event ignored"),
            }
        }
    }

    fn handle_leg1_confirmed(&mut self, remote_uri: &str, now: f64) {
        let stats = self.db.get_stats(remote_uri, now);
        if exceeds_limits(stats, &self.policy1) {
            self.leg1.span.in_scope(|| warn!("over abuse limits, rejecting"));
            let synth = Command::new("synthesize", "HUB", "TTS1").with_arg("text", &self.policy1.rejected);
            send_best_effort(&self.tts1.command_tx, synth, "TTS1");
            self.leg1.reject_played = true;
            self.leg1.s_voice_activity = true;
            self.blacklist_uri_on_voipio1(remote_uri, now);
            return;
        }
        self.leg1.reset_for_new_call(now);
        self.leg1.span.in_scope(|| info!("confirmed"));
        play_intro(&self.tts1.command_tx, &mut self.leg1, &self.policy1.introduction, "TTS1");
        self.db.open_call(remote_uri, now);
        self.persist_db();
    }

    fn handle_leg1_disconnected(&mut self, remote_uri: &str, now: f64) {
        send_best_effort(&self.voipio1.command_tx, Command::new("flush", "HUB", "VoipIO1"), "VoipIO1");
        send_best_effort(&self.vad1.command_tx, Command::new("flush", "HUB", "VAD1"), "VAD1");
        send_best_effort(&self.tts1.command_tx, Command::new("flush", "HUB", "TTS1"), "TTS1");

        self.db.close_last_open_call(remote_uri, now);
        self.persist_db();

        self.leg1.span.in_scope(|| info!(finished_at = %Utc::now(), "disconnected"));
        self.leg1.intro_played = false;
        self.bridge.clear_callee_state();
        self.leg2.hangup_pending = true;
        self.leg1.span = tracing::Span::none();
    }

    // ---- VoipIO2 control events (spec §4.1 "Leg-2 state machine") ----

    fn drain_voipio2_commands(&mut self, now: f64) {
        for cmd in drain_all(&mut self.voipio2.command_rx) {
            match cmd.name.as_str() {
                "make_call" => {
                    self.leg2.span.in_scope(|| info!("dialing"));
                }
                "call_connecting" => {
                    self.leg2.span.in_scope(|| info!("connecting"));
                }
                "call_confirmed" => {
                    self.leg2.reset_for_new_call(now);
                    self.leg2.span.in_scope(|| info!("confirmed"));
                    play_intro(&self.tts2.command_tx, &mut self.leg2, &self.policy2.introduction, "TTS2");
                }
                "call_disconnected" => {
                    self.handle_leg2_disconnected(cmd.arg("code"));
                }
                "play_utterance_start" => {
                    self.leg2.s_voice_activity = true;
                }
                "play_utterance_end" => {
                    self.leg2.s_voice_activity = false;
                    self.leg2.s_last_voice_activity_time = now;
                    if utterance_id_matches(&cmd, self.leg2.last_intro_id) {
                        self.leg2.intro_played = true;
                    }
                }
                other => trace!(command = other, "voipio2 event ignored"),
            }
        }
    }

    fn handle_leg2_disconnected(&mut self, code: Option<&str>) {
        send_best_effort(&self.voipio2.command_tx, Command::new("flush", "HUB", "VoipIO2"), "VoipIO2");
        send_best_effort(&self.vad2.command_tx, Command::new("flush", "HUB", "VAD2"), "VAD2");
        send_best_effort(&self.tts2.command_tx, Command::new("flush", "HUB", "TTS2"), "TTS2");

        self.leg2.span.in_scope(|| info!(code, finished_at = %Utc::now(), "disconnected"));
        self.leg2.intro_played = false;
        self.leg2.vio_connected = false;

        if code.is_some_and(|c| LEG2_NOANSWER_CODES.contains(&c)) {
            let synth = Command::new("synthesize", "HUB", "TTS1").with_arg("text", &self.policy1.noanswer);
            send_best_effort(&self.tts1.command_tx, synth, "TTS1");
        }
        // The caller leg always comes down once the callee leg drops,
        // answered or not.
        self.leg1.hangup_pending = true;
        self.leg2.span = tracing::Span::none();
    }

    // ---- VAD control events (spec §6: logged, u_voice_activity is inert) ----

    fn drain_vad_commands(&mut self, now: f64) {
        for cmd in drain_all(&mut self.vad1.command_rx) {
            apply_vad_event(&mut self.leg1, &cmd, now);
        }
        for cmd in drain_all(&mut self.vad2.command_rx) {
            apply_vad_event(&mut self.leg2, &cmd, now);
        }
    }

    fn drain_tts_commands(&mut self) {
        for cmd in drain_all(&mut self.tts1.command_rx) {
            trace!(worker = "TTS1", command = %cmd.to_wire(), "tts acknowledgement");
        }
        for cmd in drain_all(&mut self.tts2.command_rx) {
            trace!(worker = "TTS2", command = %cmd.to_wire(), "tts acknowledgement");
        }
    }

    // ---- time-driven transitions (spec §4.1 "Time-driven transitions") ----

    fn time_driven_transitions(&mut self, now: f64) {
        self.deferred_hangup(now, 1);
        self.deferred_hangup(now, 2);
        self.post_reject_hangup(now);
        self.max_call_length_leg1(now);
        self.max_call_length_leg2(now);
    }

    fn deferred_hangup(&mut self, now: f64, leg_no: u8) {
        let leg = if leg_no == 1 { &mut self.leg1 } else { &mut self.leg2 };
        if leg.hangup_pending && !leg.s_voice_activity && leg.s_last_voice_activity_time + HANGUP_SILENCE_GUARD < now {
            leg.hangup_pending = false;
            leg.span.in_scope(|| info!("deferred hangup firing"));
            let (tx, name) = if leg_no == 1 {
                (&self.voipio1.command_tx, "VoipIO1")
            } else {
                (&self.voipio2.command_tx, "VoipIO2")
            };
            send_best_effort(tx, Command::new("hangup", "HUB", name), name);
        }
    }

    fn post_reject_hangup(&mut self, _now: f64) {
        if self.leg1.reject_played && !self.leg1.s_voice_activity {
            self.leg1.reject_played = false;
            self.leg1.span.in_scope(|| info!("post-reject hangup"));
            send_best_effort(&self.voipio1.command_tx, Command::new("hangup", "HUB", "VoipIO1"), "VoipIO1");
            send_best_effort(&self.voipio1.command_tx, Command::new("flush", "HUB", "VoipIO1"), "VoipIO1");
            send_best_effort(&self.vad1.command_tx, Command::new("flush", "HUB", "VAD1"), "VAD1");
            send_best_effort(&self.tts1.command_tx, Command::new("flush", "HUB", "TTS1"), "TTS1");
        }
    }

    fn max_call_length_leg1(&mut self, now: f64) {
        let over = self.leg1.intro_played
            && (now - self.leg1.call_start) > self.policy1.max_call_length
            && !self.leg1.s_voice_activity;
        if !over {
            return;
        }
        if !self.leg1.end_played {
            let synth = Command::new("synthesize", "HUB", "TTS1").with_arg("text", &self.policy1.closing);
            send_best_effort(&self.tts1.command_tx, synth, "TTS1");
            self.leg1.end_played = true;
            self.leg1.s_voice_activity = true;
        } else {
            self.leg1.intro_played = false;
            self.leg1.end_played = false;
            self.leg1.span.in_scope(|| info!("max call length reached, terminating"));
            send_best_effort(&self.voipio1.command_tx, Command::new("hangup", "HUB", "VoipIO1"), "VoipIO1");
            send_best_effort(&self.voipio1.command_tx, Command::new("flush", "HUB", "VoipIO1"), "VoipIO1");
            send_best_effort(&self.vad1.command_tx, Command::new("flush", "HUB", "VAD1"), "VAD1");
            send_best_effort(&self.tts1.command_tx, Command::new("flush", "HUB", "TTS1"), "TTS1");
        }
    }

    /// Symmetric to [`Self::max_call_length_leg1`] except the deadline is
    /// keyed off leg 1's `call_start` (spec §4.1, §9 open question 3): the
    /// bridge's lifetime is defined by when the caller leg connected.
    fn max_call_length_leg2(&mut self, now: f64) {
        let over = self.leg2.intro_played
            && (now - self.leg1.call_start) > self.policy2.max_call_length
            && !self.leg2.s_voice_activity;
        if !over {
            return;
        }
        if !self.leg2.end_played {
            let synth = Command::new("synthesize", "HUB", "TTS2").with_arg("text", &self.policy2.closing);
            send_best_effort(&self.tts2.command_tx, synth, "TTS2");
            self.leg2.end_played = true;
            self.leg2.s_voice_activity = true;
        } else {
            self.leg2.intro_played = false;
            self.leg2.end_played = false;
            self.leg2.span.in_scope(|| info!("max call length reached, terminating"));
            send_best_effort(&self.voipio2.command_tx, Command::new("hangup", "HUB", "VoipIO2"), "VoipIO2");
            send_best_effort(&self.voipio2.command_tx, Command::new("flush", "HUB", "VoipIO2"), "VoipIO2");
            send_best_effort(&self.vad2.command_tx, Command::new("flush", "HUB", "VAD2"), "VAD2");
            send_best_effort(&self.tts2.command_tx, Command::new("flush", "HUB", "TTS2"), "TTS2");
        }
    }

    fn blacklist_uri_on_voipio1(&mut self, remote_uri: &str, now: f64) {
        let expire = now + self.policy1.blacklist_for;
        let cmd = Command::new("black_list", "HUB", "VoipIO1")
            .with_arg("remote_uri", remote_uri)
            .with_arg("expire", expire.to_string());
        send_best_effort(&self.voipio1.command_tx, cmd, "VoipIO1");
    }

    fn persist_db(&self) {
        if let Err(e) = self.db.save() {
            tracing::error!(error = %e, "failed to persist call database");
        }
    }

    /// Send `stop()` to all six workers and drain the channels the hub
    /// owns. The caller is responsible for joining the worker tasks once
    /// this returns (spec §4.1 "Shutdown").
    fn shutdown(&mut self) {
        info!("switchboard hub shutting down");
        send_best_effort(&self.voipio1.command_tx, Command::new("stop", "HUB", "VoipIO1"), "VoipIO1");
        send_best_effort(&self.voipio2.command_tx, Command::new("stop", "HUB", "VoipIO2"), "VoipIO2");
        send_best_effort(&self.vad1.command_tx, Command::new("stop", "HUB", "VAD1"), "VAD1");
        send_best_effort(&self.vad2.command_tx, Command::new("stop", "HUB", "VAD2"), "VAD2");
        send_best_effort(&self.tts1.command_tx, Command::new("stop", "HUB", "TTS1"), "TTS1");
        send_best_effort(&self.tts2.command_tx, Command::new("stop", "HUB", "TTS2"), "TTS2");

        drain_all(&mut self.voipio1.command_rx);
        drain_all(&mut self.voipio2.command_rx);
        drain_all(&mut self.vad1.command_rx);
        drain_all(&mut self.vad2.command_rx);
        drain_all(&mut self.tts1.command_rx);
        drain_all(&mut self.tts2.command_rx);
        drain_all(&mut self.vad1.audio_rx);
        drain_all(&mut self.vad2.audio_rx);
        info!("switchboard hub stopped");
    }
}

fn forward_bridged_frame(dest_leg: &mut LegState, play_tx: &mpsc::Sender<PlaybackItem>, frame: AudioFrame, destination: &str) {
    if !dest_leg.intro_played {
        return;
    }
    if !dest_leg.vio_connected {
        let start = Command::new("utterance_start", "HUB", destination)
            .with_arg("user_id", dest_leg.leg.as_str())
            .with_arg("text", "")
            .with_arg("fname", "")
            .with_arg("log", "");
        if let Err(e) = play_tx.try_send(PlaybackItem::Control(start)) {
            warn!(destination, error = %e, "dropped utterance_start: channel full or worker gone");
        }
        dest_leg.vio_connected = true;
    }
    if let Err(e) = play_tx.try_send(PlaybackItem::Audio(frame)) {
        debug!(destination, error = %e, "dropped bridged audio frame");
    }
}

fn play_intro(tts_tx: &mpsc::Sender<Command>, leg: &mut LegState, lines: &[String], destination: &str) {
    for line in lines {
        let id = leg.next_intro_id();
        let cmd = Command::new("synthesize", "HUB", destination)
            .with_arg("user_id", id.to_string())
            .with_arg("text", line);
        send_best_effort(tts_tx, cmd, destination);
    }
}

fn apply_vad_event(leg: &mut LegState, cmd: &Command, now: f64) {
    match cmd.name.as_str() {
        "speech_start" => {
            leg.u_voice_activity = true;
            leg.u_last_voice_activity_time = now;
        }
        "speech_end" => {
            leg.u_voice_activity = false;
            leg.u_last_voice_activity_time = now;
        }
        other => trace!(command = other, "vad event ignored"),
    }
}

fn utterance_id_matches(cmd: &Command, last_intro_id: Option<u64>) -> bool {
    let (Some(user_id), Some(last)) = (cmd.arg("user_id"), last_intro_id) else {
        return false;
    };
    user_id.parse::<u64>().is_ok_and(|id| id == last)
}

/// spec §4.1 "Call-back scheduling": `call_back_uri_subs` (if configured)
/// wins over a static `call_back_uri`, which wins over the unmodified URI.
fn compute_call_back_uri(remote_uri: &str, policy: &SwitchboardConfig) -> String {
    if let Some(subs) = &policy.call_back_uri_subs {
        let mut result = remote_uri.to_string();
        for (pattern, replacement) in subs {
            match Regex::new(pattern) {
                Ok(re) => result = re.replace(&result, replacement.as_str()).into_owned(),
                Err(e) => warn!(pattern, error = %e, "invalid call_back_uri_subs pattern, skipping"),
            }
        }
        return result;
    }
    if let Some(uri) = &policy.call_back_uri {
        return uri.clone();
    }
    remote_uri.to_string()
}

fn exceeds_limits(stats: crate::db::CallStats, policy: &SwitchboardConfig) -> bool {
    stats.last24_calls > policy.last24_max_num_calls as u64 || stats.last24_seconds > policy.last24_max_total_time
}

fn required_arg(cmd: &Command, key: &str) -> Option<String> {
    match cmd.arg(key) {
        Some(v) => Some(v.to_string()),
        None => {
            warn!(command = %cmd.name, key, "event missing required argument, ignoring");
            None
        }
    }
}

fn drain_all<T>(rx: &mut mpsc::Receiver<T>) -> Vec<T> {
    let mut items = Vec::new();
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    items
}

/// Best-effort send: never blocks, never propagates a failure to the
/// caller. A failure to reach a VoipIO worker is a `VoipError` (spec §7,
/// "caught locally and logged at `warn` without aborting the loop");
/// failures to reach VAD/TTS are logged the same way but aren't VoIP
/// errors, since those workers carry no call-signalling responsibility.
fn send_best_effort(tx: &mpsc::Sender<Command>, cmd: Command, destination: &str) {
    if let Err(e) = tx.try_send(cmd) {
        if destination.starts_with("VoipIO") {
            let err = HubError::Voip(format!("failed to deliver command to {destination}: {e}"));
            warn!(destination, error = %err, "dropped command");
        } else {
            warn!(destination, error = %e, "dropped command: channel full or worker gone");
        }
    }
}
