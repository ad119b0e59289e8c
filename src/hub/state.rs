//! Per-leg and hub-level state (spec §3).

/// Which call leg a [`LegState`] belongs to; used for logging and to
/// generate the `user_id` attached to TTS `synthesize` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegNumber {
    One,
    Two,
}

impl LegNumber {
    pub fn as_str(self) -> &'static str {
        match self {
            LegNumber::One => "1",
            LegNumber::Two => "2",
        }
    }
}

/// Flags and timestamps tracking one call leg. Created on leg process
/// spawn, reset on every `call_confirmed` transition, destroyed only at
/// process shutdown (spec §3).
#[derive(Debug, Clone)]
pub struct LegState {
    pub leg: LegNumber,
    pub call_start: f64,
    pub intro_played: bool,
    pub reject_played: bool,
    pub end_played: bool,
    pub hangup_pending: bool,
    pub vio_connected: bool,
    pub s_voice_activity: bool,
    pub s_last_voice_activity_time: f64,
    pub intro_id_counter: u64,
    pub last_intro_id: Option<u64>,
    /// Updated from VAD `speech_start`/`speech_end` but never consulted by
    /// any transition (spec §9 open question 2) — retained here for future
    /// barge-in support, currently inert.
    pub u_voice_activity: bool,
    pub u_last_voice_activity_time: f64,
    /// Correlates this leg's log lines for the lifetime of one call
    /// (opened at `incoming_call`/`make_call`, cleared at
    /// `call_disconnected`) — the idiomatic stand-in for a per-session
    /// logger.
    pub span: tracing::Span,
}

impl LegState {
    pub fn new(leg: LegNumber) -> Self {
        LegState {
            leg,
            call_start: 0.0,
            intro_played: false,
            reject_played: false,
            end_played: false,
            hangup_pending: false,
            vio_connected: false,
            s_voice_activity: false,
            s_last_voice_activity_time: 0.0,
            intro_id_counter: 0,
            last_intro_id: None,
            u_voice_activity: false,
            u_last_voice_activity_time: 0.0,
            span: tracing::Span::none(),
        }
    }

    /// Reset on `call_confirmed` (spec §3). `intro_id_counter` and
    /// `last_intro_id` are deliberately NOT reset: they increment globally
    /// across calls for the lifetime of the process (spec §9 open
    /// question 4).
    pub fn reset_for_new_call(&mut self, now: f64) {
        self.call_start = now;
        self.intro_played = false;
        self.reject_played = false;
        self.end_played = false;
        self.hangup_pending = false;
        self.vio_connected = false;
        self.s_voice_activity = false;
        self.s_last_voice_activity_time = 0.0;
        self.u_voice_activity = false;
        self.u_last_voice_activity_time = 0.0;
    }

    /// Allocate the next intro utterance id and record it as the one to
    /// watch for in `play_utterance_end`.
    pub fn next_intro_id(&mut self) -> u64 {
        let id = self.intro_id_counter;
        self.intro_id_counter += 1;
        self.last_intro_id = Some(id);
        id
    }
}

/// Hub-level bridging state for the whole process lifetime (spec §3).
#[derive(Debug, Clone, Default)]
pub struct BridgeState {
    pub callee_digits_buffer: String,
    pub callee_entered: bool,
    pub call_back_deadline: Option<f64>,
    pub call_back_uri: Option<String>,
}

impl BridgeState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cleared at `call_confirmed` and at `call_disconnected` on leg 1
    /// (spec §4.1). Deliberately leaves the call-back deadline/URI alone —
    /// those are cleared independently when the deadline fires.
    pub fn clear_callee_state(&mut self) {
        self.callee_digits_buffer.clear();
        self.callee_entered = false;
    }
}
