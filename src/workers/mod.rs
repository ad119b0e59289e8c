//! Channel contracts for the six worker components (spec §5).
//!
//! VoipIO, VAD and TTS are out-of-scope collaborators (spec §1) — this
//! module only defines the typed channel endpoints the hub talks to, plus a
//! minimal in-process stand-in ("stub worker") for each that's enough to
//! run the binary end-to-end without a real SIP/RTP/VAD/TTS stack. Tests
//! bypass the stubs entirely and hold the worker-side channel ends
//! themselves to drive the hub directly.

pub mod tts;
pub mod vad;
pub mod voipio;

/// Bounded channel capacity for every command/audio channel. Generous
/// enough that the hub's non-blocking drain (spec §4.1) never needs to
/// contend with a full channel in the steady path; audio producers should
/// prefer dropping a frame over blocking if this is ever exceeded.
pub const CHANNEL_CAPACITY: usize = 256;

pub use tts::{spawn_tts_stub, TtsHandle};
pub use vad::{spawn_vad_stub, VadHandle};
pub use voipio::{spawn_voipio_stub, VoipioHandle};
