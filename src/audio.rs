//! Audio frames and the playback channel's item type.

use bytes::Bytes;

/// An opaque block of recorded or synthesized PCM audio. The hub never
/// interprets the payload — it only routes frames between workers (spec §3).
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub data: Bytes,
    /// Wall-clock seconds at capture/synthesis time, if the producer attached one.
    pub timestamp: Option<f64>,
}

impl AudioFrame {
    pub fn new(data: impl Into<Bytes>) -> Self {
        AudioFrame { data: data.into(), timestamp: None }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

use crate::command::Command;

/// VoipIO's play-in channel multiplexes a control envelope
/// (`utterance_start`) with the audio frames that follow it (spec §5).
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackItem {
    Control(Command),
    Audio(AudioFrame),
}
