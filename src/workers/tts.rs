//! TTS channel contract (spec §5, §6).
//!
//! TTS*i* consumes `synthesize(user_id?, text)` / `flush()` / `stop()` on
//! its command channel and emits audio frames directly into the peer
//! VoipIO's playback input (not through the hub). The hub also needs to
//! know when a synthesis finishes so it can gate `intro_played`/etc — that
//! arrives as a `play_utterance_start`/`play_utterance_end` event on
//! VoipIO*i*'s own command channel (spec §6), not on TTS*i*'s.

use tokio::sync::mpsc;

use crate::command::Command;

use super::CHANNEL_CAPACITY;

/// The hub's endpoints for one TTS worker.
pub struct TtsHandle {
    pub command_tx: mpsc::Sender<Command>,
    pub command_rx: mpsc::Receiver<Command>,
}

/// The worker-side endpoints, mirroring [`TtsHandle`].
pub struct TtsWorkerEnd {
    pub command_rx: mpsc::Receiver<Command>,
    pub command_tx: mpsc::Sender<Command>,
}

pub fn tts_channel() -> (TtsHandle, TtsWorkerEnd) {
    let (hub_cmd_tx, worker_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (worker_cmd_tx, hub_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (
        TtsHandle { command_tx: hub_cmd_tx, command_rx: hub_cmd_rx },
        TtsWorkerEnd { command_rx: worker_cmd_rx, command_tx: worker_cmd_tx },
    )
}

/// Minimal stand-in: exits on `stop()`, otherwise acknowledges nothing. A
/// real TTS engine is out of scope here (spec §1).
pub fn spawn_tts_stub(mut worker: TtsWorkerEnd, name: &'static str) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = worker.command_rx.recv().await {
            if cmd.name == "stop" {
                tracing::debug!(worker = name, "tts stub received stop(), exiting");
                break;
            }
        }
    })
}
