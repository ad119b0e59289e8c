//! VAD channel contract (spec §5, §6).
//!
//! VAD*i* ingests `VoipIO*i*.record` directly (not through the hub) and
//! emits only voice-active frames on its audio-out channel, plus
//! `speech_start`/`speech_end` control events on its command channel. The
//! hub only ever sends it `flush()`/`stop()`.

use tokio::sync::mpsc;

use crate::audio::AudioFrame;
use crate::command::Command;

use super::CHANNEL_CAPACITY;

/// The hub's endpoints for one VAD worker.
pub struct VadHandle {
    pub command_tx: mpsc::Sender<Command>,
    pub command_rx: mpsc::Receiver<Command>,
    pub audio_rx: mpsc::Receiver<AudioFrame>,
}

/// The worker-side endpoints, mirroring [`VadHandle`].
pub struct VadWorkerEnd {
    pub command_rx: mpsc::Receiver<Command>,
    pub command_tx: mpsc::Sender<Command>,
    pub audio_tx: mpsc::Sender<AudioFrame>,
}

pub fn vad_channel() -> (VadHandle, VadWorkerEnd) {
    let (hub_cmd_tx, worker_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (worker_cmd_tx, hub_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (worker_audio_tx, hub_audio_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (
        VadHandle { command_tx: hub_cmd_tx, command_rx: hub_cmd_rx, audio_rx: hub_audio_rx },
        VadWorkerEnd { command_rx: worker_cmd_rx, command_tx: worker_cmd_tx, audio_tx: worker_audio_tx },
    )
}

/// Minimal stand-in: exits on `stop()`, otherwise produces no audio. A real
/// VAD is out of scope here (spec §1).
pub fn spawn_vad_stub(mut worker: VadWorkerEnd, name: &'static str) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(cmd) = worker.command_rx.recv().await {
            if cmd.name == "stop" {
                tracing::debug!(worker = name, "vad stub received stop(), exiting");
                break;
            }
        }
    })
}
