//! VoipIO channel contract (spec §5, §6).
//!
//! VoipIO*i* owns the SIP user-agent and audio device-like ports. The hub
//! sends it control commands (`make_call`, `hangup`, `flush`, `black_list`,
//! `stop`) and playback items on one multiplexed play-in channel, and
//! receives lifecycle/DTMF/playback-progress events on its command channel.
//! `VoipIO*i*.record` feeds `VAD*i*` directly and is never touched by the
//! hub (spec §2 data-flow diagram) — so it has no handle here.

use tokio::sync::mpsc;

use crate::audio::PlaybackItem;
use crate::command::Command;

use super::CHANNEL_CAPACITY;

/// The hub's endpoints for one VoipIO worker.
pub struct VoipioHandle {
    pub command_tx: mpsc::Sender<Command>,
    pub command_rx: mpsc::Receiver<Command>,
    pub play_tx: mpsc::Sender<PlaybackItem>,
}

/// The worker-side endpoints, mirroring [`VoipioHandle`]. Used by the stub
/// worker and directly by tests standing in for a real VoipIO.
pub struct VoipioWorkerEnd {
    pub command_rx: mpsc::Receiver<Command>,
    pub command_tx: mpsc::Sender<Command>,
    pub play_rx: mpsc::Receiver<PlaybackItem>,
}

pub fn voipio_channel() -> (VoipioHandle, VoipioWorkerEnd) {
    let (hub_cmd_tx, worker_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (worker_cmd_tx, hub_cmd_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (hub_play_tx, worker_play_rx) = mpsc::channel(CHANNEL_CAPACITY);

    (
        VoipioHandle { command_tx: hub_cmd_tx, command_rx: hub_cmd_rx, play_tx: hub_play_tx },
        VoipioWorkerEnd { command_rx: worker_cmd_rx, command_tx: worker_cmd_tx, play_rx: worker_play_rx },
    )
}

/// Spawn a minimal stand-in that keeps the channels alive and acknowledges
/// `stop()` by exiting, so the binary can run end-to-end without a real SIP
/// stack. It does not simulate call lifecycle events — a real VoipIO is
/// required for that, which is out of scope here (spec §1).
pub fn spawn_voipio_stub(mut worker: VoipioWorkerEnd, name: &'static str) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                cmd = worker.command_rx.recv() => {
                    match cmd {
                        Some(cmd) if cmd.name == "stop" => {
                            tracing::debug!(worker = name, "voipio stub received stop(), exiting");
                            break;
                        }
                        Some(cmd) => {
                            tracing::trace!(worker = name, command = %cmd.to_wire(), "voipio stub ignoring command");
                        }
                        None => break,
                    }
                }
                item = worker.play_rx.recv() => {
                    if item.is_none() {
                        break;
                    }
                }
            }
        }
    })
}
