//! CLI entry point: loads the two leg configurations, wires up the six
//! worker stand-ins and the hub, runs until shutdown (spec §6).

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use switchboard_hub::config::load_leg_config;
use switchboard_hub::db::CallDatabase;
use switchboard_hub::hub::Hub;
use switchboard_hub::workers::{
    spawn_tts_stub, spawn_vad_stub, spawn_voipio_stub, tts::tts_channel, vad::vad_channel,
    voipio::voipio_channel,
};

/// Bridges two outbound SIP/VoIP calls and records the conversation.
#[derive(Parser, Debug)]
#[command(name = "switchboard-hub", version, about)]
struct Cli {
    /// Configuration file(s) for the caller leg (leg 1), layered over the default in order.
    #[arg(short = 'o', long = "caller-config", num_args = 1.., required = true)]
    caller_config: Vec<std::path::PathBuf>,

    /// Configuration file(s) for the callee leg (leg 2), layered over the default in order.
    #[arg(short = 'd', long = "callee-config", num_args = 1.., required = true)]
    callee_config: Vec<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let cfg1 = load_leg_config(&cli.caller_config).context("loading caller (leg 1) configuration")?;
    let cfg2 = load_leg_config(&cli.callee_config).context("loading callee (leg 2) configuration")?;

    let db = CallDatabase::load(cfg1.switchboard.call_db.as_str());

    let (voipio1_handle, voipio1_worker) = voipio_channel();
    let (vad1_handle, vad1_worker) = vad_channel();
    let (tts1_handle, tts1_worker) = tts_channel();
    let (voipio2_handle, voipio2_worker) = voipio_channel();
    let (vad2_handle, vad2_worker) = vad_channel();
    let (tts2_handle, tts2_worker) = tts_channel();

    let voipio1_task = spawn_voipio_stub(voipio1_worker, "VoipIO1");
    let vad1_task = spawn_vad_stub(vad1_worker, "VAD1");
    let tts1_task = spawn_tts_stub(tts1_worker, "TTS1");
    let voipio2_task = spawn_voipio_stub(voipio2_worker, "VoipIO2");
    let vad2_task = spawn_vad_stub(vad2_worker, "VAD2");
    let tts2_task = spawn_tts_stub(tts2_worker, "TTS2");

    let mut hub = Hub::new(
        cfg1.switchboard,
        cfg2.switchboard,
        cfg1.hub.main_loop_sleep_time,
        db,
        voipio1_handle,
        vad1_handle,
        tts1_handle,
        voipio2_handle,
        vad2_handle,
        tts2_handle,
    );

    hub.startup_policy_scan();

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    hub.run(shutdown_rx).await;

    for task in [voipio1_task, vad1_task, tts1_task, voipio2_task, vad2_task, tts2_task] {
        let _ = task.await;
    }

    Ok(())
}
