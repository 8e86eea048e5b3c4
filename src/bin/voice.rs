//! Voice Chat Application
//!
//! Captures the microphone, streams it to the peer over UDP, and plays back
//! whatever the peer sends.
//!
//! Usage: `voice [REMOTE_IP:PORT] [--config PATH] [--list-devices]`

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lan_voice_chat::{
    audio::{
        capture::CpalCaptureBackend,
        device::{list_input_devices, list_output_devices, AudioDeviceInfo},
        playback::AudioPlayback,
    },
    config::AppConfig,
    VoiceSession,
};

/// Point-to-point LAN voice chat
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Peer to send audio to (overrides the configured remote)
    remote: Option<SocketAddr>,

    /// Configuration file (default: platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Print input and output devices and exit
    #[arg(short, long)]
    list_devices: bool,
}

/// Resolves on Ctrl+C, or SIGTERM on unix
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = sigterm.recv() => {},
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!("Ctrl+C handler failed: {}", e);
                        }
                    }
                }
                return;
            }
            Err(e) => tracing::warn!("SIGTERM handler unavailable: {}", e),
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Ctrl+C handler failed: {}", e);
        std::future::pending::<()>().await;
    }
}

fn print_devices(title: &str, devices: &[AudioDeviceInfo]) {
    println!("\n=== {} ===", title);
    if devices.is_empty() {
        println!("  (none)");
    }
    for device in devices {
        let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
        println!("  {}{}:", device.name, default_marker);
        println!("    ID: {}", device.id);
        println!("    Sample rates: {:?}", device.sample_rates);
        println!("    Channels: {:?}", device.channels);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = AppConfig::load_or_default(args.config.as_deref())?;
    if let Some(remote) = args.remote {
        config.network.remote_address = remote.ip().to_string();
        config.network.remote_port = remote.port();
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting LAN Voice Chat");

    if args.list_devices {
        print_devices("Input Devices", &list_input_devices());
        print_devices("Output Devices", &list_output_devices());
        println!();
        return Ok(());
    }

    for device in list_input_devices() {
        let default_marker = if device.is_default { " (default)" } else { "" };
        tracing::info!("Input device: {}{}", device.id, default_marker);
    }

    // Session start blocks briefly while the microphone spins up
    let session = tokio::task::spawn_blocking(move || VoiceSession::start(config, &CpalCaptureBackend))
        .await
        .context("session start task failed")??;

    tracing::info!(
        "Listening on {}, sending to {}",
        session.local_addr()?,
        session.remote_endpoint()
    );
    if !session.capture_enabled() {
        tracing::warn!("No microphone in use; running in listen-only mode");
    }

    let audio = &session.config().audio;
    let mut playback = match AudioPlayback::new(audio.output_device.as_deref(), audio.sample_rate, session.ring()) {
        Ok(mut playback) => match playback.start() {
            Ok(()) => Some(playback),
            Err(e) => {
                tracing::warn!("Failed to start playback: {}", e);
                None
            }
        },
        Err(e) => {
            tracing::warn!("No output device available: {}", e);
            None
        }
    };

    tracing::info!("Voice chat running - press Ctrl+C to stop");

    let mut stats_interval = tokio::time::interval(Duration::from_secs(5));
    stats_interval.tick().await;

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Shutting down");
                break;
            }
            _ = stats_interval.tick() => {
                let stats = session.stats();
                tracing::info!(
                    "Stats: {} frames sent ({} failed, {:.1} KB), {} packets received ({} invalid), ring {:.0}% full, {} overflows ({} samples dropped), {} underruns",
                    stats.frames_sent,
                    stats.send_failures,
                    stats.bytes_sent as f64 / 1024.0,
                    stats.packets_received,
                    stats.invalid_packets,
                    stats.ring_fill * 100.0,
                    stats.ring_overflows,
                    stats.samples_dropped,
                    stats.ring_underruns
                );

                if let Some(e) = playback.as_ref().and_then(|p| p.check_errors()) {
                    tracing::warn!("Playback error: {}", e);
                }
            }
        }
    }

    if let Some(mut playback) = playback.take() {
        playback.stop();
    }
    tokio::task::spawn_blocking(move || session.stop())
        .await
        .context("session stop task failed")?;

    Ok(())
}
