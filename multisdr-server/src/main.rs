// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Composition root (§2). Constructs every subsystem leaves-first —
//! multicast transport, then the back-end controller, then the data
//! receivers, then the session manager, then MultiDecoder, then the
//! outer protocol adapters — and tears them down in reverse order on
//! Ctrl+C.

mod adapters;
mod config;
mod decoder_runner;
mod multicast;
mod radiod_controller;
mod receivers;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use multisdr_app::{init_logging, ConfigFile};
use multisdr_core::session_manager::SessionManager;

use adapters::hpsdr::HpsdrAdapter;
use adapters::websocket::WebSocketAdapter;
use config::ServerConfig;
use multicast::MulticastSocket;
use radiod_controller::RadiodController;
use receivers::DatagramReceiver;

const SHUTDOWN_GRACE: Duration = Duration::from_millis(400);

#[derive(Debug, Parser)]
#[command(author, version, about = "Multi-user SDR session front-end")]
struct Cli {
    /// Path to a configuration file. Defaults to the standard search path.
    #[arg(long = "config", short = 'C', value_name = "FILE")]
    config: Option<PathBuf>,
}

type DynResult<T> = Result<T, Box<dyn std::error::Error>>;

#[tokio::main]
async fn main() -> DynResult<()> {
    let cli = Cli::parse();

    let (cfg, config_path) = if let Some(ref path) = cli.config {
        (ServerConfig::load_from_file(path)?, Some(path.clone()))
    } else {
        ServerConfig::load_from_default_paths()?
    };

    init_logging(cfg.log_level.as_deref());
    match &config_path {
        Some(path) => info!(path = %path.display(), "loaded configuration"),
        None => info!("no configuration file found on the search path, using defaults"),
    }

    let recv_timeout = cfg.multicast.recv_timeout();
    let control_socket = MulticastSocket::join(&cfg.multicast.control, recv_timeout)?;
    let audio_socket = MulticastSocket::join(&cfg.multicast.audio, recv_timeout)?;
    let spectrum_socket = MulticastSocket::join(&cfg.multicast.spectrum, recv_timeout)?;

    let controller = RadiodController::spawn(control_socket, None);

    let sessions = SessionManager::spawn(cfg.limits.to_manager_limits());
    let audio_receiver = DatagramReceiver::new(audio_socket, sessions.receiver_registry());
    let spectrum_receiver = DatagramReceiver::new(spectrum_socket, sessions.receiver_registry());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut task_handles: Vec<JoinHandle<()>> = Vec::new();

    let audio_shutdown = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move { audio_receiver.run(audio_shutdown).await }));
    let spectrum_shutdown = shutdown_rx.clone();
    task_handles.push(tokio::spawn(async move { spectrum_receiver.run(spectrum_shutdown).await }));

    if !cfg.decode.bands.is_empty() {
        let (spot_tx, spot_rx) = mpsc::channel(64);
        let work_dir = PathBuf::from(&cfg.decode.work_dir);
        if let Err(err) = std::fs::create_dir_all(&work_dir) {
            warn!(%err, dir = %work_dir.display(), "failed to create decoder work_dir");
        }

        for band in cfg.decode.bands.clone() {
            let sessions = sessions.clone();
            let controller = controller.clone();
            let spot_tx = spot_tx.clone();
            let shutdown = shutdown_rx.clone();
            let work_dir = work_dir.clone();
            task_handles.push(tokio::spawn(async move {
                decoder_runner::run_band(band, work_dir, sessions, controller, spot_tx, shutdown).await;
            }));
        }
        drop(spot_tx);

        if let Some(target) = cfg.decode.wsjtx_broadcast {
            let shutdown = shutdown_rx.clone();
            task_handles.push(tokio::spawn(async move {
                decoder_runner::run_wsjtx_broadcast(target, spot_rx, shutdown).await;
            }));
        } else {
            task_handles.push(tokio::spawn(async move {
                let mut spot_rx = spot_rx;
                while spot_rx.recv().await.is_some() {}
            }));
        }
    }

    if cfg.hpsdr.enabled {
        match HpsdrAdapter::spawn(cfg.hpsdr.clone(), sessions.clone(), controller.clone(), shutdown_rx.clone()).await {
            Ok(_adapter) => info!("HPSDR adapter listening"),
            Err(err) => error!(%err, "failed to start HPSDR adapter"),
        }
    }

    if cfg.websocket.enabled {
        let ws_cfg = cfg.websocket.clone();
        let ws_sessions = sessions.clone();
        let ws_controller = controller.clone();
        let ws_shutdown = shutdown_rx.clone();
        task_handles.push(tokio::spawn(async move {
            if let Err(err) = WebSocketAdapter::run(ws_cfg, ws_sessions, ws_controller, ws_shutdown).await {
                error!(%err, "WebSocket adapter exited");
            }
        }));
    }

    info!("multisdr-server running");
    signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
    tokio::time::sleep(SHUTDOWN_GRACE).await;

    for handle in &task_handles {
        if !handle.is_finished() {
            handle.abort();
        }
    }
    for handle in task_handles {
        let _ = handle.await;
    }

    Ok(())
}
