// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! §4.H WebSocket adapter: the browser-facing surface. Each connection
//! picks a session kind (audio, iq, spectrum) via query parameters on
//! the upgrade request, gets one Session from the same
//! `SessionManager`/`RadiodController` pair every other adapter shares,
//! and has that session's queue pumped to its socket as binary frames
//! until it disconnects or `shutdown` fires.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use multisdr_core::session::SessionKind;
use multisdr_core::session_manager::{CreateRequest, SessionManager};
use multisdr_protocol::spectrum_ws::{unwrap_to_db, SpectrumEncoder};

use crate::config::WebSocketConfig;
use crate::radiod_controller::RadiodController;

/// Per-frame output selection (§4.H implementation note). This build
/// wires PCM passthrough end-to-end and leaves Opus as an injected
/// encoder, so the session/queue contract is exercised either way
/// without pulling a codec dependency into this crate.
pub enum OutputFormat {
    Pcm,
    Opus(Arc<dyn AudioEncoder>),
}

pub trait AudioEncoder: Send + Sync {
    fn encode(&self, pcm: &[u8]) -> Vec<u8>;
}

impl OutputFormat {
    fn encode(&self, payload: &[u8]) -> Vec<u8> {
        match self {
            OutputFormat::Pcm => payload.to_vec(),
            OutputFormat::Opus(encoder) => encoder.encode(payload),
        }
    }
}

struct WsRequest {
    kind: SessionKind,
    mode: String,
    center_freq_hz: u64,
    low_edge_hz: i32,
    high_edge_hz: i32,
    sample_rate_hz: u32,
    user_session_id: String,
    bypass_password: Option<String>,
    format: OutputFormat,
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn parse_request(params: &HashMap<String, String>, peer: SocketAddr) -> Result<WsRequest, String> {
    let kind_str = params.get("kind").map(String::as_str).unwrap_or("audio");
    let center_freq_hz: u64 = params
        .get("freq")
        .ok_or_else(|| "missing freq".to_string())?
        .parse()
        .map_err(|_| "invalid freq".to_string())?;
    let mode = params.get("mode").cloned().unwrap_or_else(|| "usb".to_string());
    let sample_rate_hz: u32 = params
        .get("sample_rate")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| "invalid sample_rate".to_string())?
        .unwrap_or(12_000);

    let kind = match kind_str {
        "audio" => SessionKind::Audio,
        "iq" => SessionKind::Iq,
        "spectrum" => {
            let bin_count: u32 = params
                .get("bin_count")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| "invalid bin_count".to_string())?
                .unwrap_or(1024);
            let bin_bandwidth_hz: f64 = params
                .get("bin_bw")
                .map(|v| v.parse())
                .transpose()
                .map_err(|_| "invalid bin_bw".to_string())?
                .unwrap_or(1000.0);
            SessionKind::Spectrum { bin_count, bin_bandwidth_hz }
        }
        other => return Err(format!("unknown session kind '{other}'")),
    };

    let low_edge_hz: i32 = params
        .get("low_edge")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| "invalid low_edge".to_string())?
        .unwrap_or(-(sample_rate_hz as i32) / 2);
    let high_edge_hz: i32 = params
        .get("high_edge")
        .map(|v| v.parse())
        .transpose()
        .map_err(|_| "invalid high_edge".to_string())?
        .unwrap_or(sample_rate_hz as i32 / 2);

    let format = match params.get("format").map(String::as_str) {
        Some("opus") => {
            warn!(%peer, "Opus output requested but no encoder is wired into this build, falling back to PCM");
            OutputFormat::Pcm
        }
        _ => OutputFormat::Pcm,
    };

    Ok(WsRequest {
        kind,
        mode,
        center_freq_hz,
        low_edge_hz,
        high_edge_hz,
        sample_rate_hz,
        user_session_id: params.get("user").cloned().unwrap_or_else(|| peer.to_string()),
        bypass_password: params.get("bypass").cloned(),
        format,
    })
}

fn kind_label(kind: SessionKind) -> &'static str {
    match kind {
        SessionKind::Audio => "audio",
        SessionKind::Iq => "iq",
        SessionKind::Spectrum { .. } => "spectrum",
    }
}

pub struct WebSocketAdapter;

impl WebSocketAdapter {
    /// Accepts connections until `shutdown` fires. Returns once the
    /// listener has stopped accepting new connections; in-flight
    /// sessions are torn down by their own per-connection tasks, which
    /// observe the same shutdown signal.
    pub async fn run(
        config: WebSocketConfig,
        sessions: SessionManager,
        controller: Arc<RadiodController>,
        mut shutdown: watch::Receiver<bool>,
    ) -> std::io::Result<()> {
        let addr = SocketAddr::new(config.listen, config.port);
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "WebSocket adapter listening");

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(v) => v,
                        Err(err) => {
                            warn!(%err, "failed to accept WebSocket connection");
                            continue;
                        }
                    };
                    let sessions = sessions.clone();
                    let controller = controller.clone();
                    let conn_shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer, sessions, controller, conn_shutdown).await;
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("WebSocket adapter stopping");
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    sessions: SessionManager,
    controller: Arc<RadiodController>,
    mut shutdown: watch::Receiver<bool>,
) {
    let query = Arc::new(Mutex::new(None));
    let query_for_cb = query.clone();
    let ws_stream = match tokio_tungstenite::accept_hdr_async(
        stream,
        move |req: &Request, response: Response| {
            *query_for_cb.lock().expect("query capture poisoned") = req.uri().query().map(str::to_string);
            Ok(response)
        },
    )
    .await
    {
        Ok(ws) => ws,
        Err(err) => {
            debug!(%peer, %err, "WebSocket handshake failed");
            return;
        }
    };
    let query = query.lock().expect("query capture poisoned").clone().unwrap_or_default();
    let params = parse_query(&query);

    let request = match parse_request(&params, peer) {
        Ok(r) => r,
        Err(msg) => {
            warn!(%peer, %msg, "rejecting WebSocket session request");
            let _ = ws_stream.close(None).await;
            return;
        }
    };

    let create_request = CreateRequest {
        user_session_id: request.user_session_id.clone(),
        remote_addr: peer.ip(),
        source_ip: None,
        channel_name: format!("ws-{}", kind_label(request.kind)),
        kind: request.kind,
        mode: request.mode.clone(),
        center_freq_hz: request.center_freq_hz,
        low_edge_hz: request.low_edge_hz,
        high_edge_hz: request.high_edge_hz,
        sample_rate_hz: request.sample_rate_hz,
        bypass_password: request.bypass_password.clone(),
    };

    let session = match sessions.create(create_request).await {
        Ok(s) => s,
        Err(err) => {
            warn!(%peer, %err, "failed to create WebSocket session");
            let _ = ws_stream.close(None).await;
            return;
        }
    };
    let ssrc = session.ssrc();
    session.begin_configuring();

    let channel_name = format!("ws-{}-{ssrc:08x}", kind_label(request.kind));
    let confirmed = match request.kind {
        SessionKind::Audio => {
            controller
                .create_audio_channel(&channel_name, request.center_freq_hz, &request.mode, ssrc)
                .await
        }
        SessionKind::Iq => {
            controller
                .create_iq_channel(&channel_name, request.center_freq_hz, request.sample_rate_hz, ssrc)
                .await
        }
        SessionKind::Spectrum { bin_count, bin_bandwidth_hz } => {
            controller
                .create_spectrum_channel(&channel_name, request.center_freq_hz, bin_count, bin_bandwidth_hz as f32, ssrc)
                .await
        }
    };

    if let Err(err) = confirmed {
        warn!(%peer, ssrc, %err, "back-end refused WebSocket channel");
        let _ = sessions.close(ssrc).await;
        let _ = ws_stream.close(None).await;
        return;
    }
    session.apply(multisdr_core::session::SessionEvent::StatusConfirmed);
    info!(%peer, ssrc, kind = kind_label(request.kind), "WebSocket session streaming");

    let is_spectrum = matches!(request.kind, SessionKind::Spectrum { .. });
    let spectrum_center_hz = request.center_freq_hz;
    let format = request.format;

    let (mut sink, mut stream) = ws_stream.split();
    let deliver_session = session.clone();

    let send_task = tokio::spawn(async move {
        let mut encoder = SpectrumEncoder::new();
        loop {
            let payload = deliver_session.deliver().await;
            let frame = if is_spectrum {
                let natural_order: Vec<f32> = payload
                    .chunks_exact(4)
                    .map(|c| f32::from_be_bytes([c[0], c[1], c[2], c[3]]))
                    .collect();
                let bins_db = unwrap_to_db(&natural_order);
                let timestamp_ms = chrono::Utc::now().timestamp_millis() as u64;
                encoder.encode_next(timestamp_ms, spectrum_center_hz, &bins_db)
            } else {
                format.encode(&payload)
            };
            if sink.send(Message::Binary(frame)).await.is_err() {
                return;
            }
        }
    });

    loop {
        tokio::select! {
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(%peer, %err, "WebSocket read error");
                        break;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    send_task.abort();
    let _ = controller.disable_channel(&channel_name, ssrc).await;
    let _ = sessions.close(ssrc).await;
    info!(%peer, ssrc, "WebSocket session closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_splits_pairs() {
        let params = parse_query("kind=audio&freq=14074000&mode=usb");
        assert_eq!(params.get("kind").map(String::as_str), Some("audio"));
        assert_eq!(params.get("freq").map(String::as_str), Some("14074000"));
    }

    #[test]
    fn parse_request_requires_freq() {
        let params = parse_query("kind=audio");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert!(parse_request(&params, peer).is_err());
    }

    #[test]
    fn parse_request_defaults_spectrum_bin_count() {
        let params = parse_query("kind=spectrum&freq=14074000");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let req = parse_request(&params, peer).unwrap();
        assert!(matches!(req.kind, SessionKind::Spectrum { bin_count: 1024, .. }));
    }

    #[test]
    fn parse_request_rejects_unknown_kind() {
        let params = parse_query("kind=telemetry&freq=14074000");
        let peer: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        assert!(parse_request(&params, peer).is_err());
    }
}
