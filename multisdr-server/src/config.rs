// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Configuration file support for multisdr-server.
//!
//! Config is loaded from the `[multisdr-server]` section of a combined
//! `multisdr.toml`, or from a standalone `multisdr-server.toml`. Default
//! search order:
//! 1. Path specified via `--config` CLI argument
//! 2. `./multisdr-server.toml` (or the combined `multisdr.toml`)
//! 3. `~/.config/multisdr/multisdr-server.toml`
//! 4. `/etc/multisdr/multisdr-server.toml`

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use multisdr_app::ConfigFile;
use serde::{Deserialize, Serialize};

/// One multicast group this process both sends and receives on.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastGroupConfig {
    pub address: IpAddr,
    pub port: u16,
    /// Interface to join on. `None` uses the default route's interface.
    pub interface: Option<String>,
}

impl Default for MulticastGroupConfig {
    fn default() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::new(239, 1, 2, 3)),
            port: 5004,
            interface: None,
        }
    }
}

/// Back-end multicast transport configuration (§4.A).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MulticastConfig {
    /// Control-plane group the controller sends COMMAND to and reads
    /// STATUS from.
    pub control: MulticastGroupConfig,
    /// Data groups carrying RTP audio/IQ.
    pub audio: MulticastGroupConfig,
    /// Data group carrying RTP-framed spectrum bins.
    pub spectrum: MulticastGroupConfig,
    /// Receive-loop deadline so shutdown is observed promptly (§4.A).
    pub recv_timeout_ms: u64,
}

impl Default for MulticastConfig {
    fn default() -> Self {
        Self {
            control: MulticastGroupConfig {
                port: 5004,
                ..MulticastGroupConfig::default()
            },
            audio: MulticastGroupConfig {
                port: 5005,
                ..MulticastGroupConfig::default()
            },
            spectrum: MulticastGroupConfig {
                port: 5006,
                ..MulticastGroupConfig::default()
            },
            recv_timeout_ms: 100,
        }
    }
}

impl MulticastConfig {
    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

/// Session limits and reaping policy (§4.F).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub max_sessions_total: u32,
    pub max_sessions_per_ip: u32,
    pub keepalive_timeout_s: u64,
    pub reap_interval_s: u64,
    pub queue_depth_audio: usize,
    pub queue_depth_spectrum: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_sessions_total: 200,
            max_sessions_per_ip: 8,
            keepalive_timeout_s: 30,
            reap_interval_s: 10,
            queue_depth_audio: multisdr_core::session::DEFAULT_QUEUE_DEPTH_AUDIO,
            queue_depth_spectrum: multisdr_core::session::DEFAULT_QUEUE_DEPTH_SPECTRUM,
        }
    }
}

impl LimitsConfig {
    pub fn to_manager_limits(&self) -> multisdr_core::session_manager::Limits {
        multisdr_core::session_manager::Limits {
            max_sessions_total: self.max_sessions_total,
            max_sessions_per_ip: self.max_sessions_per_ip,
            keepalive_timeout: Duration::from_secs(self.keepalive_timeout_s),
            reap_interval: Duration::from_secs(self.reap_interval_s),
            audio_queue_depth: self.queue_depth_audio,
            spectrum_queue_depth: self.queue_depth_spectrum,
        }
    }
}

/// HPSDR Protocol 2 adapter configuration (§4.H, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HpsdrConfig {
    pub enabled: bool,
    pub listen: IpAddr,
    /// MAC address reported in discovery replies, as six colon-separated
    /// hex octets.
    pub mac_address: String,
}

impl Default for HpsdrConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            mac_address: "00:1c:c0:a2:13:37".to_string(),
        }
    }
}

/// WebSocket adapter configuration (§4.H).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebSocketConfig {
    pub enabled: bool,
    pub listen: IpAddr,
    pub port: u16,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8073,
        }
    }
}

/// One band MultiDecoder should run a cycle-aligned decoder on (§4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderBandConfig {
    pub band: String,
    pub mode: String,
    pub center_freq_hz: u64,
    pub decoder_binary: String,
    pub decoder_args: Vec<String>,
}

impl Default for DecoderBandConfig {
    fn default() -> Self {
        Self {
            band: "20m".to_string(),
            mode: "ft8".to_string(),
            center_freq_hz: 14_074_000,
            decoder_binary: "jt9".to_string(),
            decoder_args: Vec::new(),
        }
    }
}

/// MultiDecoder configuration: which bands to run, where to write scratch
/// WAVs, and where to broadcast decodes (§4.G, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    pub work_dir: String,
    pub bands: Vec<DecoderBandConfig>,
    pub wsjtx_broadcast: Option<std::net::SocketAddr>,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            work_dir: "/var/lib/multisdr/decode".to_string(),
            bands: Vec::new(),
            wsjtx_broadcast: None,
        }
    }
}

/// Top-level server configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub multicast: MulticastConfig,
    pub limits: LimitsConfig,
    pub hpsdr: HpsdrConfig,
    pub websocket: WebSocketConfig,
    pub decode: DecodeConfig,
    pub log_level: Option<String>,
}

impl ConfigFile for ServerConfig {
    fn config_filename() -> &'static str {
        "multisdr-server.toml"
    }

    fn combined_key() -> Option<&'static str> {
        Some("multisdr-server")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = ServerConfig::default();
        assert!(config.limits.max_sessions_per_ip <= config.limits.max_sessions_total);
        assert_eq!(config.multicast.recv_timeout(), Duration::from_millis(100));
        assert!(config.decode.bands.is_empty());
    }

    #[test]
    fn limits_config_converts_to_manager_limits() {
        let config = LimitsConfig {
            max_sessions_total: 50,
            max_sessions_per_ip: 4,
            keepalive_timeout_s: 15,
            reap_interval_s: 5,
            ..LimitsConfig::default()
        };
        let limits = config.to_manager_limits();
        assert_eq!(limits.max_sessions_total, 50);
        assert_eq!(limits.keepalive_timeout, Duration::from_secs(15));
    }
}
