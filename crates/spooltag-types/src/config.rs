//! Configuration loading from TOML with defaults.
//!
//! Bad or missing config files never abort startup: a warning is logged
//! and defaults are used, so a bare checkout works against a local agent.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::SpooltagResult;
use crate::tag::SectorKey;

/// Parameters for per-tag sector-key derivation.
///
/// Constructed once at startup (usually from [`BridgeConfig`]) and passed
/// explicitly into the derivation function; there is no hidden global.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// 16-byte master secret used as the HKDF salt (hex in config files).
    #[serde(with = "serde_hex_16")]
    pub master_secret: [u8; 16],
    /// Context string used as the HKDF info input (hex in config files;
    /// the default ends in a NUL byte).
    #[serde(with = "serde_hex")]
    pub context: Vec<u8>,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            // Published master secret for Bambu Lab spool tags.
            master_secret: [
                0x9A, 0x75, 0x9C, 0xF2, 0xC4, 0xF7, 0xCA, 0xFF, 0x22, 0x2C, 0xB9, 0x76, 0x9B,
                0x41, 0xBC, 0x96,
            ],
            context: b"RFID-A\x00".to_vec(),
        }
    }
}

/// Initiator-side bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// WebSocket URL of the hardware agent.
    pub agent_url: String,
    /// Fixed delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
    /// Default per-request deadline, in seconds.
    pub request_timeout_secs: u64,
    /// Ordered fallback keys tried when derived keys fail authentication
    /// (hex, 12 chars each).
    pub default_keys: Vec<String>,
    /// Key-derivation parameters.
    pub kdf: KdfParams,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            agent_url: "ws://127.0.0.1:9470/bridge".to_string(),
            reconnect_delay_secs: 5,
            request_timeout_secs: 30,
            default_keys: vec!["FFFFFFFFFFFF".to_string(), "000000000000".to_string()],
            kdf: KdfParams::default(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file, with defaults.
    ///
    /// `None` reads `spooltag.toml` from the working directory if present.
    /// Parse failures log a warning and fall back to defaults.
    pub fn load(path: Option<&Path>) -> Self {
        let config_path = path.unwrap_or_else(|| Path::new("spooltag.toml"));

        if !config_path.exists() {
            info!(path = %config_path.display(), "Config file not found, using defaults");
            return Self::default();
        }

        match std::fs::read_to_string(config_path) {
            Ok(contents) => match toml::from_str::<Self>(&contents) {
                Ok(config) => {
                    info!(path = %config_path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        path = %config_path.display(),
                        "Failed to parse config, using defaults"
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    error = %e,
                    path = %config_path.display(),
                    "Failed to read config file, using defaults"
                );
                Self::default()
            }
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Parse the configured fallback key list.
    pub fn fallback_keys(&self) -> SpooltagResult<Vec<SectorKey>> {
        self.default_keys
            .iter()
            .map(|k| SectorKey::from_hex(k))
            .collect()
    }
}

/// Agent-side service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// TCP address the agent WebSocket listener binds to.
    pub listen_addr: String,
    /// Device name reported in STATUS messages.
    pub device_name: String,
    /// Fallback keys tried after the derived key (hex, 12 chars each).
    pub default_keys: Vec<String>,
    /// Key-derivation parameters for locally-derived keys.
    pub kdf: KdfParams,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:9470".to_string(),
            device_name: "spooltag-agent".to_string(),
            default_keys: vec!["FFFFFFFFFFFF".to_string(), "000000000000".to_string()],
            kdf: KdfParams::default(),
        }
    }
}

impl AgentConfig {
    /// Parse the configured fallback key list.
    pub fn fallback_keys(&self) -> SpooltagResult<Vec<SectorKey>> {
        self.default_keys
            .iter()
            .map(|k| SectorKey::from_hex(k))
            .collect()
    }
}

mod serde_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s.trim()).map_err(serde::de::Error::custom)
    }
}

mod serde_hex_16 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode_upper(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<[u8; 16], D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(s.trim()).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("master secret must be 16 bytes"))
    }
}
