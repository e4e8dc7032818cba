//! Server configuration.
//!
//! Grounded on the teacher's per-domain `RelayConfig` constructors
//! (examples/dawsh2-AlphaPulse/backend/protocol_v2/src/relay/mod.rs): a
//! plain struct with a `Default` impl covering every field, loadable from a
//! file via `serde`.

use serde::{Deserialize, Serialize};

/// Tunables for the ingestion controller. Every field has a sane default so
/// the server runs unconfigured.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// TCP port the client listens on; the server connects out to it.
    pub listen_port: u16,
    /// Bounded poll timeout for socket reads, in milliseconds (spec §4.1).
    pub socket_poll_timeout_ms: u64,
    /// Period over which Mbps is sampled (spec §4.6).
    pub bandwidth_sample_period_ms: u64,
    /// Length of the Mbps ring buffer.
    pub bandwidth_ring_len: usize,
    /// Size of the fixed work buffer LZ4 frames decompress into.
    pub lz4_work_buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: crate::DEFAULT_LISTEN_PORT,
            socket_poll_timeout_ms: 10,
            bandwidth_sample_period_ms: 200,
            bandwidth_ring_len: 64,
            lz4_work_buffer_size: 256 * 1024,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for any
    /// field the file omits.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = Config::default();
        assert_eq!(cfg.listen_port, 8086);
        assert_eq!(cfg.socket_poll_timeout_ms, 10);
    }

    #[test]
    fn partial_toml_fills_in_defaults() {
        let toml_src = "listen_port = 9000\n";
        let cfg: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.socket_poll_timeout_ms, 10);
    }
}
