//! Configuration structs for ingestion and reading, following the pattern of
//! `ChainSafe-forest`'s `node/db/src/rocks_config.rs`: a
//! `serde`-deserializable struct with `#[serde(default)]` and a `Default`
//! impl carrying the production defaults.

use serde::{Deserialize, Serialize};

/// Number of times ingestion retries fsID generation on collision.
pub const DEFAULT_FSID_RETRY_LIMIT: u32 = 100;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Number of attempts to generate a collision-free fsID before ingest
    /// fails with `Error::IngestFailed`.
    pub fsid_retry_limit: u32,
    /// Length in bytes of the generated fsID before hex-encoding.
    pub fsid_byte_len: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            fsid_retry_limit: DEFAULT_FSID_RETRY_LIMIT,
            fsid_byte_len: 8,
        }
    }
}

impl IngestConfig {
    /// Parse a JSON config document, e.g. one embedded in a container
    /// runtime's snapshotter configuration.
    pub fn from_json(s: &str) -> Result<Self, crate::error::Error> {
        serde_json::from_str(s).map_err(|e| crate::error::Error::Other(format!("invalid ingest config: {e}")))
    }
}

/// Options passed to `new_metadata_reader`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReaderConfig {
    /// Layer digest used to tag every metric emitted by this reader.
    pub layer_digest: String,
    /// Whether telemetry callbacks (span-start timestamps) are invoked at all.
    pub telemetry_enabled: bool,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            layer_digest: String::new(),
            telemetry_enabled: true,
        }
    }
}

impl ReaderConfig {
    /// Parse a JSON config document, mirroring [`IngestConfig::from_json`].
    pub fn from_json(s: &str) -> Result<Self, crate::error::Error> {
        serde_json::from_str(s).map_err(|e| crate::error::Error::Other(format!("invalid reader config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_config_round_trips_through_json() {
        let cfg = IngestConfig { fsid_retry_limit: 7, fsid_byte_len: 16 };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(IngestConfig::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn reader_config_round_trips_through_json() {
        let cfg = ReaderConfig { layer_digest: "sha256:abc".into(), telemetry_enabled: false };
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(ReaderConfig::from_json(&json).unwrap(), cfg);
    }

    #[test]
    fn ingest_config_from_json_rejects_garbage() {
        assert!(IngestConfig::from_json("not json").is_err());
    }
}
