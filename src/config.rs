//! Tunable protocol parameters.
//!
//! Every section has conservative defaults; hosts that want different limits
//! can deserialize a [`ProtocolConfig`] from JSON and call
//! [`ProtocolConfig::validate`] before handing it to the managers.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration shared by the bundle manager, sessions and key manager.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProtocolConfig {
    pub bundle: BundleConfig,
    pub ratchet: RatchetConfig,
    pub kdf: KdfParams,
}

impl ProtocolConfig {
    /// Parses a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks that all values are usable.
    pub fn validate(&self) -> Result<()> {
        self.bundle.validate()?;
        self.ratchet.validate()?;
        self.kdf.validate()
    }
}

/// One-time pre-key pool sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BundleConfig {
    /// Pre-keys generated on first initialization
    pub one_time_prekey_count: u32,
    /// Pool size below which the key manager replenishes
    pub low_watermark: u32,
    /// Pre-keys added per replenishment
    pub replenish_count: u32,
}

impl Default for BundleConfig {
    fn default() -> Self {
        Self {
            one_time_prekey_count: 10,
            low_watermark: 5,
            replenish_count: 5,
        }
    }
}

impl BundleConfig {
    fn validate(&self) -> Result<()> {
        if self.low_watermark > 0 && self.replenish_count == 0 {
            return Err(Error::InvalidConfig(
                "replenishCount must be positive when lowWatermark is set".into(),
            ));
        }
        Ok(())
    }
}

/// Double Ratchet memory bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RatchetConfig {
    /// Maximum number of skipped message keys cached per session.
    /// Oldest keys are evicted first once the cache is full.
    pub max_skipped_keys: usize,
    /// Number of retired receiving ratchet keys remembered for replay detection
    pub max_retired_chains: usize,
}

impl Default for RatchetConfig {
    fn default() -> Self {
        Self {
            max_skipped_keys: 1000,
            max_retired_chains: 16,
        }
    }
}

impl RatchetConfig {
    fn validate(&self) -> Result<()> {
        if self.max_skipped_keys == 0 {
            return Err(Error::InvalidConfig("maxSkippedKeys must be positive".into()));
        }
        Ok(())
    }
}

/// Argon2id cost parameters for password-derived keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

/// Upper bound on memory accepted from an imported backup artifact (1 GiB).
pub(crate) const MAX_KDF_MEMORY_KIB: u32 = 1024 * 1024;
/// Upper bound on Argon2 passes.
pub(crate) const MAX_KDF_ITERATIONS: u32 = 64;
/// Upper bound on Argon2 lanes.
pub(crate) const MAX_KDF_PARALLELISM: u32 = 16;

impl Default for KdfParams {
    /// Argon2id with 19 MiB, two passes, one lane.
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub(crate) fn validate(&self) -> Result<()> {
        if self.iterations == 0 || self.parallelism == 0 {
            return Err(Error::InvalidConfig(
                "kdf iterations and parallelism must be positive".into(),
            ));
        }
        if self.iterations > MAX_KDF_ITERATIONS {
            return Err(Error::InvalidConfig(format!(
                "kdf iterations {} exceed {MAX_KDF_ITERATIONS}",
                self.iterations
            )));
        }
        if self.parallelism > MAX_KDF_PARALLELISM {
            return Err(Error::InvalidConfig(format!(
                "kdf parallelism {} exceeds {MAX_KDF_PARALLELISM}",
                self.parallelism
            )));
        }
        if self.memory_kib < self.parallelism.saturating_mul(8) || self.memory_kib > MAX_KDF_MEMORY_KIB {
            return Err(Error::InvalidConfig(format!(
                "kdf memory {} KiB out of range",
                self.memory_kib
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProtocolConfig::default();
        assert_eq!(config.bundle.one_time_prekey_count, 10);
        assert_eq!(config.ratchet.max_skipped_keys, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config =
            ProtocolConfig::from_json_str(r#"{"ratchet": {"maxSkippedKeys": 50}}"#).unwrap();
        assert_eq!(config.ratchet.max_skipped_keys, 50);
        assert_eq!(config.ratchet.max_retired_chains, 16);
        assert_eq!(config.bundle, BundleConfig::default());
    }

    #[test]
    fn test_rejects_zero_skip_limit() {
        let result = ProtocolConfig::from_json_str(r#"{"ratchet": {"maxSkippedKeys": 0}}"#);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_bad_kdf() {
        let params = KdfParams {
            memory_kib: 4,
            iterations: 1,
            parallelism: 1,
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_rejects_unbounded_kdf_cost() {
        let base = KdfParams {
            memory_kib: 64,
            iterations: 1,
            parallelism: 1,
        };
        assert!(base.validate().is_ok());

        let slow = KdfParams { iterations: u32::MAX, ..base };
        assert!(matches!(slow.validate(), Err(Error::InvalidConfig(_))));

        let wide = KdfParams { parallelism: u32::MAX, ..base };
        assert!(matches!(wide.validate(), Err(Error::InvalidConfig(_))));
    }
}
