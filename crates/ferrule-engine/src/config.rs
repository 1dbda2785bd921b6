//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data so that it can live in a JSON file
//! next to the game's assets and travel inside engine snapshots.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

/// Settings for the frame loop and the physics bridge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Physics step length in seconds. Must be positive and finite.
    pub fixed_dt: f32,
    /// Upper bound on physics steps per frame. Excess accumulated time is
    /// dropped so a slow frame cannot trigger an ever-growing backlog.
    pub max_substeps: u32,
    /// World-space gravity.
    pub gravity: [f32; 3],
    /// Blend moving bodies between the last two physics states.
    pub interpolate: bool,
}

impl Default for EngineConfig {
    /// 60 Hz physics, Earth gravity along -Y.
    fn default() -> Self {
        Self {
            fixed_dt: 1.0 / 60.0,
            max_substeps: 8,
            gravity: [0.0, -9.81, 0.0],
            interpolate: true,
        }
    }
}

impl EngineConfig {
    /// Parse a JSON document, filling unspecified fields with defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid JSON for this type or
    /// fails [`validate`](Self::validate).
    pub fn from_json_str(json: &str) -> anyhow::Result<Self> {
        let config: EngineConfig =
            serde_json::from_str(json).context("failed to parse engine config")?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.fixed_dt > 0.0 && self.fixed_dt.is_finite()) {
            bail!(
                "fixed_dt must be positive and finite, got {}",
                self.fixed_dt
            );
        }
        if self.max_substeps == 0 {
            bail!("max_substeps must be at least 1");
        }
        if self.gravity.iter().any(|g| !g.is_finite()) {
            bail!("gravity must be finite, got {:?}", self.gravity);
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_substeps, 8);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "fixed_dt": 0.01 }"#).unwrap();
        assert_eq!(config.fixed_dt, 0.01);
        assert_eq!(config.gravity, [0.0, -9.81, 0.0]);
        assert!(config.interpolate);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "fixed_dt": 0.0 }"#).unwrap_err();
        assert!(err.to_string().contains("fixed_dt"));
        let err = EngineConfig::from_json_str(r#"{ "max_substeps": 0 }"#).unwrap_err();
        assert!(err.to_string().contains("max_substeps"));
        assert!(EngineConfig::from_json_str("not json").is_err());
    }
}
