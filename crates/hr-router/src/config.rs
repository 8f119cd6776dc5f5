//! Router configuration, loadable from TOML and overridden by environment.

use serde::Deserialize;

use crate::cloud::CloudConfig;
use crate::policy::Policy;

/// Top-level configuration for the hybrid router.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RouterConfig {
    /// Routing policy. Missing keys take their defaults.
    #[serde(default)]
    pub policy: Policy,
    /// Cloud provider settings.
    #[serde(default)]
    pub cloud: CloudConfig,
}

impl RouterConfig {
    /// Load config from a TOML file path. Out-of-range policy values are
    /// replaced by their defaults.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(Self {
            policy: config.policy.validated(),
            ..config
        })
    }

    /// Optional TOML file, then `HYBRID_*` environment variables on top.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let base = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(base.with_overrides(|name| std::env::var(name).ok()))
    }

    pub fn with_overrides(self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            policy: self.policy.with_overrides(&lookup),
            cloud: self.cloud.with_overrides(&lookup),
        }
    }
}
