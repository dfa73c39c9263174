//! Engine configuration
//!
//! ```toml
//! [engine]
//! policies = ["policies/base.json", "policies/ops.toml"]
//! validate_on_load = true
//! ```
//!
//! Relative policy paths are resolved against the directory of the config
//! file when loaded with [`EngineConfig::from_file`].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PbacError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSection {
    /// Policy documents to load, in evaluation order
    #[serde(default)]
    pub policies: Vec<PathBuf>,

    /// Run create-time validation on every loaded policy
    #[serde(default = "default_validate_on_load")]
    pub validate_on_load: bool,
}

fn default_validate_on_load() -> bool {
    true
}

impl Default for EngineSection {
    fn default() -> Self {
        EngineSection {
            policies: Vec::new(),
            validate_on_load: default_validate_on_load(),
        }
    }
}

impl EngineConfig {
    /// Parse config from a TOML string
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file, resolving policy paths relative to it
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml_str(&text)?;

        if let Some(base) = path.parent() {
            for policy in &mut config.engine.policies {
                if policy.is_relative() {
                    *policy = base.join(&*policy);
                }
            }
        }

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (i, policy) in self.engine.policies.iter().enumerate() {
            if policy.as_os_str().is_empty() {
                return Err(PbacError::Config(format!("policies[{i}] is an empty path")));
            }
        }
        Ok(())
    }
}
