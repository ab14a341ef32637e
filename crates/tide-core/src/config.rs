//! Policy file parser.
//!
//! ```toml
//! [[policy]]
//! id = "web"
//! evaluation_interval = "10s"
//! cooldown = "5m"
//!
//! [policy.target]
//! name = "static"
//! config = { group = "web", count = "3" }
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::types::{Policy, PolicyId};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyFile {
    #[serde(default, rename = "policy")]
    pub policies: Vec<Policy>,
}

impl PolicyFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate a policy file.
    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        let file: PolicyFile = toml::from_str(content)?;
        file.validate()?;
        Ok(file)
    }

    /// Check ids are unique and every policy is usable by a handler.
    pub fn validate(&self) -> ConfigResult<()> {
        let mut seen = HashSet::new();
        for policy in &self.policies {
            if policy.id.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    id: policy.id.clone(),
                    reason: "id must not be empty".to_string(),
                });
            }
            if !seen.insert(policy.id.as_str()) {
                return Err(ConfigError::DuplicateId(policy.id.clone()));
            }
            if policy.target.name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    id: policy.id.clone(),
                    reason: "target name must not be empty".to_string(),
                });
            }
            if policy.evaluation_interval == Duration::ZERO {
                return Err(ConfigError::Invalid {
                    id: policy.id.clone(),
                    reason: "evaluation_interval must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Policy> {
        self.policies.iter().find(|p| p.id == id)
    }

    pub fn ids(&self) -> Vec<PolicyId> {
        self.policies.iter().map(|p| p.id.clone()).collect()
    }
}
