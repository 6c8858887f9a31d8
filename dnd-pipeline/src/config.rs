//! Pipeline configuration.
//!
//! # Example
//!
//! ```ignore
//! use dnd_pipeline::config::PipelineConfig;
//! use dnd_pipeline::resolve::{CheckConfig, CheckType, CriticalPolicy};
//!
//! let mut skill = CheckConfig::for_check(CheckType::Skill);
//! skill.critical_success = CriticalPolicy::Automatic;
//!
//! let config = PipelineConfig::new()
//!     .with_check(CheckType::Skill, skill)
//!     .with_half_on_save(false)
//!     .with_seed(42);
//! ```

use crate::resolve::{CheckConfig, CheckType, D20Resolver};
use crate::workflow::{WorkflowDefinition, WorkflowTable, BUILTIN_WORKFLOWS};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Configuration for a table session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Per-check-type overrides of the default resolution rules.
    #[serde(default)]
    pub checks: HashMap<CheckType, CheckConfig>,

    /// Workflows added to, or replacing, the built-in table.
    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,

    /// Halve damage for targets that succeed a chained save.
    #[serde(default = "half_on_save_default")]
    pub half_on_save: bool,

    /// Seed for reproducible dice.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn half_on_save_default() -> bool {
    true
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
            workflows: Vec::new(),
            half_on_save: true,
            seed: None,
        }
    }

    /// Load from a JSON document. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Override the rules for one check type.
    pub fn with_check(mut self, check: CheckType, config: CheckConfig) -> Self {
        self.checks.insert(check, config);
        self
    }

    /// Add a workflow definition.
    pub fn with_workflow(mut self, definition: WorkflowDefinition) -> Self {
        self.workflows.push(definition);
        self
    }

    pub fn with_half_on_save(mut self, half_on_save: bool) -> Self {
        self.half_on_save = half_on_save;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Built-in workflows with configured ones layered on top.
    pub fn workflow_table(&self) -> WorkflowTable {
        let mut table = BUILTIN_WORKFLOWS.clone();
        table.extend(WorkflowTable::from_definitions(self.workflows.clone()));
        table
    }

    pub fn resolver(&self) -> D20Resolver {
        D20Resolver::new(self.checks.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolve::CriticalPolicy;

    #[test]
    fn test_config_builder() {
        let config = PipelineConfig::new()
            .with_half_on_save(false)
            .with_seed(7)
            .with_workflow(WorkflowDefinition::new(
                "smite",
                &["start", "attack", "damage", "complete"],
            ));

        assert!(!config.half_on_save);
        assert_eq!(config.seed, Some(7));
        let table = config.workflow_table();
        assert!(table.steps("smite").is_ok());
        assert!(table.steps("attack-damage").is_ok());
    }

    #[test]
    fn test_config_from_json_defaults() {
        let config = PipelineConfig::from_json("{}").unwrap();
        assert_eq!(config, PipelineConfig::new());

        let config = PipelineConfig::from_json(
            r#"{
                "checks": {
                    "skill": {
                        "criticalRange": { "min": 20, "max": 20 },
                        "criticalFailureRange": { "min": 1, "max": 1 },
                        "criticalSuccess": "automatic",
                        "criticalFailure": "compare",
                        "degreeOfSuccess": true
                    }
                },
                "halfOnSave": false
            }"#,
        )
        .unwrap();
        assert!(!config.half_on_save);
        assert_eq!(
            config.resolver().config(CheckType::Skill).critical_success,
            CriticalPolicy::Automatic
        );
        assert_eq!(
            config.resolver().config(CheckType::Attack),
            CheckConfig::for_check(CheckType::Attack)
        );
    }

    #[test]
    fn test_bad_range_is_rejected() {
        let json = r#"{
            "checks": {
                "attack": {
                    "criticalRange": { "min": 21, "max": 20 },
                    "criticalFailureRange": { "min": 1, "max": 1 },
                    "criticalSuccess": "automatic",
                    "criticalFailure": "automatic",
                    "degreeOfSuccess": false
                }
            }
        }"#;
        assert!(PipelineConfig::from_json(json).is_err());
    }
}
