//! TableSession - the primary public API for resolving actions.
//!
//! This module wraps the feature registry, dice roller, actor source and
//! workflow orchestrator into a single, easy-to-use API.

use crate::action::DialogState;
use crate::actor::ActorSource;
use crate::config::PipelineConfig;
use crate::dice::{DiceError, DiceRoller, RngRoller};
use crate::feature::{Feature, FeatureError, FeatureRegistry};
use crate::resolve::{roll_contest, ContestResult};
use crate::workflow::{
    ActionState, ErrorEntry, Orchestrator, PipelineContext, RollRecord, Step, TargetOutcome,
    WorkflowError, WorkflowTable,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors from TableSession operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("Feature error: {0}")]
    Feature(#[from] FeatureError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Serializable record of a resolved action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionSummary {
    pub id: Uuid,
    pub workflow: String,
    pub completed: bool,
    pub cancelled: bool,
    /// Formula of every dice pool, in build order.
    pub formulas: Vec<String>,
    pub rolls: Vec<RollRecord>,
    pub targets: Vec<TargetOutcome>,
    pub errors: Vec<ErrorEntry>,
}

impl From<&ActionState> for ActionSummary {
    fn from(state: &ActionState) -> Self {
        Self {
            id: state.id,
            workflow: state.workflow_type.clone(),
            completed: state.is_complete() && !state.cancelled,
            cancelled: state.cancelled,
            formulas: state.dice_pools.iter().map(|p| p.formula.clone()).collect(),
            rolls: state.results.clone(),
            targets: state.targets.clone(),
            errors: state.errors.clone(),
        }
    }
}

impl ActionSummary {
    pub fn to_json(&self) -> Result<String, SessionError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A table session.
///
/// This is the main entry point for resolving actions. It manages:
/// - The workflow table and resolution rules from its configuration
/// - The feature registry, shared read-only by every run
/// - The dice roller and actor source
pub struct TableSession {
    config: PipelineConfig,
    workflows: WorkflowTable,
    registry: FeatureRegistry,
    roller: Arc<dyn DiceRoller>,
    actors: Arc<dyn ActorSource>,
    orchestrator: Orchestrator,
}

impl TableSession {
    /// Create a session with the built-in features. Dice come from a
    /// seeded roller when the configuration has a seed.
    pub fn new(config: PipelineConfig, actors: Arc<dyn ActorSource>) -> Self {
        let roller: Arc<dyn DiceRoller> = match config.seed {
            Some(seed) => Arc::new(RngRoller::seeded(seed)),
            None => Arc::new(RngRoller::new()),
        };
        Self::assemble(config, FeatureRegistry::with_builtin(), roller, actors)
    }

    fn assemble(
        config: PipelineConfig,
        registry: FeatureRegistry,
        roller: Arc<dyn DiceRoller>,
        actors: Arc<dyn ActorSource>,
    ) -> Self {
        let ctx = Self::context(&config, &registry, &roller, &actors);
        Self {
            workflows: config.workflow_table(),
            config,
            registry,
            roller,
            actors,
            orchestrator: Orchestrator::new(ctx),
        }
    }

    fn context(
        config: &PipelineConfig,
        registry: &FeatureRegistry,
        roller: &Arc<dyn DiceRoller>,
        actors: &Arc<dyn ActorSource>,
    ) -> PipelineContext {
        PipelineContext::new(Arc::new(registry.clone()), roller.clone(), actors.clone())
            .with_resolver(config.resolver())
            .with_half_on_save(config.half_on_save)
    }

    /// Refresh the orchestrator's services, keeping custom step handlers.
    fn rebuild(mut self) -> Self {
        let ctx = Self::context(&self.config, &self.registry, &self.roller, &self.actors);
        self.orchestrator = self.orchestrator.with_context(ctx);
        self
    }

    /// Use a different dice roller.
    pub fn with_roller(mut self, roller: Arc<dyn DiceRoller>) -> Self {
        self.roller = roller;
        self.rebuild()
    }

    /// Use a different feature registry.
    pub fn with_registry(mut self, registry: FeatureRegistry) -> Self {
        self.registry = registry;
        self.rebuild()
    }

    /// Register an extra feature.
    pub fn with_feature(mut self, feature: impl Feature + 'static) -> Result<Self, SessionError> {
        self.registry.register(feature)?;
        Ok(self.rebuild())
    }

    /// Register or replace a step handler.
    pub fn with_step(mut self, id: impl Into<String>, step: impl Step + 'static) -> Self {
        self.orchestrator = self.orchestrator.with_step(id, step);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn registry(&self) -> &FeatureRegistry {
        &self.registry
    }

    pub fn workflows(&self) -> &WorkflowTable {
        &self.workflows
    }

    /// Create the action state for a workflow without running it.
    pub fn prepare(&self, workflow: &str, dialog: DialogState) -> Result<ActionState, SessionError> {
        Ok(ActionState::new(workflow, &self.workflows, dialog)?)
    }

    /// Run a workflow and return the final action state.
    pub async fn run(&self, workflow: &str, dialog: DialogState) -> Result<ActionState, SessionError> {
        let state = self.prepare(workflow, dialog)?;
        Ok(self.orchestrator.run(state).await?)
    }

    /// Run a workflow and summarize the outcome.
    pub async fn perform(
        &self,
        workflow: &str,
        dialog: DialogState,
    ) -> Result<ActionSummary, SessionError> {
        let state = self.run(workflow, dialog).await?;
        Ok(ActionSummary::from(&state))
    }

    /// Roll a contest between `(participant, formula)` pairs.
    pub async fn contest(
        &self,
        participants: &[(String, String)],
    ) -> Result<Option<ContestResult>, SessionError> {
        Ok(roll_contest(self.roller.as_ref(), participants).await?)
    }

    pub fn actors(&self) -> &Arc<dyn ActorSource> {
        &self.actors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::InMemoryActors;

    #[test]
    fn test_session_uses_config_workflows() {
        let config = PipelineConfig::new().with_workflow(crate::workflow::WorkflowDefinition::new(
            "smite",
            &["start", "attack", "damage", "complete"],
        ));
        let session = TableSession::new(config, Arc::new(InMemoryActors::new()));
        assert!(session.workflows().steps("smite").is_ok());
        assert_eq!(session.registry().len(), 6);
    }

    #[test]
    fn test_prepare_rejects_unknown_workflow() {
        let session = TableSession::new(PipelineConfig::new(), Arc::new(InMemoryActors::new()));
        let dialog = DialogState::new(crate::actor::ActorId::new());
        assert!(matches!(
            session.prepare("fireball", dialog),
            Err(SessionError::Workflow(WorkflowError::UnknownWorkflow(_)))
        ));
    }
}
