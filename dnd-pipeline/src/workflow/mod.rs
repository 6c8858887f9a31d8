//! Workflow definitions and the orchestrator that runs them.
//!
//! A workflow is a named, flat list of step ids ending in `complete`. The
//! orchestrator moves an [`ActionState`] through each step in order,
//! checking for cancellation in between. Step handlers are looked up by id
//! in a [`StepRegistry`], so hosts can replace built-ins or add new steps.

pub mod state;
pub mod steps;

pub use state::{
    ActionState, DamageApplication, ErrorEntry, RollRecord, TargetOutcome, TypedDamage,
};

use crate::actor::{ActorSource, LookupError};
use crate::dice::{DiceError, DiceRoller};
use crate::feature::FeatureRegistry;
use crate::resolve::D20Resolver;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info};

/// The id every workflow must end with.
pub const COMPLETE: &str = "complete";

/// Errors from workflow construction and execution.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Workflow '{workflow}' has {count} steps, at least 3 are required")]
    TooFewSteps { workflow: String, count: usize },

    #[error("Workflow '{0}' does not end with 'complete'")]
    MissingComplete(String),

    #[error("Invalid workflow table: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Step '{step}' failed: {source}")]
    Step {
        step: String,
        state: Box<ActionState>,
        source: StepError,
    },
}

impl WorkflowError {
    /// The action state at the point of failure, for step errors.
    pub fn state(&self) -> Option<&ActionState> {
        match self {
            WorkflowError::Step { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Errors raised by step handlers.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("Lookup error: {0}")]
    Lookup(#[from] LookupError),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("No handler registered for step '{0}'")]
    UnknownStep(String),

    #[error("{0}")]
    Failed(String),
}

impl StepError {
    /// Short category recorded in the error log.
    pub fn error_type(&self) -> &'static str {
        match self {
            StepError::Dice(_) => "dice",
            StepError::Lookup(_) => "lookup",
            StepError::MissingInput(_) => "missingInput",
            StepError::UnknownStep(_) => "unknownStep",
            StepError::Failed(_) => "step",
        }
    }
}

/// A step that failed, handing the state back with the cause.
#[derive(Debug)]
pub struct StepFailure {
    pub state: Box<ActionState>,
    pub error: StepError,
}

impl StepFailure {
    pub fn new(state: ActionState, error: impl Into<StepError>) -> Self {
        Self {
            state: Box::new(state),
            error: error.into(),
        }
    }
}

pub type StepResult = Result<ActionState, StepFailure>;

/// Settle a step whose body ran against `&mut state`.
pub fn finish(state: ActionState, outcome: Result<(), StepError>) -> StepResult {
    match outcome {
        Ok(()) => Ok(state),
        Err(error) => Err(StepFailure::new(state, error)),
    }
}

/// One workflow step. Takes the state by value and returns it.
#[async_trait]
pub trait Step: Send + Sync {
    async fn run(&self, state: ActionState, ctx: &PipelineContext) -> StepResult;
}

/// A named step list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub workflow: String,
    pub workflow_steps: Vec<String>,
}

impl WorkflowDefinition {
    pub fn new(workflow: impl Into<String>, steps: &[&str]) -> Self {
        Self {
            workflow: workflow.into(),
            workflow_steps: steps.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// At least three steps, the last being `complete`.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        if self.workflow_steps.len() < 3 {
            return Err(WorkflowError::TooFewSteps {
                workflow: self.workflow.clone(),
                count: self.workflow_steps.len(),
            });
        }
        if self.workflow_steps.last().map(String::as_str) != Some(COMPLETE) {
            return Err(WorkflowError::MissingComplete(self.workflow.clone()));
        }
        Ok(())
    }
}

/// Workflow definitions by name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowTable {
    definitions: HashMap<String, WorkflowDefinition>,
}

lazy_static::lazy_static! {
    /// Workflows available to every session.
    pub static ref BUILTIN_WORKFLOWS: WorkflowTable = WorkflowTable::from_definitions(vec![
        WorkflowDefinition::new("attack", &["start", "attack", "complete"]),
        WorkflowDefinition::new("damage", &["start", "damage", "complete"]),
        WorkflowDefinition::new("save", &["start", "save", "complete"]),
        WorkflowDefinition::new("skill", &["start", "skill", "complete"]),
        WorkflowDefinition::new("ability", &["start", "ability", "complete"]),
        WorkflowDefinition::new(
            "attack-damage",
            &["start", "attack", "damage", "applyDamage", "complete"],
        ),
        WorkflowDefinition::new(
            "attack-damage-save-applyDamage",
            &["start", "attack", "damage", "save", "applyDamage", "complete"],
        ),
        WorkflowDefinition::new(
            "save-damage",
            &["start", "save", "damage", "applyDamage", "complete"],
        ),
    ]);
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later definitions replace earlier ones with the same name.
    pub fn from_definitions(definitions: Vec<WorkflowDefinition>) -> Self {
        let mut table = Self::new();
        for definition in definitions {
            table.insert(definition);
        }
        table
    }

    /// Parse a `[{workflow, workflowSteps}]` array.
    pub fn from_json(json: &str) -> Result<Self, WorkflowError> {
        let definitions: Vec<WorkflowDefinition> = serde_json::from_str(json)?;
        Ok(Self::from_definitions(definitions))
    }

    pub fn insert(&mut self, definition: WorkflowDefinition) {
        self.definitions
            .insert(definition.workflow.clone(), definition);
    }

    /// Merge another table over this one.
    pub fn extend(&mut self, other: WorkflowTable) {
        self.definitions.extend(other.definitions);
    }

    /// Validated step list for a workflow.
    pub fn steps(&self, workflow: &str) -> Result<&[String], WorkflowError> {
        let definition = self
            .definitions
            .get(workflow)
            .ok_or_else(|| WorkflowError::UnknownWorkflow(workflow.to_string()))?;
        definition.validate()?;
        Ok(&definition.workflow_steps)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.definitions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Shared services available to every step.
#[derive(Clone)]
pub struct PipelineContext {
    pub registry: Arc<FeatureRegistry>,
    pub roller: Arc<dyn DiceRoller>,
    pub actors: Arc<dyn ActorSource>,
    pub resolver: D20Resolver,
    /// Halve damage for targets that succeed a chained save.
    pub half_on_save: bool,
}

impl PipelineContext {
    pub fn new(
        registry: Arc<FeatureRegistry>,
        roller: Arc<dyn DiceRoller>,
        actors: Arc<dyn ActorSource>,
    ) -> Self {
        Self {
            registry,
            roller,
            actors,
            resolver: D20Resolver::default(),
            half_on_save: true,
        }
    }

    pub fn with_resolver(mut self, resolver: D20Resolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_half_on_save(mut self, half_on_save: bool) -> Self {
        self.half_on_save = half_on_save;
        self
    }
}

/// Step handlers by id.
#[derive(Clone, Default)]
pub struct StepRegistry {
    steps: HashMap<String, Arc<dyn Step>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in step handler.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register("start", steps::Start);
        registry.register("attack", steps::Attack);
        registry.register("damage", steps::Damage);
        registry.register("save", steps::Save);
        registry.register("skill", steps::Skill);
        registry.register("ability", steps::AbilityCheck);
        registry.register("applyDamage", steps::ApplyDamage);
        registry.register(COMPLETE, steps::Complete);
        registry
    }

    /// Register or replace the handler for a step id.
    pub fn register(&mut self, id: impl Into<String>, step: impl Step + 'static) {
        self.steps.insert(id.into(), Arc::new(step));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Step>> {
        self.steps.get(id).cloned()
    }
}

/// Runs action states through their workflows.
#[derive(Clone)]
pub struct Orchestrator {
    steps: StepRegistry,
    ctx: PipelineContext,
}

impl Orchestrator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self {
            steps: StepRegistry::builtin(),
            ctx,
        }
    }

    pub fn with_step(mut self, id: impl Into<String>, step: impl Step + 'static) -> Self {
        self.steps.register(id, step);
        self
    }

    pub fn with_context(mut self, ctx: PipelineContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Run the remaining steps. Returns early, without error, if the state
    /// is cancelled before a step.
    pub async fn run(&self, mut state: ActionState) -> Result<ActionState, WorkflowError> {
        info!(action = %state.id, workflow = %state.workflow_type, "Starting workflow");

        loop {
            if state.cancelled {
                info!(
                    action = %state.id,
                    step = %state.current_step(),
                    "Workflow cancelled"
                );
                return Ok(state);
            }

            let step_id = state.current_step().to_string();
            debug!(action = %state.id, step = %step_id, chain = state.chain_number, "Running step");

            let outcome = match self.steps.get(&step_id) {
                Some(step) => step.run(state, &self.ctx).await,
                None => Err(StepFailure::new(state, StepError::UnknownStep(step_id.clone()))),
            };

            state = match outcome {
                Ok(state) => state,
                Err(StepFailure { state, error }) => {
                    let mut state = *state;
                    error!(action = %state.id, step = %step_id, error = %error, "Step failed");
                    state.record_error(error.error_type(), error.to_string());
                    return Err(WorkflowError::Step {
                        step: step_id,
                        state: Box::new(state),
                        source: error,
                    });
                }
            };

            if state.is_complete() {
                info!(
                    action = %state.id,
                    errors = state.errors.len(),
                    "Workflow complete"
                );
                return Ok(state);
            }
            state.next_step();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_table() {
        assert_eq!(
            BUILTIN_WORKFLOWS.steps("attack-damage-save-applyDamage").unwrap(),
            ["start", "attack", "damage", "save", "applyDamage", "complete"]
        );
        assert_eq!(BUILTIN_WORKFLOWS.names().len(), 8);
    }

    #[test]
    fn test_definition_validation() {
        let mut table = WorkflowTable::new();
        table.insert(WorkflowDefinition::new("short", &["start", "complete"]));
        table.insert(WorkflowDefinition::new("open", &["start", "attack", "damage"]));

        assert!(matches!(
            table.steps("short"),
            Err(WorkflowError::TooFewSteps { count: 2, .. })
        ));
        assert!(matches!(
            table.steps("open"),
            Err(WorkflowError::MissingComplete(name)) if name == "open"
        ));
        assert!(matches!(
            table.steps("missing"),
            Err(WorkflowError::UnknownWorkflow(_))
        ));
    }

    #[test]
    fn test_table_from_json() {
        let table = WorkflowTable::from_json(
            r#"[{"workflow": "smite", "workflowSteps": ["start", "attack", "damage", "complete"]}]"#,
        )
        .unwrap();
        assert_eq!(table.steps("smite").unwrap().len(), 4);

        assert!(matches!(
            WorkflowTable::from_json("{not json"),
            Err(WorkflowError::Parse(_))
        ));
    }

    #[test]
    fn test_step_error_types() {
        assert_eq!(StepError::MissingInput("dc".into()).error_type(), "missingInput");
        assert_eq!(StepError::Dice(DiceError::NoDice).error_type(), "dice");
    }
}
