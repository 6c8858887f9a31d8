//! The record threaded through a workflow run.

use super::{WorkflowError, WorkflowTable};
use crate::action::{ActionType, DialogState};
use crate::actor::{Actor, ActorId};
use crate::dice::Evaluation;
use crate::pool::BuiltPool;
use crate::resolve::Resolution;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An error recorded during a run. Fatal step errors and non-fatal warnings
/// both land here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEntry {
    #[serde(rename = "type")]
    pub error_type: String,
    pub message: String,
    pub step: String,
    pub timestamp: DateTime<Utc>,
}

/// Damage of one type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypedDamage {
    pub damage_type: String,
    pub amount: i32,
}

/// Damage after saves and defenses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageApplication {
    pub rolled: i32,
    pub applied: i32,
    pub halved_by_save: bool,
    pub by_type: Vec<TypedDamage>,
}

/// Per-target outcome accumulated across chained steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetOutcome {
    pub actor_id: ActorId,
    pub name: String,
    /// The target could not be looked up; no rolls are made against it.
    pub lookup_failed: bool,
    #[serde(skip)]
    pub actor: Option<Actor>,
    pub attack: Option<Resolution>,
    pub save: Option<Resolution>,
    pub damage: Vec<TypedDamage>,
    pub applied: Option<DamageApplication>,
}

impl TargetOutcome {
    pub fn found(actor: Actor) -> Self {
        Self {
            actor_id: actor.id,
            name: actor.name.clone(),
            lookup_failed: false,
            actor: Some(actor),
            attack: None,
            save: None,
            damage: Vec::new(),
            applied: None,
        }
    }

    /// Stand-in for a target whose lookup failed.
    pub fn placeholder(actor_id: ActorId) -> Self {
        Self {
            actor_id,
            name: "Unknown target".to_string(),
            lookup_failed: true,
            actor: None,
            attack: None,
            save: None,
            damage: Vec::new(),
            applied: None,
        }
    }

    pub fn damage_total(&self) -> i32 {
        self.damage
            .iter()
            .fold(0i32, |sum, d| sum.saturating_add(d.amount))
    }
}

/// One evaluated roll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollRecord {
    pub action: ActionType,
    pub step: String,
    /// Who rolled; `None` when the roller could not be looked up.
    pub roller: Option<ActorId>,
    pub target: Option<ActorId>,
    pub critical: bool,
    pub evaluation: Evaluation,
    pub resolution: Option<Resolution>,
}

/// State of one action moving through its workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub id: Uuid,
    pub workflow_type: String,
    pub steps: Vec<String>,
    pub chain_number: usize,
    pub chain_length: usize,
    pub dialog_state: DialogState,
    /// The acting character, filled in by `start`.
    #[serde(skip)]
    pub actor: Option<Actor>,
    pub dice_pools: Vec<BuiltPool>,
    pub results: Vec<RollRecord>,
    pub targets: Vec<TargetOutcome>,
    pub errors: Vec<ErrorEntry>,
    pub cancelled: bool,
}

impl ActionState {
    /// Fails if the workflow is unknown or its step list is malformed.
    pub fn new(
        workflow: &str,
        table: &WorkflowTable,
        dialog_state: DialogState,
    ) -> Result<Self, WorkflowError> {
        let steps = table.steps(workflow)?.to_vec();
        Ok(Self {
            id: Uuid::new_v4(),
            workflow_type: workflow.to_string(),
            chain_length: steps.len(),
            steps,
            chain_number: 0,
            cancelled: dialog_state.cancelled,
            dialog_state,
            actor: None,
            dice_pools: Vec::new(),
            results: Vec::new(),
            targets: Vec::new(),
            errors: Vec::new(),
        })
    }

    pub fn current_step(&self) -> &str {
        &self.steps[self.chain_number]
    }

    /// Advance one step. Stays put on the last step.
    pub fn next_step(&mut self) {
        if self.chain_number + 1 < self.chain_length {
            self.chain_number += 1;
        }
    }

    pub fn is_complete(&self) -> bool {
        self.current_step() == "complete"
    }

    /// Whether the workflow runs a given step at any point.
    pub fn has_step(&self, step: &str) -> bool {
        self.steps.iter().any(|s| s == step)
    }

    /// Record an error against the current step.
    pub fn record_error(&mut self, error_type: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ErrorEntry {
            error_type: error_type.into(),
            message: message.into(),
            step: self.current_step().to_string(),
            timestamp: Utc::now(),
        });
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn target_mut(&mut self, id: ActorId) -> Option<&mut TargetOutcome> {
        self.targets.iter_mut().find(|t| t.actor_id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::BUILTIN_WORKFLOWS;

    fn state(workflow: &str) -> ActionState {
        ActionState::new(workflow, &BUILTIN_WORKFLOWS, DialogState::new(ActorId::new())).unwrap()
    }

    #[test]
    fn test_next_step_is_idempotent_at_end() {
        let mut state = state("attack");
        assert_eq!(state.current_step(), "start");
        assert!(!state.is_complete());

        state.next_step();
        assert_eq!(state.current_step(), "attack");
        state.next_step();
        assert_eq!(state.current_step(), "complete");
        assert!(state.is_complete());

        state.next_step();
        state.next_step();
        assert_eq!(state.chain_number, 2);
        assert!(state.is_complete());
    }

    #[test]
    fn test_unknown_workflow_is_rejected() {
        let err = ActionState::new("fireball", &BUILTIN_WORKFLOWS, DialogState::new(ActorId::new()))
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownWorkflow(name) if name == "fireball"));
    }

    #[test]
    fn test_record_error_uses_current_step() {
        let mut state = state("attack-damage");
        state.next_step();
        state.record_error("lookup", "target vanished");
        assert_eq!(state.errors[0].step, "attack");
        assert_eq!(state.errors[0].error_type, "lookup");

        let json = serde_json::to_value(&state.errors[0]).unwrap();
        assert_eq!(json["type"], "lookup");
    }

    #[test]
    fn test_cancelled_dialog_starts_cancelled() {
        let mut dialog = DialogState::new(ActorId::new());
        dialog.cancelled = true;
        let state = ActionState::new("save", &BUILTIN_WORKFLOWS, dialog).unwrap();
        assert!(state.cancelled);
    }
}
