//! Optional character features that hook into the pipeline.
//!
//! A feature is granted by a trait or feat with the same name, or by an
//! equipped item flagged with the feature's id. Once granted it can add
//! modifiers to the dice pools of the steps it declares, veto its own use,
//! and widen or replace critical ranges.

pub mod builtin;

use crate::action::{ActionType, DialogState, FeatureData};
use crate::actor::Actor;
use crate::modifier::ModifierInput;
use crate::resolve::{CheckType, CriticalModification};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from feature registration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FeatureError {
    #[error("Feature '{0}' is already registered")]
    Duplicate(String),
}

/// Static description of a feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMeta {
    pub id: String,
    /// Matched exactly against actor trait names.
    pub name: String,
    pub description: String,
    /// Dialog types the feature applies to.
    pub affects: Vec<ActionType>,
    pub workflow_steps: Vec<String>,
    /// Triggered in response to another creature's action.
    pub is_reactive: bool,
    /// Where the dialog layer should place the feature's controls.
    pub injection_type: HashMap<ActionType, String>,
    pub critical_modifications: Vec<CriticalModification>,
}

impl FeatureMeta {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            affects: Vec::new(),
            workflow_steps: Vec::new(),
            is_reactive: false,
            injection_type: HashMap::new(),
            critical_modifications: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Affect a dialog type and register for its pool step.
    pub fn affecting(mut self, action: ActionType) -> Self {
        self.affects.push(action);
        self.workflow_steps.push(action.pool_feature_step());
        self.injection_type.insert(action, "checkbox".to_string());
        self
    }

    pub fn with_critical_modification(mut self, modification: CriticalModification) -> Self {
        self.critical_modifications.push(modification);
        self
    }

    pub fn reactive(mut self) -> Self {
        self.is_reactive = true;
        self
    }
}

/// What a feature sees when invoked.
#[derive(Debug, Clone, Copy)]
pub struct FeatureContext<'a> {
    pub actor: &'a Actor,
    pub dialog_type: ActionType,
    pub dialog_state: &'a DialogState,
    pub feature_data: &'a FeatureData,
}

/// A pluggable character feature.
pub trait Feature: Send + Sync {
    fn meta(&self) -> &FeatureMeta;

    fn affects_dialog_type(&self, dialog_type: ActionType) -> bool {
        self.meta().affects.contains(&dialog_type)
    }

    fn affects_workflow_step(&self, step: &str) -> bool {
        self.meta().workflow_steps.iter().any(|s| s == step)
    }

    /// Modifiers to add to the pool. Must be empty when the feature data is
    /// disabled.
    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput>;

    /// `Err(reason)` declines use of the feature for this roll.
    fn validation_logic(&self, _ctx: &FeatureContext<'_>) -> Result<(), String> {
        Ok(())
    }
}

/// Features known to the pipeline, in registration order.
#[derive(Default, Clone)]
pub struct FeatureRegistry {
    features: Vec<Arc<dyn Feature>>,
    by_id: HashMap<String, usize>,
}

impl FeatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in feature.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for feature in builtin::all() {
            // Built-in ids are unique.
            let _ = registry.register_arc(feature);
        }
        registry
    }

    pub fn register(&mut self, feature: impl Feature + 'static) -> Result<(), FeatureError> {
        self.register_arc(Arc::new(feature))
    }

    pub fn register_arc(&mut self, feature: Arc<dyn Feature>) -> Result<(), FeatureError> {
        let id = feature.meta().id.clone();
        if self.by_id.contains_key(&id) {
            return Err(FeatureError::Duplicate(id));
        }
        self.by_id.insert(id, self.features.len());
        self.features.push(feature);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Feature>> {
        self.by_id.get(id).map(|&i| &self.features[i])
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features_for_workflow_step(&self, step: &str) -> Vec<Arc<dyn Feature>> {
        self.features
            .iter()
            .filter(|f| f.affects_workflow_step(step))
            .cloned()
            .collect()
    }

    pub fn features_by_actor_and_dialog(
        &self,
        actor: &Actor,
        dialog_type: ActionType,
    ) -> Vec<Arc<dyn Feature>> {
        self.features
            .iter()
            .filter(|f| f.affects_dialog_type(dialog_type) && Self::grants(actor, f.as_ref()))
            .cloned()
            .collect()
    }

    /// Exact trait-name match, or a truthy equipped-item flag keyed by id.
    pub fn is_feature_available(&self, actor: &Actor, id: &str) -> bool {
        self.get(id)
            .is_some_and(|f| Self::grants(actor, f.as_ref()))
    }

    fn grants(actor: &Actor, feature: &dyn Feature) -> bool {
        let meta = feature.meta();
        actor.has_trait(&meta.name) || actor.has_equipped_flag(&meta.id)
    }

    /// Critical-range modifications from features the actor has enabled,
    /// in registration order.
    pub fn critical_modifications(
        &self,
        actor: &Actor,
        check: CheckType,
        dialog: &DialogState,
    ) -> Vec<CriticalModification> {
        self.features
            .iter()
            .filter(|f| Self::grants(actor, f.as_ref()))
            .filter(|f| dialog.feature_data(&f.meta().id).enabled)
            .flat_map(|f| f.meta().critical_modifications.clone())
            .filter(|m| m.applies_to(check))
            .collect()
    }
}

impl std::fmt::Debug for FeatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.features.iter().map(|feat| &feat.meta().id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorId, Item};

    struct Lucky {
        meta: FeatureMeta,
    }

    impl Feature for Lucky {
        fn meta(&self) -> &FeatureMeta {
            &self.meta
        }

        fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
            if !ctx.feature_data.enabled {
                return Vec::new();
            }
            vec![ModifierInput::new("Lucky", "1")]
        }
    }

    fn lucky() -> Lucky {
        Lucky {
            meta: FeatureMeta::new("lucky", "Lucky").affecting(ActionType::Skill),
        }
    }

    #[test]
    fn test_register_rejects_duplicates() {
        let mut registry = FeatureRegistry::new();
        registry.register(lucky()).unwrap();
        assert_eq!(
            registry.register(lucky()),
            Err(FeatureError::Duplicate("lucky".to_string()))
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_by_step_and_dialog() {
        let mut registry = FeatureRegistry::with_builtin();
        registry.register(lucky()).unwrap();

        let step = ActionType::Skill.pool_feature_step();
        let ids: Vec<String> = registry
            .features_for_workflow_step(&step)
            .iter()
            .map(|f| f.meta().id.clone())
            .collect();
        assert_eq!(ids, vec!["lucky"]);

        let halfling = Actor::new("Pip").with_trait("Lucky");
        assert_eq!(
            registry
                .features_by_actor_and_dialog(&halfling, ActionType::Skill)
                .len(),
            1
        );
        assert!(registry
            .features_by_actor_and_dialog(&halfling, ActionType::Attack)
            .is_empty());
    }

    #[test]
    fn test_availability_rules() {
        let registry = FeatureRegistry::with_builtin();
        let rogue = Actor::new("Vex").with_trait("Sneak Attack");
        assert!(registry.is_feature_available(&rogue, "sneak-attack"));
        assert!(!registry.is_feature_available(&rogue, "rage"));
        assert!(!registry.is_feature_available(&rogue, "no-such-feature"));

        let lowercase = Actor::new("Vex").with_trait("sneak attack");
        assert!(!registry.is_feature_available(&lowercase, "sneak-attack"));

        let wielder = Actor::new("Aria")
            .with_item(Item::new("Flame Tongue Longsword").with_flag("flame-tongue", true));
        assert!(registry.is_feature_available(&wielder, "flame-tongue"));

        let stowed = Actor::new("Aria").with_item(
            Item::new("Flame Tongue Longsword")
                .with_flag("flame-tongue", true)
                .unequipped(),
        );
        assert!(!registry.is_feature_available(&stowed, "flame-tongue"));
    }

    #[test]
    fn test_critical_modifications_respect_enabled() {
        let registry = FeatureRegistry::with_builtin();
        let champion = Actor::new("Roland").with_trait("Improved Critical");
        let dialog = DialogState::new(ActorId::new());

        let mods = registry.critical_modifications(&champion, CheckType::Attack, &dialog);
        assert_eq!(mods.len(), 1);
        assert!(registry
            .critical_modifications(&champion, CheckType::Skill, &dialog)
            .is_empty());

        let dialog = dialog.with_feature("improved-critical", FeatureData::disabled());
        assert!(registry
            .critical_modifications(&champion, CheckType::Attack, &dialog)
            .is_empty());
    }

    struct Shield {
        meta: FeatureMeta,
    }

    impl Feature for Shield {
        fn meta(&self) -> &FeatureMeta {
            &self.meta
        }

        fn roll_modifiers(&self, _ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
            Vec::new()
        }
    }

    #[test]
    fn test_reactive_feature_metadata() {
        let shield = Shield {
            meta: FeatureMeta::new("shield", "Shield")
                .with_description("+5 AC until the start of your next turn")
                .reactive(),
        };
        assert!(shield.meta().is_reactive);
        assert!(!lucky().meta().is_reactive);

        let mut registry = FeatureRegistry::new();
        registry.register(shield).unwrap();
        assert!(registry.get("shield").unwrap().meta().is_reactive);
    }
}
