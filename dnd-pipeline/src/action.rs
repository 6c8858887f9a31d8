//! Action types and the dialog input that drives a workflow run.

use crate::actor::{Ability, ActorId};
use crate::dice::Advantage;
use crate::modifier::ModifierInput;
use crate::resolve::{CheckType, CriticalRange};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// The kinds of roll the pipeline builds. Also used as the dialog type
/// features declare they affect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionType {
    Attack,
    Damage,
    Save,
    Skill,
    Ability,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Attack => "attack",
            ActionType::Damage => "damage",
            ActionType::Save => "save",
            ActionType::Skill => "skill",
            ActionType::Ability => "ability",
        }
    }

    /// Everything but damage is a d20 roll.
    pub fn is_d20(&self) -> bool {
        !matches!(self, ActionType::Damage)
    }

    pub fn check_type(&self) -> Option<CheckType> {
        match self {
            ActionType::Attack => Some(CheckType::Attack),
            ActionType::Damage => None,
            ActionType::Save => Some(CheckType::Save),
            ActionType::Skill => Some(CheckType::Skill),
            ActionType::Ability => Some(CheckType::Ability),
        }
    }

    /// Workflow step id under which pool-mutating features register.
    pub fn pool_feature_step(&self) -> String {
        format!("base-dice-pool-features-{}", self.as_str())
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "attack" => Ok(ActionType::Attack),
            "damage" => Ok(ActionType::Damage),
            "save" => Ok(ActionType::Save),
            "skill" => Ok(ActionType::Skill),
            "ability" => Ok(ActionType::Ability),
            other => Err(format!("unknown action type '{other}'")),
        }
    }
}

/// Per-instance feature settings supplied by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureData {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

fn enabled_by_default() -> bool {
    true
}

impl Default for FeatureData {
    fn default() -> Self {
        Self {
            enabled: true,
            fields: Map::new(),
        }
    }
}

impl FeatureData {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }
}

/// Dialog choices for one roll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollOptions {
    #[serde(default)]
    pub modifiers: Vec<ModifierInput>,
    #[serde(default)]
    pub advantage: bool,
    #[serde(default)]
    pub disadvantage: bool,
    #[serde(default)]
    pub critical_range: Option<CriticalRange>,
    #[serde(default)]
    pub critical_failure_range: Option<CriticalRange>,
}

impl RollOptions {
    pub fn advantage_mode(&self) -> Advantage {
        Advantage::from_flags(self.advantage, self.disadvantage)
    }
}

/// Everything the roll dialog hands the pipeline, consumed verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogState {
    /// The acting character.
    pub actor: ActorId,
    #[serde(default)]
    pub targets: Vec<ActorId>,
    #[serde(default)]
    pub rolls: BTreeMap<ActionType, RollOptions>,
    /// DC for saves, skill and ability checks.
    #[serde(default)]
    pub dc: Option<i32>,
    #[serde(default)]
    pub save_ability: Option<Ability>,
    #[serde(default)]
    pub skill: Option<String>,
    #[serde(default)]
    pub check_ability: Option<Ability>,
    /// Weapon or spell damage type; untyped damage modifiers fall into it.
    #[serde(default)]
    pub base_damage_type: Option<String>,
    /// Overrides the configured half-damage-on-save rule.
    #[serde(default)]
    pub half_on_save: Option<bool>,
    /// Feature data keyed by feature id.
    #[serde(default)]
    pub features: HashMap<String, FeatureData>,
    /// Set when the user dismissed the dialog.
    #[serde(default)]
    pub cancelled: bool,
}

impl DialogState {
    pub fn new(actor: ActorId) -> Self {
        Self {
            actor,
            targets: Vec::new(),
            rolls: BTreeMap::new(),
            dc: None,
            save_ability: None,
            skill: None,
            check_ability: None,
            base_damage_type: None,
            half_on_save: None,
            features: HashMap::new(),
            cancelled: false,
        }
    }

    pub fn with_target(mut self, target: ActorId) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_modifier(mut self, action: ActionType, input: ModifierInput) -> Self {
        self.rolls.entry(action).or_default().modifiers.push(input);
        self
    }

    pub fn with_advantage(mut self, action: ActionType) -> Self {
        self.rolls.entry(action).or_default().advantage = true;
        self
    }

    pub fn with_disadvantage(mut self, action: ActionType) -> Self {
        self.rolls.entry(action).or_default().disadvantage = true;
        self
    }

    pub fn with_dc(mut self, dc: i32) -> Self {
        self.dc = Some(dc);
        self
    }

    pub fn with_save_ability(mut self, ability: Ability) -> Self {
        self.save_ability = Some(ability);
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skill = Some(skill.into());
        self
    }

    pub fn with_check_ability(mut self, ability: Ability) -> Self {
        self.check_ability = Some(ability);
        self
    }

    pub fn with_damage_type(mut self, damage_type: impl Into<String>) -> Self {
        self.base_damage_type = Some(damage_type.into());
        self
    }

    pub fn with_feature(mut self, id: impl Into<String>, data: FeatureData) -> Self {
        self.features.insert(id.into(), data);
        self
    }

    /// Roll options for an action, or defaults when the dialog had none.
    pub fn roll(&self, action: ActionType) -> RollOptions {
        self.rolls.get(&action).cloned().unwrap_or_default()
    }

    /// Feature data for an id; missing entries default to enabled.
    pub fn feature_data(&self, id: &str) -> FeatureData {
        self.features.get(id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_strings() {
        for action in [
            ActionType::Attack,
            ActionType::Damage,
            ActionType::Save,
            ActionType::Skill,
            ActionType::Ability,
        ] {
            assert_eq!(action.as_str().parse::<ActionType>(), Ok(action));
        }
        assert!("spell".parse::<ActionType>().is_err());
        assert_eq!(
            ActionType::Damage.pool_feature_step(),
            "base-dice-pool-features-damage"
        );
    }

    #[test]
    fn test_dialog_deserializes_with_defaults() {
        let actor = ActorId::new();
        let json = serde_json::json!({
            "actor": actor,
            "rolls": {
                "attack": {
                    "modifiers": [{ "modifierName": "Proficiency", "modifier": "2" }],
                    "advantage": true,
                    "disadvantage": true
                }
            },
            "features": { "sneak-attack": { "enabled": false } }
        });
        let dialog: DialogState = serde_json::from_value(json).unwrap();
        let attack = dialog.roll(ActionType::Attack);
        assert_eq!(attack.modifiers.len(), 1);
        assert!(attack.modifiers[0].is_enabled);
        assert_eq!(attack.advantage_mode(), Advantage::Normal);
        assert!(!dialog.feature_data("sneak-attack").enabled);
        assert!(dialog.feature_data("bless").enabled);
    }
}
