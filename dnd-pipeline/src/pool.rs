//! Dice pool builder.
//!
//! Compiles dialog and feature modifiers into one canonical formula:
//! 1. Tokenize every enabled modifier input into terms
//! 2. Append terms contributed by features registered for the action's pool step
//! 3. Rewrite the base d20 for advantage or disadvantage
//! 4. Merge same-size dice and flat numbers, then format
//!
//! Terms stay structured until the final formatting step. Damage pools are
//! grouped by damage type into `(<expr>)[<type>]` segments.

use crate::action::{ActionType, DialogState};
use crate::actor::Actor;
use crate::dice::Advantage;
use crate::feature::{FeatureContext, FeatureRegistry};
use crate::modifier::{tokenize, tokenize_all, Element, ModifierInput, ModifierTerm};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// An ordered sequence of terms for one formula context.
pub type DicePool = Vec<ModifierTerm>;

/// What to build and for whom.
#[derive(Debug, Clone, Copy)]
pub struct PoolRequest<'a> {
    pub action: ActionType,
    pub advantage: Advantage,
    /// Type assigned to untyped damage terms.
    pub base_damage_type: Option<&'a str>,
    /// Double every damage die.
    pub critical: bool,
    /// Actor and dialog used to look up features. Without them no features
    /// are applied.
    pub actor: Option<&'a Actor>,
    pub dialog: Option<&'a DialogState>,
}

impl<'a> PoolRequest<'a> {
    pub fn new(action: ActionType) -> Self {
        Self {
            action,
            advantage: Advantage::Normal,
            base_damage_type: None,
            critical: false,
            actor: None,
            dialog: None,
        }
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    pub fn with_damage_type(mut self, damage_type: Option<&'a str>) -> Self {
        self.base_damage_type = damage_type;
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn for_actor(mut self, actor: &'a Actor, dialog: &'a DialogState) -> Self {
        self.actor = Some(actor);
        self.dialog = Some(dialog);
        self
    }
}

/// One damage-type segment of a damage formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DamageGroup {
    pub damage_type: String,
    pub expression: String,
}

/// A feature that declined to apply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVeto {
    pub feature_id: String,
    pub reason: String,
}

/// Output of the builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltPool {
    pub action: ActionType,
    pub base_pool: DicePool,
    pub formula: String,
    /// Per-type segments (damage only).
    pub groups: Vec<DamageGroup>,
    pub vetoes: Vec<FeatureVeto>,
}

/// Builds dice pools, consulting the feature registry.
pub struct DicePoolBuilder<'r> {
    registry: &'r FeatureRegistry,
}

impl<'r> DicePoolBuilder<'r> {
    pub fn new(registry: &'r FeatureRegistry) -> Self {
        Self { registry }
    }

    pub fn build(&self, inputs: &[ModifierInput], request: &PoolRequest<'_>) -> BuiltPool {
        let mut pool = DicePool::new();
        if request.action.is_d20() {
            pool.push(ModifierTerm::new(
                Element::Dice {
                    quantity: 1,
                    faces: 20,
                },
                "Base",
            ));
        }
        pool.extend(tokenize_all(inputs));

        let vetoes = self.apply_features(&mut pool, request);

        let (formula, groups) = if request.action.is_d20() {
            apply_advantage(&mut pool, request.advantage);
            (assemble_check(&pool), Vec::new())
        } else {
            if request.critical {
                double_dice(&mut pool);
            }
            let groups = group_damage(&pool, request.base_damage_type.unwrap_or(""));
            (assemble_damage(&groups, request.advantage), groups)
        };

        debug!(action = %request.action, formula = %formula, terms = pool.len(), "built dice pool");

        BuiltPool {
            action: request.action,
            base_pool: pool,
            formula,
            groups,
            vetoes,
        }
    }

    fn apply_features(&self, pool: &mut DicePool, request: &PoolRequest<'_>) -> Vec<FeatureVeto> {
        let mut vetoes = Vec::new();
        let (Some(actor), Some(dialog)) = (request.actor, request.dialog) else {
            return vetoes;
        };

        let step = request.action.pool_feature_step();
        for feature in self.registry.features_for_workflow_step(&step) {
            let meta = feature.meta();
            if !feature.affects_dialog_type(request.action)
                || !self.registry.is_feature_available(actor, &meta.id)
            {
                continue;
            }

            let data = dialog.feature_data(&meta.id);
            let ctx = FeatureContext {
                actor,
                dialog_type: request.action,
                dialog_state: dialog,
                feature_data: &data,
            };

            if data.enabled {
                if let Err(reason) = feature.validation_logic(&ctx) {
                    warn!(feature = %meta.id, reason = %reason, "feature vetoed");
                    vetoes.push(FeatureVeto {
                        feature_id: meta.id.clone(),
                        reason,
                    });
                    continue;
                }
            }

            for input in feature.roll_modifiers(&ctx) {
                pool.extend(tokenize(&input, Some(&meta.name)));
            }
        }
        vetoes
    }
}

/// Rewrite the first single d20 for advantage or disadvantage.
fn apply_advantage(pool: &mut DicePool, advantage: Advantage) {
    if advantage == Advantage::Normal {
        return;
    }
    if let Some(term) = pool.iter_mut().find(|t| {
        t.element
            == Element::Dice {
                quantity: 1,
                faces: 20,
            }
    }) {
        term.element = Element::Paired {
            advantage,
            faces: 20,
        };
    }
}

fn double_dice(pool: &mut DicePool) {
    for term in pool.iter_mut() {
        if let Element::Dice { quantity, .. } = &mut term.element {
            *quantity = quantity.saturating_mul(2);
        }
    }
}

/// Merge terms into `<dice>±<number>` with dice in descending face order.
fn merge_expression<'a>(terms: impl IntoIterator<Item = &'a ModifierTerm>) -> String {
    let mut paired: BTreeMap<u32, Vec<Element>> = BTreeMap::new();
    let mut dice: BTreeMap<u32, i32> = BTreeMap::new();
    let mut number: i32 = 0;

    for term in terms {
        match term.element {
            Element::Number(n) => match number.checked_add(n) {
                Some(sum) => number = sum,
                None => debug!(modifier = %term.modifier_name, "dropping overflowing number"),
            },
            Element::Dice { quantity, faces } => {
                let count = dice.entry(faces).or_insert(0);
                match count.checked_add(quantity) {
                    Some(sum) => *count = sum,
                    None => debug!(modifier = %term.modifier_name, "dropping overflowing dice"),
                }
            }
            paired_die @ Element::Paired { faces, .. } => {
                paired.entry(faces).or_default().push(paired_die)
            }
        }
    }

    let faces: BTreeSet<u32> = paired.keys().chain(dice.keys()).copied().collect();
    let mut parts: Vec<Element> = Vec::new();
    for face in faces.into_iter().rev() {
        if let Some(list) = paired.remove(&face) {
            parts.extend(list);
        }
        match dice.get(&face) {
            Some(&quantity) if quantity != 0 => parts.push(Element::Dice {
                quantity,
                faces: face,
            }),
            _ => {}
        }
    }
    if number != 0 {
        parts.push(Element::Number(number));
    }

    let mut expression = String::new();
    for part in parts {
        let text = part.to_string();
        if !expression.is_empty() && !text.starts_with('-') {
            expression.push('+');
        }
        expression.push_str(&text);
    }
    expression
}

fn assemble_check(pool: &DicePool) -> String {
    let expression = merge_expression(pool);
    if expression.is_empty() {
        "1d20".to_string()
    } else {
        expression
    }
}

/// Group by damage type: base type first, the rest alphabetically.
fn group_damage(pool: &DicePool, base_type: &str) -> Vec<DamageGroup> {
    let mut by_type: BTreeMap<&str, Vec<&ModifierTerm>> = BTreeMap::new();
    for term in pool {
        let damage_type = if term.modifier_type.is_empty() {
            base_type
        } else {
            term.modifier_type.as_str()
        };
        by_type.entry(damage_type).or_default().push(term);
    }

    let mut ordered: Vec<(&str, Vec<&ModifierTerm>)> = Vec::new();
    if let Some(base) = by_type.remove(base_type) {
        ordered.push((base_type, base));
    }
    ordered.extend(by_type);

    ordered
        .into_iter()
        .filter_map(|(damage_type, terms)| {
            let expression = merge_expression(terms);
            (!expression.is_empty()).then(|| DamageGroup {
                damage_type: damage_type.to_string(),
                expression,
            })
        })
        .collect()
}

fn assemble_damage(groups: &[DamageGroup], advantage: Advantage) -> String {
    let formula = match groups {
        [] => return "0".to_string(),
        [only] if only.damage_type.is_empty() => only.expression.clone(),
        _ => groups
            .iter()
            .map(|g| {
                if g.damage_type.is_empty() {
                    format!("({})", g.expression)
                } else {
                    format!("({})[{}]", g.expression, g.damage_type)
                }
            })
            .collect::<Vec<_>>()
            .join("+"),
    };

    match advantage.function() {
        Some(func) => format!("{func}({formula},{formula})"),
        None => formula,
    }
}

/// Merge loose dice and number tokens into one canonical expression,
/// e.g. `["1d8","1d4","1d4","1d6","4d6"]` becomes `1d8+5d6+2d4`.
pub fn combine_dice<S: AsRef<str>>(tokens: &[S]) -> String {
    let terms: Vec<ModifierTerm> = tokens
        .iter()
        .flat_map(|t| tokenize(&ModifierInput::new("", t.as_ref()), None))
        .collect();
    merge_expression(&terms)
}
