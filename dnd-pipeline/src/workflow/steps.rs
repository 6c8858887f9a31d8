//! Built-in step handlers.
//!
//! - `start` looks up the acting actor and the targets
//! - `attack`, `save`, `skill`, `ability` build a d20 pool, roll it and classify it
//! - `damage` rolls damage for eligible targets
//! - `applyDamage` applies saves, resistances, immunities and vulnerabilities
//! - `complete` closes the run

use super::state::{ActionState, DamageApplication, RollRecord, TargetOutcome, TypedDamage};
use super::{finish, PipelineContext, Step, StepError, StepResult};
use crate::action::{ActionType, DialogState};
use crate::actor::{Actor, ActorId};
use crate::dice::Evaluation;
use crate::modifier::ModifierInput;
use crate::pool::{DicePoolBuilder, PoolRequest};
use crate::resolve::{ClassifyOptions, Resolution};
use async_trait::async_trait;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Damage type used when a roll has no base type.
pub const UNTYPED: &str = "untyped";

/// A d20 roll to build, evaluate and optionally classify.
struct CheckRoll<'a> {
    action: ActionType,
    roller: Option<&'a Actor>,
    inputs: Vec<ModifierInput>,
    target_number: Option<i32>,
    target: Option<ActorId>,
}

async fn roll_check(
    state: &mut ActionState,
    ctx: &PipelineContext,
    roll: CheckRoll<'_>,
) -> Result<Option<Resolution>, StepError> {
    let check = roll
        .action
        .check_type()
        .ok_or_else(|| StepError::Failed(format!("'{}' is not a d20 roll", roll.action)))?;
    let dialog = &state.dialog_state;
    let options = dialog.roll(roll.action);

    let mut inputs = roll.inputs;
    inputs.extend(options.modifiers.iter().cloned());

    let mut request = PoolRequest::new(roll.action).with_advantage(options.advantage_mode());
    if let Some(actor) = roll.roller {
        request = request.for_actor(actor, dialog);
    }
    let pool = DicePoolBuilder::new(&ctx.registry).build(&inputs, &request);
    let evaluation = ctx.roller.evaluate(&pool.formula).await?;

    let resolution = roll.target_number.map(|target_number| {
        let classify = ClassifyOptions {
            critical_range: options.critical_range,
            critical_failure_range: options.critical_failure_range,
            modifications: roll
                .roller
                .map(|actor| ctx.registry.critical_modifications(actor, check, dialog))
                .unwrap_or_default(),
        };
        ctx.resolver.classify(
            evaluation.total,
            evaluation.natural.unwrap_or(0),
            target_number,
            check,
            &classify,
        )
    });

    debug!(
        action = %roll.action,
        formula = %pool.formula,
        total = evaluation.total,
        success = ?resolution.as_ref().map(|r| r.success),
        "Rolled check"
    );

    let record = RollRecord {
        action: roll.action,
        step: state.current_step().to_string(),
        roller: roll.roller.map(|a| a.id),
        target: roll.target,
        critical: false,
        evaluation,
        resolution: resolution.clone(),
    };
    state.dice_pools.push(pool);
    state.results.push(record);
    Ok(resolution)
}

/// Split an evaluation into typed amounts, base type first.
pub fn typed_damage(evaluation: &Evaluation, base_type: Option<&str>) -> Vec<TypedDamage> {
    let base = base_type.unwrap_or(UNTYPED).to_lowercase();
    let mut totals: HashMap<String, i32> = evaluation
        .typed_totals
        .iter()
        .map(|(t, amount)| (t.clone(), *amount))
        .collect();
    let untyped = evaluation.untyped_total();
    if untyped != 0 {
        let entry = totals.entry(base.clone()).or_insert(0);
        *entry = entry.saturating_add(untyped);
    }

    let mut damage = Vec::new();
    if let Some(amount) = totals.remove(&base) {
        damage.push(TypedDamage {
            damage_type: base,
            amount: amount.max(0),
        });
    }
    let mut rest: Vec<(String, i32)> = totals.into_iter().collect();
    rest.sort();
    damage.extend(rest.into_iter().map(|(damage_type, amount)| TypedDamage {
        damage_type,
        amount: amount.max(0),
    }));
    damage
}

/// Adjust one typed amount for a save and the target's defenses.
pub fn adjust_damage(amount: i32, damage_type: &str, target: Option<&Actor>, halved: bool) -> i32 {
    let mut amount = if halved { amount / 2 } else { amount };
    if let Some(target) = target {
        if listed(&target.immunities, damage_type) {
            return 0;
        }
        if listed(&target.resistances, damage_type) {
            amount /= 2;
        }
        if listed(&target.vulnerabilities, damage_type) {
            amount = amount.saturating_mul(2);
        }
    }
    amount
}

fn listed(damage_types: &[String], damage_type: &str) -> bool {
    damage_types
        .iter()
        .any(|t| t.eq_ignore_ascii_case(damage_type))
}

async fn roll_damage(
    state: &mut ActionState,
    ctx: &PipelineContext,
    dialog: &DialogState,
    actor: Option<&Actor>,
    critical: bool,
) -> Result<Vec<TypedDamage>, StepError> {
    let options = dialog.roll(ActionType::Damage);
    let base_type = dialog.base_damage_type.as_deref();
    let mut request = PoolRequest::new(ActionType::Damage)
        .with_advantage(options.advantage_mode())
        .with_damage_type(base_type)
        .critical(critical);
    if let Some(actor) = actor {
        request = request.for_actor(actor, dialog);
    }

    let pool = DicePoolBuilder::new(&ctx.registry).build(&options.modifiers, &request);
    let evaluation = ctx.roller.evaluate(&pool.formula).await?;
    let damage = typed_damage(&evaluation, base_type);
    debug!(formula = %pool.formula, total = evaluation.total, critical, "Rolled damage");

    let record = RollRecord {
        action: ActionType::Damage,
        step: state.current_step().to_string(),
        roller: actor.map(|a| a.id),
        target: None,
        critical,
        evaluation,
        resolution: None,
    };
    state.dice_pools.push(pool);
    state.results.push(record);
    Ok(damage)
}

/// Looks up the acting actor and every target. Failed lookups become
/// placeholder targets with a non-fatal error entry.
pub struct Start;

#[async_trait]
impl Step for Start {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let actor_id = state.dialog_state.actor;
        match ctx.actors.actor(actor_id).await {
            Ok(actor) => state.actor = Some(actor),
            Err(err) => {
                warn!(actor = %actor_id, error = %err, "Acting actor lookup failed");
                state.record_error("lookup", err.to_string());
            }
        }

        let target_ids = state.dialog_state.targets.clone();
        for id in target_ids {
            match ctx.actors.actor(id).await {
                Ok(target) => state.targets.push(TargetOutcome::found(target)),
                Err(err) => {
                    warn!(target = %id, error = %err, "Target lookup failed, using placeholder");
                    state.record_error("lookup", err.to_string());
                    state.targets.push(TargetOutcome::placeholder(id));
                }
            }
        }
        Ok(state)
    }
}

/// One attack roll per target against its armor class.
pub struct Attack;

async fn attack(state: &mut ActionState, ctx: &PipelineContext) -> Result<(), StepError> {
    if state.targets.is_empty() {
        state.record_error("noTargets", "Attack has no targets");
        return Ok(());
    }

    let actor = state.actor.clone();
    let targets: Vec<(ActorId, Option<i32>)> = state
        .targets
        .iter()
        .map(|t| (t.actor_id, t.actor.as_ref().map(|a| a.armor_class)))
        .collect();

    for (id, armor_class) in targets {
        let Some(armor_class) = armor_class else {
            debug!(target = %id, "Skipping attack against unresolved target");
            continue;
        };
        let resolution = roll_check(
            state,
            ctx,
            CheckRoll {
                action: ActionType::Attack,
                roller: actor.as_ref(),
                inputs: Vec::new(),
                target_number: Some(armor_class),
                target: Some(id),
            },
        )
        .await?;
        if let Some(target) = state.target_mut(id) {
            target.attack = resolution;
        }
    }
    Ok(())
}

#[async_trait]
impl Step for Attack {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let outcome = attack(&mut state, ctx).await;
        finish(state, outcome)
    }
}

/// Rolls damage. After a chained attack only targets that were hit take
/// damage, and critical hits roll critical damage. Each variant is rolled
/// once and shared by every target it applies to.
pub struct Damage;

async fn damage(state: &mut ActionState, ctx: &PipelineContext) -> Result<(), StepError> {
    let actor = state.actor.clone();
    let dialog = state.dialog_state.clone();

    if state.targets.is_empty() {
        roll_damage(state, ctx, &dialog, actor.as_ref(), false).await?;
        return Ok(());
    }

    let chained_attack = state.has_step("attack");
    let eligible: Vec<(ActorId, bool)> = state
        .targets
        .iter()
        .filter(|t| !t.lookup_failed)
        .filter_map(|t| {
            if chained_attack {
                t.attack
                    .as_ref()
                    .filter(|r| r.success)
                    .map(|r| (t.actor_id, r.is_critical_success))
            } else {
                Some((t.actor_id, false))
            }
        })
        .collect();

    if eligible.is_empty() {
        debug!("No targets eligible for damage");
        return Ok(());
    }

    let mut rolled: HashMap<bool, Vec<TypedDamage>> = HashMap::new();
    for (id, critical) in eligible {
        let amounts = match rolled.get(&critical) {
            Some(amounts) => amounts.clone(),
            None => {
                let amounts = roll_damage(state, ctx, &dialog, actor.as_ref(), critical).await?;
                rolled.insert(critical, amounts.clone());
                amounts
            }
        };
        if let Some(target) = state.target_mut(id) {
            target.damage = amounts;
        }
    }
    Ok(())
}

#[async_trait]
impl Step for Damage {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let outcome = damage(&mut state, ctx).await;
        finish(state, outcome)
    }
}

/// Saving throws against the dialog's DC: one per target, or the acting
/// actor's own save when there are no targets. After a chained attack,
/// targets that were missed do not save.
pub struct Save;

async fn save(state: &mut ActionState, ctx: &PipelineContext) -> Result<(), StepError> {
    let dc = state
        .dialog_state
        .dc
        .ok_or_else(|| StepError::MissingInput("save DC".to_string()))?;
    let ability = state
        .dialog_state
        .save_ability
        .ok_or_else(|| StepError::MissingInput("save ability".to_string()))?;
    let name = format!("{ability} save");

    if state.targets.is_empty() {
        let actor = state.actor.clone();
        let modifier = actor.as_ref().map_or(0, |a| a.save_modifier(ability));
        roll_check(
            state,
            ctx,
            CheckRoll {
                action: ActionType::Save,
                roller: actor.as_ref(),
                inputs: vec![ModifierInput::new(name, modifier.to_string())],
                target_number: Some(dc),
                target: None,
            },
        )
        .await?;
        return Ok(());
    }

    // After a chained attack only targets that were hit make the save.
    let chained_attack = state.has_step("attack");
    let savers: Vec<Actor> = state
        .targets
        .iter()
        .filter(|t| !chained_attack || t.attack.as_ref().is_some_and(|r| r.success))
        .filter_map(|t| t.actor.clone())
        .collect();
    if savers.is_empty() {
        debug!("No targets eligible for a save");
        return Ok(());
    }
    for saver in savers {
        let resolution = roll_check(
            state,
            ctx,
            CheckRoll {
                action: ActionType::Save,
                roller: Some(&saver),
                inputs: vec![ModifierInput::new(
                    name.clone(),
                    saver.save_modifier(ability).to_string(),
                )],
                target_number: Some(dc),
                target: Some(saver.id),
            },
        )
        .await?;
        if let Some(target) = state.target_mut(saver.id) {
            target.save = resolution;
        }
    }
    Ok(())
}

#[async_trait]
impl Step for Save {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let outcome = save(&mut state, ctx).await;
        finish(state, outcome)
    }
}

/// Skill check by the acting actor. Classified only when a DC is given.
pub struct Skill;

async fn skill(state: &mut ActionState, ctx: &PipelineContext) -> Result<(), StepError> {
    let skill = state
        .dialog_state
        .skill
        .clone()
        .ok_or_else(|| StepError::MissingInput("skill".to_string()))?;
    let actor = state.actor.clone();
    let modifier = actor.as_ref().map_or(0, |a| a.skill_modifier(&skill));
    let dc = state.dialog_state.dc;
    roll_check(
        state,
        ctx,
        CheckRoll {
            action: ActionType::Skill,
            roller: actor.as_ref(),
            inputs: vec![ModifierInput::new(skill, modifier.to_string())],
            target_number: dc,
            target: None,
        },
    )
    .await?;
    Ok(())
}

#[async_trait]
impl Step for Skill {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let outcome = skill(&mut state, ctx).await;
        finish(state, outcome)
    }
}

/// Raw ability check by the acting actor.
pub struct AbilityCheck;

async fn ability_check(state: &mut ActionState, ctx: &PipelineContext) -> Result<(), StepError> {
    let ability = state
        .dialog_state
        .check_ability
        .ok_or_else(|| StepError::MissingInput("check ability".to_string()))?;
    let actor = state.actor.clone();
    let modifier = actor.as_ref().map_or(0, |a| a.ability_modifier(ability));
    let dc = state.dialog_state.dc;
    roll_check(
        state,
        ctx,
        CheckRoll {
            action: ActionType::Ability,
            roller: actor.as_ref(),
            inputs: vec![ModifierInput::new(
                format!("{ability} check"),
                modifier.to_string(),
            )],
            target_number: dc,
            target: None,
        },
    )
    .await?;
    Ok(())
}

#[async_trait]
impl Step for AbilityCheck {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let outcome = ability_check(&mut state, ctx).await;
        finish(state, outcome)
    }
}

/// Works out the damage each target actually takes.
pub struct ApplyDamage;

#[async_trait]
impl Step for ApplyDamage {
    async fn run(&self, mut state: ActionState, ctx: &PipelineContext) -> StepResult {
        let half_on_save = state.dialog_state.half_on_save.unwrap_or(ctx.half_on_save);

        for target in state.targets.iter_mut().filter(|t| !t.damage.is_empty()) {
            let halved = half_on_save && target.save.as_ref().is_some_and(|r| r.success);
            let by_type: Vec<TypedDamage> = target
                .damage
                .iter()
                .map(|d| TypedDamage {
                    damage_type: d.damage_type.clone(),
                    amount: adjust_damage(d.amount, &d.damage_type, target.actor.as_ref(), halved),
                })
                .collect();

            let application = DamageApplication {
                rolled: target.damage_total(),
                applied: by_type
                    .iter()
                    .fold(0i32, |sum, d| sum.saturating_add(d.amount)),
                halved_by_save: halved,
                by_type,
            };
            debug!(
                target = %target.name,
                rolled = application.rolled,
                applied = application.applied,
                "Applied damage"
            );
            target.applied = Some(application);
        }
        Ok(state)
    }
}

/// Terminal step.
pub struct Complete;

#[async_trait]
impl Step for Complete {
    async fn run(&self, state: ActionState, _ctx: &PipelineContext) -> StepResult {
        info!(
            action = %state.id,
            rolls = state.results.len(),
            targets = state.targets.len(),
            "Action resolved"
        );
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Formula;

    #[test]
    fn test_typed_damage_puts_base_type_first() {
        let evaluation = Formula::parse("(1d8+3)[slashing]+(2d6)[fire]+(1d4)[cold]")
            .unwrap()
            .roll_with(&mut |_| 2);
        let damage = typed_damage(&evaluation, Some("slashing"));
        let types: Vec<&str> = damage.iter().map(|d| d.damage_type.as_str()).collect();
        assert_eq!(types, vec!["slashing", "cold", "fire"]);
        assert_eq!(damage[0].amount, 5);
        assert_eq!(damage[2].amount, 4);
    }

    #[test]
    fn test_untyped_damage_falls_into_base() {
        let evaluation = Formula::parse("2d6+1").unwrap().roll_with(&mut |_| 3);
        assert_eq!(
            typed_damage(&evaluation, None),
            vec![TypedDamage {
                damage_type: UNTYPED.to_string(),
                amount: 7
            }]
        );
    }

    #[test]
    fn test_adjust_damage() {
        let troll = Actor::new("Troll")
            .with_resistance("slashing")
            .with_immunity("poison")
            .with_vulnerability("fire");

        assert_eq!(adjust_damage(9, "slashing", Some(&troll), false), 4);
        assert_eq!(adjust_damage(9, "poison", Some(&troll), false), 0);
        assert_eq!(adjust_damage(9, "fire", Some(&troll), false), 18);
        assert_eq!(adjust_damage(9, "fire", Some(&troll), true), 8);
        assert_eq!(adjust_damage(9, "cold", Some(&troll), true), 4);
        assert_eq!(adjust_damage(9, "cold", None, false), 9);
        assert_eq!(adjust_damage(i32::MAX, "fire", Some(&troll), false), i32::MAX);
    }
}
