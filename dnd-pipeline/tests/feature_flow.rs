//! Feature registry behavior inside full workflows.

use dnd_pipeline::action::{ActionType, DialogState, FeatureData};
use dnd_pipeline::actor::{Actor, Item};
use dnd_pipeline::feature::{Feature, FeatureContext, FeatureMeta};
use dnd_pipeline::modifier::ModifierInput;
use dnd_pipeline::session::{SessionError, TableSession};
use dnd_pipeline::testing::{
    actors_with, assert_formula, sample_goblin, sample_rogue, ScriptedRoller,
};
use dnd_pipeline::{FeatureRegistry, PipelineConfig};
use std::sync::Arc;

fn session_with(actors: Vec<Actor>, faces: Vec<u32>) -> TableSession {
    TableSession::new(PipelineConfig::new(), Arc::new(actors_with(actors)))
        .with_roller(Arc::new(ScriptedRoller::new(faces)))
}

fn rapier_attack(rogue: &Actor, target: &Actor) -> DialogState {
    DialogState::new(rogue.id)
        .with_target(target.id)
        .with_modifier(ActionType::Attack, ModifierInput::new("Attack bonus", "7"))
        .with_modifier(ActionType::Damage, ModifierInput::new("Rapier", "1d8+4"))
        .with_damage_type("piercing")
}

/// Adds 1d4 to skill checks.
struct Guidance {
    meta: FeatureMeta,
}

impl Guidance {
    fn new() -> Self {
        Self {
            meta: FeatureMeta::new("guidance", "Guidance").affecting(ActionType::Skill),
        }
    }
}

impl Feature for Guidance {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        if !ctx.feature_data.enabled {
            return Vec::new();
        }
        vec![ModifierInput::new("Guidance", "1d4")]
    }
}

#[tokio::test]
async fn test_sneak_attack_with_finesse_weapon() {
    let rogue = sample_rogue();
    let goblin = sample_goblin();
    let dialog = rapier_attack(&rogue, &goblin).with_feature(
        "sneak-attack",
        FeatureData::default().with_field("finesseOrRanged", true),
    );
    let session = session_with(vec![rogue, goblin], vec![10, 5, 2, 2, 2]);

    let state = session.run("attack-damage", dialog).await.unwrap();

    assert_formula(&state, 1, "(1d8+3d6+4)[piercing]");
    assert_eq!(state.targets[0].applied.as_ref().unwrap().applied, 15);
    assert!(state.dice_pools[1].vetoes.is_empty());
}

#[tokio::test]
async fn test_sneak_attack_vetoed_without_finesse() {
    let rogue = sample_rogue();
    let goblin = sample_goblin();
    let dialog = rapier_attack(&rogue, &goblin);
    let session = session_with(vec![rogue, goblin], vec![10, 5]);

    let state = session.run("attack-damage", dialog).await.unwrap();

    assert_formula(&state, 1, "(1d8+4)[piercing]");
    let vetoes = &state.dice_pools[1].vetoes;
    assert_eq!(vetoes.len(), 1);
    assert_eq!(vetoes[0].feature_id, "sneak-attack");
}

#[tokio::test]
async fn test_disabled_sneak_attack_contributes_nothing() {
    let rogue = sample_rogue();
    let goblin = sample_goblin();
    let dialog = rapier_attack(&rogue, &goblin).with_feature("sneak-attack", FeatureData::disabled());
    let session = session_with(vec![rogue, goblin], vec![10, 5]);

    let state = session.run("attack-damage", dialog).await.unwrap();

    assert_formula(&state, 1, "(1d8+4)[piercing]");
    assert!(state.dice_pools[1].vetoes.is_empty());
}

#[tokio::test]
async fn test_flame_tongue_item_adds_fire_group() {
    let knight = Actor::new("Aria")
        .with_armor_class(17)
        .with_item(Item::new("Flame Tongue Longsword").with_flag("flame-tongue", true));
    let goblin = sample_goblin();
    let dialog = DialogState::new(knight.id)
        .with_target(goblin.id)
        .with_modifier(ActionType::Attack, ModifierInput::new("Attack bonus", "6"))
        .with_modifier(ActionType::Damage, ModifierInput::new("Longsword", "1d8+3"))
        .with_damage_type("slashing");
    let session = session_with(vec![knight, goblin], vec![15, 4, 6, 6]);

    let state = session.run("attack-damage", dialog).await.unwrap();

    assert_formula(&state, 1, "(1d8+3)[slashing]+(2d6)[fire]");
    let damage = &state.targets[0].damage;
    assert_eq!(damage[0].damage_type, "slashing");
    assert_eq!(damage[0].amount, 7);
    assert_eq!(damage[1].damage_type, "fire");
    assert_eq!(damage[1].amount, 12);
}

#[tokio::test]
async fn test_bless_applies_to_attack() {
    let cleric = Actor::new("Mira").with_trait("Bless");
    let goblin = sample_goblin();
    let dialog = DialogState::new(cleric.id)
        .with_target(goblin.id)
        .with_modifier(ActionType::Attack, ModifierInput::new("Attack bonus", "4"))
        .with_advantage(ActionType::Attack);
    let session = session_with(vec![cleric, goblin], vec![8, 11, 3]);

    let state = session.run("attack", dialog).await.unwrap();

    assert_formula(&state, 0, "max(1d20,1d20)+1d4+4");
    let attack = state.targets[0].attack.as_ref().unwrap();
    assert_eq!(attack.roll_value, 11);
    assert_eq!(attack.roll_total, 18);
    assert!(attack.success);
}

#[tokio::test]
async fn test_superior_critical_sets_range() {
    let champion = Actor::new("Roland")
        .with_trait("Improved Critical")
        .with_trait("Superior Critical");
    let goblin = sample_goblin();
    let dialog = DialogState::new(champion.id)
        .with_target(goblin.id)
        .with_modifier(ActionType::Attack, ModifierInput::new("Attack bonus", "5"));
    let session = session_with(vec![champion, goblin], vec![18]);

    let state = session.run("attack", dialog).await.unwrap();

    assert!(state.targets[0].attack.as_ref().unwrap().is_critical_success);
}

#[tokio::test]
async fn test_custom_feature_registration() {
    let rogue = sample_rogue();
    let id = rogue.id;
    let rogue = rogue.with_trait("Guidance");
    let session = session_with(vec![rogue], vec![10, 2, 10])
        .with_feature(Guidance::new())
        .unwrap();

    let dialog = DialogState::new(id).with_skill("Stealth").with_dc(20);
    let state = session.run("skill", dialog).await.unwrap();
    assert_formula(&state, 0, "1d20+1d4+10");
    assert_eq!(state.results[0].evaluation.total, 22);

    let dialog = DialogState::new(id)
        .with_skill("Stealth")
        .with_feature("guidance", FeatureData::disabled());
    let state = session.run("skill", dialog).await.unwrap();
    assert_formula(&state, 0, "1d20+10");
}

#[tokio::test]
async fn test_duplicate_feature_rejected() {
    let session = session_with(vec![], vec![]);
    let err = session
        .with_feature(Guidance::new())
        .and_then(|s| s.with_feature(Guidance::new()))
        .err()
        .unwrap();
    assert!(matches!(err, SessionError::Feature(_)));
}

#[tokio::test]
async fn test_empty_registry_ignores_traits() {
    let rogue = sample_rogue();
    let goblin = sample_goblin();
    let dialog = rapier_attack(&rogue, &goblin).with_feature(
        "sneak-attack",
        FeatureData::default().with_field("finesseOrRanged", true),
    );
    let session = session_with(vec![rogue, goblin], vec![10, 5]).with_registry(FeatureRegistry::new());

    let state = session.run("attack-damage", dialog).await.unwrap();
    assert_formula(&state, 1, "(1d8+4)[piercing]");
}
