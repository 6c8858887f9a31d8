//! Testing utilities for the pipeline.
//!
//! This module provides tools for integration testing:
//! - `ScriptedRoller` for deterministic dice without an RNG
//! - Sample actors for common scenarios
//! - Assertion helpers for verifying action state

use crate::actor::{Ability, Actor, InMemoryActors, Item};
use crate::dice::{DiceError, DiceRoller, Evaluation, Formula};
use crate::resolve::Degree;
use crate::workflow::ActionState;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;

/// A dice roller that returns scripted faces in order.
///
/// Once the script runs out every die shows its default face, half its size
/// rounded down (10 on a d20, 3 on a d6).
pub struct ScriptedRoller {
    faces: Mutex<VecDeque<u32>>,
    formulas: Mutex<Vec<String>>,
}

impl ScriptedRoller {
    /// Create a roller that returns `faces` in order.
    pub fn new(faces: impl IntoIterator<Item = u32>) -> Self {
        Self {
            faces: Mutex::new(faces.into_iter().collect()),
            formulas: Mutex::new(Vec::new()),
        }
    }

    /// Queue more faces.
    pub async fn push(&self, faces: impl IntoIterator<Item = u32>) {
        self.faces.lock().await.extend(faces);
    }

    /// Faces not yet consumed.
    pub async fn remaining(&self) -> usize {
        self.faces.lock().await.len()
    }

    /// Every formula evaluated so far, in order.
    pub async fn formulas(&self) -> Vec<String> {
        self.formulas.lock().await.clone()
    }
}

impl Default for ScriptedRoller {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

#[async_trait]
impl DiceRoller for ScriptedRoller {
    async fn evaluate(&self, formula: &str) -> Result<Evaluation, DiceError> {
        let parsed = Formula::parse(formula)?;
        self.formulas.lock().await.push(parsed.original.clone());
        let mut faces = self.faces.lock().await;
        Ok(parsed.roll_with(&mut |size| faces.pop_front().unwrap_or((size / 2).max(1))))
    }
}

/// Level 5 fighter with a longsword.
pub fn sample_fighter() -> Actor {
    Actor::new("Roland")
        .with_level(5)
        .with_armor_class(18)
        .with_save(Ability::Strength, 6)
        .with_save(Ability::Constitution, 5)
        .with_save(Ability::Dexterity, 1)
        .with_ability_check(Ability::Strength, 3)
        .with_skill("Athletics", 6)
        .with_trait("Improved Critical")
        .with_item(Item::new("Longsword"))
}

/// Level 5 rogue with a rapier.
pub fn sample_rogue() -> Actor {
    Actor::new("Vex")
        .with_level(5)
        .with_armor_class(15)
        .with_save(Ability::Dexterity, 7)
        .with_save(Ability::Intelligence, 4)
        .with_ability_check(Ability::Dexterity, 4)
        .with_skill("Stealth", 10)
        .with_skill("Sleight of Hand", 7)
        .with_trait("Sneak Attack")
        .with_item(Item::new("Rapier").with_flag("finesse", true))
}

/// A goblin: low AC, no defenses.
pub fn sample_goblin() -> Actor {
    Actor::new("Goblin")
        .with_armor_class(15)
        .with_save(Ability::Dexterity, 2)
        .with_save(Ability::Wisdom, -1)
}

/// A troll with the usual fire weakness, for defense tests.
pub fn sample_troll() -> Actor {
    Actor::new("Troll")
        .with_level(5)
        .with_armor_class(15)
        .with_save(Ability::Dexterity, 1)
        .with_save(Ability::Constitution, 5)
        .with_resistance("slashing")
        .with_vulnerability("fire")
        .with_immunity("poison")
}

/// Actor source seeded with the given actors.
pub fn actors_with(actors: impl IntoIterator<Item = Actor>) -> InMemoryActors {
    actors
        .into_iter()
        .fold(InMemoryActors::new(), InMemoryActors::with_actor)
}

/// Assert that the run recorded no errors.
pub fn assert_no_errors(state: &ActionState) {
    assert!(
        state.errors.is_empty(),
        "expected no errors, got {:?}",
        state.errors
    );
}

/// Assert the formula of the `index`th dice pool built during the run.
pub fn assert_formula(state: &ActionState, index: usize, expected: &str) {
    let pool = state
        .dice_pools
        .get(index)
        .unwrap_or_else(|| panic!("no dice pool at index {index}"));
    assert_eq!(pool.formula, expected, "dice pool {index}");
}

/// Assert the attack outcome against the `index`th target.
pub fn assert_attack(state: &ActionState, index: usize, hit: bool, degree: Degree) {
    let target = &state.targets[index];
    let attack = target
        .attack
        .as_ref()
        .unwrap_or_else(|| panic!("no attack against {}", target.name));
    assert_eq!(attack.success, hit, "attack success against {}", target.name);
    assert_eq!(attack.degree, degree, "attack degree against {}", target.name);
}
