//! Actor data as seen by the pipeline.
//!
//! Actors live in the host's object graph; the pipeline only needs armor
//! class, save and skill modifiers, damage defenses, traits and equipped item
//! flags. `ActorSource` is the lookup boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique identifier for actors (characters and creatures).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.abbreviation())
    }
}

/// An item carried by an actor. `properties` holds host-defined flags;
/// features look for a truthy value keyed by their id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub name: String,
    pub equipped: bool,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Item {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            equipped: true,
            properties: Map::new(),
        }
    }

    pub fn with_flag(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn unequipped(mut self) -> Self {
        self.equipped = false;
        self
    }

    pub fn flag(&self, key: &str) -> bool {
        self.properties.get(key).is_some_and(is_truthy)
    }
}

/// Loose truthiness for host-supplied JSON flags.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Everything the pipeline reads about a character or creature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Actor {
    pub id: ActorId,
    pub name: String,
    pub level: u8,
    pub armor_class: i32,
    #[serde(default)]
    pub saving_throws: HashMap<Ability, i32>,
    #[serde(default)]
    pub ability_checks: HashMap<Ability, i32>,
    #[serde(default)]
    pub skills: HashMap<String, i32>,
    #[serde(default)]
    pub resistances: Vec<String>,
    #[serde(default)]
    pub immunities: Vec<String>,
    #[serde(default)]
    pub vulnerabilities: Vec<String>,
    /// Class features, feats and racial traits by name.
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default)]
    pub items: Vec<Item>,
}

impl Actor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: ActorId::new(),
            name: name.into(),
            level: 1,
            armor_class: 10,
            saving_throws: HashMap::new(),
            ability_checks: HashMap::new(),
            skills: HashMap::new(),
            resistances: Vec::new(),
            immunities: Vec::new(),
            vulnerabilities: Vec::new(),
            traits: Vec::new(),
            items: Vec::new(),
        }
    }

    pub fn with_level(mut self, level: u8) -> Self {
        self.level = level;
        self
    }

    pub fn with_armor_class(mut self, armor_class: i32) -> Self {
        self.armor_class = armor_class;
        self
    }

    pub fn with_save(mut self, ability: Ability, modifier: i32) -> Self {
        self.saving_throws.insert(ability, modifier);
        self
    }

    pub fn with_ability_check(mut self, ability: Ability, modifier: i32) -> Self {
        self.ability_checks.insert(ability, modifier);
        self
    }

    pub fn with_skill(mut self, skill: impl Into<String>, modifier: i32) -> Self {
        self.skills.insert(skill.into(), modifier);
        self
    }

    pub fn with_trait(mut self, name: impl Into<String>) -> Self {
        self.traits.push(name.into());
        self
    }

    pub fn with_item(mut self, item: Item) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_resistance(mut self, damage_type: impl Into<String>) -> Self {
        self.resistances.push(damage_type.into());
        self
    }

    pub fn with_immunity(mut self, damage_type: impl Into<String>) -> Self {
        self.immunities.push(damage_type.into());
        self
    }

    pub fn with_vulnerability(mut self, damage_type: impl Into<String>) -> Self {
        self.vulnerabilities.push(damage_type.into());
        self
    }

    pub fn save_modifier(&self, ability: Ability) -> i32 {
        self.saving_throws.get(&ability).copied().unwrap_or(0)
    }

    pub fn ability_modifier(&self, ability: Ability) -> i32 {
        self.ability_checks.get(&ability).copied().unwrap_or(0)
    }

    pub fn skill_modifier(&self, skill: &str) -> i32 {
        self.skills.get(skill).copied().unwrap_or(0)
    }

    /// Exact, case-sensitive trait match.
    pub fn has_trait(&self, name: &str) -> bool {
        self.traits.iter().any(|t| t == name)
    }

    /// True if any equipped item carries a truthy `key` property.
    pub fn has_equipped_flag(&self, key: &str) -> bool {
        self.items.iter().any(|i| i.equipped && i.flag(key))
    }
}

/// Errors from actor lookups.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    #[error("Actor not found: {0}")]
    NotFound(ActorId),

    #[error("Actor source unavailable: {0}")]
    Unavailable(String),
}

/// Resolves actor identifiers to actor data.
#[async_trait]
pub trait ActorSource: Send + Sync {
    async fn actor(&self, id: ActorId) -> Result<Actor, LookupError>;
}

/// Actor source backed by a map, for headless use and tests.
#[derive(Debug, Clone, Default)]
pub struct InMemoryActors {
    actors: HashMap<ActorId, Actor>,
}

impl InMemoryActors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, actor: Actor) -> ActorId {
        let id = actor.id;
        self.actors.insert(id, actor);
        id
    }

    pub fn with_actor(mut self, actor: Actor) -> Self {
        self.insert(actor);
        self
    }
}

#[async_trait]
impl ActorSource for InMemoryActors {
    async fn actor(&self, id: ActorId) -> Result<Actor, LookupError> {
        self.actors.get(&id).cloned().ok_or(LookupError::NotFound(id))
    }
}
