//! Action resolution pipeline for D&D 5e tabletop sessions.
//!
//! This crate provides:
//! - A dice pool builder that compiles modifier strings into one formula
//! - A d20 resolution engine for critical ranges and degrees of success
//! - A workflow orchestrator that chains attack, damage, save and apply steps
//! - A feature registry for optional character abilities
//!
//! # Quick Start
//!
//! ```ignore
//! use dnd_pipeline::{ActionType, DialogState, ModifierInput, PipelineConfig, TableSession};
//! use dnd_pipeline::testing::{actors_with, sample_fighter, sample_goblin};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fighter = sample_fighter();
//!     let goblin = sample_goblin();
//!     let dialog = DialogState::new(fighter.id)
//!         .with_target(goblin.id)
//!         .with_modifier(ActionType::Attack, ModifierInput::new("Proficiency", "3+4"))
//!         .with_modifier(ActionType::Damage, ModifierInput::new("Longsword", "1d8+4"))
//!         .with_damage_type("slashing");
//!
//!     let actors = Arc::new(actors_with([fighter, goblin]));
//!     let session = TableSession::new(PipelineConfig::new(), actors);
//!
//!     let summary = session.perform("attack-damage", dialog).await?;
//!     println!("{}", summary.to_json()?);
//!     Ok(())
//! }
//! ```

pub mod action;
pub mod actor;
pub mod config;
pub mod dice;
pub mod feature;
pub mod modifier;
pub mod pool;
pub mod resolve;
pub mod session;
pub mod testing;
pub mod workflow;

// Primary public API
pub use action::{ActionType, DialogState, FeatureData, RollOptions};
pub use actor::{Ability, Actor, ActorId, ActorSource, InMemoryActors, Item};
pub use config::PipelineConfig;
pub use dice::{Advantage, DiceError, DiceRoller, Evaluation, Formula, RngRoller};
pub use feature::{Feature, FeatureContext, FeatureMeta, FeatureRegistry};
pub use modifier::{ModifierInput, ModifierTerm};
pub use pool::{combine_dice, BuiltPool, DicePoolBuilder, PoolRequest};
pub use resolve::{CheckType, CriticalRange, D20Resolver, Degree, Resolution};
pub use session::{ActionSummary, SessionError, TableSession};
pub use workflow::{ActionState, Orchestrator, Step, WorkflowError, WorkflowTable};
