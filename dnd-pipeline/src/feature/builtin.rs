//! Built-in features, registered in this order at startup.

use super::{Feature, FeatureContext, FeatureMeta};
use crate::action::ActionType;
use crate::actor::is_truthy;
use crate::modifier::ModifierInput;
use crate::resolve::{CheckType, CriticalModification, CriticalRange, ModificationMode, RangeTarget};
use std::sync::Arc;

/// Every built-in feature, in registration order.
pub fn all() -> Vec<Arc<dyn Feature>> {
    vec![
        Arc::new(Bless::new()),
        Arc::new(SneakAttack::new()),
        Arc::new(Rage::new()),
        Arc::new(ImprovedCritical::new()),
        Arc::new(SuperiorCritical::new()),
        Arc::new(FlameTongue::new()),
    ]
}

/// +1d4 to attack rolls and saving throws.
pub struct Bless {
    meta: FeatureMeta,
}

impl Bless {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("bless", "Bless")
                .with_description("Add 1d4 to attack rolls and saving throws")
                .affecting(ActionType::Attack)
                .affecting(ActionType::Save),
        }
    }
}

impl Default for Bless {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for Bless {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        if !ctx.feature_data.enabled {
            return Vec::new();
        }
        vec![ModifierInput::new("Bless", "1d4")]
    }
}

/// Extra d6s once per turn with a finesse or ranged weapon.
pub struct SneakAttack {
    meta: FeatureMeta,
}

impl SneakAttack {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("sneak-attack", "Sneak Attack")
                .with_description("Deal extra damage with a finesse or ranged weapon")
                .affecting(ActionType::Damage),
        }
    }

    /// `dice` field if set, else half the rogue's level rounded up.
    fn dice(ctx: &FeatureContext<'_>) -> u64 {
        ctx.feature_data
            .field("dice")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| (ctx.actor.level as u64).div_ceil(2))
    }
}

impl Default for SneakAttack {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for SneakAttack {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        if !ctx.feature_data.enabled {
            return Vec::new();
        }
        vec![ModifierInput::new("Sneak Attack", format!("{}d6", Self::dice(ctx)))]
    }

    fn validation_logic(&self, ctx: &FeatureContext<'_>) -> Result<(), String> {
        let weapon_ok = ctx
            .feature_data
            .field("finesseOrRanged")
            .is_some_and(is_truthy);
        if weapon_ok {
            Ok(())
        } else {
            Err("Sneak Attack requires a finesse or ranged weapon".to_string())
        }
    }
}

/// Flat bonus to weapon damage while raging.
pub struct Rage {
    meta: FeatureMeta,
}

impl Rage {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("rage", "Rage")
                .with_description("Add your rage damage bonus to weapon damage")
                .affecting(ActionType::Damage),
        }
    }

    fn bonus(ctx: &FeatureContext<'_>) -> i64 {
        ctx.feature_data
            .field("bonus")
            .and_then(|v| v.as_i64())
            .unwrap_or(match ctx.actor.level {
                0..=8 => 2,
                9..=15 => 3,
                _ => 4,
            })
    }
}

impl Default for Rage {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for Rage {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        if !ctx.feature_data.enabled {
            return Vec::new();
        }
        vec![ModifierInput::new("Rage", Self::bonus(ctx).to_string())]
    }

    fn validation_logic(&self, ctx: &FeatureContext<'_>) -> Result<(), String> {
        if ctx.actor.has_equipped_flag("heavyArmor") {
            return Err("Cannot rage while wearing heavy armor".to_string());
        }
        Ok(())
    }
}

fn attack_crit_range(mode: ModificationMode, min: u8) -> CriticalModification {
    CriticalModification {
        target: RangeTarget::Success,
        mode,
        range: CriticalRange::new(min, 20).unwrap_or(CriticalRange::SUCCESS),
        checks: vec![CheckType::Attack],
    }
}

/// Champion fighter: weapon attacks crit on 19-20.
pub struct ImprovedCritical {
    meta: FeatureMeta,
}

impl ImprovedCritical {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("improved-critical", "Improved Critical")
                .with_description("Weapon attacks score a critical hit on a roll of 19 or 20")
                .with_critical_modification(attack_crit_range(ModificationMode::Expand, 19)),
        }
    }
}

impl Default for ImprovedCritical {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for ImprovedCritical {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, _ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        Vec::new()
    }
}

/// Champion fighter at 15th level: weapon attacks crit on 18-20.
pub struct SuperiorCritical {
    meta: FeatureMeta,
}

impl SuperiorCritical {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("superior-critical", "Superior Critical")
                .with_description("Weapon attacks score a critical hit on a roll of 18-20")
                .with_critical_modification(attack_crit_range(ModificationMode::Set, 18)),
        }
    }
}

impl Default for SuperiorCritical {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for SuperiorCritical {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, _ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        Vec::new()
    }
}

/// Magic sword granted through an equipped item flag.
pub struct FlameTongue {
    meta: FeatureMeta,
}

impl FlameTongue {
    pub fn new() -> Self {
        Self {
            meta: FeatureMeta::new("flame-tongue", "Flame Tongue")
                .with_description("The blade deals an extra 2d6 fire damage")
                .affecting(ActionType::Damage),
        }
    }
}

impl Default for FlameTongue {
    fn default() -> Self {
        Self::new()
    }
}

impl Feature for FlameTongue {
    fn meta(&self) -> &FeatureMeta {
        &self.meta
    }

    fn roll_modifiers(&self, ctx: &FeatureContext<'_>) -> Vec<ModifierInput> {
        if !ctx.feature_data.enabled {
            return Vec::new();
        }
        vec![ModifierInput::new("Flame Tongue", "2d6").with_type("fire")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::{DialogState, FeatureData};
    use crate::actor::{Actor, Item};

    fn ctx<'a>(
        actor: &'a Actor,
        dialog: &'a DialogState,
        data: &'a FeatureData,
    ) -> FeatureContext<'a> {
        FeatureContext {
            actor,
            dialog_type: ActionType::Damage,
            dialog_state: dialog,
            feature_data: data,
        }
    }

    #[test]
    fn test_disabled_features_contribute_nothing() {
        let actor = Actor::new("Vex").with_level(5);
        let dialog = DialogState::new(actor.id);
        let data = FeatureData::disabled().with_field("finesseOrRanged", true);
        for feature in all() {
            for _ in 0..3 {
                assert!(
                    feature.roll_modifiers(&ctx(&actor, &dialog, &data)).is_empty(),
                    "{} contributed while disabled",
                    feature.meta().id
                );
            }
        }
    }

    #[test]
    fn test_sneak_attack_dice() {
        let actor = Actor::new("Vex").with_level(5);
        let dialog = DialogState::new(actor.id);
        let data = FeatureData::default();
        let mods = SneakAttack::new().roll_modifiers(&ctx(&actor, &dialog, &data));
        assert_eq!(mods[0].modifier, "3d6");

        let data = FeatureData::default().with_field("dice", 1);
        let mods = SneakAttack::new().roll_modifiers(&ctx(&actor, &dialog, &data));
        assert_eq!(mods[0].modifier, "1d6");
    }

    #[test]
    fn test_sneak_attack_requires_weapon() {
        let actor = Actor::new("Vex");
        let dialog = DialogState::new(actor.id);
        let feature = SneakAttack::new();

        let data = FeatureData::default();
        assert!(feature.validation_logic(&ctx(&actor, &dialog, &data)).is_err());

        let data = FeatureData::default().with_field("finesseOrRanged", true);
        assert!(feature.validation_logic(&ctx(&actor, &dialog, &data)).is_ok());
    }

    #[test]
    fn test_rage_vetoed_in_heavy_armor() {
        let dialog = DialogState::new(Actor::new("x").id);
        let data = FeatureData::default();

        let barbarian = Actor::new("Grog").with_level(9);
        assert!(Rage::new()
            .validation_logic(&ctx(&barbarian, &dialog, &data))
            .is_ok());
        assert_eq!(
            Rage::new().roll_modifiers(&ctx(&barbarian, &dialog, &data))[0].modifier,
            "3"
        );

        let armored = barbarian.with_item(Item::new("Plate").with_flag("heavyArmor", true));
        assert!(Rage::new()
            .validation_logic(&ctx(&armored, &dialog, &data))
            .is_err());
    }

    #[test]
    fn test_flame_tongue_is_typed_fire() {
        let actor = Actor::new("Aria");
        let dialog = DialogState::new(actor.id);
        let data = FeatureData::default();
        let mods = FlameTongue::new().roll_modifiers(&ctx(&actor, &dialog, &data));
        assert_eq!(mods[0].modifier_type, "fire");
        assert!(mods[0].is_dice);
    }
}
