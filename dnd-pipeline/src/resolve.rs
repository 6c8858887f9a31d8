//! D20 resolution: critical ranges, success and degree of success.
//!
//! Classification is a pure function of the roll, the target number and the
//! check type's configuration. Critical ranges start from the check-type
//! default, can be overridden per roll, and are finally adjusted by
//! feature-declared modifications.

use crate::dice::{DiceError, DiceRoller};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Error for out-of-bounds critical ranges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    #[error("Invalid critical range {min}-{max}: must satisfy 1 <= min <= max <= 20")]
    Invalid { min: u8, max: u8 },
}

/// Inclusive range of natural d20 faces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRange")]
pub struct CriticalRange {
    min: u8,
    max: u8,
}

#[derive(Deserialize)]
struct RawRange {
    min: u8,
    max: u8,
}

impl TryFrom<RawRange> for CriticalRange {
    type Error = RangeError;

    fn try_from(raw: RawRange) -> Result<Self, Self::Error> {
        CriticalRange::new(raw.min, raw.max)
    }
}

impl CriticalRange {
    pub const SUCCESS: CriticalRange = CriticalRange { min: 20, max: 20 };
    pub const FAILURE: CriticalRange = CriticalRange { min: 1, max: 1 };

    pub fn new(min: u8, max: u8) -> Result<Self, RangeError> {
        if min < 1 || min > max || max > 20 {
            return Err(RangeError::Invalid { min, max });
        }
        Ok(Self { min, max })
    }

    pub fn min(&self) -> u8 {
        self.min
    }

    pub fn max(&self) -> u8 {
        self.max
    }

    pub fn contains(&self, value: u32) -> bool {
        value >= self.min as u32 && value <= self.max as u32
    }

    /// Smallest range covering both.
    pub fn union(self, other: CriticalRange) -> CriticalRange {
        CriticalRange {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }
}

impl fmt::Display for CriticalRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.min == self.max {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

/// Kinds of d20 check, each with its own resolution rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckType {
    Attack,
    Save,
    Skill,
    Ability,
    Contested,
}

impl CheckType {
    pub fn all() -> [CheckType; 5] {
        [
            CheckType::Attack,
            CheckType::Save,
            CheckType::Skill,
            CheckType::Ability,
            CheckType::Contested,
        ]
    }
}

/// What a natural critical does to the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CriticalPolicy {
    /// The natural face is reported, the total still decides.
    Compare,
    /// The natural face decides outright (auto-hit / auto-miss).
    Automatic,
}

/// Resolution rules for one check type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckConfig {
    pub critical_range: CriticalRange,
    pub critical_failure_range: CriticalRange,
    pub critical_success: CriticalPolicy,
    pub critical_failure: CriticalPolicy,
    pub degree_of_success: bool,
}

impl CheckConfig {
    /// Default rules: attacks auto-hit on a 20 and auto-miss on a 1;
    /// saves, skills and ability checks grade by margin.
    pub fn for_check(check: CheckType) -> Self {
        let (policy, degree_of_success) = match check {
            CheckType::Attack => (CriticalPolicy::Automatic, false),
            CheckType::Save | CheckType::Skill | CheckType::Ability => {
                (CriticalPolicy::Compare, true)
            }
            CheckType::Contested => (CriticalPolicy::Compare, false),
        };
        Self {
            critical_range: CriticalRange::SUCCESS,
            critical_failure_range: CriticalRange::FAILURE,
            critical_success: policy,
            critical_failure: policy,
            degree_of_success,
        }
    }
}

/// Which critical range a modification targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RangeTarget {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModificationMode {
    /// Widen to the union with the declared range.
    Expand,
    /// Replace the range outright.
    Set,
}

/// A feature-declared change to a critical range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CriticalModification {
    pub target: RangeTarget,
    pub mode: ModificationMode,
    pub range: CriticalRange,
    /// Check types affected; empty means all.
    pub checks: Vec<CheckType>,
}

impl CriticalModification {
    pub fn applies_to(&self, check: CheckType) -> bool {
        self.checks.is_empty() || self.checks.contains(&check)
    }
}

/// Per-roll overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClassifyOptions {
    pub critical_range: Option<CriticalRange>,
    pub critical_failure_range: Option<CriticalRange>,
    pub modifications: Vec<CriticalModification>,
}

/// Graded outcome of a check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Degree {
    CriticalSuccess,
    MajorSuccess,
    Success,
    MinorFailure,
    MajorFailure,
    CriticalFailure,
    /// Plain failure for checks that do not grade by margin.
    Failure,
}

impl Degree {
    /// Grade a margin (`total - target`).
    pub fn from_margin(margin: i32) -> Degree {
        match margin {
            m if m >= 10 => Degree::CriticalSuccess,
            m if m >= 5 => Degree::MajorSuccess,
            m if m >= 0 => Degree::Success,
            m if m >= -5 => Degree::MinorFailure,
            m if m >= -10 => Degree::MajorFailure,
            _ => Degree::CriticalFailure,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Degree::CriticalSuccess | Degree::MajorSuccess | Degree::Success
        )
    }
}

/// Classified outcome of one roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub roll_total: i32,
    /// Natural face of the d20.
    pub roll_value: u32,
    pub target_number: i32,
    pub success: bool,
    pub degree: Degree,
    pub margin: i32,
    pub is_critical_success: bool,
    pub is_critical_failure: bool,
    pub check_type: CheckType,
}

/// Classifies d20 rolls using per-check-type rules.
#[derive(Debug, Clone)]
pub struct D20Resolver {
    checks: HashMap<CheckType, CheckConfig>,
}

impl Default for D20Resolver {
    fn default() -> Self {
        Self {
            checks: CheckType::all()
                .into_iter()
                .map(|c| (c, CheckConfig::for_check(c)))
                .collect(),
        }
    }
}

impl D20Resolver {
    pub fn new(checks: HashMap<CheckType, CheckConfig>) -> Self {
        let mut resolver = Self::default();
        resolver.checks.extend(checks);
        resolver
    }

    pub fn config(&self, check: CheckType) -> CheckConfig {
        self.checks
            .get(&check)
            .copied()
            .unwrap_or_else(|| CheckConfig::for_check(check))
    }

    /// Effective (success, failure) ranges after overrides and modifications.
    /// A `set` beats any `expand`; among several `set`s the last one wins.
    pub fn effective_ranges(
        &self,
        check: CheckType,
        options: &ClassifyOptions,
    ) -> (CriticalRange, CriticalRange) {
        let config = self.config(check);
        let mut success = options.critical_range.unwrap_or(config.critical_range);
        let mut failure = options
            .critical_failure_range
            .unwrap_or(config.critical_failure_range);
        let mut success_set = None;
        let mut failure_set = None;

        for m in options.modifications.iter().filter(|m| m.applies_to(check)) {
            match (m.target, m.mode) {
                (RangeTarget::Success, ModificationMode::Expand) => success = success.union(m.range),
                (RangeTarget::Success, ModificationMode::Set) => success_set = Some(m.range),
                (RangeTarget::Failure, ModificationMode::Expand) => failure = failure.union(m.range),
                (RangeTarget::Failure, ModificationMode::Set) => failure_set = Some(m.range),
            }
        }

        (
            success_set.unwrap_or(success),
            failure_set.unwrap_or(failure),
        )
    }

    pub fn classify(
        &self,
        roll_total: i32,
        roll_value: u32,
        target_number: i32,
        check_type: CheckType,
        options: &ClassifyOptions,
    ) -> Resolution {
        let config = self.config(check_type);
        let (crit_range, fumble_range) = self.effective_ranges(check_type, options);
        let margin = roll_total - target_number;
        let natural_crit = crit_range.contains(roll_value);
        let natural_fumble = fumble_range.contains(roll_value);

        let (success, degree) = if natural_crit
            && config.critical_success == CriticalPolicy::Automatic
        {
            (true, Degree::CriticalSuccess)
        } else if natural_fumble && config.critical_failure == CriticalPolicy::Automatic {
            (false, Degree::CriticalFailure)
        } else if config.degree_of_success {
            let degree = Degree::from_margin(margin);
            (degree.is_success(), degree)
        } else if roll_total >= target_number {
            (true, Degree::Success)
        } else {
            (false, Degree::Failure)
        };

        Resolution {
            roll_total,
            roll_value,
            target_number,
            success,
            degree,
            margin,
            is_critical_success: natural_crit
                && (config.critical_success == CriticalPolicy::Automatic || success),
            is_critical_failure: natural_fumble
                && (config.critical_failure == CriticalPolicy::Automatic || !success),
            check_type,
        }
    }
}

/// One participant's roll in a contest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContestEntry {
    pub participant: String,
    pub formula: String,
    pub total: i32,
}

/// Outcome of a contested roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContestResult {
    /// All entries, highest total first. Ties keep their input order.
    pub rankings: Vec<ContestEntry>,
    pub winners: Vec<ContestEntry>,
    pub is_tie: bool,
    pub highest_roll: i32,
}

/// Rank already-rolled entries. Returns `None` for an empty contest.
pub fn resolve_contest(mut entries: Vec<ContestEntry>) -> Option<ContestResult> {
    entries.sort_by(|a, b| b.total.cmp(&a.total));
    let highest_roll = entries.first()?.total;
    let winners: Vec<ContestEntry> = entries
        .iter()
        .take_while(|e| e.total == highest_roll)
        .cloned()
        .collect();

    Some(ContestResult {
        is_tie: winners.len() > 1,
        winners,
        rankings: entries,
        highest_roll,
    })
}

/// Roll each `(participant, formula)` independently and rank the results.
pub async fn roll_contest(
    roller: &dyn DiceRoller,
    participants: &[(String, String)],
) -> Result<Option<ContestResult>, DiceError> {
    let mut entries = Vec::with_capacity(participants.len());
    for (participant, formula) in participants {
        let evaluation = roller.evaluate(formula).await?;
        entries.push(ContestEntry {
            participant: participant.clone(),
            formula: formula.clone(),
            total: evaluation.total,
        });
    }
    Ok(resolve_contest(entries))
}
