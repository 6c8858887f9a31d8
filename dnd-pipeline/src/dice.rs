//! D&D dice evaluation.
//!
//! Evaluates the formulas produced by the pool builder: `XdY`, flat numbers,
//! `+`/`-`, the `max(a,b)` / `min(a,b)` functions used for advantage and
//! disadvantage, and bracket-tagged damage groups such as `(2d6+3)[fire]`.

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::Mutex;

/// Error type for dice parsing and rolling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Unknown function '{0}' in {1}")]
    UnknownFunction(String, String),
    #[error("Too many dice: {0} (at most {MAX_DICE})")]
    TooManyDice(u32),
    #[error("Die size too large: {0} (at most {MAX_FACES})")]
    DieTooLarge(u32),
}

/// Largest dice count accepted in a single `NdM` term.
pub const MAX_DICE: u32 = 1000;

/// Largest die size accepted.
pub const MAX_FACES: u32 = 1000;

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }

    /// Build the state from the two dialog checkboxes. Both ticked cancel out.
    pub fn from_flags(advantage: bool, disadvantage: bool) -> Advantage {
        let adv = if advantage {
            Advantage::Advantage
        } else {
            Advantage::Normal
        };
        let dis = if disadvantage {
            Advantage::Disadvantage
        } else {
            Advantage::Normal
        };
        adv.combine(dis)
    }

    /// The formula function that picks the kept result.
    pub fn function(&self) -> Option<&'static str> {
        match self {
            Advantage::Normal => None,
            Advantage::Advantage => Some("max"),
            Advantage::Disadvantage => Some("min"),
        }
    }
}

/// Parsed dice formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Expr {
    Number(i32),
    Dice { count: u32, faces: u32 },
    /// Signed terms; `true` marks a subtracted term.
    Sum(Vec<(bool, Expr)>),
    Max(Box<Expr>, Box<Expr>),
    Min(Box<Expr>, Box<Expr>),
    Group { inner: Box<Expr>, tag: Option<String> },
}

/// A complete dice formula (e.g. `max(1d20,1d20)+5`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Formula {
    pub expr: Expr,
    pub original: String,
}

impl Formula {
    /// Parse a formula string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        // Whitespace is insignificant except inside `[type]` tags.
        let mut in_tag = false;
        let cleaned: String = notation
            .chars()
            .filter(|&c| {
                match c {
                    '[' => in_tag = true,
                    ']' => in_tag = false,
                    _ => {}
                }
                in_tag || !c.is_whitespace()
            })
            .collect::<String>()
            .to_lowercase();
        if cleaned.is_empty() {
            return Err(DiceError::NoDice);
        }

        let mut parser = Parser {
            chars: cleaned.chars().collect(),
            pos: 0,
            source: &cleaned,
        };
        let expr = parser.sum()?;
        if parser.pos != parser.chars.len() {
            return Err(DiceError::InvalidNotation(cleaned.clone()));
        }

        Ok(Formula {
            expr,
            original: cleaned,
        })
    }

    /// Roll the formula and return the result.
    pub fn roll(&self) -> Evaluation {
        self.roll_with_rng(&mut rand::thread_rng())
    }

    /// Roll with a specific RNG (useful for testing).
    pub fn roll_with_rng<R: Rng>(&self, rng: &mut R) -> Evaluation {
        self.roll_with(&mut |faces| rng.gen_range(1..=faces))
    }

    /// Roll using an arbitrary face source. `next_face(faces)` must return a
    /// value in `1..=faces`.
    pub fn roll_with(&self, next_face: &mut dyn FnMut(u32) -> u32) -> Evaluation {
        let outcome = eval(&self.expr, next_face);
        Evaluation {
            formula: self.original.clone(),
            total: outcome.total,
            dice: outcome.dice,
            typed_totals: outcome.typed,
            natural: outcome.natural,
        }
    }
}

impl FromStr for Formula {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Formula::parse(s)
    }
}

impl fmt::Display for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.original)
    }
}

struct Parser<'a> {
    chars: Vec<char>,
    pos: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn invalid(&self) -> DiceError {
        DiceError::InvalidNotation(self.source.to_string())
    }

    fn expect(&mut self, ch: char) -> Result<(), DiceError> {
        if self.peek() == Some(ch) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.invalid())
        }
    }

    fn sum(&mut self) -> Result<Expr, DiceError> {
        let mut terms = Vec::new();
        let mut negative = match self.peek() {
            Some('-') => {
                self.pos += 1;
                true
            }
            Some('+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };

        loop {
            let term = self.atom()?;
            terms.push((negative, term));
            match self.peek() {
                Some('+') => negative = false,
                Some('-') => negative = true,
                _ => break,
            }
            self.pos += 1;
        }

        if terms.len() == 1 && !terms[0].0 {
            return Ok(terms.remove(0).1);
        }
        Ok(Expr::Sum(terms))
    }

    fn atom(&mut self) -> Result<Expr, DiceError> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let inner = self.sum()?;
                self.expect(')')?;
                let tag = if self.peek() == Some('[') {
                    self.pos += 1;
                    let start = self.pos;
                    while self.peek().is_some_and(|c| c != ']') {
                        self.pos += 1;
                    }
                    let tag: String = self.chars[start..self.pos].iter().collect();
                    self.expect(']')?;
                    Some(tag.trim().to_string())
                } else {
                    None
                };
                Ok(Expr::Group {
                    inner: Box::new(inner),
                    tag,
                })
            }
            Some(c) if c.is_ascii_digit() => {
                let count = self.number()?;
                if self.peek() == Some('d') {
                    self.pos += 1;
                    let faces = self.number()?;
                    self.dice(count, faces)
                } else {
                    i32::try_from(count)
                        .map(Expr::Number)
                        .map_err(|_| self.invalid())
                }
            }
            Some('d') if self.chars.get(self.pos + 1).is_some_and(|c| c.is_ascii_digit()) => {
                self.pos += 1;
                let faces = self.number()?;
                self.dice(1, faces)
            }
            Some(c) if c.is_ascii_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(|c| c.is_ascii_alphabetic()) {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                self.expect('(')?;
                let a = self.sum()?;
                self.expect(',')?;
                let b = self.sum()?;
                self.expect(')')?;
                match name.as_str() {
                    "max" => Ok(Expr::Max(Box::new(a), Box::new(b))),
                    "min" => Ok(Expr::Min(Box::new(a), Box::new(b))),
                    _ => Err(DiceError::UnknownFunction(name, self.source.to_string())),
                }
            }
            _ => Err(self.invalid()),
        }
    }

    fn number(&mut self) -> Result<u32, DiceError> {
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let digits: String = self.chars[start..self.pos].iter().collect();
        digits.parse().map_err(|_| self.invalid())
    }

    fn dice(&self, count: u32, faces: u32) -> Result<Expr, DiceError> {
        if faces == 0 {
            return Err(DiceError::InvalidDieSize(faces));
        }
        if faces > MAX_FACES {
            return Err(DiceError::DieTooLarge(faces));
        }
        if count > MAX_DICE {
            return Err(DiceError::TooManyDice(count));
        }
        Ok(Expr::Dice { count, faces })
    }
}

#[derive(Default)]
struct Outcome {
    total: i32,
    dice: Vec<DieResult>,
    typed: BTreeMap<String, i32>,
    natural: Option<u32>,
}

fn eval(expr: &Expr, next_face: &mut dyn FnMut(u32) -> u32) -> Outcome {
    match expr {
        Expr::Number(n) => Outcome {
            total: *n,
            ..Outcome::default()
        },
        Expr::Dice { count, faces } => {
            let dice: Vec<DieResult> = (0..*count)
                .map(|_| DieResult {
                    faces: *faces,
                    value: next_face(*faces).clamp(1, *faces),
                    kept: true,
                })
                .collect();
            // Natural 20/1 detection only applies to a single d20.
            let natural = if *count == 1 && *faces == 20 {
                dice.first().map(|d| d.value)
            } else {
                None
            };
            Outcome {
                total: dice
                    .iter()
                    .fold(0i32, |sum, d| sum.saturating_add(d.value as i32)),
                dice,
                typed: BTreeMap::new(),
                natural,
            }
        }
        Expr::Sum(terms) => {
            let mut out = Outcome::default();
            for (negative, term) in terms {
                let part = eval(term, next_face);
                let signed = |value: i32| if *negative { value.saturating_neg() } else { value };
                out.total = out.total.saturating_add(signed(part.total));
                out.dice.extend(part.dice);
                for (tag, value) in part.typed {
                    let entry = out.typed.entry(tag).or_insert(0);
                    *entry = entry.saturating_add(signed(value));
                }
                out.natural = out.natural.or(part.natural);
            }
            out
        }
        Expr::Max(a, b) | Expr::Min(a, b) => {
            let left = eval(a, next_face);
            let right = eval(b, next_face);
            let keep_left = match expr {
                Expr::Max(..) => left.total >= right.total,
                _ => left.total <= right.total,
            };
            let (mut kept, mut dropped) = if keep_left {
                (left, right)
            } else {
                (right, left)
            };
            for die in &mut dropped.dice {
                die.kept = false;
            }
            kept.dice.extend(dropped.dice);
            kept
        }
        Expr::Group { inner, tag } => {
            let mut out = eval(inner, next_face);
            if let Some(tag) = tag {
                out.typed = BTreeMap::from([(tag.clone(), out.total)]);
            }
            out
        }
    }
}

/// A single die rolled while evaluating a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieResult {
    pub faces: u32,
    pub value: u32,
    /// False for the discarded side of a `max`/`min`.
    pub kept: bool,
}

/// Complete result of evaluating a formula.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub formula: String,
    pub total: i32,
    pub dice: Vec<DieResult>,
    /// Totals per `[type]` tag. Untagged parts of the formula are not listed.
    pub typed_totals: BTreeMap<String, i32>,
    /// Kept face of the first single d20, if the formula has one.
    pub natural: Option<u32>,
}

impl Evaluation {
    /// Format the individual dice results for display. Discarded dice are
    /// shown in parentheses.
    pub fn dice_display(&self) -> String {
        let shown: Vec<String> = self
            .dice
            .iter()
            .map(|d| {
                if d.kept {
                    format!("{}", d.value)
                } else {
                    format!("({})", d.value)
                }
            })
            .collect();
        format!("[{}]", shown.join(", "))
    }

    /// Total of everything that was not tagged with a damage type.
    pub fn untyped_total(&self) -> i32 {
        self.typed_totals
            .values()
            .fold(self.total, |rest, typed| rest.saturating_sub(*typed))
    }
}

impl fmt::Display for Evaluation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} = {}", self.formula, self.dice_display(), self.total)
    }
}

/// Dice evaluation service consumed by the workflow steps.
#[async_trait]
pub trait DiceRoller: Send + Sync {
    async fn evaluate(&self, formula: &str) -> Result<Evaluation, DiceError>;
}

/// Roller backed by a `StdRng`. Seeded instances reproduce the same rolls.
pub struct RngRoller {
    rng: Mutex<StdRng>,
}

impl RngRoller {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RngRoller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DiceRoller for RngRoller {
    async fn evaluate(&self, formula: &str) -> Result<Evaluation, DiceError> {
        let parsed = Formula::parse(formula)?;
        let mut rng = self.rng.lock().await;
        Ok(parsed.roll_with_rng(&mut *rng))
    }
}

/// Convenience function to roll a formula string.
pub fn roll(notation: &str) -> Result<Evaluation, DiceError> {
    Ok(Formula::parse(notation)?.roll())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lowest(formula: &str) -> Evaluation {
        Formula::parse(formula).unwrap().roll_with(&mut |_| 1)
    }

    fn highest(formula: &str) -> Evaluation {
        Formula::parse(formula).unwrap().roll_with(&mut |faces| faces)
    }

    #[test]
    fn test_parse_simple() {
        let formula = Formula::parse("1d20").unwrap();
        assert_eq!(formula.expr, Expr::Dice { count: 1, faces: 20 });
    }

    #[test]
    fn test_parse_with_modifier() {
        assert_eq!(highest("1d20+5").total, 25);
        assert_eq!(lowest("2d6-2").total, 0);
        assert_eq!(highest("d8").total, 8);
    }

    #[test]
    fn test_invalid_notation() {
        assert_eq!(Formula::parse(""), Err(DiceError::NoDice));
        assert!(matches!(
            Formula::parse("1d"),
            Err(DiceError::InvalidNotation(_))
        ));
        assert_eq!(Formula::parse("1d0"), Err(DiceError::InvalidDieSize(0)));
        assert!(matches!(
            Formula::parse("avg(1d6,1d6)"),
            Err(DiceError::UnknownFunction(..))
        ));
        assert!(Formula::parse("1d6)").is_err());
    }

    #[test]
    fn test_advantage_keeps_higher_die() {
        let formula = Formula::parse("max(1d20,1d20)+5").unwrap();
        let mut faces = vec![7, 15].into_iter();
        let result = formula.roll_with(&mut |_| faces.next().unwrap_or(1));
        assert_eq!(result.total, 20);
        assert_eq!(result.natural, Some(15));
        assert_eq!(result.dice.len(), 2);
        assert_eq!(result.dice_display(), "[15, (7)]");
    }

    #[test]
    fn test_disadvantage_keeps_lower_die() {
        let formula = Formula::parse("min(1d20,1d20)").unwrap();
        let mut faces = vec![1, 19].into_iter();
        let result = formula.roll_with(&mut |_| faces.next().unwrap_or(1));
        assert_eq!(result.total, 1);
        assert_eq!(result.natural, Some(1));
    }

    #[test]
    fn test_typed_groups() {
        let result = highest("(1d8+3)[slashing]+(2d6)[fire]");
        assert_eq!(result.total, 23);
        assert_eq!(result.typed_totals.get("slashing"), Some(&11));
        assert_eq!(result.typed_totals.get("fire"), Some(&12));
        assert_eq!(result.untyped_total(), 0);
    }

    #[test]
    fn test_natural_only_for_single_d20() {
        assert_eq!(highest("2d20").natural, None);
        assert_eq!(highest("1d20+1d4").natural, Some(20));
    }

    #[test]
    fn test_roll_range() {
        for _ in 0..100 {
            let result = roll("1d20+5").unwrap();
            assert!(result.total >= 6 && result.total <= 25);
        }
    }

    #[tokio::test]
    async fn test_seeded_roller_is_reproducible() {
        let a = RngRoller::seeded(42);
        let b = RngRoller::seeded(42);
        for _ in 0..10 {
            let left = a.evaluate("4d6+1d20").await.unwrap();
            let right = b.evaluate("4d6+1d20").await.unwrap();
            assert_eq!(left, right);
        }
    }

    #[test]
    fn test_advantage_combine() {
        assert_eq!(
            Advantage::Normal.combine(Advantage::Advantage),
            Advantage::Advantage
        );
        assert_eq!(
            Advantage::Advantage.combine(Advantage::Disadvantage),
            Advantage::Normal
        );
        assert_eq!(Advantage::from_flags(true, true), Advantage::Normal);
        assert_eq!(Advantage::from_flags(false, true), Advantage::Disadvantage);
    }

    #[test]
    fn test_dice_limits() {
        assert_eq!(
            Formula::parse("2000000000d6"),
            Err(DiceError::TooManyDice(2_000_000_000))
        );
        assert_eq!(Formula::parse("1d5000"), Err(DiceError::DieTooLarge(5000)));
        assert_eq!(highest("1000d6").total, 6000);
    }

    #[test]
    fn test_large_sums_saturate() {
        let result = lowest("2000000000+2000000000");
        assert_eq!(result.total, i32::MAX);
        let result = lowest("-2000000000-2000000000");
        assert_eq!(result.total, i32::MIN);
    }

    #[test]
    fn test_tag_keeps_inner_spaces() {
        let result = highest("(1d6 + 2)[ Magical Piercing ]");
        assert_eq!(result.typed_totals.get("magical piercing"), Some(&8));
        assert_eq!(result.untyped_total(), 0);
    }
}
