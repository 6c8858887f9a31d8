//! Modifier inputs and the terms they tokenize into.

use crate::dice::{Advantage, MAX_DICE, MAX_FACES};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Whether a term is rolled or flat.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Dice,
    Number,
}

/// The structured value of a term. Rendered to formula text only when the
/// pool is assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Element {
    Number(i32),
    /// Quantity is signed so `-1d4` subtracts a die.
    Dice { quantity: i32, faces: u32 },
    /// A d20 rewritten for advantage or disadvantage.
    Paired { advantage: Advantage, faces: u32 },
}

impl Element {
    pub fn element_type(&self) -> ElementType {
        match self {
            Element::Number(_) => ElementType::Number,
            Element::Dice { .. } | Element::Paired { .. } => ElementType::Dice,
        }
    }

    /// Parse one token (`3`, `-2`, `1d6`, `-1d4`, `d8`). Returns `None` for
    /// anything else, including zero values and dice beyond the roller's
    /// limits.
    pub fn parse(token: &str) -> Option<Element> {
        let (negative, body) = match token.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, token),
        };
        if body.is_empty() {
            return None;
        }

        if body.chars().all(|c| c.is_ascii_digit()) {
            let value: i32 = body.parse().ok()?;
            if value == 0 {
                return None;
            }
            return Some(Element::Number(if negative { -value } else { value }));
        }

        let (quantity, faces) = body.split_once(['d', 'D'])?;
        let quantity: i32 = if quantity.is_empty() {
            1
        } else {
            quantity.parse().ok()?
        };
        let faces: u32 = faces.parse().ok()?;
        if quantity == 0
            || faces == 0
            || faces > MAX_FACES
            || quantity.unsigned_abs() > MAX_DICE
        {
            return None;
        }
        Some(Element::Dice {
            quantity: if negative { -quantity } else { quantity },
            faces,
        })
    }

    pub fn faces(&self) -> Option<u32> {
        match self {
            Element::Number(_) => None,
            Element::Dice { faces, .. } | Element::Paired { faces, .. } => Some(*faces),
        }
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Element::Number(n) => write!(f, "{n}"),
            Element::Dice { quantity, faces } => write!(f, "{quantity}d{faces}"),
            Element::Paired { advantage, faces } => match advantage.function() {
                Some(func) => write!(f, "{func}(1d{faces},1d{faces})"),
                None => write!(f, "1d{faces}"),
            },
        }
    }
}

/// One atomic dice or numeric contribution to a pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifierTerm {
    pub element: Element,
    /// Damage or ability category. Empty means "the roll's base type".
    pub modifier_type: String,
    pub modifier_name: String,
    pub feature_name: Option<String>,
}

impl ModifierTerm {
    pub fn new(element: Element, modifier_name: impl Into<String>) -> Self {
        Self {
            element,
            modifier_type: String::new(),
            modifier_name: modifier_name.into(),
            feature_name: None,
        }
    }

    pub fn element_type(&self) -> ElementType {
        self.element.element_type()
    }
}

/// A named modifier as collected from the roll dialog or contributed by a
/// feature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifierInput {
    pub modifier_name: String,
    /// Raw formula fragment, e.g. `1d6+2` or `-1d4`.
    pub modifier: String,
    #[serde(default)]
    pub modifier_type: String,
    #[serde(default = "default_enabled")]
    pub is_enabled: bool,
    #[serde(default)]
    pub is_dice: bool,
}

fn default_enabled() -> bool {
    true
}

impl ModifierInput {
    pub fn new(modifier_name: impl Into<String>, modifier: impl Into<String>) -> Self {
        let modifier = modifier.into();
        Self {
            modifier_name: modifier_name.into(),
            is_dice: modifier.contains(['d', 'D']),
            modifier,
            modifier_type: String::new(),
            is_enabled: true,
        }
    }

    pub fn with_type(mut self, modifier_type: impl Into<String>) -> Self {
        self.modifier_type = modifier_type.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.is_enabled = false;
        self
    }
}

/// Split a raw fragment into signed tokens.
///
/// `+` separates chunks; within a chunk, every `-` that is not the first
/// character starts a new token, so `1d6-2` yields `1d6` and `-2` while
/// `-1d4` stays whole.
pub fn split_tokens(raw: &str) -> Vec<String> {
    let cleaned: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    let mut tokens = Vec::new();

    for chunk in cleaned.split('+') {
        let mut current = String::new();
        for (i, ch) in chunk.chars().enumerate() {
            if ch == '-' && i > 0 {
                tokens.push(std::mem::take(&mut current));
            }
            current.push(ch);
        }
        tokens.push(current);
    }

    tokens.retain(|t| !t.is_empty());
    tokens
}

/// Tokenize a single input into terms. Disabled inputs produce nothing;
/// malformed and zero tokens are dropped.
pub fn tokenize(input: &ModifierInput, feature_name: Option<&str>) -> Vec<ModifierTerm> {
    if !input.is_enabled {
        return Vec::new();
    }

    split_tokens(&input.modifier)
        .into_iter()
        .filter_map(|token| match Element::parse(&token) {
            Some(element) => Some(ModifierTerm {
                element,
                modifier_type: input.modifier_type.clone(),
                modifier_name: input.modifier_name.clone(),
                feature_name: feature_name.map(str::to_string),
            }),
            None => {
                debug!(token = %token, modifier = %input.modifier_name, "dropping modifier token");
                None
            }
        })
        .collect()
}

/// Tokenize every enabled input, preserving order.
pub fn tokenize_all(inputs: &[ModifierInput]) -> Vec<ModifierTerm> {
    inputs.iter().flat_map(|i| tokenize(i, None)).collect()
}
