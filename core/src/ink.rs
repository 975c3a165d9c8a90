//! Ink colours and per-colour fill levels.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Level at or below which a colour is reported as low.
pub const LOW_INK_THRESHOLD: f64 = 15.0;

/// Full cartridge/tank/toner level.
pub const FULL_INK: f64 = 100.0;

/// Tolerance for floating point drift when comparing a draw to a level.
const EPSILON: f64 = 1e-9;

/// A single ink (or toner) colour.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InkColor {
    /// Black
    Black,
    /// Cyan
    Cyan,
    /// Magenta
    Magenta,
    /// Yellow
    Yellow,
}

impl InkColor {
    /// All colours in CMYK display order.
    pub const ALL: [Self; 4] = [Self::Black, Self::Cyan, Self::Magenta, Self::Yellow];

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Black => "black",
            Self::Cyan => "cyan",
            Self::Magenta => "magenta",
            Self::Yellow => "yellow",
        }
    }
}

impl std::fmt::Display for InkColor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of drawing ink from one colour.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Draw {
    /// Amount actually removed.
    pub drawn: f64,
    /// Whether the requested amount exceeded what was left.
    pub exhausted: bool,
}

/// Fill level per colour, each clamped to `[0, 100]`.
///
/// Only colours the printer carries are present. `depleted` and `low` are
/// derived from the level and never stored.
#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InkLevels(BTreeMap<InkColor, f64>);

impl InkLevels {
    /// Every given colour at 100%.
    #[must_use]
    pub fn full(colors: &[InkColor]) -> Self {
        Self(colors.iter().map(|c| (*c, FULL_INK)).collect())
    }

    /// Level of a colour, `None` if the printer does not carry it.
    #[must_use]
    pub fn level(&self, color: InkColor) -> Option<f64> {
        self.0.get(&color).copied()
    }

    /// Whether the printer carries this colour.
    #[must_use]
    pub fn carries(&self, color: InkColor) -> bool {
        self.0.contains_key(&color)
    }

    /// Sets a colour's level, clamped to `[0, 100]`. NaN is treated as empty.
    pub fn set(&mut self, color: InkColor, level: f64) {
        self.0.insert(color, clamp_level(level));
    }

    /// Refills one colour to 100%.
    pub fn refill(&mut self, color: InkColor) {
        self.set(color, FULL_INK);
    }

    /// Refills every carried colour to 100%.
    pub fn refill_all(&mut self) {
        for level in self.0.values_mut() {
            *level = FULL_INK;
        }
    }

    /// Removes up to `amount` from a colour, flooring at zero.
    pub fn draw(&mut self, color: InkColor, amount: f64) -> Draw {
        let Some(level) = self.0.get_mut(&color) else {
            return Draw {
                drawn: 0.0,
                exhausted: true,
            };
        };
        if *level + EPSILON >= amount {
            let drawn = amount.min(*level);
            *level = clamp_level(*level - amount);
            Draw {
                drawn,
                exhausted: false,
            }
        } else {
            let drawn = *level;
            *level = 0.0;
            Draw {
                drawn,
                exhausted: true,
            }
        }
    }

    /// Whether drawing `amount` from `color` would succeed.
    #[must_use]
    pub fn can_draw(&self, color: InkColor, amount: f64) -> bool {
        self.level(color).is_some_and(|level| level + EPSILON >= amount)
    }

    /// Whether the colour is empty (or not carried).
    #[must_use]
    pub fn is_depleted(&self, color: InkColor) -> bool {
        self.level(color).is_none_or(|level| level <= 0.0)
    }

    /// Whether the colour is at or below the low-ink threshold.
    #[must_use]
    pub fn is_low(&self, color: InkColor) -> bool {
        self.level(color)
            .is_some_and(|level| level <= LOW_INK_THRESHOLD)
    }

    /// Colours that are empty.
    #[must_use]
    pub fn depleted(&self) -> Vec<InkColor> {
        self.colors().filter(|c| self.is_depleted(*c)).collect()
    }

    /// Colours at or below the low threshold (including empty ones).
    #[must_use]
    pub fn low(&self) -> Vec<InkColor> {
        self.colors().filter(|c| self.is_low(*c)).collect()
    }

    /// Carried colours in CMYK order.
    pub fn colors(&self) -> impl Iterator<Item = InkColor> + '_ {
        self.0.keys().copied()
    }

    /// `(colour, level)` pairs in CMYK order.
    pub fn iter(&self) -> impl Iterator<Item = (InkColor, f64)> + '_ {
        self.0.iter().map(|(c, l)| (*c, *l))
    }

    /// Clamps every level back into range.
    pub fn normalize(&mut self) {
        for level in self.0.values_mut() {
            *level = clamp_level(*level);
        }
    }
}

fn clamp_level(level: f64) -> f64 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, FULL_INK)
    }
}
