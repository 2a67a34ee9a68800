pub mod assembler;
pub mod review;
pub mod targets;

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::NutrientProfile;

pub use assembler::{assemble, AssembleError};
pub use review::{PlanEditError, PlanRecord, PlanStatus, ReviewAction};
pub use targets::NutritionalTargets;

pub const PLAN_DAYS: usize = 15;
pub const MEALS_PER_DAY: usize = 7;
pub const PLAN_CELLS: usize = PLAN_DAYS * MEALS_PER_DAY;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MealSlot {
    EarlyMorning,
    Breakfast,
    MidMorningSnack,
    Lunch,
    AfternoonSnack,
    Dinner,
    Bedtime,
}

impl MealSlot {
    pub const ALL: [MealSlot; MEALS_PER_DAY] = [
        MealSlot::EarlyMorning,
        MealSlot::Breakfast,
        MealSlot::MidMorningSnack,
        MealSlot::Lunch,
        MealSlot::AfternoonSnack,
        MealSlot::Dinner,
        MealSlot::Bedtime,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::EarlyMorning => "Early-Morning",
            Self::Breakfast => "Breakfast",
            Self::MidMorningSnack => "Mid-Morning Snack",
            Self::Lunch => "Lunch",
            Self::AfternoonSnack => "Afternoon Snack",
            Self::Dinner => "Dinner",
            Self::Bedtime => "Bedtime",
        }
    }

    pub fn index(&self) -> usize {
        Self::ALL
            .iter()
            .position(|slot| slot == self)
            .unwrap_or_default()
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }
}

impl Display for MealSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Error)]
#[error("unknown meal slot: {0}")]
pub struct MealSlotParseError(pub String);

impl FromStr for MealSlot {
    type Err = MealSlotParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = normalize_label(s);
        Self::ALL
            .iter()
            .find(|slot| normalize_label(slot.label()) == wanted)
            .copied()
            .ok_or_else(|| MealSlotParseError(s.to_string()))
    }
}

/// Lowercases and folds `-`/`_` into single spaces.
pub fn normalize_label(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['-', '_'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// How the food in a cell was chosen.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SelectionTier {
    Sampled,
    RankedVocabulary,
    SlotPool,
    AllowedPool,
    CapRelaxed,
    Edited,
}

impl SelectionTier {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Sampled => "sampled",
            Self::RankedVocabulary => "ranked_vocabulary",
            Self::SlotPool => "slot_pool",
            Self::AllowedPool => "allowed_pool",
            Self::CapRelaxed => "cap_relaxed",
            Self::Edited => "edited",
        }
    }

    pub fn is_fallback(&self) -> bool {
        !matches!(self, Self::Sampled | Self::Edited)
    }
}

impl Display for SelectionTier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanMeal {
    pub slot: MealSlot,
    pub food_name: String,
    #[serde(default)]
    pub token_id: Option<u32>,
    pub serving: String,
    /// Snapshot taken when the cell was committed.
    pub nutrients: NutrientProfile,
    pub tier: SelectionTier,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanDay {
    pub day: usize,
    pub meals: Vec<PlanMeal>,
    pub totals: NutrientProfile,
}

impl PlanDay {
    pub fn recompute_totals(&mut self) {
        let mut totals = NutrientProfile::default();
        for meal in &self.meals {
            totals.accumulate(&meal.nutrients);
        }
        self.totals = totals;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DietPlan {
    pub days: Vec<PlanDay>,
    pub targets: NutritionalTargets,
    #[serde(default)]
    pub fallback_counts: BTreeMap<SelectionTier, usize>,
}

impl DietPlan {
    pub fn cell_count(&self) -> usize {
        self.days.iter().map(|d| d.meals.len()).sum()
    }

    pub fn meal(&self, day: usize, slot: MealSlot) -> Option<&PlanMeal> {
        self.days
            .iter()
            .find(|d| d.day == day)
            .and_then(|d| d.meals.iter().find(|m| m.slot == slot))
    }

    pub fn meals_in_order(&self) -> impl Iterator<Item = (usize, &PlanMeal)> {
        self.days
            .iter()
            .flat_map(|d| d.meals.iter().map(move |m| (d.day, m)))
    }

    pub fn food_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for (_, meal) in self.meals_in_order() {
            *counts.entry(meal.food_name.clone()).or_insert(0) += 1;
        }
        counts
    }

    pub fn recompute_totals(&mut self) {
        self.days.iter_mut().for_each(PlanDay::recompute_totals);
    }

    /// `Day N -> slot label -> meal` view for external consumers.
    pub fn to_keyed_json(&self) -> serde_json::Value {
        let mut days = serde_json::Map::new();
        for day in &self.days {
            let mut meals = serde_json::Map::new();
            for meal in &day.meals {
                meals.insert(
                    meal.slot.label().to_string(),
                    serde_json::json!({
                        "food_name": meal.food_name,
                        "serving": meal.serving,
                        "nutrients": meal.nutrients,
                    }),
                );
            }
            days.insert(format!("Day {}", day.day), serde_json::Value::Object(meals));
        }
        serde_json::Value::Object(days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_slot_labels_loosely() {
        assert_eq!("early_morning".parse::<MealSlot>().expect("slot"), MealSlot::EarlyMorning);
        assert_eq!("mid-morning snack".parse::<MealSlot>().expect("slot"), MealSlot::MidMorningSnack);
        assert_eq!("DINNER".parse::<MealSlot>().expect("slot"), MealSlot::Dinner);
        assert!("brunch".parse::<MealSlot>().is_err());
        assert_eq!(MealSlot::Bedtime.index(), 6);
        assert_eq!(MealSlot::from_index(3), Some(MealSlot::Lunch));
    }
}
