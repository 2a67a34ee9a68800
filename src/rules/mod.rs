pub mod allergy;
pub mod evaluator;
pub mod table;

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::catalog::{CatalogColumn, Nutrient};

pub use evaluator::{evaluate, suggestion_flags};
pub use table::{FoodConstraint, MedicalRule, RuleTable};

/// Soft hint that biases generation toward (or away from) a nutrient.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionFlag {
    PromoteHealthyFats,
    PromoteVitaminD,
    PromoteVitaminB12,
    PromoteHypothyroidSupport,
    ModerateHyperthyroidSupport,
}

impl SuggestionFlag {
    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::PromoteHealthyFats => "promote_healthy_fats",
            Self::PromoteVitaminD => "promote_vitamin_d",
            Self::PromoteVitaminB12 => "promote_vitamin_b12",
            Self::PromoteHypothyroidSupport => "promote_hypothyroid_support",
            Self::ModerateHyperthyroidSupport => "moderate_hyperthyroid_support",
        }
    }

    pub fn nutrient(&self) -> Nutrient {
        match self {
            Self::PromoteHealthyFats => Nutrient::Omega3,
            Self::PromoteVitaminD => Nutrient::VitaminD,
            Self::PromoteVitaminB12 => Nutrient::VitaminB12,
            Self::PromoteHypothyroidSupport | Self::ModerateHyperthyroidSupport => Nutrient::Iodine,
        }
    }

    /// +1 for promotion flags, -1 for moderation flags.
    pub fn direction(&self) -> f64 {
        match self {
            Self::ModerateHyperthyroidSupport => -1.0,
            _ => 1.0,
        }
    }
}

impl Display for SuggestionFlag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SkippedRule {
    pub rule: String,
    pub missing_columns: Vec<CatalogColumn>,
}

/// Result of evaluating one health vector against one catalog snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleOutcome {
    /// Catalog indices in ascending order.
    pub allowed: Vec<usize>,
    pub allowed_names: Vec<String>,
    pub suggestion_flags: BTreeSet<SuggestionFlag>,
    pub triggered_rules: Vec<String>,
    pub skipped_rules: Vec<SkippedRule>,
    pub allergy_tokens: Vec<String>,
    pub catalog_size: usize,
}

impl RuleOutcome {
    pub fn allowed_food_count(&self) -> usize {
        self.allowed.len()
    }

    pub fn is_allowed(&self, catalog_index: usize) -> bool {
        self.allowed.binary_search(&catalog_index).is_ok()
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allowed.len() == self.catalog_size
    }
}
