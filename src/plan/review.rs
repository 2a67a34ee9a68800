use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::FoodCatalog;
use crate::health::HealthVector;
use crate::model::Vocabulary;
use crate::plan::assembler::meal_from_food;
use crate::plan::{DietPlan, MealSlot, PlanMeal, SelectionTier};
use crate::rules::{RuleOutcome, SuggestionFlag};

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }
}

impl Display for PlanStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown plan status: {0}")]
pub struct PlanStatusParseError(pub String);

impl FromStr for PlanStatus {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            other => Err(PlanStatusParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReviewAction {
    Approve,
    Reject,
}

impl FromStr for ReviewAction {
    type Err = PlanStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "approve" | "approved" => Ok(Self::Approve),
            "reject" | "rejected" => Ok(Self::Reject),
            other => Err(PlanStatusParseError(other.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum PlanEditError {
    #[error("no catalog food matches {0:?}")]
    UnknownFood(String),
    #[error("day {day} is outside the plan (1..={days})")]
    DayOutOfRange { day: usize, days: usize },
    #[error("plan is {from}; only pending plans can be reviewed")]
    NotPending { from: PlanStatus },
    #[error("plan is {0}; only approved plans can be flagged for retraining")]
    NotApproved(PlanStatus),
}

/// A generated plan together with its review and retraining bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlanRecord {
    pub id: i64,
    pub patient_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: PlanStatus,
    pub health_snapshot: HealthVector,
    /// The plan exactly as decoded. Never edited.
    pub original_plan: DietPlan,
    pub meals: DietPlan,
    pub suggestion_flags: Vec<SuggestionFlag>,
    pub triggered_rules: Vec<String>,
    pub allowed_food_count: usize,
    pub checkpoint: Option<String>,
    pub catalog_digest: String,
    pub reviewed_by: Option<String>,
    pub reviewer_comment: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub approved_for_retraining: bool,
    pub retraining_notes: Option<String>,
    pub used_for_retraining: bool,
    pub partially_usable: bool,
}

impl PlanRecord {
    pub fn new_pending(
        patient_id: impl Into<String>,
        health: HealthVector,
        plan: DietPlan,
        outcome: &RuleOutcome,
        checkpoint: Option<String>,
        catalog_digest: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            patient_id: patient_id.into(),
            created_at: now,
            updated_at: now,
            status: PlanStatus::Pending,
            health_snapshot: health,
            original_plan: plan.clone(),
            meals: plan,
            suggestion_flags: outcome.suggestion_flags.iter().copied().collect(),
            triggered_rules: outcome.triggered_rules.clone(),
            allowed_food_count: outcome.allowed_food_count(),
            checkpoint,
            catalog_digest: catalog_digest.into(),
            reviewed_by: None,
            reviewer_comment: None,
            reviewed_at: None,
            approved_for_retraining: false,
            retraining_notes: None,
            used_for_retraining: false,
            partially_usable: false,
        }
    }

    pub fn is_training_candidate(&self) -> bool {
        self.status == PlanStatus::Approved
            && self.approved_for_retraining
            && !self.used_for_retraining
    }

    pub fn review(
        &mut self,
        action: ReviewAction,
        reviewer: Option<String>,
        comment: Option<String>,
    ) -> Result<(), PlanEditError> {
        if self.status != PlanStatus::Pending {
            return Err(PlanEditError::NotPending { from: self.status });
        }
        self.status = match action {
            ReviewAction::Approve => PlanStatus::Approved,
            ReviewAction::Reject => PlanStatus::Rejected,
        };
        let now = Utc::now();
        self.reviewed_by = reviewer;
        self.reviewer_comment = comment;
        self.reviewed_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Clearing the flag is always allowed; setting it needs an approved plan.
    pub fn flag_for_retraining(
        &mut self,
        approved: bool,
        notes: Option<String>,
    ) -> Result<(), PlanEditError> {
        if approved && self.status != PlanStatus::Approved {
            return Err(PlanEditError::NotApproved(self.status));
        }
        self.approved_for_retraining = approved;
        if notes.is_some() {
            self.retraining_notes = notes;
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Replaces one cell with the catalog food best matching `query`.
    ///
    /// An edited plan goes back to pending and loses its retraining flag, so it has to
    /// be reviewed again before it can train anything.
    pub fn edit_meal(
        &mut self,
        day: usize,
        slot: MealSlot,
        query: &str,
        catalog: &FoodCatalog,
        vocab: Option<&Vocabulary>,
    ) -> Result<&PlanMeal, PlanEditError> {
        let days = self.meals.days.len();
        if day == 0 || day > days {
            return Err(PlanEditError::DayOutOfRange { day, days });
        }
        let food = catalog
            .resolve(query)
            .ok_or_else(|| PlanEditError::UnknownFood(query.to_string()))?;
        let token_id = vocab.and_then(|v| v.id(&food.name));
        let replacement = meal_from_food(slot, food, token_id, SelectionTier::Edited);

        self.status = PlanStatus::Pending;
        self.approved_for_retraining = false;
        self.updated_at = Utc::now();

        let plan_day = &mut self.meals.days[day - 1];
        let position = match plan_day.meals.iter().position(|m| m.slot == slot) {
            Some(position) => {
                plan_day.meals[position] = replacement;
                position
            }
            None => {
                plan_day.meals.push(replacement);
                plan_day.meals.sort_by_key(|m| m.slot);
                plan_day
                    .meals
                    .iter()
                    .position(|m| m.slot == slot)
                    .unwrap_or_default()
            }
        };
        plan_day.recompute_totals();
        Ok(&plan_day.meals[position])
    }
}
