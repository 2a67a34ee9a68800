use std::collections::BTreeMap;

use thiserror::Error;

use crate::catalog::{FoodCatalog, FoodItem};
use crate::model::Vocabulary;
use crate::plan::{
    DietPlan, MealSlot, NutritionalTargets, PlanDay, PlanMeal, SelectionTier, MEALS_PER_DAY,
    PLAN_CELLS,
};

#[derive(Debug, Error)]
pub enum AssembleError {
    #[error("plan has {found} cells, expected {expected}")]
    IncompleteSequence { found: usize, expected: usize },
    #[error("token {0} is not a food in the vocabulary")]
    UnknownToken(u32),
    #[error("food {0:?} is not in the catalog")]
    UnknownFood(String),
}

/// Lays a decoded `(token, tier)` sequence out as day × slot cells, snapshotting each
/// food's nutrients from the catalog.
pub fn assemble(
    sequence: &[(u32, SelectionTier)],
    vocab: &Vocabulary,
    catalog: &FoodCatalog,
    targets: NutritionalTargets,
) -> Result<DietPlan, AssembleError> {
    if sequence.len() != PLAN_CELLS {
        return Err(AssembleError::IncompleteSequence {
            found: sequence.len(),
            expected: PLAN_CELLS,
        });
    }

    let mut days = Vec::new();
    let mut fallback_counts = BTreeMap::new();
    for (day_idx, chunk) in sequence.chunks(MEALS_PER_DAY).enumerate() {
        let mut meals = Vec::with_capacity(MEALS_PER_DAY);
        for (slot, (token, tier)) in MealSlot::ALL.iter().zip(chunk) {
            let name = vocab
                .token(*token)
                .filter(|_| !Vocabulary::is_reserved(*token))
                .ok_or(AssembleError::UnknownToken(*token))?;
            let food = catalog
                .find(name)
                .ok_or_else(|| AssembleError::UnknownFood(name.to_string()))?;
            if tier.is_fallback() {
                *fallback_counts.entry(*tier).or_insert(0) += 1;
            }
            meals.push(meal_from_food(*slot, food, Some(*token), *tier));
        }
        let mut day = PlanDay {
            day: day_idx + 1,
            meals,
            totals: Default::default(),
        };
        day.recompute_totals();
        days.push(day);
    }

    Ok(DietPlan {
        days,
        targets,
        fallback_counts,
    })
}

pub(crate) fn meal_from_food(
    slot: MealSlot,
    food: &FoodItem,
    token_id: Option<u32>,
    tier: SelectionTier,
) -> PlanMeal {
    PlanMeal {
        slot,
        food_name: food.name.clone(),
        token_id,
        serving: format_serving(food),
        nutrients: food.nutrients.clone(),
        tier,
    }
}

fn format_serving(food: &FoodItem) -> String {
    let quantity = if food.serving_quantity.fract() == 0.0 {
        format!("{}", food.serving_quantity as i64)
    } else {
        format!("{}", food.serving_quantity)
    };
    if food.gram_equivalent > 0.0 {
        format!("{quantity} {} ({}g)", food.serving_unit, food.gram_equivalent)
    } else {
        format!("{quantity} {}", food.serving_unit)
    }
}
