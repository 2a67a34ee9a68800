use std::collections::BTreeSet;

use tracing::{debug, info, warn};

use crate::catalog::{CatalogColumn, FoodCatalog, FoodItem, FoodType};
use crate::health::{DietPreference, HealthVector};
use crate::rules::allergy::{conflicts, mentions_animal_product, user_allergy_tokens};
use crate::rules::table::{MedicalRule, RuleTable};
use crate::rules::{RuleOutcome, SkippedRule, SuggestionFlag};

/// Filters the catalog down to the foods that pass every active restriction.
///
/// Medical rules, the allergy filter and the dietary preference filter are combined
/// conjunctively. A rule whose catalog columns are missing is skipped and reported.
pub fn evaluate(health: &HealthVector, catalog: &FoodCatalog, table: &RuleTable) -> RuleOutcome {
    let mut triggered_rules = Vec::new();
    let mut skipped_rules = Vec::new();
    let mut active: Vec<&MedicalRule> = Vec::new();

    for rule in table.rules() {
        if !rule.is_triggered(health) {
            continue;
        }
        let missing = catalog.missing_columns(&rule.required_columns());
        if !missing.is_empty() {
            warn!(
                "rule `{}` triggered but catalog lacks {:?}; skipping rule",
                rule.name,
                missing.iter().map(|c| c.column_name()).collect::<Vec<_>>()
            );
            skipped_rules.push(SkippedRule {
                rule: rule.name.to_string(),
                missing_columns: missing,
            });
            continue;
        }
        info!("rule triggered: {} ({})", rule.name, rule.describe());
        triggered_rules.push(rule.name.to_string());
        active.push(rule);
    }

    let allergy_tokens = if health.has_allergies() {
        user_allergy_tokens(&health.allergies)
    } else {
        BTreeSet::new()
    };
    if !allergy_tokens.is_empty() {
        if catalog.has_column(CatalogColumn::Allergens) {
            info!("allergy filter active for {:?}", allergy_tokens);
            triggered_rules.push("allergy".to_string());
        } else {
            warn!("allergy filter requested but catalog has no Allergens column; every food passes");
        }
    }

    let preference = health.diet_preference;
    if preference != DietPreference::Omnivore {
        triggered_rules.push(format!("{preference:?}").to_lowercase());
    }

    let mut allowed = Vec::new();
    let mut allowed_names = Vec::new();
    for (idx, food) in catalog.items().iter().enumerate() {
        let medical_ok = active.iter().all(|rule| rule.admits(food));
        if medical_ok
            && !conflicts(&allergy_tokens, &food.allergens)
            && admits_preference(preference, food)
        {
            allowed.push(idx);
            allowed_names.push(food.name.clone());
        }
    }

    debug!(
        "rule evaluation kept {} of {} foods",
        allowed.len(),
        catalog.len()
    );

    RuleOutcome {
        allowed,
        allowed_names,
        suggestion_flags: suggestion_flags(health),
        triggered_rules,
        skipped_rules,
        allergy_tokens: allergy_tokens.into_iter().collect(),
        catalog_size: catalog.len(),
    }
}

fn admits_preference(preference: DietPreference, food: &FoodItem) -> bool {
    match preference {
        DietPreference::Omnivore => true,
        DietPreference::Vegetarian => food.food_type != FoodType::NonVegetarian,
        DietPreference::Vegan => {
            !matches!(food.food_type, FoodType::NonVegetarian | FoodType::Eggetarian)
                && !mentions_animal_product(&food.allergens)
        }
    }
}

/// Non-filtering hints. Lab values of zero are treated as not measured.
pub fn suggestion_flags(health: &HealthVector) -> BTreeSet<SuggestionFlag> {
    let mut flags = BTreeSet::new();
    let hdl_floor = if health.is_male() { 40.0 } else { 50.0 };
    if health.hdl > 0.0 && health.hdl < hdl_floor {
        flags.insert(SuggestionFlag::PromoteHealthyFats);
    }
    if health.vitamin_d3 > 0.0 && health.vitamin_d3 < 20.0 {
        flags.insert(SuggestionFlag::PromoteVitaminD);
    }
    if health.vitamin_b12 > 0.0 && health.vitamin_b12 < 200.0 {
        flags.insert(SuggestionFlag::PromoteVitaminB12);
    }
    if health.thyroid_disorder && health.tsh > 0.0 {
        if health.tsh > 4.0 {
            flags.insert(SuggestionFlag::PromoteHypothyroidSupport);
        } else if health.tsh < 0.4 {
            flags.insert(SuggestionFlag::ModerateHyperthyroidSupport);
        }
    }
    flags
}
