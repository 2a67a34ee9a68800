pub mod context;
pub mod index;
pub mod usage;

use rand::distributions::{Distribution, WeightedIndex};
use rand::seq::SliceRandom;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crate::catalog::FoodCatalog;
use crate::config::GenerationConfig;
use crate::health::HealthVector;
use crate::model::network::softmax;
use crate::model::{DietModel, Vocabulary};
use crate::plan::{AssembleError, MealSlot, SelectionTier, PLAN_DAYS};
use crate::rules::RuleOutcome;

pub use context::{InferenceContext, ModelHandle};
pub use index::CandidateIndex;
pub use usage::PlanUsageCounter;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(
        "only {found} safe foods are available for this profile; at least {required} are needed for a varied plan"
    )]
    InsufficientSafeFoods { found: usize, required: usize },
    #[error("no food could be placed on day {day} at {slot}")]
    SlotUnfillable { day: usize, slot: MealSlot },
    #[error(transparent)]
    Assembly(#[from] AssembleError),
}

/// Additive logit bias per token from the profile's suggestion flags.
pub fn suggestion_bias(
    vocab: &Vocabulary,
    catalog: &FoodCatalog,
    outcome: &RuleOutcome,
    boost: f64,
) -> Vec<f32> {
    let mut bias = vec![0.0f32; vocab.len()];
    if outcome.suggestion_flags.is_empty() || boost == 0.0 {
        return bias;
    }
    for token in vocab.food_ids() {
        let Some(food) = vocab.token(token).and_then(|name| catalog.find(name)) else {
            continue;
        };
        let shift = outcome
            .suggestion_flags
            .iter()
            .filter(|flag| food.nutrient(flag.nutrient()) > 0.0)
            .map(|flag| flag.direction() * boost)
            .sum::<f64>();
        bias[token as usize] = shift as f32;
    }
    bias
}

/// Decodes 105 `(token, tier)` cells under the rule outcome's allowed set.
///
/// Each step samples from the top-K of the decoder's distribution restricted to foods
/// that are allowed, tagged for the slot, under the repetition cap and not yet eaten
/// that day. When that set is empty the step walks down a fallback ladder: the rest of
/// the ranked vocabulary, then any uncapped food for the slot, then any uncapped
/// allowed food, and finally any allowed food with the cap relaxed.
pub fn decode_plan<R: Rng + ?Sized>(
    model: &DietModel,
    vocab: &Vocabulary,
    catalog: &FoodCatalog,
    outcome: &RuleOutcome,
    health: &HealthVector,
    settings: &GenerationConfig,
    rng: &mut R,
) -> Result<Vec<(u32, SelectionTier)>, GenerationError> {
    let index = CandidateIndex::build(catalog, &outcome.allowed, vocab);
    if index.allowed().len() < settings.min_safe_foods {
        return Err(GenerationError::InsufficientSafeFoods {
            found: index.allowed().len(),
            required: settings.min_safe_foods,
        });
    }

    let bias = suggestion_bias(vocab, catalog, outcome, settings.suggestion_boost);
    let temperature = if settings.temperature > 0.0 {
        settings.temperature as f32
    } else {
        1.0
    };
    let encoded = model.encode(&health.numeric_vector());
    let mut usage = PlanUsageCounter::new(settings.max_repetition.max(1));
    let mut sequence = Vec::with_capacity(PLAN_DAYS * MealSlot::ALL.len());
    let mut prev = crate::model::vocab::SOS_ID;

    for day in 1..=PLAN_DAYS {
        usage.start_day();
        for slot in MealSlot::ALL {
            let logits = model.step_logits(&encoded, prev, slot.index());
            let adjusted = logits
                .iter()
                .enumerate()
                .map(|(id, logit)| {
                    if Vocabulary::is_reserved(id as u32) {
                        f32::NEG_INFINITY
                    } else {
                        logit / temperature + bias.get(id).copied().unwrap_or(0.0)
                    }
                })
                .collect::<Vec<_>>();
            let probs = softmax(&adjusted);
            let (token, tier) = select(&probs, &index, slot, &usage, settings.top_k, rng)
                .ok_or(GenerationError::SlotUnfillable { day, slot })?;
            if tier.is_fallback() {
                info!("day {day} {slot}: filled via {tier}");
            }
            usage.commit(token);
            sequence.push((token, tier));
            prev = token;
        }
    }
    Ok(sequence)
}

fn select<R: Rng + ?Sized>(
    probs: &[f32],
    index: &CandidateIndex,
    slot: MealSlot,
    usage: &PlanUsageCounter,
    top_k: usize,
    rng: &mut R,
) -> Option<(u32, SelectionTier)> {
    let mut ranked = (0..probs.len() as u32)
        .filter(|id| !Vocabulary::is_reserved(*id))
        .collect::<Vec<_>>();
    ranked.sort_by(|a, b| {
        probs[*b as usize]
            .total_cmp(&probs[*a as usize])
            .then(a.cmp(b))
    });
    let survives = |token: u32| index.contains(slot, token) && usage.is_available(token);
    let cut = top_k.max(1).min(ranked.len());

    let shortlist = ranked[..cut]
        .iter()
        .copied()
        .filter(|t| survives(*t))
        .collect::<Vec<_>>();
    if !shortlist.is_empty() {
        let weights = shortlist
            .iter()
            .map(|t| probs[*t as usize])
            .collect::<Vec<_>>();
        let token = match WeightedIndex::new(&weights) {
            Ok(dist) => shortlist[dist.sample(rng)],
            Err(_) => *shortlist.choose(rng)?,
        };
        return Some((token, SelectionTier::Sampled));
    }

    if let Some(token) = ranked[cut..].iter().copied().find(|t| survives(*t)) {
        return Some((token, SelectionTier::RankedVocabulary));
    }

    let slot_pool = index
        .slot(slot)
        .iter()
        .copied()
        .filter(|t| !usage.is_capped(*t))
        .collect::<Vec<_>>();
    if let Some(token) = slot_pool.choose(rng) {
        return Some((*token, SelectionTier::SlotPool));
    }

    let allowed_pool = index
        .allowed()
        .iter()
        .copied()
        .filter(|t| !usage.is_capped(*t))
        .collect::<Vec<_>>();
    if let Some(token) = allowed_pool.choose(rng) {
        return Some((*token, SelectionTier::AllowedPool));
    }

    warn!("every allowed food reached the repetition cap; relaxing it for {slot}");
    let relaxed = index
        .allowed()
        .iter()
        .copied()
        .filter(|t| !usage.used_today(*t))
        .collect::<Vec<_>>();
    let pool = if relaxed.is_empty() {
        index.allowed()
    } else {
        relaxed.as_slice()
    };
    pool.choose(rng)
        .map(|token| (*token, SelectionTier::CapRelaxed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FoodItem, Level};
    use crate::model::ModelWeights;
    use crate::plan::PLAN_CELLS;
    use crate::rules::{evaluate, RuleTable};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::{BTreeMap, HashSet};

    fn sample_catalog() -> FoodCatalog {
        let mut items = Vec::new();
        for slot in MealSlot::ALL {
            for i in 0..10 {
                let mut food = FoodItem::new(format!("{} item {i}", slot.label()));
                food.meal_types = vec![slot.label().to_string()];
                food.nutrients.calories = 120.0 + i as f64 * 10.0;
                food.nutrients.estimated_gi = if i < 3 { 75.0 } else { 40.0 };
                food.nutrients.glycemic_load = 5.0;
                food.nutrients.sugar = 2.0;
                food.nutrients.sodium_mg = 50.0;
                food.nutrients.saturated_fat_g = 0.5;
                food.nutrients.cholesterol_mg = 0.0;
                food.nutrients.fiber = 3.0;
                food.purine_level = Some(Level::Low);
                food.fodmap_level = Some(Level::Low);
                food.spice_level = Some(Level::Low);
                if i == 9 {
                    food.allergens = "Nuts".to_string();
                }
                items.push(food);
            }
        }
        FoodCatalog::with_all_columns(items)
    }

    fn model_for(vocab: &Vocabulary, seed: u64) -> DietModel {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        DietModel::new(ModelWeights::initialize(
            crate::health::NUMERIC_FIELD_COUNT,
            8,
            vocab.len(),
            MealSlot::ALL.len(),
            &mut rng,
        ))
    }

    fn run(
        catalog: &FoodCatalog,
        health: &HealthVector,
        seed: u64,
    ) -> Result<Vec<(u32, SelectionTier)>, GenerationError> {
        let vocab = Vocabulary::from_food_names(catalog.names());
        let model = model_for(&vocab, 11);
        let outcome = evaluate(health, catalog, &RuleTable::with_defaults());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        decode_plan(
            &model,
            &vocab,
            catalog,
            &outcome,
            health,
            &GenerationConfig::default(),
            &mut rng,
        )
    }

    #[test]
    fn fills_every_cell_within_cap_and_without_daily_repeats() {
        let catalog = sample_catalog();
        let health = HealthVector::default();
        let sequence = run(&catalog, &health, 1).expect("decode");
        assert_eq!(sequence.len(), PLAN_CELLS);

        let mut totals = BTreeMap::new();
        for day in sequence.chunks(7) {
            let unique = day.iter().map(|(t, _)| *t).collect::<HashSet<_>>();
            assert_eq!(unique.len(), 7);
            for (token, tier) in day {
                *totals.entry(*token).or_insert(0) += 1;
                assert!(matches!(
                    tier,
                    SelectionTier::Sampled | SelectionTier::RankedVocabulary
                ));
            }
        }
        assert!(totals.values().all(|count| *count <= 3));
    }

    #[test]
    fn cells_stay_inside_slot_and_allowed_set() {
        let catalog = sample_catalog();
        let vocab = Vocabulary::from_food_names(catalog.names());
        let health = HealthVector {
            diabetic: true,
            allergies: "peanuts".to_string(),
            ..HealthVector::default()
        };
        let outcome = evaluate(&health, &catalog, &RuleTable::with_defaults());
        let sequence = run(&catalog, &health, 2).expect("decode");
        for (position, (token, _)) in sequence.iter().enumerate() {
            let slot = MealSlot::ALL[position % 7];
            let name = vocab.token(*token).expect("token");
            let food = catalog.find(name).expect("food");
            let catalog_index = catalog.index_of(name).expect("index");
            assert!(outcome.is_allowed(catalog_index), "{name} not allowed");
            assert!(food.meal_types.iter().any(|t| index::tag_matches(t, slot)));
            assert!(food.nutrients.estimated_gi < 60.0, "{name} is high GI");
            assert!(food.allergens.is_empty(), "{name} carries nuts");
        }
    }

    #[test]
    fn same_seed_gives_same_plan() {
        let catalog = sample_catalog();
        let health = HealthVector::default();
        let first = run(&catalog, &health, 9).expect("decode");
        let second = run(&catalog, &health, 9).expect("decode");
        assert_eq!(first, second);
    }

    #[test]
    fn refuses_profiles_with_too_few_safe_foods() {
        let items = (0..8)
            .map(|i| {
                let mut food = FoodItem::new(format!("Food {i}"));
                food.meal_types = vec!["Lunch".to_string()];
                food
            })
            .collect::<Vec<_>>();
        let catalog = FoodCatalog::with_all_columns(items);
        let err = run(&catalog, &HealthVector::default(), 3).expect_err("too few foods");
        assert!(matches!(
            err,
            GenerationError::InsufficientSafeFoods { found: 8, required: 10 }
        ));
    }

    #[test]
    fn sparse_slots_fall_back_down_the_ladder() {
        let mut items = Vec::new();
        for i in 0..12 {
            let mut food = FoodItem::new(format!("Lunch food {i}"));
            food.meal_types = vec!["Lunch".to_string()];
            items.push(food);
        }
        let mut breakfast = FoodItem::new("Lone breakfast");
        breakfast.meal_types = vec!["Breakfast".to_string()];
        items.push(breakfast);
        let catalog = FoodCatalog::with_all_columns(items);

        let sequence = run(&catalog, &HealthVector::default(), 4).expect("decode");
        assert_eq!(sequence.len(), PLAN_CELLS);
        let fallbacks = sequence.iter().filter(|(_, tier)| tier.is_fallback()).count();
        assert!(fallbacks > 0);
    }

    #[test]
    fn suggestion_bias_follows_flag_direction() {
        let mut rich = FoodItem::new("Salmon");
        rich.nutrients.omega_3_g = 1.2;
        rich.nutrients.iodine_mcg = 30.0;
        let plain = FoodItem::new("Rice");
        let catalog = FoodCatalog::with_all_columns(vec![rich, plain]);
        let vocab = Vocabulary::from_food_names(catalog.names());
        let mut outcome = evaluate(&HealthVector::default(), &catalog, &RuleTable::with_defaults());
        outcome.suggestion_flags = [
            crate::rules::SuggestionFlag::PromoteHealthyFats,
            crate::rules::SuggestionFlag::ModerateHyperthyroidSupport,
        ]
        .into_iter()
        .collect();
        let bias = suggestion_bias(&vocab, &catalog, &outcome, 2.0);
        assert_eq!(bias[vocab.id("Salmon").expect("id") as usize], 0.0);
        assert_eq!(bias[vocab.id("Rice").expect("id") as usize], 0.0);

        outcome.suggestion_flags =
            [crate::rules::SuggestionFlag::PromoteHealthyFats].into_iter().collect();
        let bias = suggestion_bias(&vocab, &catalog, &outcome, 2.0);
        assert_eq!(bias[vocab.id("Salmon").expect("id") as usize], 2.0);
    }

    /// Two breakfast foods (ids 3, 4) and three lunch foods (ids 5, 6, 7).
    fn ladder_fixture() -> (CandidateIndex, Vec<f32>) {
        let items = (0..5)
            .map(|i| {
                let mut food = FoodItem::new(format!("Food {i:02}"));
                let tag = if i < 2 { "Breakfast" } else { "Lunch" };
                food.meal_types = vec![tag.to_string()];
                food
            })
            .collect::<Vec<_>>();
        let catalog = FoodCatalog::with_all_columns(items);
        let vocab = Vocabulary::from_food_names(catalog.names());
        let allowed = (0..catalog.len()).collect::<Vec<_>>();
        let index = CandidateIndex::build(&catalog, &allowed, &vocab);
        let probs = vec![0.0, 0.0, 0.0, 0.4, 0.3, 0.2, 0.05, 0.05];
        (index, probs)
    }

    #[test]
    fn top_k_survivor_is_sampled() {
        let (index, probs) = ladder_fixture();
        let usage = PlanUsageCounter::new(3);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let picked = select(&probs, &index, MealSlot::Breakfast, &usage, 2, &mut rng);
        let (token, tier) = picked.expect("cell");
        assert_eq!(tier, SelectionTier::Sampled);
        assert!(token == 3 || token == 4);
    }

    #[test]
    fn empty_top_k_moves_to_the_ranked_vocabulary() {
        let (index, probs) = ladder_fixture();
        let usage = PlanUsageCounter::new(3);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        // top-2 are both breakfast foods; the best-ranked lunch food is next
        let picked = select(&probs, &index, MealSlot::Lunch, &usage, 2, &mut rng);
        assert_eq!(picked, Some((5, SelectionTier::RankedVocabulary)));
    }

    #[test]
    fn foods_eaten_today_fall_back_to_the_slot_pool() {
        let (index, probs) = ladder_fixture();
        let mut usage = PlanUsageCounter::new(3);
        for token in [5, 6, 7] {
            usage.commit(token);
        }
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (token, tier) =
            select(&probs, &index, MealSlot::Lunch, &usage, 2, &mut rng).expect("cell");
        assert_eq!(tier, SelectionTier::SlotPool);
        assert!([5, 6, 7].contains(&token));
    }

    #[test]
    fn capped_slot_falls_back_to_the_allowed_pool() {
        let (index, probs) = ladder_fixture();
        let mut usage = PlanUsageCounter::new(1);
        for token in [5, 6, 7] {
            usage.commit(token);
        }
        usage.start_day();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (token, tier) =
            select(&probs, &index, MealSlot::Lunch, &usage, 2, &mut rng).expect("cell");
        assert_eq!(tier, SelectionTier::AllowedPool);
        assert!(token == 3 || token == 4);
    }

    #[test]
    fn cap_is_relaxed_only_when_every_allowed_food_is_capped() {
        let (index, probs) = ladder_fixture();
        let mut usage = PlanUsageCounter::new(1);
        for token in [3, 5, 6, 7] {
            usage.commit(token);
        }
        usage.start_day();
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let picked = select(&probs, &index, MealSlot::Lunch, &usage, 2, &mut rng);
        assert_eq!(picked, Some((4, SelectionTier::AllowedPool)));

        usage.commit(4);
        usage.start_day();
        let (_, tier) =
            select(&probs, &index, MealSlot::Lunch, &usage, 2, &mut rng).expect("cell");
        assert_eq!(tier, SelectionTier::CapRelaxed);
    }
}
