use std::sync::{Arc, RwLock};

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::info;

use crate::catalog::FoodCatalog;
use crate::config::{Config, GenerationConfig};
use crate::generator::{decode_plan, GenerationError};
use crate::health::HealthVector;
use crate::model::{CheckpointMeta, CheckpointStore, DietModel, ModelLoadError, Vocabulary};
use crate::plan::{assemble, DietPlan, NutritionalTargets, PlanRecord};
use crate::rules::{evaluate, RuleOutcome, RuleTable};

/// Everything generation reads: one checkpoint, its vocabulary and one catalog snapshot.
#[derive(Debug)]
pub struct InferenceContext {
    pub model: DietModel,
    pub vocab: Vocabulary,
    pub catalog: FoodCatalog,
    pub rules: RuleTable,
    pub settings: GenerationConfig,
    pub checkpoint: Option<CheckpointMeta>,
    pub checkpoint_name: Option<String>,
    catalog_digest: String,
}

#[derive(Debug, Clone)]
pub struct GeneratedPlan {
    pub plan: DietPlan,
    pub outcome: RuleOutcome,
}

impl InferenceContext {
    /// Loads the promoted checkpoint, the vocabulary and the catalog named by `config`.
    pub fn load(config: &Config) -> Result<Self, ModelLoadError> {
        let vocab = Vocabulary::load(&config.resolved_vocab_path())?;
        let store = CheckpointStore::new(config.resolved_checkpoint_dir(), &config.model.tag);
        let name = store
            .active()?
            .ok_or_else(|| ModelLoadError::NoActiveCheckpoint(store.dir().display().to_string()))?;
        let checkpoint = store.load(&name)?;
        let catalog = FoodCatalog::load(&config.resolved_catalog_path())?;
        info!(
            "loaded checkpoint {name} ({} tokens) and {} catalog foods",
            vocab.len(),
            catalog.len()
        );
        let mut context = Self::from_parts(
            DietModel::new(checkpoint.weights),
            vocab,
            catalog,
            RuleTable::with_defaults(),
            config.generation.clone(),
        )?;
        context.checkpoint = Some(checkpoint.meta);
        context.checkpoint_name = Some(name);
        Ok(context)
    }

    pub fn from_parts(
        model: DietModel,
        vocab: Vocabulary,
        catalog: FoodCatalog,
        rules: RuleTable,
        settings: GenerationConfig,
    ) -> Result<Self, ModelLoadError> {
        if model.vocab_size() != vocab.len() {
            return Err(ModelLoadError::VocabularyMismatch {
                expected: model.vocab_size(),
                found: vocab.len(),
            });
        }
        let catalog_digest = catalog.digest();
        Ok(Self {
            model,
            vocab,
            catalog,
            rules,
            settings,
            checkpoint: None,
            checkpoint_name: None,
            catalog_digest,
        })
    }

    pub fn catalog_digest(&self) -> &str {
        &self.catalog_digest
    }

    pub fn evaluate(&self, health: &HealthVector) -> RuleOutcome {
        evaluate(health, &self.catalog, &self.rules)
    }

    /// `seed` falls back to the configured seed, then to OS entropy.
    pub fn generate(
        &self,
        health: &HealthVector,
        seed: Option<u64>,
    ) -> Result<GeneratedPlan, GenerationError> {
        let outcome = self.evaluate(health);
        let mut rng = match seed.or(self.settings.seed) {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_entropy(),
        };
        let sequence = decode_plan(
            &self.model,
            &self.vocab,
            &self.catalog,
            &outcome,
            health,
            &self.settings,
            &mut rng,
        )?;
        let plan = assemble(
            &sequence,
            &self.vocab,
            &self.catalog,
            NutritionalTargets::for_health(health),
        )?;
        info!(
            "generated plan from {} allowed foods; fallbacks {:?}",
            outcome.allowed_food_count(),
            plan.fallback_counts
        );
        Ok(GeneratedPlan { plan, outcome })
    }

    pub fn new_record(
        &self,
        patient_id: &str,
        health: HealthVector,
        generated: GeneratedPlan,
    ) -> PlanRecord {
        PlanRecord::new_pending(
            patient_id,
            health,
            generated.plan,
            &generated.outcome,
            self.checkpoint_name.clone(),
            self.catalog_digest.clone(),
        )
    }
}

/// Shared, swappable inference context. Readers keep the `Arc` they took even while a
/// reload replaces it.
#[derive(Debug)]
pub struct ModelHandle {
    current: RwLock<Arc<InferenceContext>>,
}

impl ModelHandle {
    pub fn new(context: InferenceContext) -> Self {
        Self {
            current: RwLock::new(Arc::new(context)),
        }
    }

    pub fn current(&self) -> Arc<InferenceContext> {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&guard)
    }

    /// Runs `loader` and swaps in its result. On failure the previous context stays.
    pub fn reload<F>(&self, loader: F) -> Result<Arc<InferenceContext>, ModelLoadError>
    where
        F: FnOnce() -> Result<InferenceContext, ModelLoadError>,
    {
        let fresh = Arc::new(loader()?);
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        *guard = Arc::clone(&fresh);
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FoodItem;
    use crate::model::ModelWeights;
    use crate::plan::{MealSlot, PLAN_CELLS};

    fn context(foods: usize, seed: u64) -> InferenceContext {
        let items = (0..foods)
            .map(|i| {
                let mut food = FoodItem::new(format!("Food {i:02}"));
                food.meal_types = MealSlot::ALL.iter().map(|s| s.label().to_string()).collect();
                food
            })
            .collect::<Vec<_>>();
        let catalog = FoodCatalog::with_all_columns(items);
        let vocab = Vocabulary::from_food_names(catalog.names());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let weights = ModelWeights::initialize(
            crate::health::NUMERIC_FIELD_COUNT,
            6,
            vocab.len(),
            MealSlot::ALL.len(),
            &mut rng,
        );
        InferenceContext::from_parts(
            DietModel::new(weights),
            vocab,
            catalog,
            RuleTable::with_defaults(),
            GenerationConfig::default(),
        )
        .expect("context")
    }

    #[test]
    fn generates_full_plan_with_targets() {
        let ctx = context(40, 1);
        let health = HealthVector {
            age: 35.0,
            weight_kg: 60.0,
            height_cm: 165.0,
            ..HealthVector::default()
        };
        let generated = ctx.generate(&health, Some(5)).expect("generate");
        assert_eq!(generated.plan.cell_count(), PLAN_CELLS);
        assert!(generated.plan.targets.estimated);
        let again = ctx.generate(&health, Some(5)).expect("generate");
        assert_eq!(generated.plan, again.plan);

        let record = ctx.new_record("p-1", health, generated);
        assert_eq!(record.allowed_food_count, 40);
        assert_eq!(record.catalog_digest, ctx.catalog_digest());
    }

    #[test]
    fn rejects_vocabulary_of_the_wrong_size() {
        let ctx = context(12, 2);
        let smaller = Vocabulary::from_food_names(["Only One"]);
        let err = InferenceContext::from_parts(
            ctx.model.clone(),
            smaller,
            ctx.catalog.clone(),
            RuleTable::with_defaults(),
            GenerationConfig::default(),
        )
        .expect_err("mismatch");
        assert!(matches!(err, ModelLoadError::VocabularyMismatch { found: 4, .. }));
    }

    #[test]
    fn failed_reload_keeps_previous_context() {
        let handle = ModelHandle::new(context(12, 3));
        let before = handle.current();
        let result = handle.reload(|| Err(ModelLoadError::Missing("gone.json".to_string())));
        assert!(result.is_err());
        assert!(Arc::ptr_eq(&before, &handle.current()));

        handle.reload(|| Ok(context(15, 4))).expect("reload");
        assert_eq!(handle.current().catalog.len(), 15);
        assert_eq!(before.catalog.len(), 12);
    }
}
