use serde::Serialize;
use tracing::warn;

use crate::health::HealthVector;
use crate::model::{SequenceExample, SequenceStep, Vocabulary};
use crate::plan::{DietPlan, PlanRecord};

/// Foods in a reviewed plan that the vocabulary does not know.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RetrainingIssue {
    pub plan_id: i64,
    pub dropped_foods: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FeedbackCorpus {
    pub examples: Vec<SequenceExample>,
    /// Every plan this corpus was built from, usable or not.
    pub plan_ids: Vec<i64>,
    pub issues: Vec<RetrainingIssue>,
}

impl FeedbackCorpus {
    pub fn dropped_occurrences(&self) -> usize {
        self.issues.iter().map(|i| i.dropped_foods.len()).sum()
    }

    pub fn partially_usable_ids(&self) -> Vec<i64> {
        self.issues.iter().map(|i| i.plan_id).collect()
    }
}

/// Converts a plan's meals to model steps. Unknown foods are skipped and returned.
pub fn plan_to_example(
    plan: &DietPlan,
    health: &HealthVector,
    vocab: &Vocabulary,
) -> (SequenceExample, Vec<String>) {
    let mut steps = Vec::with_capacity(plan.cell_count());
    let mut dropped = Vec::new();
    for (_, meal) in plan.meals_in_order() {
        match vocab.id(&meal.food_name) {
            Some(token) => steps.push(SequenceStep {
                token,
                slot: meal.slot.index(),
            }),
            None => dropped.push(meal.food_name.clone()),
        }
    }
    let example = SequenceExample {
        features: health.numeric_vector().to_vec(),
        steps,
    };
    (example, dropped)
}

/// Builds training examples from reviewed plans, using the edited meals.
pub fn build_feedback_corpus(records: &[PlanRecord], vocab: &Vocabulary) -> FeedbackCorpus {
    let mut corpus = FeedbackCorpus::default();
    for record in records {
        corpus.plan_ids.push(record.id);
        let (example, dropped) = plan_to_example(&record.meals, &record.health_snapshot, vocab);
        if !dropped.is_empty() {
            warn!(
                "plan {} has {} foods outside the vocabulary; dropping them",
                record.id,
                dropped.len()
            );
            corpus.issues.push(RetrainingIssue {
                plan_id: record.id,
                dropped_foods: dropped,
            });
        }
        if !example.steps.is_empty() {
            corpus.examples.push(example);
        }
    }
    corpus
}
