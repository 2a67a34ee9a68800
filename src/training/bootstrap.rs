use std::fs::File;
use std::path::Path;

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::FoodCatalog;
use crate::generator::{CandidateIndex, PlanUsageCounter};
use crate::health::collector::HealthRecord;
use crate::model::{SequenceExample, SequenceStep, Vocabulary};
use crate::plan::{MealSlot, MEALS_PER_DAY, PLAN_DAYS};
use crate::rules::{evaluate, RuleTable};
use crate::training::TrainingError;

const BOOTSTRAP_REPETITION_CAP: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapRow {
    pub patient: String,
    pub features: Vec<f64>,
    pub plan: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct BootstrapCorpus {
    pub vocab: Vocabulary,
    pub rows: Vec<BootstrapRow>,
    pub skipped_patients: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CorpusCsvRow {
    patient: String,
    user_vector: String,
    plan_sequence: String,
}

/// Synthesizes rule-compliant random plans for each patient so an untrained model has
/// something to learn from. The vocabulary covers the whole catalog.
pub fn bootstrap_corpus<R: Rng + ?Sized>(
    records: &[HealthRecord],
    catalog: &FoodCatalog,
    rules: &RuleTable,
    plans_per_user: usize,
    min_allowed: usize,
    rng: &mut R,
) -> BootstrapCorpus {
    let vocab = Vocabulary::from_food_names(catalog.names());
    let mut rows = Vec::new();
    let mut skipped_patients = Vec::new();

    for record in records {
        let outcome = evaluate(&record.vector, catalog, rules);
        let index = CandidateIndex::build(catalog, &outcome.allowed, &vocab);
        if index.allowed().len() < min_allowed.max(1) {
            warn!(
                "skipping {}: only {} allowed foods",
                record.patient,
                index.allowed().len()
            );
            skipped_patients.push(record.patient.clone());
            continue;
        }
        let features = record.vector.numeric_vector().to_vec();
        for _ in 0..plans_per_user {
            let plan = random_plan(&index, rng)
                .into_iter()
                .filter_map(|token| vocab.token(token).map(str::to_string))
                .collect();
            rows.push(BootstrapRow {
                patient: record.patient.clone(),
                features: features.clone(),
                plan,
            });
        }
    }

    info!(
        "bootstrapped {} plans for {} patients ({} skipped)",
        rows.len(),
        records.len() - skipped_patients.len(),
        skipped_patients.len()
    );
    BootstrapCorpus {
        vocab,
        rows,
        skipped_patients,
    }
}

fn random_plan<R: Rng + ?Sized>(index: &CandidateIndex, rng: &mut R) -> Vec<u32> {
    let mut usage = PlanUsageCounter::new(BOOTSTRAP_REPETITION_CAP);
    let mut tokens = Vec::with_capacity(PLAN_DAYS * MEALS_PER_DAY);
    for _ in 0..PLAN_DAYS {
        usage.start_day();
        for slot in MealSlot::ALL {
            let fresh = index
                .slot(slot)
                .iter()
                .copied()
                .filter(|t| usage.is_available(*t))
                .collect::<Vec<_>>();
            let pool = if fresh.is_empty() {
                index.slot(slot)
            } else {
                fresh.as_slice()
            };
            if let Some(token) = pool.choose(rng).copied() {
                usage.commit(token);
                tokens.push(token);
            }
        }
    }
    tokens
}

impl BootstrapCorpus {
    pub fn examples(&self) -> Vec<SequenceExample> {
        self.rows
            .iter()
            .map(|row| row_to_example(&row.features, &row.plan, &self.vocab))
            .collect()
    }
}

fn row_to_example(features: &[f64], plan: &[String], vocab: &Vocabulary) -> SequenceExample {
    let steps = plan
        .iter()
        .enumerate()
        .filter_map(|(position, name)| {
            vocab.id(name).map(|token| SequenceStep {
                token,
                slot: position % MEALS_PER_DAY,
            })
        })
        .collect();
    SequenceExample {
        features: features.to_vec(),
        steps,
    }
}

pub fn write_corpus_csv(path: &Path, rows: &[BootstrapRow]) -> Result<(), TrainingError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| TrainingError::Io {
            path: parent.display().to_string(),
            source,
        })?;
    }
    let file = File::create(path).map_err(|source| TrainingError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(CorpusCsvRow {
            patient: row.patient.clone(),
            user_vector: serde_json::to_string(&row.features)?,
            plan_sequence: serde_json::to_string(&row.plan)?,
        })?;
    }
    writer.flush().map_err(|source| TrainingError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(())
}

pub fn read_corpus_csv(path: &Path, vocab: &Vocabulary) -> Result<Vec<SequenceExample>, TrainingError> {
    let file = File::open(path).map_err(|source| TrainingError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let mut reader = csv::Reader::from_reader(file);
    let mut examples = Vec::new();
    for row in reader.deserialize::<CorpusCsvRow>() {
        let row = row?;
        let features: Vec<f64> = serde_json::from_str(&row.user_vector)?;
        let plan: Vec<String> = serde_json::from_str(&row.plan_sequence)?;
        let example = row_to_example(&features, &plan, vocab);
        if !example.steps.is_empty() {
            examples.push(example);
        }
    }
    Ok(examples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FoodItem;
    use crate::health::HealthVector;
    use crate::plan::PLAN_CELLS;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use std::collections::HashSet;

    fn catalog() -> FoodCatalog {
        let items = (0..30)
            .map(|i| {
                let mut food = FoodItem::new(format!("Food {i:02}"));
                food.meal_types = vec![MealSlot::ALL[i % 7].label().to_string()];
                food.nutrients.estimated_gi = if i < 20 { 40.0 } else { 80.0 };
                food
            })
            .collect();
        FoodCatalog::with_all_columns(items)
    }

    #[test]
    fn bootstraps_rule_compliant_plans() {
        let catalog = catalog();
        let records = vec![
            HealthRecord {
                patient: "a".to_string(),
                vector: HealthVector {
                    diabetic: true,
                    ..HealthVector::default()
                },
            },
            HealthRecord {
                patient: "b".to_string(),
                vector: HealthVector::default(),
            },
        ];
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let corpus = bootstrap_corpus(&records, &catalog, &RuleTable::with_defaults(), 3, 5, &mut rng);
        assert_eq!(corpus.rows.len(), 6);
        assert_eq!(corpus.vocab.food_count(), 30);
        for row in corpus.rows.iter().filter(|r| r.patient == "a") {
            assert_eq!(row.plan.len(), PLAN_CELLS);
            for name in &row.plan {
                let food = catalog.find(name).expect("food");
                assert!(food.nutrients.estimated_gi < 60.0);
            }
            for day in row.plan.chunks(MEALS_PER_DAY) {
                assert_eq!(day.iter().collect::<HashSet<_>>().len(), MEALS_PER_DAY);
            }
        }
    }

    #[test]
    fn skips_patients_with_too_few_foods() {
        let catalog = catalog();
        let records = vec![HealthRecord {
            patient: "strict".to_string(),
            vector: HealthVector {
                diabetic: true,
                ..HealthVector::default()
            },
        }];
        let mut rng = ChaCha8Rng::seed_from_u64(2);
        let corpus =
            bootstrap_corpus(&records, &catalog, &RuleTable::with_defaults(), 2, 25, &mut rng);
        assert!(corpus.rows.is_empty());
        assert_eq!(corpus.skipped_patients, vec!["strict".to_string()]);
    }

    #[test]
    fn corpus_csv_round_trips_into_examples() {
        let catalog = catalog();
        let records = vec![HealthRecord {
            patient: "b".to_string(),
            vector: HealthVector {
                age: 41.0,
                ..HealthVector::default()
            },
        }];
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let corpus = bootstrap_corpus(&records, &catalog, &RuleTable::with_defaults(), 2, 5, &mut rng);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("corpus.csv");
        write_corpus_csv(&path, &corpus.rows).expect("write");
        let examples = read_corpus_csv(&path, &corpus.vocab).expect("read");
        assert_eq!(examples, corpus.examples());
        assert_eq!(examples[0].features[0], 41.0);
        assert_eq!(examples[0].steps.len(), PLAN_CELLS);
    }
}
