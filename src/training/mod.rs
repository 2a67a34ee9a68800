pub mod bootstrap;
pub mod dataset;
pub mod trainer;

use std::sync::atomic::AtomicBool;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::config::TrainingConfig;
use crate::model::{CheckpointError, CheckpointStore, ModelLoadError, Vocabulary};
use crate::store::{PlanStore, RetrainingRunRecord};

pub use bootstrap::{bootstrap_corpus, read_corpus_csv, write_corpus_csv, BootstrapCorpus};
pub use dataset::{build_feedback_corpus, FeedbackCorpus, RetrainingIssue};
pub use trainer::{fine_tune, train_initial, EpochReport, TrainingReport};

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("no usable training examples")]
    EmptyCorpus,
    #[error("invalid fine-tuning policy: {0}")]
    InvalidPolicy(String),
    #[error("training was cancelled before the first epoch completed")]
    Cancelled,
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error(transparent)]
    Load(#[from] ModelLoadError),
    #[error("failed accessing corpus {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed corpus CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("malformed corpus row: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize)]
pub struct RetrainingOutcome {
    pub base_checkpoint: String,
    pub report: TrainingReport,
    pub run_id: Option<i64>,
    pub plans_considered: usize,
    pub plans_marked: usize,
    pub dropped_occurrences: usize,
    pub issues: Vec<RetrainingIssue>,
}

/// Fine-tunes the promoted checkpoint on every approved, flagged and unconsumed plan,
/// then records the run and marks those plans consumed.
pub fn retrain_from_feedback(
    plans: &PlanStore,
    checkpoints: &CheckpointStore,
    vocab: &Vocabulary,
    config: &TrainingConfig,
    cancel: &AtomicBool,
) -> Result<RetrainingOutcome> {
    let started_at = Utc::now();
    let base_name = checkpoints
        .active()?
        .ok_or_else(|| ModelLoadError::NoActiveCheckpoint(checkpoints.dir().display().to_string()))?;
    let base = checkpoints.load(&base_name)?;

    let records = plans.retraining_corpus()?;
    let corpus = build_feedback_corpus(&records, vocab);
    info!(
        "retraining corpus: {} plans, {} examples, {} dropped occurrences",
        corpus.plan_ids.len(),
        corpus.examples.len(),
        corpus.dropped_occurrences()
    );
    if corpus.examples.is_empty() {
        return Err(TrainingError::EmptyCorpus.into());
    }

    let report = fine_tune(
        &base,
        &base_name,
        vocab,
        corpus.examples.clone(),
        config,
        checkpoints,
        cancel,
    )?;

    let run = RetrainingRunRecord {
        id: 0,
        started_at,
        finished_at: Utc::now(),
        base_checkpoint: base_name.clone(),
        version: report.version,
        epochs_completed: report.epochs.len() as u32,
        best_checkpoint: report.best_checkpoint.clone(),
        best_validation_loss: report.best_validation_loss,
        plans_consumed: corpus.plan_ids.len(),
        dropped_occurrences: corpus.dropped_occurrences(),
        cancelled: report.cancelled,
    };
    let run_id = plans.record_run(&run)?;
    let plans_marked = plans.mark_used(&corpus.plan_ids, run_id)?;
    plans.mark_partially_usable(&corpus.partially_usable_ids())?;
    if report.cancelled {
        warn!(
            "retraining run {run_id} stopped after {} epochs",
            report.epochs.len()
        );
    }

    Ok(RetrainingOutcome {
        base_checkpoint: base_name,
        plans_considered: corpus.plan_ids.len(),
        plans_marked,
        dropped_occurrences: corpus.dropped_occurrences(),
        issues: corpus.issues,
        run_id: Some(run_id),
        report,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{ReviewAction, SelectionTier};
    use crate::store::tests::sample_record;
    use std::sync::atomic::Ordering;

    fn small_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.initial.epochs = 2;
        config.initial.learning_rate = 0.01;
        config.fine_tune.epochs = 1;
        config.fine_tune.learning_rate = 0.001;
        config
    }

    #[test]
    fn consumes_every_flagged_plan_exactly_once() {
        let dir = tempfile::tempdir().expect("tempdir");
        let plans = PlanStore::open(&dir.path().join("plans.db")).expect("store");
        let checkpoints = CheckpointStore::new(dir.path().join("checkpoints"), "diet_model");
        let vocab = Vocabulary::from_food_names((0..12).map(|i| format!("Food {i:02}")));
        let config = small_config();
        let cancel = AtomicBool::new(false);

        let seed_examples = (0..4)
            .map(|n| {
                let (example, _) = dataset::plan_to_example(
                    &sample_record(&format!("seed-{n}")).meals,
                    &Default::default(),
                    &vocab,
                );
                example
            })
            .collect();
        train_initial(seed_examples, &vocab, &config, 6, &checkpoints, &cancel).expect("train");
        checkpoints
            .promote(&checkpoints.file_name(1, 2))
            .expect("promote");

        for n in 0..10 {
            let mut record = sample_record(&format!("p-{n}"));
            if n < 2 {
                record.meals.days[n].meals[0].food_name = "Unlisted Smoothie".to_string();
                record.meals.days[n].meals[0].tier = SelectionTier::Edited;
            }
            plans.insert_plan(&mut record).expect("insert");
            record.review(ReviewAction::Approve, None, None).expect("approve");
            record.flag_for_retraining(true, None).expect("flag");
            plans.update_plan(&record).expect("update");
        }

        let outcome =
            retrain_from_feedback(&plans, &checkpoints, &vocab, &config, &cancel).expect("retrain");
        assert_eq!(outcome.plans_considered, 10);
        assert_eq!(outcome.plans_marked, 10);
        assert_eq!(outcome.dropped_occurrences, 2);
        assert_eq!(outcome.issues.len(), 2);
        assert_eq!(outcome.report.version, 2);

        let flagged_partial = plans
            .get_plan(outcome.issues[0].plan_id)
            .expect("get")
            .expect("present");
        assert!(flagged_partial.partially_usable);
        assert!(flagged_partial.used_for_retraining);

        // a second run finds nothing left to consume
        assert!(plans.retraining_corpus().expect("corpus").is_empty());
        let second = retrain_from_feedback(&plans, &checkpoints, &vocab, &config, &cancel);
        assert!(second.is_err());
        assert_eq!(plans.list_runs(10).expect("runs").len(), 1);
        assert!(!cancel.load(Ordering::SeqCst));
    }
}
