use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::{TrainingConfig, TrainingPhase};
use crate::health::NUMERIC_FIELD_COUNT;
use crate::model::optim::{clip_global_norm, Adam};
use crate::model::{
    Checkpoint, CheckpointMeta, CheckpointStore, DietModel, ModelLoadError, ModelWeights,
    SequenceExample, Vocabulary,
};
use crate::plan::MEALS_PER_DAY;
use crate::training::TrainingError;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EpochReport {
    pub epoch: u32,
    pub train_loss: f64,
    pub validation_loss: Option<f64>,
    pub checkpoint: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TrainingReport {
    pub model_tag: String,
    pub version: u32,
    pub parent: Option<String>,
    pub learning_rate: f64,
    pub train_examples: usize,
    pub validation_examples: usize,
    pub epochs: Vec<EpochReport>,
    pub best_checkpoint: Option<String>,
    pub best_validation_loss: Option<f64>,
    pub cancelled: bool,
}

/// Shuffles and holds out `fraction` of the examples for validation. At least one
/// example always stays in the training split.
pub fn split_examples<R: Rng + ?Sized>(
    mut examples: Vec<SequenceExample>,
    fraction: f64,
    rng: &mut R,
) -> (Vec<SequenceExample>, Vec<SequenceExample>) {
    examples.shuffle(rng);
    if examples.len() < 2 {
        return (examples, Vec::new());
    }
    let held_out = ((examples.len() as f64) * fraction.clamp(0.0, 1.0)).round() as usize;
    let held_out = held_out.min(examples.len() - 1);
    let validation = examples.split_off(examples.len() - held_out);
    (examples, validation)
}

/// Mean per-token cross-entropy with the gold previous token always fed.
pub fn mean_loss(model: &DietModel, examples: &[SequenceExample]) -> Option<f64> {
    let mut rng = ChaCha8Rng::seed_from_u64(0);
    let (loss, count) = examples.iter().fold((0.0, 0usize), |(loss, count), example| {
        let (l, c) = model.accumulate_example(example, 1.0, 1.0, &mut rng, None);
        (loss + l, count + c)
    });
    (count > 0).then(|| loss / count as f64)
}

/// Trains a fresh model from the bootstrap corpus as version 1 (or the next free version).
pub fn train_initial(
    examples: Vec<SequenceExample>,
    vocab: &Vocabulary,
    config: &TrainingConfig,
    hidden_size: usize,
    store: &CheckpointStore,
    cancel: &AtomicBool,
) -> Result<TrainingReport, TrainingError> {
    if examples.is_empty() {
        return Err(TrainingError::EmptyCorpus);
    }
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut weights = ModelWeights::initialize(
        NUMERIC_FIELD_COUNT,
        hidden_size.max(1),
        vocab.len(),
        MEALS_PER_DAY,
        &mut rng,
    );
    weights.fit_feature_scale(examples.iter().map(|e| e.features.as_slice()));
    let mut model = DietModel::new(weights);
    let (train, validation) = split_examples(examples, config.validation_fraction, &mut rng);
    let version = store.next_version()?;
    run_epochs(
        &mut model,
        train,
        validation,
        &config.initial,
        config.clip_norm,
        store,
        version,
        None,
        cancel,
        &mut rng,
    )
}

/// Continues training a copy of `base` on reviewed plans. The base checkpoint file is
/// left untouched; epochs go to the next version.
pub fn fine_tune(
    base: &Checkpoint,
    base_name: &str,
    vocab: &Vocabulary,
    examples: Vec<SequenceExample>,
    config: &TrainingConfig,
    store: &CheckpointStore,
    cancel: &AtomicBool,
) -> Result<TrainingReport, TrainingError> {
    check_fine_tune_policy(config)?;
    if examples.is_empty() {
        return Err(TrainingError::EmptyCorpus);
    }
    if base.weights.vocab_size != vocab.len() {
        return Err(ModelLoadError::VocabularyMismatch {
            expected: base.weights.vocab_size,
            found: vocab.len(),
        }
        .into());
    }
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed.wrapping_add(u64::from(base.meta.version)));
    let mut model = DietModel::new(base.weights.clone());
    let (train, validation) = split_examples(examples, config.validation_fraction, &mut rng);
    if let Some(baseline) = mean_loss(&model, &validation) {
        info!("base checkpoint {base_name} validation loss {baseline:.4}");
    }
    let version = store.next_version()?;
    run_epochs(
        &mut model,
        train,
        validation,
        &config.fine_tune,
        config.clip_norm,
        store,
        version,
        Some(base_name.to_string()),
        cancel,
        &mut rng,
    )
}

pub fn check_fine_tune_policy(config: &TrainingConfig) -> Result<(), TrainingError> {
    if config.fine_tune.learning_rate >= config.initial.learning_rate {
        return Err(TrainingError::InvalidPolicy(format!(
            "fine-tune learning rate {} must be below the initial rate {}",
            config.fine_tune.learning_rate, config.initial.learning_rate
        )));
    }
    if config.fine_tune.epochs > config.initial.epochs {
        return Err(TrainingError::InvalidPolicy(format!(
            "fine-tune epochs {} exceed initial epochs {}",
            config.fine_tune.epochs, config.initial.epochs
        )));
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_epochs(
    model: &mut DietModel,
    mut train: Vec<SequenceExample>,
    validation: Vec<SequenceExample>,
    phase: &TrainingPhase,
    clip_norm: f64,
    store: &CheckpointStore,
    version: u32,
    parent: Option<String>,
    cancel: &AtomicBool,
    rng: &mut ChaCha8Rng,
) -> Result<TrainingReport, TrainingError> {
    let mut adam = Adam::new(&model.weights, phase.learning_rate);
    let mut report = TrainingReport {
        model_tag: store.tag().to_string(),
        version,
        parent: parent.clone(),
        learning_rate: phase.learning_rate,
        train_examples: train.len(),
        validation_examples: validation.len(),
        epochs: Vec::new(),
        best_checkpoint: None,
        best_validation_loss: None,
        cancelled: false,
    };
    let mut best_score = f64::INFINITY;

    for epoch in 1..=phase.epochs {
        if cancel.load(Ordering::SeqCst) {
            warn!("training cancelled before epoch {epoch}");
            report.cancelled = true;
            break;
        }
        train.shuffle(rng);
        let mut loss_sum = 0.0;
        let mut token_count = 0usize;
        for batch in train.chunks(phase.batch_size.max(1)) {
            let batch_tokens: usize = batch.iter().map(|e| e.steps.len()).sum();
            if batch_tokens == 0 {
                continue;
            }
            let mut grads = model.weights.zeros_like();
            let scale = 1.0 / batch_tokens as f32;
            for example in batch {
                let (loss, count) = model.accumulate_example(
                    example,
                    phase.teacher_forcing,
                    scale,
                    rng,
                    Some(&mut grads),
                );
                loss_sum += loss;
                token_count += count;
            }
            clip_global_norm(&mut grads, clip_norm);
            adam.apply(&mut model.weights, &grads);
        }
        let train_loss = if token_count > 0 {
            loss_sum / token_count as f64
        } else {
            0.0
        };
        let validation_loss = mean_loss(model, &validation);

        let checkpoint = Checkpoint::seal(
            CheckpointMeta {
                model_tag: store.tag().to_string(),
                version,
                epoch,
                parent: parent.clone(),
                learning_rate: phase.learning_rate,
                train_loss,
                validation_loss,
                created_at: Utc::now(),
                vocab_size: 0,
                hidden_size: 0,
                weights_sha256: String::new(),
            },
            model.weights.clone(),
        );
        store.write(&checkpoint)?;
        let file_name = store.file_name(version, epoch);
        info!(
            "epoch {epoch}/{}: train loss {train_loss:.4}, validation loss {}",
            phase.epochs,
            validation_loss
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "n/a".to_string())
        );

        let score = validation_loss.unwrap_or(train_loss);
        if score < best_score {
            best_score = score;
            report.best_checkpoint = Some(file_name.clone());
            report.best_validation_loss = validation_loss;
        }
        report.epochs.push(EpochReport {
            epoch,
            train_loss,
            validation_loss,
            checkpoint: file_name,
        });
    }

    if report.epochs.is_empty() && report.cancelled {
        return Err(TrainingError::Cancelled);
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SequenceStep;

    fn corpus(vocab: &Vocabulary, count: usize) -> Vec<SequenceExample> {
        let ids = vocab.food_ids().collect::<Vec<_>>();
        (0..count)
            .map(|n| SequenceExample {
                features: vec![30.0 + n as f64, 70.0, 170.0],
                steps: (0..14)
                    .map(|i| SequenceStep {
                        token: ids[(i + n) % ids.len()],
                        slot: i % MEALS_PER_DAY,
                    })
                    .collect(),
            })
            .collect()
    }

    fn small_config() -> TrainingConfig {
        let mut config = TrainingConfig::default();
        config.initial.epochs = 3;
        config.initial.learning_rate = 0.05;
        config.initial.batch_size = 4;
        config.fine_tune.epochs = 2;
        config.fine_tune.learning_rate = 0.01;
        config.fine_tune.batch_size = 4;
        config
    }

    #[test]
    fn split_keeps_a_training_example() {
        let vocab = Vocabulary::from_food_names(["A", "B", "C"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let (train, validation) = split_examples(corpus(&vocab, 10), 0.2, &mut rng);
        assert_eq!((train.len(), validation.len()), (8, 2));
        let (train, validation) = split_examples(corpus(&vocab, 1), 0.5, &mut rng);
        assert_eq!((train.len(), validation.len()), (1, 0));
    }

    #[test]
    fn initial_training_lowers_loss_and_writes_each_epoch() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path(), "diet_model");
        let vocab = Vocabulary::from_food_names(["Idli", "Dosa", "Poha", "Upma", "Khichdi"]);
        let config = small_config();
        let cancel = AtomicBool::new(false);
        let report = train_initial(corpus(&vocab, 12), &vocab, &config, 8, &store, &cancel)
            .expect("train");
        assert_eq!(report.version, 1);
        assert_eq!(report.epochs.len(), 3);
        assert!(report.epochs[2].train_loss < report.epochs[0].train_loss);
        assert_eq!(store.list().expect("list").len(), 3);
        assert!(report.best_checkpoint.is_some());
    }

    #[test]
    fn fine_tune_writes_a_new_version_and_keeps_the_base() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path(), "diet_model");
        let vocab = Vocabulary::from_food_names(["Idli", "Dosa", "Poha", "Upma"]);
        let config = small_config();
        let cancel = AtomicBool::new(false);
        train_initial(corpus(&vocab, 8), &vocab, &config, 6, &store, &cancel).expect("train");
        let base_name = store.file_name(1, 3);
        let base = store.load(&base_name).expect("base");

        let report = fine_tune(&base, &base_name, &vocab, corpus(&vocab, 5), &config, &store, &cancel)
            .expect("fine tune");
        assert_eq!(report.version, 2);
        assert_eq!(report.parent.as_deref(), Some(base_name.as_str()));
        assert_eq!(report.epochs.len(), 2);
        let reloaded = store.load(&base_name).expect("base still loads");
        assert_eq!(reloaded.meta.weights_sha256, base.meta.weights_sha256);
    }

    #[test]
    fn fine_tune_rejects_aggressive_policy_and_cancellation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = CheckpointStore::new(dir.path(), "diet_model");
        let vocab = Vocabulary::from_food_names(["Idli", "Dosa", "Poha"]);
        let mut config = small_config();
        let cancel = AtomicBool::new(false);
        train_initial(corpus(&vocab, 4), &vocab, &config, 4, &store, &cancel).expect("train");
        let base_name = store.file_name(1, 3);
        let base = store.load(&base_name).expect("base");

        config.fine_tune.learning_rate = 0.5;
        assert!(matches!(
            fine_tune(&base, &base_name, &vocab, corpus(&vocab, 3), &config, &store, &cancel),
            Err(TrainingError::InvalidPolicy(_))
        ));

        config.fine_tune.learning_rate = 0.01;
        cancel.store(true, Ordering::SeqCst);
        assert!(matches!(
            fine_tune(&base, &base_name, &vocab, corpus(&vocab, 3), &config, &store, &cancel),
            Err(TrainingError::Cancelled)
        ));
        assert_eq!(store.next_version().expect("version"), 2);
    }
}
