use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::plan::MEALS_PER_DAY;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub catalog: CatalogConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogConfig {
    #[serde(default = "default_catalog_path")]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: String,
    #[serde(default = "default_model_tag")]
    pub tag: String,
    #[serde(default = "default_vocab_path")]
    pub vocab_path: String,
    #[serde(default = "default_hidden_size")]
    pub hidden_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_max_repetition")]
    pub max_repetition: usize,
    #[serde(default = "default_min_safe_foods")]
    pub min_safe_foods: usize,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_suggestion_boost")]
    pub suggestion_boost: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainingPhase {
    pub learning_rate: f64,
    pub epochs: u32,
    pub batch_size: usize,
    /// Probability of feeding the gold previous token during training.
    pub teacher_forcing: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_initial_phase")]
    pub initial: TrainingPhase,
    #[serde(default = "default_fine_tune_phase")]
    pub fine_tune: TrainingPhase,
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    #[serde(default = "default_clip_norm")]
    pub clip_norm: f64,
    #[serde(default = "default_training_seed")]
    pub seed: u64,
    #[serde(default = "default_bootstrap_plans_per_user")]
    pub bootstrap_plans_per_user: usize,
    #[serde(default = "default_bootstrap_min_allowed")]
    pub bootstrap_min_allowed: usize,
    #[serde(default = "default_corpus_path")]
    pub corpus_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub catalog_path: Option<String>,
    pub checkpoint_dir: Option<String>,
    pub vocab_path: Option<String>,
    pub db_path: Option<String>,
    pub seed: Option<u64>,
}

impl Config {
    pub fn default_path() -> PathBuf {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(".config/diet-planner/config.toml")
    }

    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = path
            .map(|p| p.to_path_buf())
            .unwrap_or_else(Self::default_path);
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = fs::read_to_string(&path)
            .with_context(|| format!("failed reading config: {}", path.display()))?;
        let parsed: Self = toml::from_str(&data)
            .with_context(|| format!("failed parsing TOML config: {}", path.display()))?;
        parsed
            .validate()
            .with_context(|| format!("invalid config: {}", path.display()))?;
        Ok(parsed)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(path) = overrides.catalog_path {
            self.catalog.path = path;
        }
        if let Some(dir) = overrides.checkpoint_dir {
            self.model.checkpoint_dir = dir;
        }
        if let Some(path) = overrides.vocab_path {
            self.model.vocab_path = path;
        }
        if let Some(path) = overrides.db_path {
            self.storage.db_path = path;
        }
        if overrides.seed.is_some() {
            self.generation.seed = overrides.seed;
        }
    }

    /// Fine-tuning must move more gently than initial training.
    pub fn validate(&self) -> Result<()> {
        let (initial, fine) = (&self.training.initial, &self.training.fine_tune);
        if fine.learning_rate >= initial.learning_rate {
            bail!(
                "training.fine_tune.learning_rate ({}) must be below training.initial.learning_rate ({})",
                fine.learning_rate,
                initial.learning_rate
            );
        }
        if fine.epochs > initial.epochs {
            bail!(
                "training.fine_tune.epochs ({}) must not exceed training.initial.epochs ({})",
                fine.epochs,
                initial.epochs
            );
        }
        for (name, phase) in [("initial", initial), ("fine_tune", fine)] {
            if phase.batch_size == 0 || phase.learning_rate <= 0.0 {
                bail!("training.{name} needs a positive learning_rate and batch_size");
            }
            if !(0.0..=1.0).contains(&phase.teacher_forcing) {
                bail!("training.{name}.teacher_forcing must be within 0..=1");
            }
        }
        if !(0.0..1.0).contains(&self.training.validation_fraction) {
            bail!("training.validation_fraction must be within 0..1");
        }
        if self.generation.top_k == 0 || self.generation.max_repetition == 0 {
            bail!("generation.top_k and generation.max_repetition must be at least 1");
        }
        if self.generation.temperature <= 0.0 {
            bail!("generation.temperature must be positive");
        }
        if self.generation.min_safe_foods < MEALS_PER_DAY {
            bail!(
                "generation.min_safe_foods ({}) must be at least {MEALS_PER_DAY}, one food per daily meal",
                self.generation.min_safe_foods
            );
        }
        Ok(())
    }

    pub fn write_template(path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed creating config directory: {}", parent.display())
            })?;
        }
        fs::write(path, Self::default_template())
            .with_context(|| format!("failed writing config template: {}", path.display()))
    }

    pub fn resolved_catalog_path(&self) -> PathBuf {
        expand_tilde(&self.catalog.path)
    }

    pub fn resolved_checkpoint_dir(&self) -> PathBuf {
        expand_tilde(&self.model.checkpoint_dir)
    }

    pub fn resolved_vocab_path(&self) -> PathBuf {
        expand_tilde(&self.model.vocab_path)
    }

    pub fn resolved_corpus_path(&self) -> PathBuf {
        expand_tilde(&self.training.corpus_path)
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        expand_tilde(&self.storage.db_path)
    }

    pub fn default_template() -> String {
        let template = r#"[catalog]
path = "~/.local/share/diet-planner/food_catalog.csv"

[model]
checkpoint_dir = "~/.local/share/diet-planner/checkpoints"
tag = "diet_model"
vocab_path = "~/.local/share/diet-planner/food_vocab.json"
hidden_size = 64

[generation]
top_k = 50
max_repetition = 3
min_safe_foods = 10
temperature = 1.0
suggestion_boost = 1.5
# seed = 7

[training]
validation_fraction = 0.2
clip_norm = 1.0
seed = 42
bootstrap_plans_per_user = 50
bootstrap_min_allowed = 5
corpus_path = "~/.local/share/diet-planner/bootstrap_corpus.csv"

[training.initial]
learning_rate = 0.001
epochs = 50
batch_size = 16
teacher_forcing = 1.0

[training.fine_tune]
learning_rate = 0.0001
epochs = 15
batch_size = 8
teacher_forcing = 0.7

[storage]
db_path = "~/.local/share/diet-planner/plans.db"

[server]
bind = "127.0.0.1:8080"
"#;
        template.to_string()
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog: CatalogConfig::default(),
            model: ModelConfig::default(),
            generation: GenerationConfig::default(),
            training: TrainingConfig::default(),
            storage: StorageConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: default_catalog_path(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            tag: default_model_tag(),
            vocab_path: default_vocab_path(),
            hidden_size: default_hidden_size(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            max_repetition: default_max_repetition(),
            min_safe_foods: default_min_safe_foods(),
            temperature: default_temperature(),
            suggestion_boost: default_suggestion_boost(),
            seed: None,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            initial: default_initial_phase(),
            fine_tune: default_fine_tune_phase(),
            validation_fraction: default_validation_fraction(),
            clip_norm: default_clip_norm(),
            seed: default_training_seed(),
            bootstrap_plans_per_user: default_bootstrap_plans_per_user(),
            bootstrap_min_allowed: default_bootstrap_min_allowed(),
            corpus_path: default_corpus_path(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_catalog_path() -> String {
    "~/.local/share/diet-planner/food_catalog.csv".to_string()
}

fn default_checkpoint_dir() -> String {
    "~/.local/share/diet-planner/checkpoints".to_string()
}

fn default_model_tag() -> String {
    "diet_model".to_string()
}

fn default_vocab_path() -> String {
    "~/.local/share/diet-planner/food_vocab.json".to_string()
}

fn default_hidden_size() -> usize {
    64
}

fn default_top_k() -> usize {
    50
}

fn default_max_repetition() -> usize {
    3
}

fn default_min_safe_foods() -> usize {
    10
}

fn default_temperature() -> f64 {
    1.0
}

fn default_suggestion_boost() -> f64 {
    1.5
}

fn default_initial_phase() -> TrainingPhase {
    TrainingPhase {
        learning_rate: 1e-3,
        epochs: 50,
        batch_size: 16,
        teacher_forcing: 1.0,
    }
}

fn default_fine_tune_phase() -> TrainingPhase {
    TrainingPhase {
        learning_rate: 1e-4,
        epochs: 15,
        batch_size: 8,
        teacher_forcing: 0.7,
    }
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_clip_norm() -> f64 {
    1.0
}

fn default_training_seed() -> u64 {
    42
}

fn default_bootstrap_plans_per_user() -> usize {
    50
}

fn default_bootstrap_min_allowed() -> usize {
    5
}

fn default_corpus_path() -> String {
    "~/.local/share/diet-planner/bootstrap_corpus.csv".to_string()
}

fn default_db_path() -> String {
    "~/.local/share/diet-planner/plans.db".to_string()
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_parses_to_defaults() {
        let parsed: Config = toml::from_str(&Config::default_template()).expect("template");
        parsed.validate().expect("valid");
        assert_eq!(parsed.training.fine_tune, default_fine_tune_phase());
        assert_eq!(parsed.generation.top_k, 50);
        assert_eq!(parsed.generation.seed, None);
        assert_eq!(parsed.model.tag, "diet_model");
    }

    #[test]
    fn rejects_fine_tune_policy_that_outpaces_initial_training() {
        let mut config = Config::default();
        config.training.fine_tune.learning_rate = 1e-2;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.training.fine_tune.epochs = 80;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_safe_food_minimum_below_one_day_of_meals() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());
        config.generation.min_safe_foods = 0;
        assert!(config.validate().is_err());
        config.generation.min_safe_foods = MEALS_PER_DAY - 1;
        assert!(config.validate().is_err());
        config.generation.min_safe_foods = MEALS_PER_DAY;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overrides_replace_paths_and_seed() {
        let mut config = Config::default();
        config.apply_overrides(ConfigOverrides {
            catalog_path: Some("/tmp/catalog.csv".to_string()),
            seed: Some(7),
            ..ConfigOverrides::default()
        });
        assert_eq!(config.resolved_catalog_path(), PathBuf::from("/tmp/catalog.csv"));
        assert_eq!(config.generation.seed, Some(7));
    }
}
