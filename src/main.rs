use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use diet_planner::catalog::{read_catalog_csv, FoodCatalog};
use diet_planner::config::{Config, ConfigOverrides};
use diet_planner::generator::{InferenceContext, ModelHandle};
use diet_planner::health::collector::{collect_health_vector, read_health_report, HealthOverrides};
use diet_planner::health::{DietPreference, Gender, HealthVector};
use diet_planner::model::{CheckpointStore, Vocabulary};
use diet_planner::output::csv::{plan_list_to_csv, plan_to_csv};
use diet_planner::output::json::{render_json, render_plan_json, render_record_json};
use diet_planner::output::table::{
    render_catalog_table, render_plan_list_table, render_plan_table, render_record_header,
    render_retraining_table, render_rule_outcome_table, render_runs_table, render_totals_table,
    render_training_table,
};
use diet_planner::plan::{MealSlot, PlanRecord, PlanStatus, ReviewAction};
use diet_planner::rules::{evaluate, RuleTable};
use diet_planner::server::run_server;
use diet_planner::store::PlanStore;
use diet_planner::training::{
    bootstrap_corpus, read_corpus_csv, retrain_from_feedback, train_initial, write_corpus_csv,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
    Csv,
}

#[derive(Debug, Parser)]
#[command(
    name = "diet-planner",
    about = "Rule-constrained diet plan generation with nutritionist review"
)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,
    #[arg(long)]
    catalog: Option<String>,
    #[arg(long = "checkpoint-dir")]
    checkpoint_dir: Option<String>,
    #[arg(long)]
    vocab: Option<String>,
    #[arg(long)]
    db: Option<String>,
    #[arg(long)]
    seed: Option<u64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Args, Clone, Default)]
struct HealthArgs {
    /// JSON health profile; flags below override its fields.
    #[arg(long)]
    profile: Option<PathBuf>,
    #[arg(long)]
    age: Option<f64>,
    #[arg(long = "weight")]
    weight_kg: Option<f64>,
    #[arg(long = "height")]
    height_cm: Option<f64>,
    #[arg(long = "waist")]
    waist_cm: Option<f64>,
    #[arg(long = "fasting-glucose")]
    fasting_glucose: Option<f64>,
    #[arg(long)]
    hba1c: Option<f64>,
    #[arg(long = "postprandial-glucose")]
    postprandial_glucose: Option<f64>,
    #[arg(long)]
    ldl: Option<f64>,
    #[arg(long)]
    hdl: Option<f64>,
    #[arg(long)]
    triglycerides: Option<f64>,
    #[arg(long = "uric-acid")]
    uric_acid: Option<f64>,
    #[arg(long)]
    creatinine: Option<f64>,
    #[arg(long = "vitamin-d3")]
    vitamin_d3: Option<f64>,
    #[arg(long = "vitamin-b12")]
    vitamin_b12: Option<f64>,
    #[arg(long)]
    tsh: Option<f64>,
    #[arg(long)]
    gender: Option<String>,
    #[arg(long)]
    diabetic: Option<bool>,
    #[arg(long)]
    hypertensive: Option<bool>,
    #[arg(long = "thyroid")]
    thyroid_disorder: Option<bool>,
    #[arg(long = "gastric")]
    gastric_issues: Option<bool>,
    #[arg(long = "diet")]
    diet_preference: Option<String>,
    #[arg(long)]
    allergies: Option<String>,
}

impl From<HealthArgs> for HealthOverrides {
    fn from(value: HealthArgs) -> Self {
        Self {
            age: value.age,
            weight_kg: value.weight_kg,
            height_cm: value.height_cm,
            waist_cm: value.waist_cm,
            fasting_glucose: value.fasting_glucose,
            hba1c: value.hba1c,
            postprandial_glucose: value.postprandial_glucose,
            ldl: value.ldl,
            hdl: value.hdl,
            triglycerides: value.triglycerides,
            uric_acid: value.uric_acid,
            creatinine: value.creatinine,
            vitamin_d3: value.vitamin_d3,
            vitamin_b12: value.vitamin_b12,
            tsh: value.tsh,
            gender: value.gender.as_deref().map(Gender::from_text),
            diabetic: value.diabetic,
            hypertensive: value.hypertensive,
            thyroid_disorder: value.thyroid_disorder,
            gastric_issues: value.gastric_issues,
            diet_preference: value.diet_preference.as_deref().map(DietPreference::from_text),
            allergies: value.allergies,
        }
    }
}

impl HealthArgs {
    fn health_vector(&self) -> Result<HealthVector> {
        let overrides: HealthOverrides = self.clone().into();
        Ok(collect_health_vector(self.profile.as_deref(), &overrides)?)
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize the configured catalog, or import report for another CSV.
    Catalog {
        #[arg(long)]
        file: Option<PathBuf>,
    },
    Rules {
        #[command(flatten)]
        health: HealthArgs,
    },
    Generate {
        #[arg(long)]
        patient: String,
        #[command(flatten)]
        health: HealthArgs,
        /// Print the plan without storing it for review.
        #[arg(long)]
        dry_run: bool,
    },
    Plans {
        #[command(subcommand)]
        command: PlanCommands,
    },
    Review {
        id: i64,
        /// approve | reject
        action: String,
        #[arg(long)]
        reviewer: Option<String>,
        #[arg(long)]
        comment: Option<String>,
    },
    FlagRetraining {
        id: i64,
        #[arg(long)]
        clear: bool,
        #[arg(long)]
        notes: Option<String>,
    },
    Edit {
        id: i64,
        #[arg(long)]
        day: usize,
        #[arg(long)]
        slot: String,
        #[arg(long)]
        food: String,
    },
    /// Build the vocabulary and a synthetic training corpus from a health report CSV.
    Bootstrap {
        report: PathBuf,
        #[arg(long)]
        plans_per_user: Option<usize>,
    },
    Train {
        #[arg(long)]
        corpus: Option<PathBuf>,
        /// Promote the best epoch once training finishes.
        #[arg(long)]
        promote: bool,
    },
    Retrain {
        #[arg(long)]
        promote: bool,
    },
    /// Point inference at a checkpoint; lists checkpoints when no name is given.
    Promote {
        name: Option<String>,
    },
    Serve {
        #[arg(long)]
        bind: Option<String>,
    },
    Config {
        #[arg(long)]
        init: bool,
        #[arg(long)]
        show: bool,
    },
}

#[derive(Debug, Subcommand)]
enum PlanCommands {
    List {
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    Show {
        id: i64,
        #[arg(long)]
        original: bool,
    },
    Runs {
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);
    if let Commands::Config { init, show } = &cli.command {
        return handle_config_command(*init, *show, &config_path);
    }
    let mut config = Config::load(Some(&config_path))?;
    config.apply_overrides(ConfigOverrides {
        catalog_path: cli.catalog.clone(),
        checkpoint_dir: cli.checkpoint_dir.clone(),
        vocab_path: cli.vocab.clone(),
        db_path: cli.db.clone(),
        seed: cli.seed,
    });

    match &cli.command {
        Commands::Catalog { file } => {
            let catalog = match file {
                Some(path) => {
                    let import = read_catalog_csv(path)?;
                    if !import.skipped_rows.is_empty() {
                        warn!("skipped unnamed rows {:?}", import.skipped_rows);
                    }
                    info!("merged {} duplicate rows", import.merged_duplicates);
                    import.catalog
                }
                None => FoodCatalog::load(&config.resolved_catalog_path())?,
            };
            match cli.output {
                OutputFormat::Table => println!("{}", render_catalog_table(&catalog)),
                OutputFormat::Json | OutputFormat::Csv => {
                    println!("{}", render_json(catalog.items())?)
                }
            }
        }
        Commands::Rules { health } => {
            let vector = health.health_vector()?;
            let catalog = FoodCatalog::load(&config.resolved_catalog_path())?;
            let outcome = evaluate(&vector, &catalog, &RuleTable::with_defaults());
            match cli.output {
                OutputFormat::Table => println!("{}", render_rule_outcome_table(&outcome)),
                OutputFormat::Json => println!("{}", render_json(&outcome)?),
                OutputFormat::Csv => {
                    warn!("CSV output for rule outcomes not implemented, using JSON");
                    println!("{}", render_json(&outcome)?);
                }
            }
        }
        Commands::Generate {
            patient,
            health,
            dry_run,
        } => {
            let vector = health.health_vector()?;
            let context = InferenceContext::load(&config)?;
            let generated = context.generate(&vector, config.generation.seed)?;
            let mut record = context.new_record(patient, vector, generated);
            if !dry_run {
                let store = PlanStore::open(&config.resolved_db_path())?;
                let id = store.insert_plan(&mut record)?;
                info!("stored plan {id} for {patient} as pending");
            }
            print_record(&record, false, cli.output)?;
        }
        Commands::Plans { command } => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            match command {
                PlanCommands::List { status, limit } => {
                    let status = status.as_deref().map(PlanStatus::from_str).transpose()?;
                    let plans = store.list_plans(status, *limit)?;
                    match cli.output {
                        OutputFormat::Table => println!("{}", render_plan_list_table(&plans)),
                        OutputFormat::Json => println!("{}", render_json(&plans)?),
                        OutputFormat::Csv => print!("{}", plan_list_to_csv(&plans)?),
                    }
                }
                PlanCommands::Show { id, original } => {
                    let record = load_plan(&store, *id)?;
                    print_record(&record, *original, cli.output)?;
                }
                PlanCommands::Runs { limit } => {
                    let runs = store.list_runs(*limit)?;
                    match cli.output {
                        OutputFormat::Table => println!("{}", render_runs_table(&runs)),
                        OutputFormat::Json | OutputFormat::Csv => {
                            println!("{}", render_json(&runs)?)
                        }
                    }
                }
            }
        }
        Commands::Review {
            id,
            action,
            reviewer,
            comment,
        } => {
            let action = ReviewAction::from_str(action)?;
            let store = PlanStore::open(&config.resolved_db_path())?;
            let mut record = load_plan(&store, *id)?;
            record.review(action, reviewer.clone(), comment.clone())?;
            store.update_plan(&record)?;
            println!("plan {id} is now {}", record.status);
        }
        Commands::FlagRetraining { id, clear, notes } => {
            let store = PlanStore::open(&config.resolved_db_path())?;
            let mut record = load_plan(&store, *id)?;
            record.flag_for_retraining(!clear, notes.clone())?;
            store.update_plan(&record)?;
            println!(
                "plan {id} approved_for_retraining={}",
                record.approved_for_retraining
            );
        }
        Commands::Edit { id, day, slot, food } => {
            let slot = MealSlot::from_str(slot)?;
            let catalog = FoodCatalog::load(&config.resolved_catalog_path())?;
            let vocab = Vocabulary::load(&config.resolved_vocab_path()).ok();
            let store = PlanStore::open(&config.resolved_db_path())?;
            let mut record = load_plan(&store, *id)?;
            let meal = record
                .edit_meal(*day, slot, food, &catalog, vocab.as_ref())?
                .clone();
            store.update_plan(&record)?;
            println!(
                "day {day} {slot}: {} ({}); plan {id} is {}",
                meal.food_name, meal.serving, record.status
            );
        }
        Commands::Bootstrap {
            report,
            plans_per_user,
        } => {
            let records = read_health_report(report)?;
            let catalog = FoodCatalog::load(&config.resolved_catalog_path())?;
            let mut rng = ChaCha8Rng::seed_from_u64(config.training.seed);
            let corpus = bootstrap_corpus(
                &records,
                &catalog,
                &RuleTable::with_defaults(),
                plans_per_user.unwrap_or(config.training.bootstrap_plans_per_user),
                config.training.bootstrap_min_allowed,
                &mut rng,
            );
            let vocab_path = config.resolved_vocab_path();
            corpus
                .vocab
                .save(&vocab_path)
                .with_context(|| format!("failed writing {}", vocab_path.display()))?;
            let corpus_path = config.resolved_corpus_path();
            write_corpus_csv(&corpus_path, &corpus.rows)?;
            println!(
                "wrote {} tokens to {} and {} plans to {} ({} patients skipped)",
                corpus.vocab.len(),
                vocab_path.display(),
                corpus.rows.len(),
                corpus_path.display(),
                corpus.skipped_patients.len()
            );
        }
        Commands::Train { corpus, promote } => {
            let vocab = Vocabulary::load(&config.resolved_vocab_path())?;
            let corpus_path = corpus.clone().unwrap_or_else(|| config.resolved_corpus_path());
            let examples = read_corpus_csv(&corpus_path, &vocab)?;
            let store = checkpoint_store(&config);
            let cancel = cancel_on_ctrl_c();
            let training = config.training.clone();
            let hidden_size = config.model.hidden_size;
            let report = tokio::task::spawn_blocking({
                let store = store.clone();
                move || train_initial(examples, &vocab, &training, hidden_size, &store, &cancel)
            })
            .await??;
            if *promote {
                promote_best(&store, report.best_checkpoint.as_deref())?;
            }
            match cli.output {
                OutputFormat::Table => println!("{}", render_training_table(&report)),
                OutputFormat::Json | OutputFormat::Csv => println!("{}", render_json(&report)?),
            }
        }
        Commands::Retrain { promote } => {
            let vocab = Vocabulary::load(&config.resolved_vocab_path())?;
            let store = checkpoint_store(&config);
            let db_path = config.resolved_db_path();
            let cancel = cancel_on_ctrl_c();
            let training = config.training.clone();
            let outcome = tokio::task::spawn_blocking({
                let store = store.clone();
                move || {
                    let plans = PlanStore::open(&db_path)?;
                    retrain_from_feedback(&plans, &store, &vocab, &training, &cancel)
                }
            })
            .await??;
            if *promote {
                promote_best(&store, outcome.report.best_checkpoint.as_deref())?;
            }
            match cli.output {
                OutputFormat::Table => println!("{}", render_retraining_table(&outcome)),
                OutputFormat::Json | OutputFormat::Csv => println!("{}", render_json(&outcome)?),
            }
        }
        Commands::Promote { name } => {
            let store = checkpoint_store(&config);
            match name {
                Some(name) => {
                    let meta = store.promote(name)?;
                    println!(
                        "active checkpoint is now {name} (v{} epoch {})",
                        meta.version, meta.epoch
                    );
                }
                None => {
                    let active = store.active()?;
                    for entry in store.list()? {
                        let marker = if active.as_deref() == Some(entry.file_name.as_str()) {
                            "*"
                        } else {
                            " "
                        };
                        println!("{marker} {}", entry.file_name);
                    }
                }
            }
        }
        Commands::Serve { bind } => {
            let bind = bind.clone().unwrap_or_else(|| config.server.bind.clone());
            let addr: SocketAddr = bind
                .parse()
                .map_err(|e| anyhow!("invalid bind address {bind}: {e}"))?;
            let handle = Arc::new(ModelHandle::new(InferenceContext::load(&config)?));
            return run_server(config, handle, addr).await;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}

fn handle_config_command(init: bool, show: bool, config_path: &Path) -> Result<()> {
    if init {
        Config::write_template(config_path)?;
        println!("Wrote config template to {}", config_path.display());
    }
    if show || !init {
        let config = Config::load(Some(config_path))?;
        println!("{}", render_json(&config)?);
    }
    Ok(())
}

fn checkpoint_store(config: &Config) -> CheckpointStore {
    CheckpointStore::new(config.resolved_checkpoint_dir(), &config.model.tag)
}

fn promote_best(store: &CheckpointStore, best: Option<&str>) -> Result<()> {
    let Some(best) = best else {
        bail!("no epoch produced a checkpoint to promote");
    };
    store.promote(best)?;
    println!("promoted {best}");
    Ok(())
}

/// The flag is checked between epochs, so ctrl-c stops after the current one.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("cancellation requested; finishing the current epoch");
            flag.store(true, Ordering::SeqCst);
        }
    });
    cancel
}

fn load_plan(store: &PlanStore, id: i64) -> Result<PlanRecord> {
    store
        .get_plan(id)?
        .ok_or_else(|| anyhow!("plan {id} not found"))
}

fn print_record(record: &PlanRecord, original: bool, format: OutputFormat) -> Result<()> {
    let plan = if original {
        &record.original_plan
    } else {
        &record.meals
    };
    match format {
        OutputFormat::Table => {
            println!("{}", render_record_header(record));
            println!("{}", render_plan_table(plan));
            println!("{}", render_totals_table(plan));
            for (tier, count) in &plan.fallback_counts {
                warn!("{count} cells filled by fallback tier {tier}");
            }
        }
        OutputFormat::Json if original => println!("{}", render_plan_json(plan)?),
        OutputFormat::Json => println!("{}", render_record_json(record)?),
        OutputFormat::Csv => print!("{}", plan_to_csv(plan)?),
    }
    Ok(())
}
