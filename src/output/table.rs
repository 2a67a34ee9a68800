use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::catalog::{FoodCatalog, Nutrient};
use crate::plan::{DietPlan, MealSlot, PlanRecord, PlanStatus};
use crate::rules::RuleOutcome;
use crate::store::{PlanSummary, RetrainingRunRecord};
use crate::training::{RetrainingOutcome, TrainingReport};

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// One row per day, one column per meal slot, plus the day's calories.
pub fn render_plan_table(plan: &DietPlan) -> String {
    let mut table = new_table();
    let mut header = vec!["Day".to_string()];
    header.extend(MealSlot::ALL.iter().map(|slot| slot.label().to_string()));
    header.push("kcal".to_string());
    table.set_header(header);

    for day in &plan.days {
        let mut cells = vec![Cell::new(day.day)];
        for slot in MealSlot::ALL {
            let cell = match day.meals.iter().find(|m| m.slot == slot) {
                Some(meal) if meal.tier.is_fallback() => {
                    Cell::new(&meal.food_name).fg(Color::Yellow)
                }
                Some(meal) => Cell::new(&meal.food_name),
                None => Cell::new("-").fg(Color::Red),
            };
            cells.push(cell);
        }
        let kcal = day.totals.calories;
        let kcal_cell = if kcal > plan.targets.calories * 1.1 {
            Cell::new(format!("{kcal:.0}")).fg(Color::Red)
        } else {
            Cell::new(format!("{kcal:.0}"))
        };
        cells.push(kcal_cell);
        table.add_row(Row::from(cells));
    }
    table.to_string()
}

/// Daily macro totals against the plan's targets.
pub fn render_totals_table(plan: &DietPlan) -> String {
    let mut table = new_table();
    table.set_header(vec!["Day", "Calories", "Protein (g)", "Carbs (g)", "Fats (g)", "Fiber (g)"]);
    table.add_row(vec![
        "target".to_string(),
        format!("{:.0}", plan.targets.calories),
        format!("{:.1}", plan.targets.protein_g),
        format!("{:.1}", plan.targets.carbs_g),
        format!("{:.1}", plan.targets.fats_g),
        "-".to_string(),
    ]);
    for day in &plan.days {
        table.add_row(vec![
            day.day.to_string(),
            format!("{:.0}", day.totals.calories),
            format!("{:.1}", day.totals.protein),
            format!("{:.1}", day.totals.carbs),
            format!("{:.1}", day.totals.fats),
            format!("{:.1}", day.totals.fiber),
        ]);
    }
    table.to_string()
}

pub fn render_rule_outcome_table(outcome: &RuleOutcome) -> String {
    let mut table = new_table();
    table.set_header(vec!["Item", "Value"]);
    table.add_row(vec![
        "allowed foods".to_string(),
        format!("{}/{}", outcome.allowed_food_count(), outcome.catalog_size),
    ]);
    let triggered = if outcome.triggered_rules.is_empty() {
        "none".to_string()
    } else {
        outcome.triggered_rules.join(", ")
    };
    table.add_row(vec!["triggered rules".to_string(), triggered]);
    for skipped in &outcome.skipped_rules {
        let columns = skipped
            .missing_columns
            .iter()
            .map(|c| c.column_name())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(Row::from(vec![
            Cell::new(format!("skipped: {}", skipped.rule)).fg(Color::Yellow),
            Cell::new(format!("missing {columns}")),
        ]));
    }
    if !outcome.allergy_tokens.is_empty() {
        table.add_row(vec![
            "allergy tokens".to_string(),
            outcome.allergy_tokens.join(", "),
        ]);
    }
    for flag in &outcome.suggestion_flags {
        table.add_row(vec![
            "suggestion".to_string(),
            format!("{flag} ({})", flag.nutrient()),
        ]);
    }
    table.to_string()
}

pub fn render_plan_list_table(plans: &[PlanSummary]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "ID",
        "Patient",
        "Created",
        "Status",
        "Retraining",
        "Checkpoint",
    ]);
    for plan in plans {
        let status = match plan.status {
            PlanStatus::Approved => Cell::new(plan.status).fg(Color::Green),
            PlanStatus::Rejected => Cell::new(plan.status).fg(Color::Red),
            PlanStatus::Pending => Cell::new(plan.status),
        };
        let retraining = match (plan.approved_for_retraining, plan.used_for_retraining) {
            (_, true) => "used",
            (true, false) => "flagged",
            (false, false) => "-",
        };
        table.add_row(Row::from(vec![
            Cell::new(plan.id),
            Cell::new(&plan.patient_id),
            Cell::new(plan.created_at.format("%Y-%m-%d %H:%M")),
            status,
            Cell::new(retraining),
            Cell::new(plan.checkpoint.as_deref().unwrap_or("-")),
        ]));
    }
    table.to_string()
}

pub fn render_record_header(record: &PlanRecord) -> String {
    let mut table = new_table();
    table.set_header(vec!["Field", "Value"]);
    table.add_row(vec!["plan".to_string(), record.id.to_string()]);
    table.add_row(vec!["patient".to_string(), record.patient_id.clone()]);
    table.add_row(vec!["status".to_string(), record.status.to_string()]);
    table.add_row(vec![
        "reviewer".to_string(),
        record.reviewed_by.clone().unwrap_or_else(|| "-".to_string()),
    ]);
    if let Some(comment) = &record.reviewer_comment {
        table.add_row(vec!["comment".to_string(), comment.clone()]);
    }
    table.add_row(vec![
        "retraining".to_string(),
        format!(
            "approved={} used={} partial={}",
            record.approved_for_retraining, record.used_for_retraining, record.partially_usable
        ),
    ]);
    table.add_row(vec![
        "checkpoint".to_string(),
        record.checkpoint.clone().unwrap_or_else(|| "-".to_string()),
    ]);
    table.to_string()
}

pub fn render_training_table(report: &TrainingReport) -> String {
    let mut table = new_table();
    table.set_header(vec!["Epoch", "Train Loss", "Validation Loss", "Checkpoint"]);
    for epoch in &report.epochs {
        let is_best = report.best_checkpoint.as_deref() == Some(epoch.checkpoint.as_str());
        let name = if is_best {
            Cell::new(&epoch.checkpoint).fg(Color::Green)
        } else {
            Cell::new(&epoch.checkpoint)
        };
        table.add_row(Row::from(vec![
            Cell::new(epoch.epoch),
            Cell::new(format!("{:.4}", epoch.train_loss)),
            Cell::new(
                epoch
                    .validation_loss
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            name,
        ]));
    }
    table.to_string()
}

pub fn render_retraining_table(outcome: &RetrainingOutcome) -> String {
    let mut summary = new_table();
    summary.set_header(vec!["Item", "Value"]);
    summary.add_row(vec!["base checkpoint".to_string(), outcome.base_checkpoint.clone()]);
    summary.add_row(vec![
        "plans".to_string(),
        format!("{} considered, {} marked used", outcome.plans_considered, outcome.plans_marked),
    ]);
    summary.add_row(vec![
        "dropped occurrences".to_string(),
        outcome.dropped_occurrences.to_string(),
    ]);
    for issue in &outcome.issues {
        summary.add_row(vec![
            format!("plan {}", issue.plan_id),
            format!("dropped {}", issue.dropped_foods.join(", ")),
        ]);
    }
    format!("{summary}\n{}", render_training_table(&outcome.report))
}

pub fn render_runs_table(runs: &[RetrainingRunRecord]) -> String {
    let mut table = new_table();
    table.set_header(vec![
        "Run",
        "Finished",
        "Base",
        "Version",
        "Epochs",
        "Best Loss",
        "Plans",
        "Dropped",
    ]);
    for run in runs {
        let epochs = if run.cancelled {
            Cell::new(format!("{} (cancelled)", run.epochs_completed)).fg(Color::Yellow)
        } else {
            Cell::new(run.epochs_completed)
        };
        table.add_row(Row::from(vec![
            Cell::new(run.id),
            Cell::new(run.finished_at.format("%Y-%m-%d %H:%M")),
            Cell::new(&run.base_checkpoint),
            Cell::new(format!("v{}", run.version)),
            epochs,
            Cell::new(
                run.best_validation_loss
                    .map(|v| format!("{v:.4}"))
                    .unwrap_or_else(|| "-".to_string()),
            ),
            Cell::new(run.plans_consumed),
            Cell::new(run.dropped_occurrences),
        ]));
    }
    table.to_string()
}

pub fn render_catalog_table(catalog: &FoodCatalog) -> String {
    let mut table = new_table();
    table.set_header(vec!["Nutrient", "Min", "Mean", "Max"]);
    for nutrient in [
        Nutrient::Calories,
        Nutrient::Protein,
        Nutrient::Carbs,
        Nutrient::Fats,
        Nutrient::Sugar,
        Nutrient::GlycemicIndex,
        Nutrient::Sodium,
    ] {
        let values = catalog
            .items()
            .iter()
            .map(|item| item.nutrient(nutrient))
            .collect::<Vec<_>>();
        if values.is_empty() {
            continue;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        table.add_row(vec![
            nutrient.column_name().to_string(),
            format!("{min:.1}"),
            format!("{mean:.1}"),
            format!("{max:.1}"),
        ]);
    }
    let missing = crate::catalog::CatalogColumn::all()
        .into_iter()
        .filter(|c| !catalog.has_column(*c))
        .map(|c| c.column_name())
        .collect::<Vec<_>>();
    if !missing.is_empty() {
        table.add_row(Row::from(vec![
            Cell::new("missing columns").fg(Color::Yellow),
            Cell::new(missing.join(", ")),
            Cell::new(""),
            Cell::new(""),
        ]));
    }
    format!("{} foods\n{table}", catalog.len())
}
