use anyhow::Result;

use crate::plan::DietPlan;
use crate::store::PlanSummary;

pub fn plan_to_csv(plan: &DietPlan) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "day",
        "slot",
        "food",
        "serving",
        "calories",
        "protein_g",
        "carbs_g",
        "fats_g",
        "tier",
    ])?;
    for (day, meal) in plan.meals_in_order() {
        writer.write_record([
            day.to_string(),
            meal.slot.label().to_string(),
            meal.food_name.clone(),
            meal.serving.clone(),
            format!("{:.1}", meal.nutrients.calories),
            format!("{:.1}", meal.nutrients.protein),
            format!("{:.1}", meal.nutrients.carbs),
            format!("{:.1}", meal.nutrients.fats),
            meal.tier.to_string(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

pub fn plan_list_to_csv(plans: &[PlanSummary]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(vec![]);
    writer.write_record([
        "id",
        "patient_id",
        "created_at",
        "status",
        "approved_for_retraining",
        "used_for_retraining",
        "checkpoint",
    ])?;
    for plan in plans {
        writer.write_record([
            plan.id.to_string(),
            plan.patient_id.clone(),
            plan.created_at.to_rfc3339(),
            plan.status.to_string(),
            plan.approved_for_retraining.to_string(),
            plan.used_for_retraining.to_string(),
            plan.checkpoint.clone().unwrap_or_default(),
        ])?;
    }
    let data = writer.into_inner()?;
    Ok(String::from_utf8_lossy(&data).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanStatus, PLAN_CELLS};
    use crate::store::tests::sample_record;
    use chrono::Utc;

    #[test]
    fn plan_csv_has_one_row_per_cell() {
        let record = sample_record("p-1");
        let rendered = plan_to_csv(&record.meals).expect("csv");
        let lines = rendered.lines().collect::<Vec<_>>();
        assert_eq!(lines.len(), PLAN_CELLS + 1);
        assert!(lines[0].starts_with("day,slot,food"));
        assert!(lines[1].starts_with("1,Early-Morning,Food 00,"));
        assert!(lines[1].ends_with(",sampled"));
    }

    #[test]
    fn plan_list_csv_renders_summaries() {
        let plans = vec![PlanSummary {
            id: 4,
            patient_id: "p-4".to_string(),
            created_at: Utc::now(),
            status: PlanStatus::Approved,
            approved_for_retraining: true,
            used_for_retraining: false,
            checkpoint: None,
        }];
        let rendered = plan_list_to_csv(&plans).expect("csv");
        let row = rendered.lines().nth(1).expect("row");
        assert!(row.starts_with("4,p-4,"));
        assert!(row.ends_with(",approved,true,false,"));
    }
}
