use anyhow::Result;
use serde::Serialize;
use serde_json::json;

use crate::plan::{DietPlan, PlanRecord};

pub fn render_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// The "Day N" -> slot label -> food view nutritionists read, plus targets.
pub fn render_plan_json(plan: &DietPlan) -> Result<String> {
    render_json(&json!({
        "plan": plan.to_keyed_json(),
        "targets": plan.targets,
        "fallbacks": plan.fallback_counts,
    }))
}

pub fn render_record_json(record: &PlanRecord) -> Result<String> {
    render_json(&json!({
        "id": record.id,
        "patient_id": record.patient_id,
        "status": record.status,
        "created_at": record.created_at,
        "reviewed_by": record.reviewed_by,
        "reviewer_comment": record.reviewer_comment,
        "approved_for_retraining": record.approved_for_retraining,
        "used_for_retraining": record.used_for_retraining,
        "partially_usable": record.partially_usable,
        "checkpoint": record.checkpoint,
        "triggered_rules": record.triggered_rules,
        "plan": record.meals.to_keyed_json(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::sample_record;

    #[test]
    fn plan_json_is_keyed_by_day_and_slot() {
        let record = sample_record("p-1");
        let rendered = render_plan_json(&record.meals).expect("render");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value["plan"]["Day 1"]["Breakfast"]["food_name"], "Food 01");
        assert!(value["plan"]["Day 15"].is_object());
        assert!(value["targets"]["calories"].is_number());
    }

    #[test]
    fn record_json_carries_review_state() {
        let record = sample_record("p-2");
        let rendered = render_record_json(&record).expect("render");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("parse");
        assert_eq!(value["patient_id"], "p-2");
        assert_eq!(value["status"], "pending");
    }
}
