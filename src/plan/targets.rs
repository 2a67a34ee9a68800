use serde::{Deserialize, Serialize};

use crate::health::{HealthVector, WeightGoal};

const DEFAULT_CALORIES: f64 = 2000.0;
const DEFAULT_PROTEIN_G: f64 = 75.0;
const DEFAULT_FATS_G: f64 = 65.0;
const DEFAULT_CARBS_G: f64 = 250.0;

/// Daily macro targets reported next to a plan. They never steer decoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NutritionalTargets {
    pub calories: f64,
    pub protein_g: f64,
    pub fats_g: f64,
    pub carbs_g: f64,
    pub estimated: bool,
}

impl Default for NutritionalTargets {
    fn default() -> Self {
        Self {
            calories: DEFAULT_CALORIES,
            protein_g: DEFAULT_PROTEIN_G,
            fats_g: DEFAULT_FATS_G,
            carbs_g: DEFAULT_CARBS_G,
            estimated: false,
        }
    }
}

impl NutritionalTargets {
    /// Mifflin-St Jeor BMR scaled by activity and shifted by the weight goal. Falls
    /// back to fixed defaults when age, weight or height is unknown.
    pub fn for_health(health: &HealthVector) -> Self {
        let (age, weight, height) = (health.age, health.weight_kg, health.height_cm);
        if age <= 0.0 || weight <= 0.0 || height <= 0.0 {
            return Self::default();
        }
        let sex_offset = if health.is_male() { 5.0 } else { -161.0 };
        let bmr = 10.0 * weight + 6.25 * height - 5.0 * age + sex_offset;
        let mut calories = bmr * health.activity_level.factor();
        calories += match health.goal {
            WeightGoal::LoseWeight => -500.0,
            WeightGoal::GainWeight => 500.0,
            WeightGoal::Maintain => 0.0,
        };
        let protein_g = 1.6 * weight;
        let fats_g = 0.8 * weight;
        let carbs_g = ((calories - protein_g * 4.0 - fats_g * 9.0) / 4.0).max(0.0);
        Self {
            calories: round1(calories),
            protein_g: round1(protein_g),
            fats_g: round1(fats_g),
            carbs_g: round1(carbs_g),
            estimated: true,
        }
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{ActivityLevel, Gender};

    #[test]
    fn computes_targets_from_body_metrics() {
        let health = HealthVector {
            age: 40.0,
            weight_kg: 70.0,
            height_cm: 170.0,
            gender: Gender::Male,
            activity_level: ActivityLevel::Sedentary,
            goal: WeightGoal::Maintain,
            ..HealthVector::default()
        };
        let targets = NutritionalTargets::for_health(&health);
        // 700 + 1062.5 - 200 + 5 = 1567.5 BMR
        assert!((targets.calories - round1(1567.5 * ActivityLevel::Sedentary.factor())).abs() < 1e-9);
        assert_eq!(targets.protein_g, 112.0);
        assert_eq!(targets.fats_g, 56.0);
        assert!(targets.estimated);
    }

    #[test]
    fn missing_metrics_use_defaults() {
        let targets = NutritionalTargets::for_health(&HealthVector::default());
        assert_eq!(targets, NutritionalTargets::default());
    }
}
