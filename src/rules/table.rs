use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::catalog::{CatalogColumn, FoodItem, Level, LevelAttribute, Nutrient};
use crate::health::{ArthritisKind, HealthVector};

/// A single condition a food must meet while its rule is active.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "op")]
pub enum FoodConstraint {
    Below { nutrient: Nutrient, limit: f64 },
    AtMost { nutrient: Nutrient, limit: f64 },
    Above { nutrient: Nutrient, limit: f64 },
    LevelIn { attribute: LevelAttribute, levels: Vec<Level> },
}

impl FoodConstraint {
    pub fn column(&self) -> CatalogColumn {
        match self {
            Self::Below { nutrient, .. }
            | Self::AtMost { nutrient, .. }
            | Self::Above { nutrient, .. } => CatalogColumn::Nutrient(*nutrient),
            Self::LevelIn { attribute, .. } => CatalogColumn::Level(*attribute),
        }
    }

    pub fn admits(&self, food: &FoodItem) -> bool {
        match self {
            Self::Below { nutrient, limit } => food.nutrient(*nutrient) < *limit,
            Self::AtMost { nutrient, limit } => food.nutrient(*nutrient) <= *limit,
            Self::Above { nutrient, limit } => food.nutrient(*nutrient) > *limit,
            Self::LevelIn { attribute, levels } => food
                .level(*attribute)
                .map(|level| levels.contains(&level))
                .unwrap_or(false),
        }
    }
}

impl Display for FoodConstraint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Below { nutrient, limit } => write!(f, "{nutrient} < {limit}"),
            Self::AtMost { nutrient, limit } => write!(f, "{nutrient} <= {limit}"),
            Self::Above { nutrient, limit } => write!(f, "{nutrient} > {limit}"),
            Self::LevelIn { attribute, levels } => {
                let joined = levels
                    .iter()
                    .map(|l| l.to_string())
                    .collect::<Vec<_>>()
                    .join("|");
                write!(f, "{} in {joined}", attribute.column_name())
            }
        }
    }
}

pub type Trigger = fn(&HealthVector) -> bool;

/// A medical condition paired with the food filter it activates.
#[derive(Debug, Clone)]
pub struct MedicalRule {
    pub name: &'static str,
    pub trigger: Trigger,
    pub constraints: Vec<FoodConstraint>,
}

impl MedicalRule {
    pub fn is_triggered(&self, health: &HealthVector) -> bool {
        (self.trigger)(health)
    }

    pub fn admits(&self, food: &FoodItem) -> bool {
        self.constraints.iter().all(|c| c.admits(food))
    }

    pub fn required_columns(&self) -> Vec<CatalogColumn> {
        let mut columns = self
            .constraints
            .iter()
            .map(FoodConstraint::column)
            .collect::<Vec<_>>();
        columns.sort();
        columns.dedup();
        columns
    }

    pub fn describe(&self) -> String {
        self.constraints
            .iter()
            .map(|c| c.to_string())
            .collect::<Vec<_>>()
            .join(" AND ")
    }
}

#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: Vec<MedicalRule>,
}

impl RuleTable {
    pub fn new(rules: Vec<MedicalRule>) -> Self {
        Self { rules }
    }

    pub fn with_defaults() -> Self {
        use FoodConstraint::{AtMost, Above, Below, LevelIn};
        use Nutrient::*;

        let rules = vec![
            MedicalRule {
                name: "diabetes",
                trigger: diabetes,
                constraints: vec![
                    Below { nutrient: GlycemicIndex, limit: 60.0 },
                    Below { nutrient: Sugar, limit: 10.0 },
                ],
            },
            MedicalRule {
                name: "gout",
                trigger: gout,
                constraints: vec![LevelIn {
                    attribute: LevelAttribute::Purine,
                    levels: vec![Level::Low],
                }],
            },
            MedicalRule {
                name: "hypertension",
                trigger: hypertension,
                constraints: vec![
                    Below { nutrient: Sodium, limit: 300.0 },
                    Above { nutrient: Potassium, limit: 200.0 },
                ],
            },
            MedicalRule {
                name: "cardiac",
                trigger: cardiac,
                constraints: vec![
                    Below { nutrient: SaturatedFat, limit: 3.0 },
                    Above { nutrient: Fiber, limit: 3.0 },
                    AtMost { nutrient: TransFat, limit: 0.1 },
                ],
            },
            MedicalRule {
                name: "triglycerides",
                trigger: triglycerides,
                constraints: vec![
                    Below { nutrient: Sugar, limit: 10.0 },
                    Above { nutrient: Omega3, limit: 0.1 },
                ],
            },
            MedicalRule {
                name: "inflammation",
                trigger: inflammation,
                constraints: vec![LevelIn {
                    attribute: LevelAttribute::Spice,
                    levels: vec![Level::Low, Level::None],
                }],
            },
            MedicalRule {
                name: "kidney",
                trigger: kidney,
                constraints: vec![
                    Below { nutrient: Protein, limit: 12.0 },
                    Below { nutrient: Sodium, limit: 300.0 },
                ],
            },
            MedicalRule {
                name: "liver",
                trigger: liver,
                constraints: vec![
                    Below { nutrient: Fats, limit: 10.0 },
                    Above { nutrient: Fiber, limit: 3.0 },
                ],
            },
            MedicalRule {
                name: "overweight",
                trigger: overweight,
                constraints: vec![
                    Below { nutrient: Calories, limit: 350.0 },
                    Above { nutrient: Fiber, limit: 3.0 },
                    Below { nutrient: GlycemicIndex, limit: 65.0 },
                ],
            },
            MedicalRule {
                name: "underweight",
                trigger: underweight,
                constraints: vec![
                    Above { nutrient: Calories, limit: 300.0 },
                    Above { nutrient: Protein, limit: 10.0 },
                ],
            },
            MedicalRule {
                name: "gastric",
                trigger: gastric,
                constraints: vec![
                    LevelIn {
                        attribute: LevelAttribute::Fodmap,
                        levels: vec![Level::Low],
                    },
                    Below { nutrient: Fats, limit: 10.0 },
                ],
            },
            MedicalRule {
                name: "family_history",
                trigger: family_history,
                constraints: vec![
                    Above { nutrient: Fiber, limit: 3.0 },
                    Below { nutrient: Sodium, limit: 400.0 },
                    Below { nutrient: Sugar, limit: 15.0 },
                ],
            },
        ];
        Self { rules }
    }

    pub fn rules(&self) -> &[MedicalRule] {
        &self.rules
    }

    pub fn by_name(&self, name: &str) -> Option<&MedicalRule> {
        self.rules.iter().find(|rule| rule.name.eq_ignore_ascii_case(name))
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn diabetes(h: &HealthVector) -> bool {
    h.fasting_glucose >= 126.0 || h.hba1c >= 6.5 || h.postprandial_glucose >= 200.0 || h.diabetic
}

fn gout(h: &HealthVector) -> bool {
    let threshold = if h.is_male() { 7.2 } else { 6.0 };
    h.arthritis == ArthritisKind::Gout || h.uric_acid > threshold
}

fn hypertension(h: &HealthVector) -> bool {
    h.hypertensive
}

fn cardiac(h: &HealthVector) -> bool {
    h.ldl >= 130.0 || h.heart_condition
}

fn triglycerides(h: &HealthVector) -> bool {
    h.triglycerides >= 200.0
}

fn inflammation(h: &HealthVector) -> bool {
    let arthritic = matches!(
        h.arthritis,
        ArthritisKind::Rheumatoid | ArthritisKind::Osteo | ArthritisKind::Unspecified
    );
    h.crp > 3.0 || h.esr > 20.0 || arthritic
}

fn kidney(h: &HealthVector) -> bool {
    h.creatinine > 1.3 || h.urea > 45.0
}

fn liver(h: &HealthVector) -> bool {
    h.ast > 40.0 || h.alt > 56.0
}

fn overweight(h: &HealthVector) -> bool {
    let waist_limit = if h.is_male() { 94.0 } else { 80.0 };
    h.bmi >= 25.0 || (h.waist_cm > 0.0 && h.waist_cm >= waist_limit)
}

fn underweight(h: &HealthVector) -> bool {
    !overweight(h) && h.bmi > 0.0 && h.bmi < 18.5
}

fn gastric(h: &HealthVector) -> bool {
    h.gastric_issues
}

fn family_history(h: &HealthVector) -> bool {
    h.has_family_history()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::Gender;

    #[test]
    fn default_table_lists_every_condition() {
        let table = RuleTable::with_defaults();
        assert_eq!(table.rules().len(), 12);
        let gout = table.by_name("gout").expect("gout rule");
        assert_eq!(
            gout.required_columns(),
            vec![CatalogColumn::Level(LevelAttribute::Purine)]
        );
    }

    #[test]
    fn uric_acid_threshold_depends_on_gender() {
        let table = RuleTable::with_defaults();
        let gout = table.by_name("gout").expect("gout rule");
        let mut h = HealthVector::default();
        h.uric_acid = 6.5;
        assert!(!gout.is_triggered(&h));
        h.gender = Gender::Female;
        assert!(gout.is_triggered(&h));
    }

    #[test]
    fn underweight_never_overlaps_overweight() {
        let table = RuleTable::with_defaults();
        let under = table.by_name("underweight").expect("rule");
        let mut h = HealthVector::default();
        h.bmi = 17.0;
        assert!(under.is_triggered(&h));
        h.waist_cm = 100.0;
        assert!(!under.is_triggered(&h));
        h = HealthVector::default();
        assert!(!under.is_triggered(&h));
    }

    #[test]
    fn constraints_use_strict_bounds() {
        let mut food = FoodItem::new("Toast");
        food.nutrients.estimated_gi = 60.0;
        food.nutrients.trans_fat_g = 0.1;
        let below = FoodConstraint::Below { nutrient: Nutrient::GlycemicIndex, limit: 60.0 };
        let at_most = FoodConstraint::AtMost { nutrient: Nutrient::TransFat, limit: 0.1 };
        assert!(!below.admits(&food));
        assert!(at_most.admits(&food));
        let spice = FoodConstraint::LevelIn {
            attribute: LevelAttribute::Spice,
            levels: vec![Level::Low],
        };
        assert!(!spice.admits(&food));
        assert_eq!(below.to_string(), "estimated_gi < 60");
    }
}
