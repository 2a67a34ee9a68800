pub mod collector;
pub mod normalize;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

pub const NUMERIC_FIELD_COUNT: usize = 21;

/// Numeric inputs of the health vector, in model input order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthField {
    Age,
    WeightKg,
    HeightCm,
    Bmi,
    WaistCm,
    FastingGlucose,
    Hba1c,
    PostprandialGlucose,
    Ldl,
    Hdl,
    Triglycerides,
    Crp,
    Esr,
    UricAcid,
    Creatinine,
    Urea,
    Alt,
    Ast,
    VitaminD3,
    VitaminB12,
    Tsh,
}

impl HealthField {
    pub const ALL: [HealthField; NUMERIC_FIELD_COUNT] = [
        HealthField::Age,
        HealthField::WeightKg,
        HealthField::HeightCm,
        HealthField::Bmi,
        HealthField::WaistCm,
        HealthField::FastingGlucose,
        HealthField::Hba1c,
        HealthField::PostprandialGlucose,
        HealthField::Ldl,
        HealthField::Hdl,
        HealthField::Triglycerides,
        HealthField::Crp,
        HealthField::Esr,
        HealthField::UricAcid,
        HealthField::Creatinine,
        HealthField::Urea,
        HealthField::Alt,
        HealthField::Ast,
        HealthField::VitaminD3,
        HealthField::VitaminB12,
        HealthField::Tsh,
    ];

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Age => "age",
            Self::WeightKg => "weight_kg",
            Self::HeightCm => "height_cm",
            Self::Bmi => "bmi",
            Self::WaistCm => "waist_cm",
            Self::FastingGlucose => "fasting_glucose",
            Self::Hba1c => "hba1c",
            Self::PostprandialGlucose => "postprandial_glucose",
            Self::Ldl => "ldl",
            Self::Hdl => "hdl",
            Self::Triglycerides => "triglycerides",
            Self::Crp => "crp",
            Self::Esr => "esr",
            Self::UricAcid => "uric_acid",
            Self::Creatinine => "creatinine",
            Self::Urea => "urea",
            Self::Alt => "alt",
            Self::Ast => "ast",
            Self::VitaminD3 => "vitamin_d3",
            Self::VitaminB12 => "vitamin_b12",
            Self::Tsh => "tsh",
        }
    }

    /// Column header used by lab-report exports.
    pub fn report_column(&self) -> &'static str {
        match self {
            Self::Age => "Age",
            Self::WeightKg => "Weight (kg)",
            Self::HeightCm => "Height (cm)",
            Self::Bmi => "BMI (auto-calculated)",
            Self::WaistCm => "Waist Circumference (cm)",
            Self::FastingGlucose => "Fasting Blood Sugar (mg/dL)",
            Self::Hba1c => "HbA1c (%)",
            Self::PostprandialGlucose => "Postprandial Sugar (mg/dL)",
            Self::Ldl => "LDL (mg/dL)",
            Self::Hdl => "HDL (mg/dL)",
            Self::Triglycerides => "Triglycerides (mg/dL)",
            Self::Crp => "CRP (mg/L)",
            Self::Esr => "ESR (mm/hr)",
            Self::UricAcid => "Uric Acid (mg/dL)",
            Self::Creatinine => "Creatinine (mg/dL)",
            Self::Urea => "Urea (mg/dL)",
            Self::Alt => "ALT (U/L)",
            Self::Ast => "AST (U/L)",
            Self::VitaminD3 => "Vitamin D3 (ng/mL)",
            Self::VitaminB12 => "Vitamin B12 (pg/mL)",
            Self::Tsh => "TSH (uIU/mL)",
        }
    }
}

impl Display for HealthField {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

#[derive(Debug, Error)]
#[error("unknown health field: {0}")]
pub struct HealthFieldParseError(pub String);

impl FromStr for HealthField {
    type Err = HealthFieldParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .iter()
            .find(|field| {
                field.as_slug() == normalized || field.report_column().eq_ignore_ascii_case(s.trim())
            })
            .copied()
            .ok_or_else(|| HealthFieldParseError(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Gender {
    #[default]
    Male,
    Female,
    Other,
}

impl Gender {
    pub fn from_text(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "female" | "f" | "woman" => Self::Female,
            "other" | "non-binary" | "nonbinary" => Self::Other,
            _ => Self::Male,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ArthritisKind {
    #[default]
    None,
    Rheumatoid,
    Osteo,
    Gout,
    Unspecified,
}

impl ArthritisKind {
    /// Maps answers such as `yes`, `RA`, `gout` or `no`.
    pub fn from_text(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.is_empty() || lowered == "no" || lowered == "none" || lowered == "false" {
            Self::None
        } else if lowered.contains("gout") {
            Self::Gout
        } else if lowered == "ra" || lowered.contains("rheumatoid") {
            Self::Rheumatoid
        } else if lowered == "oa" || lowered.contains("osteo") {
            Self::Osteo
        } else {
            Self::Unspecified
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DietPreference {
    #[default]
    Omnivore,
    Vegetarian,
    Vegan,
}

impl DietPreference {
    pub fn from_text(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.contains("vegan") {
            Self::Vegan
        } else if lowered.contains("vegetarian") && !lowered.contains("non") {
            Self::Vegetarian
        } else {
            Self::Omnivore
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityLevel {
    Sedentary,
    #[default]
    LightlyActive,
    ModeratelyActive,
    VeryActive,
    ExtraActive,
}

impl ActivityLevel {
    pub fn from_text(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase().replace([' ', '-'], "_");
        match lowered.as_str() {
            "sedentary" => Self::Sedentary,
            "moderately_active" | "moderate" => Self::ModeratelyActive,
            "very_active" | "active" => Self::VeryActive,
            "extra_active" | "extremely_active" => Self::ExtraActive,
            _ => Self::LightlyActive,
        }
    }

    pub fn factor(&self) -> f64 {
        match self {
            Self::Sedentary => 1.2,
            Self::LightlyActive => 1.375,
            Self::ModeratelyActive => 1.55,
            Self::VeryActive => 1.725,
            Self::ExtraActive => 1.9,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WeightGoal {
    #[default]
    Maintain,
    LoseWeight,
    GainWeight,
}

impl WeightGoal {
    pub fn from_text(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.contains("lose") {
            Self::LoseWeight
        } else if lowered.contains("gain") {
            Self::GainWeight
        } else {
            Self::Maintain
        }
    }
}

/// A patient's biometric and lab snapshot. Missing numeric values are zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthVector {
    #[serde(deserialize_with = "lenient_number")]
    pub age: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub weight_kg: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub height_cm: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub bmi: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub waist_cm: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub fasting_glucose: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub hba1c: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub postprandial_glucose: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub ldl: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub hdl: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub triglycerides: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub crp: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub esr: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub uric_acid: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub creatinine: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub urea: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub alt: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub ast: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub vitamin_d3: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub vitamin_b12: f64,
    #[serde(deserialize_with = "lenient_number")]
    pub tsh: f64,

    pub gender: Gender,
    pub diabetic: bool,
    pub hypertensive: bool,
    pub heart_condition: bool,
    pub thyroid_disorder: bool,
    pub arthritis: ArthritisKind,
    pub gastric_issues: bool,
    pub diet_preference: DietPreference,
    pub allergies: String,
    pub family_history: String,
    pub activity_level: ActivityLevel,
    pub goal: WeightGoal,
}

impl HealthVector {
    pub fn value(&self, field: HealthField) -> f64 {
        match field {
            HealthField::Age => self.age,
            HealthField::WeightKg => self.weight_kg,
            HealthField::HeightCm => self.height_cm,
            HealthField::Bmi => self.bmi,
            HealthField::WaistCm => self.waist_cm,
            HealthField::FastingGlucose => self.fasting_glucose,
            HealthField::Hba1c => self.hba1c,
            HealthField::PostprandialGlucose => self.postprandial_glucose,
            HealthField::Ldl => self.ldl,
            HealthField::Hdl => self.hdl,
            HealthField::Triglycerides => self.triglycerides,
            HealthField::Crp => self.crp,
            HealthField::Esr => self.esr,
            HealthField::UricAcid => self.uric_acid,
            HealthField::Creatinine => self.creatinine,
            HealthField::Urea => self.urea,
            HealthField::Alt => self.alt,
            HealthField::Ast => self.ast,
            HealthField::VitaminD3 => self.vitamin_d3,
            HealthField::VitaminB12 => self.vitamin_b12,
            HealthField::Tsh => self.tsh,
        }
    }

    pub fn set(&mut self, field: HealthField, value: f64) {
        let slot = match field {
            HealthField::Age => &mut self.age,
            HealthField::WeightKg => &mut self.weight_kg,
            HealthField::HeightCm => &mut self.height_cm,
            HealthField::Bmi => &mut self.bmi,
            HealthField::WaistCm => &mut self.waist_cm,
            HealthField::FastingGlucose => &mut self.fasting_glucose,
            HealthField::Hba1c => &mut self.hba1c,
            HealthField::PostprandialGlucose => &mut self.postprandial_glucose,
            HealthField::Ldl => &mut self.ldl,
            HealthField::Hdl => &mut self.hdl,
            HealthField::Triglycerides => &mut self.triglycerides,
            HealthField::Crp => &mut self.crp,
            HealthField::Esr => &mut self.esr,
            HealthField::UricAcid => &mut self.uric_acid,
            HealthField::Creatinine => &mut self.creatinine,
            HealthField::Urea => &mut self.urea,
            HealthField::Alt => &mut self.alt,
            HealthField::Ast => &mut self.ast,
            HealthField::VitaminD3 => &mut self.vitamin_d3,
            HealthField::VitaminB12 => &mut self.vitamin_b12,
            HealthField::Tsh => &mut self.tsh,
        };
        *slot = value;
    }

    /// Positional numeric input for the sequence model.
    pub fn numeric_vector(&self) -> [f64; NUMERIC_FIELD_COUNT] {
        let mut out = [0.0; NUMERIC_FIELD_COUNT];
        for (slot, field) in out.iter_mut().zip(HealthField::ALL) {
            *slot = self.value(field);
        }
        out
    }

    /// Inverse of [`HealthVector::numeric_vector`]; categorical fields keep their defaults.
    pub fn from_numeric(values: &[f64]) -> Self {
        let mut vector = Self::default();
        for (field, value) in HealthField::ALL.iter().zip(values.iter()) {
            vector.set(*field, *value);
        }
        vector
    }

    pub fn is_male(&self) -> bool {
        self.gender == Gender::Male
    }

    pub fn has_allergies(&self) -> bool {
        let lowered = self.allergies.trim().to_ascii_lowercase();
        !(lowered.is_empty() || lowered == "none" || lowered == "no")
    }

    pub fn has_family_history(&self) -> bool {
        let lowered = self.family_history.trim().to_ascii_lowercase();
        !(lowered.is_empty() || lowered == "none" || lowered == "no")
    }
}

/// Accepts a number, a numeric string or `null`. Anything else reads as 0.
fn lenient_number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let parsed = match &value {
        Value::Null => Some(0.0),
        Value::Number(n) => n.as_f64(),
        Value::String(raw) if raw.trim().is_empty() => Some(0.0),
        Value::String(raw) => raw.trim().parse::<f64>().ok(),
        _ => None,
    };
    Ok(parsed.unwrap_or_else(|| {
        warn!("non-numeric health value {value}; using 0");
        0.0
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_vector_follows_model_order() {
        let mut vector = HealthVector::default();
        vector.age = 45.0;
        vector.hba1c = 7.0;
        vector.tsh = 2.5;
        let numeric = vector.numeric_vector();
        assert_eq!(numeric.len(), NUMERIC_FIELD_COUNT);
        assert_eq!(numeric[0], 45.0);
        assert_eq!(numeric[6], 7.0);
        assert_eq!(numeric[20], 2.5);
        assert_eq!(HealthVector::from_numeric(&numeric).hba1c, 7.0);
    }

    #[test]
    fn parses_field_names_and_report_columns() {
        assert_eq!(
            "fasting-glucose".parse::<HealthField>().expect("slug"),
            HealthField::FastingGlucose
        );
        assert_eq!(
            "HbA1c (%)".parse::<HealthField>().expect("column"),
            HealthField::Hba1c
        );
        assert!("cholesterol".parse::<HealthField>().is_err());
    }

    #[test]
    fn maps_categorical_answers() {
        assert_eq!(ArthritisKind::from_text("Gout"), ArthritisKind::Gout);
        assert_eq!(ArthritisKind::from_text("yes"), ArthritisKind::Unspecified);
        assert_eq!(ArthritisKind::from_text("No"), ArthritisKind::None);
        assert_eq!(DietPreference::from_text("Non-Vegetarian"), DietPreference::Omnivore);
        assert_eq!(DietPreference::from_text("Vegan"), DietPreference::Vegan);
        assert_eq!(Gender::from_text(""), Gender::Male);
        assert_eq!(ActivityLevel::from_text("Very Active"), ActivityLevel::VeryActive);
    }

    #[test]
    fn null_and_text_lab_values_read_as_numbers_or_zero() {
        let vector: HealthVector = serde_json::from_str(
            r#"{"age": 40, "hba1c": "7.0", "ldl": null, "hdl": "pending", "tsh": [1]}"#,
        )
        .expect("lenient profile");
        assert_eq!(vector.age, 40.0);
        assert_eq!(vector.hba1c, 7.0);
        assert_eq!(vector.ldl, 0.0);
        assert_eq!(vector.hdl, 0.0);
        assert_eq!(vector.tsh, 0.0);
        assert_eq!(vector.uric_acid, 0.0);
    }
}
