use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::health::normalize::normalize_health;
use crate::health::{
    ActivityLevel, ArthritisKind, DietPreference, Gender, HealthField, HealthVector, WeightGoal,
};

#[derive(Debug, Error)]
pub enum HealthParseError {
    #[error("failed reading health input {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed health profile JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed health report CSV: {0}")]
    Csv(#[from] csv::Error),
}

/// Field-level overrides layered on top of a stored profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthOverrides {
    pub age: Option<f64>,
    pub weight_kg: Option<f64>,
    pub height_cm: Option<f64>,
    pub waist_cm: Option<f64>,
    pub fasting_glucose: Option<f64>,
    pub hba1c: Option<f64>,
    pub postprandial_glucose: Option<f64>,
    pub ldl: Option<f64>,
    pub hdl: Option<f64>,
    pub triglycerides: Option<f64>,
    pub uric_acid: Option<f64>,
    pub creatinine: Option<f64>,
    pub vitamin_d3: Option<f64>,
    pub vitamin_b12: Option<f64>,
    pub tsh: Option<f64>,
    pub gender: Option<Gender>,
    pub diabetic: Option<bool>,
    pub hypertensive: Option<bool>,
    pub thyroid_disorder: Option<bool>,
    pub gastric_issues: Option<bool>,
    pub diet_preference: Option<DietPreference>,
    pub allergies: Option<String>,
}

pub fn apply_overrides(vector: &mut HealthVector, overrides: &HealthOverrides) {
    let numeric = [
        (HealthField::Age, overrides.age),
        (HealthField::WeightKg, overrides.weight_kg),
        (HealthField::HeightCm, overrides.height_cm),
        (HealthField::WaistCm, overrides.waist_cm),
        (HealthField::FastingGlucose, overrides.fasting_glucose),
        (HealthField::Hba1c, overrides.hba1c),
        (HealthField::PostprandialGlucose, overrides.postprandial_glucose),
        (HealthField::Ldl, overrides.ldl),
        (HealthField::Hdl, overrides.hdl),
        (HealthField::Triglycerides, overrides.triglycerides),
        (HealthField::UricAcid, overrides.uric_acid),
        (HealthField::Creatinine, overrides.creatinine),
        (HealthField::VitaminD3, overrides.vitamin_d3),
        (HealthField::VitaminB12, overrides.vitamin_b12),
        (HealthField::Tsh, overrides.tsh),
    ];
    for (field, value) in numeric {
        if let Some(v) = value {
            vector.set(field, v);
        }
    }
    if overrides.weight_kg.is_some() || overrides.height_cm.is_some() {
        vector.bmi = 0.0;
    }
    if let Some(v) = overrides.gender {
        vector.gender = v;
    }
    if let Some(v) = overrides.diabetic {
        vector.diabetic = v;
    }
    if let Some(v) = overrides.hypertensive {
        vector.hypertensive = v;
    }
    if let Some(v) = overrides.thyroid_disorder {
        vector.thyroid_disorder = v;
    }
    if let Some(v) = overrides.gastric_issues {
        vector.gastric_issues = v;
    }
    if let Some(v) = overrides.diet_preference {
        vector.diet_preference = v;
    }
    if let Some(v) = &overrides.allergies {
        vector.allergies = v.clone();
    }
}

/// Loads a JSON profile (or starts empty) and applies overrides and normalisation.
pub fn collect_health_vector(
    profile: Option<&Path>,
    overrides: &HealthOverrides,
) -> Result<HealthVector, HealthParseError> {
    let mut vector = match profile {
        Some(path) => load_profile(path)?,
        None => HealthVector::default(),
    };
    apply_overrides(&mut vector, overrides);
    normalize_health(&mut vector);
    Ok(vector)
}

pub fn load_profile(path: &Path) -> Result<HealthVector, HealthParseError> {
    let data = fs::read_to_string(path).map_err(|source| HealthParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(serde_json::from_str(&data)?)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub patient: String,
    pub vector: HealthVector,
}

pub fn read_health_report(path: &Path) -> Result<Vec<HealthRecord>, HealthParseError> {
    let file = File::open(path).map_err(|source| HealthParseError::Io {
        path: path.display().to_string(),
        source,
    })?;
    parse_health_report(file)
}

/// Reads lab-report rows keyed by their export column names.
pub fn parse_health_report<R: Read>(reader: R) -> Result<Vec<HealthRecord>, HealthParseError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let index = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));
    let field_idx = HealthField::ALL
        .iter()
        .map(|field| (*field, index(field.report_column())))
        .collect::<Vec<_>>();
    let patient_idx = index("Full Name").or_else(|| index("Patient ID"));
    let gender_idx = index("Gender");
    let diet_idx = index("Dietary Preference");
    let allergy_idx = index("Known Allergies");
    let family_idx = index("Family history of diseases");
    let diabetic_idx = index("Diabetic (Yes/No)");
    let hypertension_idx = index("Hypertension (Yes/No)");
    let heart_idx = index("Heart condition (CVD) (Yes/No)");
    let thyroid_idx = index("Thyroid disorder (Yes/No)");
    let arthritis_idx = index("Arthritis (RA/OA/Gout) (Yes/No)");
    let gastric_idx = index("Gastric issues (IBS/GERD) (Yes/No)");
    let activity_idx = index("Activity Level");
    let goal_idx = index("Goal");

    let mut records = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let record = record?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");
        let patient = match cell(patient_idx) {
            "" => format!("row-{}", row + 1),
            name => name.to_string(),
        };

        let mut vector = HealthVector::default();
        for (field, idx) in &field_idx {
            let raw = cell(*idx);
            if raw.is_empty() {
                continue;
            }
            match raw.parse::<f64>() {
                Ok(value) => vector.set(*field, value),
                Err(_) => warn!("{patient}: non-numeric {field} value {raw:?}; using 0"),
            }
        }
        vector.gender = Gender::from_text(cell(gender_idx));
        vector.diet_preference = DietPreference::from_text(cell(diet_idx));
        vector.allergies = cell(allergy_idx).to_string();
        vector.family_history = cell(family_idx).to_string();
        vector.diabetic = is_yes(cell(diabetic_idx));
        vector.hypertensive = is_yes(cell(hypertension_idx));
        vector.heart_condition = is_yes(cell(heart_idx));
        vector.thyroid_disorder = is_yes(cell(thyroid_idx));
        vector.arthritis = ArthritisKind::from_text(cell(arthritis_idx));
        vector.gastric_issues = is_yes(cell(gastric_idx));
        vector.activity_level = ActivityLevel::from_text(cell(activity_idx));
        vector.goal = WeightGoal::from_text(cell(goal_idx));
        normalize_health(&mut vector);

        records.push(HealthRecord { patient, vector });
    }
    Ok(records)
}

fn is_yes(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "y" | "true" | "1"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_replace_profile_values() {
        let mut vector = HealthVector::default();
        vector.bmi = 22.0;
        let overrides = HealthOverrides {
            fasting_glucose: Some(140.0),
            weight_kg: Some(90.0),
            height_cm: Some(170.0),
            allergies: Some("peanuts".to_string()),
            ..HealthOverrides::default()
        };
        apply_overrides(&mut vector, &overrides);
        normalize_health(&mut vector);
        assert_eq!(vector.fasting_glucose, 140.0);
        assert_eq!(vector.allergies, "peanuts");
        assert!(vector.bmi > 30.0);
    }

    #[test]
    fn parses_report_rows_with_gaps() {
        let csv = "\
Full Name,Age,Gender,Weight (kg),Height (cm),HbA1c (%),LDL (mg/dL),Diabetic (Yes/No),Arthritis (RA/OA/Gout) (Yes/No),Known Allergies
Asha,52,Female,70,160,7.1,n/a,Yes,Gout,Milk
,30,,60,,,,No,No,
";
        let records = parse_health_report(csv.as_bytes()).expect("report");
        assert_eq!(records.len(), 2);
        let first = &records[0];
        assert_eq!(first.patient, "Asha");
        assert_eq!(first.vector.gender, Gender::Female);
        assert_eq!(first.vector.hba1c, 7.1);
        assert_eq!(first.vector.ldl, 0.0);
        assert!(first.vector.diabetic);
        assert_eq!(first.vector.arthritis, ArthritisKind::Gout);
        assert!(first.vector.bmi > 27.0);

        let second = &records[1];
        assert_eq!(second.patient, "row-2");
        assert_eq!(second.vector.gender, Gender::Male);
        assert_eq!(second.vector.bmi, 0.0);
    }

    #[test]
    fn profile_with_unmeasured_labs_still_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("profile.json");
        fs::write(&path, r#"{"age": 40, "hba1c": 7.0, "ldl": null, "hdl": "52"}"#)
            .expect("write profile");
        let vector =
            collect_health_vector(Some(&path), &HealthOverrides::default()).expect("profile");
        assert_eq!(vector.hba1c, 7.0);
        assert_eq!(vector.ldl, 0.0);
        assert_eq!(vector.hdl, 52.0);
    }
}
