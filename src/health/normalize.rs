use tracing::warn;

use crate::health::{HealthField, HealthVector};

pub fn sanitize_value(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// BMI from weight (kg) and height (cm); zero when either is unknown.
pub fn derive_bmi(weight_kg: f64, height_cm: f64) -> f64 {
    if weight_kg <= 0.0 || height_cm <= 0.0 {
        return 0.0;
    }
    let metres = height_cm / 100.0;
    ((weight_kg / (metres * metres)) * 10.0).round() / 10.0
}

pub fn normalize_health(vector: &mut HealthVector) {
    for field in HealthField::ALL {
        let raw = vector.value(field);
        let clean = sanitize_value(raw);
        if clean != raw {
            warn!("health field {field} had invalid value {raw}; using {clean}");
        }
        vector.set(field, clean);
    }
    if vector.bmi <= 0.0 {
        vector.bmi = derive_bmi(vector.weight_kg, vector.height_cm);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clears_invalid_values_and_derives_bmi() {
        let mut vector = HealthVector::default();
        vector.weight_kg = 80.0;
        vector.height_cm = 170.0;
        vector.ldl = -4.0;
        vector.crp = f64::NAN;
        normalize_health(&mut vector);
        assert_eq!(vector.ldl, 0.0);
        assert_eq!(vector.crp, 0.0);
        assert_eq!(vector.bmi, 27.7);
    }

    #[test]
    fn keeps_reported_bmi() {
        let mut vector = HealthVector::default();
        vector.weight_kg = 80.0;
        vector.height_cm = 170.0;
        vector.bmi = 31.0;
        normalize_health(&mut vector);
        assert_eq!(vector.bmi, 31.0);
        assert_eq!(derive_bmi(70.0, 0.0), 0.0);
    }
}
