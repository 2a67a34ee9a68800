use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Nutrient {
    Calories,
    Protein,
    Carbs,
    Fats,
    Sugar,
    Fiber,
    SaturatedFat,
    TransFat,
    GlycemicIndex,
    GlycemicLoad,
    Sodium,
    Potassium,
    Iron,
    Calcium,
    Iodine,
    Zinc,
    Magnesium,
    Selenium,
    Cholesterol,
    Omega3,
    VitaminD,
    VitaminB12,
}

impl Nutrient {
    pub const ALL: [Nutrient; 22] = [
        Nutrient::Calories,
        Nutrient::Protein,
        Nutrient::Carbs,
        Nutrient::Fats,
        Nutrient::Sugar,
        Nutrient::Fiber,
        Nutrient::SaturatedFat,
        Nutrient::TransFat,
        Nutrient::GlycemicIndex,
        Nutrient::GlycemicLoad,
        Nutrient::Sodium,
        Nutrient::Potassium,
        Nutrient::Iron,
        Nutrient::Calcium,
        Nutrient::Iodine,
        Nutrient::Zinc,
        Nutrient::Magnesium,
        Nutrient::Selenium,
        Nutrient::Cholesterol,
        Nutrient::Omega3,
        Nutrient::VitaminD,
        Nutrient::VitaminB12,
    ];

    /// Header used by the catalog CSV export.
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Calories => "Calories",
            Self::Protein => "Protein",
            Self::Carbs => "Carbs",
            Self::Fats => "Fats",
            Self::Sugar => "Sugar",
            Self::Fiber => "Fiber",
            Self::SaturatedFat => "Saturated_Fat/g",
            Self::TransFat => "Trans_Fat/g",
            Self::GlycemicIndex => "Estimated_GI",
            Self::GlycemicLoad => "Glycemic_Load",
            Self::Sodium => "Sodium/mg",
            Self::Potassium => "Potassium/mg",
            Self::Iron => "Iron/mg",
            Self::Calcium => "Calcium/mg",
            Self::Iodine => "Iodine/mcg",
            Self::Zinc => "Zinc/mg",
            Self::Magnesium => "Magnesium/mg",
            Self::Selenium => "Selenium/mcg",
            Self::Cholesterol => "Cholesterol/mg",
            Self::Omega3 => "Omega_3/g",
            Self::VitaminD => "Vitamin_D/mcg",
            Self::VitaminB12 => "Vitamin_B12/mcg",
        }
    }

    pub fn as_slug(&self) -> &'static str {
        match self {
            Self::Calories => "calories",
            Self::Protein => "protein",
            Self::Carbs => "carbs",
            Self::Fats => "fats",
            Self::Sugar => "sugar",
            Self::Fiber => "fiber",
            Self::SaturatedFat => "saturated_fat_g",
            Self::TransFat => "trans_fat_g",
            Self::GlycemicIndex => "estimated_gi",
            Self::GlycemicLoad => "glycemic_load",
            Self::Sodium => "sodium_mg",
            Self::Potassium => "potassium_mg",
            Self::Iron => "iron_mg",
            Self::Calcium => "calcium_mg",
            Self::Iodine => "iodine_mcg",
            Self::Zinc => "zinc_mg",
            Self::Magnesium => "magnesium_mg",
            Self::Selenium => "selenium_mcg",
            Self::Cholesterol => "cholesterol_mg",
            Self::Omega3 => "omega_3_g",
            Self::VitaminD => "vitamin_d_mcg",
            Self::VitaminB12 => "vitamin_b12_mcg",
        }
    }
}

impl Display for Nutrient {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_slug())
    }
}

/// Per-serving nutrient values. Unrecorded values are stored as zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NutrientProfile {
    pub calories: f64,
    pub protein: f64,
    pub carbs: f64,
    pub fats: f64,
    pub sugar: f64,
    pub fiber: f64,
    pub saturated_fat_g: f64,
    pub trans_fat_g: f64,
    pub estimated_gi: f64,
    pub glycemic_load: f64,
    pub sodium_mg: f64,
    pub potassium_mg: f64,
    pub iron_mg: f64,
    pub calcium_mg: f64,
    pub iodine_mcg: f64,
    pub zinc_mg: f64,
    pub magnesium_mg: f64,
    pub selenium_mcg: f64,
    pub cholesterol_mg: f64,
    pub omega_3_g: f64,
    pub vitamin_d_mcg: f64,
    pub vitamin_b12_mcg: f64,
}

impl NutrientProfile {
    pub fn get(&self, nutrient: Nutrient) -> f64 {
        match nutrient {
            Nutrient::Calories => self.calories,
            Nutrient::Protein => self.protein,
            Nutrient::Carbs => self.carbs,
            Nutrient::Fats => self.fats,
            Nutrient::Sugar => self.sugar,
            Nutrient::Fiber => self.fiber,
            Nutrient::SaturatedFat => self.saturated_fat_g,
            Nutrient::TransFat => self.trans_fat_g,
            Nutrient::GlycemicIndex => self.estimated_gi,
            Nutrient::GlycemicLoad => self.glycemic_load,
            Nutrient::Sodium => self.sodium_mg,
            Nutrient::Potassium => self.potassium_mg,
            Nutrient::Iron => self.iron_mg,
            Nutrient::Calcium => self.calcium_mg,
            Nutrient::Iodine => self.iodine_mcg,
            Nutrient::Zinc => self.zinc_mg,
            Nutrient::Magnesium => self.magnesium_mg,
            Nutrient::Selenium => self.selenium_mcg,
            Nutrient::Cholesterol => self.cholesterol_mg,
            Nutrient::Omega3 => self.omega_3_g,
            Nutrient::VitaminD => self.vitamin_d_mcg,
            Nutrient::VitaminB12 => self.vitamin_b12_mcg,
        }
    }

    pub fn set(&mut self, nutrient: Nutrient, value: f64) {
        let slot = match nutrient {
            Nutrient::Calories => &mut self.calories,
            Nutrient::Protein => &mut self.protein,
            Nutrient::Carbs => &mut self.carbs,
            Nutrient::Fats => &mut self.fats,
            Nutrient::Sugar => &mut self.sugar,
            Nutrient::Fiber => &mut self.fiber,
            Nutrient::SaturatedFat => &mut self.saturated_fat_g,
            Nutrient::TransFat => &mut self.trans_fat_g,
            Nutrient::GlycemicIndex => &mut self.estimated_gi,
            Nutrient::GlycemicLoad => &mut self.glycemic_load,
            Nutrient::Sodium => &mut self.sodium_mg,
            Nutrient::Potassium => &mut self.potassium_mg,
            Nutrient::Iron => &mut self.iron_mg,
            Nutrient::Calcium => &mut self.calcium_mg,
            Nutrient::Iodine => &mut self.iodine_mcg,
            Nutrient::Zinc => &mut self.zinc_mg,
            Nutrient::Magnesium => &mut self.magnesium_mg,
            Nutrient::Selenium => &mut self.selenium_mcg,
            Nutrient::Cholesterol => &mut self.cholesterol_mg,
            Nutrient::Omega3 => &mut self.omega_3_g,
            Nutrient::VitaminD => &mut self.vitamin_d_mcg,
            Nutrient::VitaminB12 => &mut self.vitamin_b12_mcg,
        };
        *slot = if value.is_finite() { value } else { 0.0 };
    }

    pub fn accumulate(&mut self, other: &NutrientProfile) {
        for nutrient in Nutrient::ALL {
            self.set(nutrient, self.get(nutrient) + other.get(nutrient));
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    None,
    Low,
    Medium,
    High,
}

#[derive(Debug, Error)]
#[error("unknown level: {0}")]
pub struct LevelParseError(pub String);

impl FromStr for Level {
    type Err = LevelParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "none" | "nil" => Ok(Self::None),
            "low" | "mild" => Ok(Self::Low),
            "medium" | "moderate" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(LevelParseError(s.to_string())),
        }
    }
}

impl Display for Level {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        };
        write!(f, "{label}")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum LevelAttribute {
    Spice,
    Purine,
    Fodmap,
}

impl LevelAttribute {
    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Spice => "Spice_Level",
            Self::Purine => "Purine_Level",
            Self::Fodmap => "FODMAP_Level",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FoodType {
    Vegetarian,
    NonVegetarian,
    Eggetarian,
    Vegan,
    #[default]
    Other,
}

impl FoodType {
    /// Maps the free-text `Vegetarian` catalog column onto a food type.
    pub fn from_catalog_text(raw: &str) -> Self {
        let lowered = raw.trim().to_ascii_lowercase();
        if lowered.contains("non-veg") || lowered.contains("non veg") || lowered == "no" {
            Self::NonVegetarian
        } else if lowered.contains("egg") {
            Self::Eggetarian
        } else if lowered.contains("vegan") {
            Self::Vegan
        } else if lowered.contains("veg") || lowered == "yes" {
            Self::Vegetarian
        } else {
            Self::Other
        }
    }
}

/// Catalog columns that rules depend on. Used to detect schema gaps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", tag = "kind", content = "name")]
pub enum CatalogColumn {
    Nutrient(Nutrient),
    Level(LevelAttribute),
    FoodType,
    MealType,
    Allergens,
}

impl CatalogColumn {
    pub fn all() -> Vec<CatalogColumn> {
        let mut columns = Nutrient::ALL
            .iter()
            .map(|n| CatalogColumn::Nutrient(*n))
            .collect::<Vec<_>>();
        columns.extend([
            CatalogColumn::Level(LevelAttribute::Spice),
            CatalogColumn::Level(LevelAttribute::Purine),
            CatalogColumn::Level(LevelAttribute::Fodmap),
            CatalogColumn::FoodType,
            CatalogColumn::MealType,
            CatalogColumn::Allergens,
        ]);
        columns
    }

    pub fn column_name(&self) -> &'static str {
        match self {
            Self::Nutrient(n) => n.column_name(),
            Self::Level(l) => l.column_name(),
            Self::FoodType => "Vegetarian",
            Self::MealType => "Meal_Type",
            Self::Allergens => "Allergens",
        }
    }
}

impl Display for CatalogColumn {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column_name())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FoodItem {
    pub name: String,
    #[serde(default)]
    pub serving_quantity: f64,
    #[serde(default)]
    pub serving_unit: String,
    #[serde(default)]
    pub gram_equivalent: f64,
    #[serde(default)]
    pub nutrients: NutrientProfile,
    #[serde(default)]
    pub food_type: FoodType,
    #[serde(default)]
    pub meal_types: Vec<String>,
    #[serde(default)]
    pub spice_level: Option<Level>,
    #[serde(default)]
    pub purine_level: Option<Level>,
    #[serde(default)]
    pub fodmap_level: Option<Level>,
    #[serde(default)]
    pub allergens: String,
}

impl FoodItem {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            serving_quantity: 1.0,
            serving_unit: "serving".to_string(),
            gram_equivalent: 0.0,
            nutrients: NutrientProfile::default(),
            food_type: FoodType::Other,
            meal_types: Vec::new(),
            spice_level: None,
            purine_level: None,
            fodmap_level: None,
            allergens: String::new(),
        }
    }

    pub fn nutrient(&self, nutrient: Nutrient) -> f64 {
        self.nutrients.get(nutrient)
    }

    pub fn level(&self, attribute: LevelAttribute) -> Option<Level> {
        match attribute {
            LevelAttribute::Spice => self.spice_level,
            LevelAttribute::Purine => self.purine_level,
            LevelAttribute::Fodmap => self.fodmap_level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_level_synonyms() {
        assert_eq!("Moderate".parse::<Level>().expect("level"), Level::Medium);
        assert_eq!(" mild ".parse::<Level>().expect("level"), Level::Low);
        assert!("spicy".parse::<Level>().is_err());
    }

    #[test]
    fn maps_catalog_food_type_text() {
        assert_eq!(FoodType::from_catalog_text("Non-Veg"), FoodType::NonVegetarian);
        assert_eq!(FoodType::from_catalog_text("Egg"), FoodType::Eggetarian);
        assert_eq!(FoodType::from_catalog_text("Vegan"), FoodType::Vegan);
        assert_eq!(FoodType::from_catalog_text("Veg"), FoodType::Vegetarian);
        assert_eq!(FoodType::from_catalog_text(""), FoodType::Other);
    }

    #[test]
    fn accumulates_profiles() {
        let mut total = NutrientProfile::default();
        let mut item = NutrientProfile::default();
        item.set(Nutrient::Calories, 120.0);
        item.set(Nutrient::Sodium, f64::NAN);
        total.accumulate(&item);
        total.accumulate(&item);
        assert_eq!(total.calories, 240.0);
        assert_eq!(total.sodium_mg, 0.0);
    }
}
