use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use tracing::{debug, info, warn};

use crate::catalog::schema::{
    CatalogColumn, FoodItem, FoodType, Level, LevelAttribute, Nutrient, NutrientProfile,
};
use crate::catalog::{CatalogError, FoodCatalog};

const NAME_COLUMN: &str = "Food_Item";
const DEFAULT_MEAL_TYPE: &str = "Lunch";

#[derive(Debug, Clone)]
pub struct CatalogImport {
    pub catalog: FoodCatalog,
    /// 1-based data row numbers that had no food name.
    pub skipped_rows: Vec<usize>,
    pub merged_duplicates: usize,
}

pub fn read_catalog_csv(path: &Path) -> Result<CatalogImport, CatalogError> {
    let file = File::open(path).map_err(|source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let import = parse_catalog_csv(file)?;
    info!(
        "imported {} food items from {} ({} rows skipped, {} duplicates merged)",
        import.catalog.len(),
        path.display(),
        import.skipped_rows.len(),
        import.merged_duplicates
    );
    Ok(import)
}

pub fn parse_catalog_csv<R: Read>(reader: R) -> Result<CatalogImport, CatalogError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    let headers = csv_reader.headers()?.clone();
    let header_index = |name: &str| {
        headers
            .iter()
            .position(|header| header.eq_ignore_ascii_case(name))
    };

    let name_idx = header_index(NAME_COLUMN).ok_or(CatalogError::MissingNameColumn(NAME_COLUMN))?;
    let column_idx: BTreeMap<CatalogColumn, usize> = CatalogColumn::all()
        .into_iter()
        .filter_map(|column| header_index(column.column_name()).map(|idx| (column, idx)))
        .collect();
    let quantity_idx = header_index("Default_Quantity");
    let unit_idx = header_index("Default_Type");
    let grams_idx = header_index("Gram_Equivalent");

    let mut items: Vec<FoodItem> = Vec::new();
    let mut by_name: BTreeMap<String, usize> = BTreeMap::new();
    let mut skipped_rows = Vec::new();
    let mut merged_duplicates = 0;

    for (row_idx, record) in csv_reader.records().enumerate() {
        let record = record?;
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");
        let name = cell(Some(name_idx));
        if name.is_empty() {
            skipped_rows.push(row_idx + 1);
            continue;
        }

        let meal_types = split_tags(cell(column_idx.get(&CatalogColumn::MealType).copied()));
        let allergens = cell(column_idx.get(&CatalogColumn::Allergens).copied()).to_string();

        let key = name.to_lowercase();
        if let Some(existing) = by_name.get(&key) {
            let item = &mut items[*existing];
            for tag in meal_types {
                if !item.meal_types.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
                    item.meal_types.push(tag);
                }
            }
            if !allergens.is_empty() && !item.allergens.contains(&allergens) {
                if item.allergens.is_empty() {
                    item.allergens = allergens;
                } else {
                    item.allergens = format!("{}, {}", item.allergens, allergens);
                }
            }
            merged_duplicates += 1;
            continue;
        }

        let mut nutrients = NutrientProfile::default();
        for nutrient in Nutrient::ALL {
            let raw = cell(column_idx.get(&CatalogColumn::Nutrient(nutrient)).copied());
            nutrients.set(nutrient, parse_number(raw, name, nutrient.column_name()));
        }
        let level = |attribute: LevelAttribute| {
            parse_level(cell(column_idx.get(&CatalogColumn::Level(attribute)).copied()))
        };

        let mut item = FoodItem::new(name);
        item.serving_quantity = match quantity_idx {
            Some(_) => parse_number(cell(quantity_idx), name, "Default_Quantity"),
            None => 1.0,
        };
        let unit = cell(unit_idx);
        if !unit.is_empty() {
            item.serving_unit = unit.to_string();
        }
        item.gram_equivalent = parse_number(cell(grams_idx), name, "Gram_Equivalent");
        item.nutrients = nutrients;
        item.food_type = FoodType::from_catalog_text(cell(
            column_idx.get(&CatalogColumn::FoodType).copied(),
        ));
        item.meal_types = if meal_types.is_empty() {
            vec![DEFAULT_MEAL_TYPE.to_string()]
        } else {
            meal_types
        };
        item.spice_level = level(LevelAttribute::Spice);
        item.purine_level = level(LevelAttribute::Purine);
        item.fodmap_level = level(LevelAttribute::Fodmap);
        item.allergens = allergens;

        by_name.insert(key, items.len());
        items.push(item);
    }

    let columns: BTreeSet<CatalogColumn> = column_idx.into_keys().collect();
    for column in CatalogColumn::all() {
        if !columns.contains(&column) {
            warn!("catalog has no `{}` column; values default to empty", column);
        }
    }

    Ok(CatalogImport {
        catalog: FoodCatalog::new(items, columns),
        skipped_rows,
        merged_duplicates,
    })
}

fn split_tags(raw: &str) -> Vec<String> {
    raw.split(['/', ','])
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_level(raw: &str) -> Option<Level> {
    if raw.is_empty() {
        return None;
    }
    match raw.parse::<Level>() {
        Ok(level) => Some(level),
        Err(error) => {
            debug!("{error}; leaving level unset");
            None
        }
    }
}

fn parse_number(raw: &str, food: &str, column: &str) -> f64 {
    if raw.is_empty() {
        return 0.0;
    }
    match raw.parse::<f64>() {
        Ok(value) if value.is_finite() => value,
        _ => {
            debug!("non-numeric {column} value {raw:?} for {food}; using 0");
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
Food_Item,Default_Quantity,Default_Type,Calories,Protein,Sugar,Estimated_GI,Vegetarian,Meal_Type,Purine_Level,Spice_Level,Allergens
Poha,1,bowl,250,5,2,55,Veg,Breakfast/Mid-Morning Snack,Low,Mild,None
Chicken Curry,1,bowl,320,28,3,,Non-Veg,Main Course,Moderate,High,
Poha,1,bowl,250,5,2,55,Veg,Dinner,Low,Mild,Peanuts
,1,bowl,10,,,,,,,,
Paneer Tikka,1,plate,abc,18,2,30,Veg,,High,Medium,Milk
";

    #[test]
    fn imports_rows_and_tracks_columns() {
        let import = parse_catalog_csv(SAMPLE.as_bytes()).expect("import failed");
        let catalog = import.catalog;
        assert_eq!(catalog.len(), 3);
        assert_eq!(import.skipped_rows, vec![4]);
        assert_eq!(import.merged_duplicates, 1);

        let poha = catalog.find("poha").expect("poha");
        assert_eq!(
            poha.meal_types,
            vec!["Breakfast", "Mid-Morning Snack", "Dinner"]
        );
        assert_eq!(poha.spice_level, Some(Level::Low));
        assert_eq!(poha.allergens, "None, Peanuts");

        let curry = catalog.find("Chicken Curry").expect("curry");
        assert_eq!(curry.food_type, FoodType::NonVegetarian);
        assert_eq!(curry.purine_level, Some(Level::Medium));
        assert_eq!(curry.nutrients.estimated_gi, 0.0);

        let paneer = catalog.find("Paneer Tikka").expect("paneer");
        assert_eq!(paneer.nutrients.calories, 0.0);
        assert_eq!(paneer.meal_types, vec!["Lunch"]);

        assert!(catalog.has_column(CatalogColumn::Level(LevelAttribute::Purine)));
        assert!(!catalog.has_column(CatalogColumn::Nutrient(Nutrient::Sodium)));
        assert!(!catalog.has_column(CatalogColumn::Level(LevelAttribute::Fodmap)));
    }

    #[test]
    fn rejects_catalog_without_name_column() {
        let result = parse_catalog_csv("Name,Calories\nApple,52\n".as_bytes());
        assert!(matches!(result, Err(CatalogError::MissingNameColumn(_))));
    }
}
