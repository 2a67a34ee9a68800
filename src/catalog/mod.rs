pub mod import;
pub mod schema;

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub use import::{parse_catalog_csv, read_catalog_csv, CatalogImport};
pub use schema::{
    CatalogColumn, FoodItem, FoodType, Level, LevelAttribute, Nutrient, NutrientProfile,
};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed reading catalog {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed catalog CSV: {0}")]
    Csv(#[from] csv::Error),
    #[error("catalog is missing the required `{0}` column")]
    MissingNameColumn(&'static str),
    #[error("catalog contains no food items")]
    Empty,
}

/// Immutable reference data shared by the rule engine, the generator and plan editing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoodCatalog {
    items: Vec<FoodItem>,
    columns: BTreeSet<CatalogColumn>,
}

impl FoodCatalog {
    pub fn new(items: Vec<FoodItem>, columns: BTreeSet<CatalogColumn>) -> Self {
        Self { items, columns }
    }

    /// Builds a catalog whose schema carries every rule-relevant column.
    pub fn with_all_columns(items: Vec<FoodItem>) -> Self {
        Self::new(items, CatalogColumn::all().into_iter().collect())
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let import = read_catalog_csv(path)?;
        if import.catalog.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(import.catalog)
    }

    pub fn items(&self) -> &[FoodItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FoodItem> {
        self.items.get(index)
    }

    pub fn columns(&self) -> &BTreeSet<CatalogColumn> {
        &self.columns
    }

    pub fn has_column(&self, column: CatalogColumn) -> bool {
        self.columns.contains(&column)
    }

    pub fn missing_columns(&self, required: &[CatalogColumn]) -> Vec<CatalogColumn> {
        required
            .iter()
            .filter(|column| !self.has_column(**column))
            .copied()
            .collect()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        let needle = name.trim();
        self.items
            .iter()
            .position(|item| item.name.eq_ignore_ascii_case(needle))
    }

    pub fn find(&self, name: &str) -> Option<&FoodItem> {
        self.index_of(name).and_then(|idx| self.items.get(idx))
    }

    /// Resolves free text to a catalog item: exact case-insensitive match first, then the
    /// shortest name that contains the query.
    pub fn resolve(&self, query: &str) -> Option<&FoodItem> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return None;
        }
        if let Some(item) = self.find(trimmed) {
            return Some(item);
        }
        let needle = trimmed.to_lowercase();
        self.items
            .iter()
            .filter(|item| item.name.to_lowercase().contains(&needle))
            .min_by(|a, b| a.name.len().cmp(&b.name.len()).then(a.name.cmp(&b.name)))
    }

    pub fn names(&self) -> Vec<&str> {
        self.items.iter().map(|item| item.name.as_str()).collect()
    }

    /// SHA-256 over the canonical JSON form, recorded with plans for audit.
    pub fn digest(&self) -> String {
        let canonical = serde_json::to_string(&self.items).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(canonical.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FoodCatalog {
        FoodCatalog::with_all_columns(vec![
            FoodItem::new("Oats Porridge"),
            FoodItem::new("Masala Oats"),
            FoodItem::new("Moong Dal Chilla"),
        ])
    }

    #[test]
    fn resolves_exact_before_partial() {
        let catalog = catalog();
        let exact = catalog.resolve("masala oats").expect("exact match");
        assert_eq!(exact.name, "Masala Oats");
        let partial = catalog.resolve("oats").expect("partial match");
        assert_eq!(partial.name, "Masala Oats");
        assert!(catalog.resolve("pizza").is_none());
        assert!(catalog.resolve("  ").is_none());
    }

    #[test]
    fn reports_missing_columns() {
        let mut columns = BTreeSet::new();
        columns.insert(CatalogColumn::Nutrient(Nutrient::Sugar));
        let catalog = FoodCatalog::new(vec![FoodItem::new("Apple")], columns);
        let missing = catalog.missing_columns(&[
            CatalogColumn::Nutrient(Nutrient::Sugar),
            CatalogColumn::Level(LevelAttribute::Purine),
        ]);
        assert_eq!(missing, vec![CatalogColumn::Level(LevelAttribute::Purine)]);
    }

    #[test]
    fn digest_changes_with_content() {
        let a = catalog();
        let mut items = a.items().to_vec();
        items[0].nutrients.calories = 150.0;
        let b = FoodCatalog::with_all_columns(items);
        assert_ne!(a.digest(), b.digest());
        assert_eq!(a.digest(), catalog().digest());
    }
}
