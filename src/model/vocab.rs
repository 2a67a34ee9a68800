use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::model::{write_atomic, ModelLoadError};

pub const PAD_ID: u32 = 0;
pub const SOS_ID: u32 = 1;
pub const EOS_ID: u32 = 2;
pub const FIRST_FOOD_ID: u32 = 3;

pub const PAD_TOKEN: &str = "<pad>";
pub const SOS_TOKEN: &str = "<sos>";
pub const EOS_TOKEN: &str = "<eos>";

/// Bidirectional food name ↔ token id mapping with dense ids.
#[derive(Debug, Clone, PartialEq)]
pub struct Vocabulary {
    tokens: Vec<String>,
    ids: BTreeMap<String, u32>,
    folded: BTreeMap<String, u32>,
}

impl Vocabulary {
    /// Sorted unique food names get ids starting at [`FIRST_FOOD_ID`].
    pub fn from_food_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_string())
            .filter(|n| !n.is_empty())
            .collect::<Vec<_>>();
        unique.sort();
        unique.dedup();
        let mut tokens = vec![
            PAD_TOKEN.to_string(),
            SOS_TOKEN.to_string(),
            EOS_TOKEN.to_string(),
        ];
        tokens.extend(unique);
        Self::from_tokens(tokens)
    }

    fn from_tokens(tokens: Vec<String>) -> Self {
        let ids = tokens
            .iter()
            .enumerate()
            .map(|(idx, token)| (token.clone(), idx as u32))
            .collect::<BTreeMap<_, _>>();
        let mut folded = BTreeMap::new();
        for (idx, token) in tokens.iter().enumerate().skip(FIRST_FOOD_ID as usize) {
            folded.entry(token.to_lowercase()).or_insert(idx as u32);
        }
        Self {
            tokens,
            ids,
            folded,
        }
    }

    /// Validates reserved ids and density before accepting a persisted mapping.
    pub fn from_map(map: BTreeMap<String, u32>, source: &str) -> Result<Self, ModelLoadError> {
        let corrupt = |reason: String| ModelLoadError::Corrupt {
            path: source.to_string(),
            reason,
        };
        for (token, expected) in [(PAD_TOKEN, PAD_ID), (SOS_TOKEN, SOS_ID), (EOS_TOKEN, EOS_ID)] {
            match map.get(token) {
                Some(id) if *id == expected => {}
                Some(id) => return Err(corrupt(format!("{token} has id {id}, expected {expected}"))),
                None => return Err(corrupt(format!("reserved token {token} is missing"))),
            }
        }
        let mut tokens = vec![String::new(); map.len()];
        for (token, id) in &map {
            let idx = *id as usize;
            if idx >= tokens.len() {
                return Err(corrupt(format!("id {id} for {token:?} is out of range")));
            }
            if !tokens[idx].is_empty() {
                return Err(corrupt(format!("id {id} is assigned twice")));
            }
            tokens[idx] = token.clone();
        }
        Ok(Self::from_tokens(tokens))
    }

    pub fn load(path: &Path) -> Result<Self, ModelLoadError> {
        if !path.exists() {
            return Err(ModelLoadError::Missing(path.display().to_string()));
        }
        let data = fs::read_to_string(path).map_err(|source| ModelLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let map: BTreeMap<String, u32> =
            serde_json::from_str(&data).map_err(|e| ModelLoadError::Corrupt {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_map(map, &path.display().to_string())
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(&self.to_map())?;
        write_atomic(path, json.as_bytes())
    }

    pub fn to_map(&self) -> BTreeMap<String, u32> {
        self.ids.clone()
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.food_count() == 0
    }

    pub fn food_count(&self) -> usize {
        self.tokens.len().saturating_sub(FIRST_FOOD_ID as usize)
    }

    /// Exact lookup, falling back to a case-insensitive match.
    pub fn id(&self, name: &str) -> Option<u32> {
        let trimmed = name.trim();
        self.ids
            .get(trimmed)
            .copied()
            .filter(|id| *id >= FIRST_FOOD_ID)
            .or_else(|| self.folded.get(&trimmed.to_lowercase()).copied())
    }

    pub fn token(&self, id: u32) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    pub fn is_reserved(id: u32) -> bool {
        id < FIRST_FOOD_ID
    }

    pub fn food_ids(&self) -> impl Iterator<Item = u32> {
        FIRST_FOOD_ID..self.tokens.len() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_sorted_ids_after_reserved_tokens() {
        let vocab = Vocabulary::from_food_names(["Upma", "Idli", "Upma", " "]);
        assert_eq!(vocab.len(), 5);
        assert_eq!(vocab.id("Idli"), Some(3));
        assert_eq!(vocab.id("upma"), Some(4));
        assert_eq!(vocab.id("<pad>"), None);
        assert_eq!(vocab.token(SOS_ID), Some(SOS_TOKEN));
        assert_eq!(vocab.food_ids().collect::<Vec<_>>(), vec![3, 4]);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vocab.json");
        let vocab = Vocabulary::from_food_names(["Dosa", "Poha"]);
        vocab.save(&path).expect("save");
        assert_eq!(Vocabulary::load(&path).expect("load"), vocab);
    }

    #[test]
    fn rejects_broken_mappings() {
        let mut map = Vocabulary::from_food_names(["Dosa"]).to_map();
        map.insert("<sos>".to_string(), 7);
        assert!(matches!(
            Vocabulary::from_map(map, "test"),
            Err(ModelLoadError::Corrupt { .. })
        ));

        let mut gapped = Vocabulary::from_food_names(["Dosa"]).to_map();
        gapped.insert("Poha".to_string(), 9);
        assert!(Vocabulary::from_map(gapped, "test").is_err());

        let missing = std::path::Path::new("/nonexistent/vocab.json");
        assert!(matches!(
            Vocabulary::load(missing),
            Err(ModelLoadError::Missing(_))
        ));
    }
}
