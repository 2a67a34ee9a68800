use std::collections::BTreeSet;

const SYNONYMS: [(&str, &str); 5] = [
    ("milk", "dairy"),
    ("wheat", "gluten"),
    ("peanuts", "nut"),
    ("peanut", "nut"),
    ("nuts", "nut"),
];

const VEGAN_EXCLUDED: [&str; 3] = ["dairy", "egg", "honey"];

fn fold_synonyms(raw: &str) -> String {
    SYNONYMS
        .iter()
        .fold(raw.to_lowercase(), |acc, (from, to)| acc.replace(from, to))
}

fn strip_parenthesized(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for ch in raw.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

fn tokenize(folded: &str) -> BTreeSet<String> {
    folded
        .split(|c: char| matches!(c, ',' | '/' | '\\' | '|' | ';' | ':' | '-') || c.is_whitespace())
        .map(str::trim)
        .filter(|token| !matches!(*token, "" | "none" | "no" | "nil"))
        .map(str::to_string)
        .collect()
}

/// Normalised tokens for a patient's free-text allergy list.
pub fn user_allergy_tokens(raw: &str) -> BTreeSet<String> {
    tokenize(&fold_synonyms(raw))
}

/// Normalised tokens for a catalog item's allergen column.
pub fn food_allergen_tokens(raw: &str) -> BTreeSet<String> {
    tokenize(&fold_synonyms(&strip_parenthesized(raw)))
}

pub fn conflicts(user_tokens: &BTreeSet<String>, food_allergens: &str) -> bool {
    if user_tokens.is_empty() {
        return false;
    }
    let food_tokens = food_allergen_tokens(food_allergens);
    user_tokens.iter().any(|token| food_tokens.contains(token))
}

/// True when the allergen text names an animal-derived ingredient.
pub fn mentions_animal_product(food_allergens: &str) -> bool {
    let folded = fold_synonyms(food_allergens);
    VEGAN_EXCLUDED.iter().any(|term| folded.contains(term))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn folds_user_synonyms() {
        let tokens = user_allergy_tokens("Peanuts, Milk / wheat");
        let expected: BTreeSet<String> = ["nut", "dairy", "gluten"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(tokens, expected);
        assert!(user_allergy_tokens("None").is_empty());
        assert!(user_allergy_tokens("").is_empty());
    }

    #[test]
    fn strips_parenthesized_notes_from_food_allergens() {
        let tokens = food_allergen_tokens("Tree Nuts (cashew), Milk; Soy");
        assert!(tokens.contains("nut"));
        assert!(tokens.contains("dairy"));
        assert!(tokens.contains("soy"));
        assert!(!tokens.contains("cashew"));
    }

    #[test]
    fn detects_conflicts_on_token_overlap() {
        let user = user_allergy_tokens("nuts");
        assert!(conflicts(&user, "Peanut"));
        assert!(conflicts(&user, "Gluten|Nuts"));
        assert!(!conflicts(&user, "Coconut"));
        assert!(!conflicts(&BTreeSet::new(), "Peanut"));
    }

    #[test]
    fn vegan_terms_include_folded_milk() {
        assert!(mentions_animal_product("Milk"));
        assert!(mentions_animal_product("Egg, Gluten"));
        assert!(!mentions_animal_product("Soy"));
    }
}
