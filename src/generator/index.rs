use tracing::warn;

use crate::catalog::FoodCatalog;
use crate::model::Vocabulary;
use crate::plan::{normalize_label, MealSlot, MEALS_PER_DAY};

/// Allowed, in-vocabulary foods per meal slot, as token ids.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateIndex {
    slots: [Vec<u32>; MEALS_PER_DAY],
    fallback_slots: Vec<MealSlot>,
    allowed: Vec<u32>,
}

impl CandidateIndex {
    /// `allowed` holds catalog indices. Foods the vocabulary does not know are left out
    /// because the decoder can never emit them.
    pub fn build(catalog: &FoodCatalog, allowed: &[usize], vocab: &Vocabulary) -> Self {
        let foods = allowed
            .iter()
            .filter_map(|idx| catalog.get(*idx))
            .filter_map(|food| vocab.id(&food.name).map(|token| (token, food)))
            .collect::<Vec<_>>();

        let mut all_tokens = foods.iter().map(|(token, _)| *token).collect::<Vec<_>>();
        all_tokens.sort_unstable();
        all_tokens.dedup();

        let mut slots: [Vec<u32>; MEALS_PER_DAY] = Default::default();
        let mut fallback_slots = Vec::new();
        for slot in MealSlot::ALL {
            let mut tokens = foods
                .iter()
                .filter(|(_, food)| food.meal_types.iter().any(|tag| tag_matches(tag, slot)))
                .map(|(token, _)| *token)
                .collect::<Vec<_>>();
            tokens.sort_unstable();
            tokens.dedup();
            if tokens.is_empty() && !all_tokens.is_empty() {
                warn!("no allowed food is tagged for {slot}; using every allowed food");
                tokens = all_tokens.clone();
                fallback_slots.push(slot);
            }
            slots[slot.index()] = tokens;
        }

        Self {
            slots,
            fallback_slots,
            allowed: all_tokens,
        }
    }

    pub fn slot(&self, slot: MealSlot) -> &[u32] {
        &self.slots[slot.index()]
    }

    pub fn allowed(&self) -> &[u32] {
        &self.allowed
    }

    pub fn fallback_slots(&self) -> &[MealSlot] {
        &self.fallback_slots
    }

    pub fn contains(&self, slot: MealSlot, token: u32) -> bool {
        self.slot(slot).binary_search(&token).is_ok()
    }
}

/// A catalog meal tag serves a slot when it contains the slot label. `main course`
/// serves both lunch and dinner.
pub fn tag_matches(tag: &str, slot: MealSlot) -> bool {
    let tag = normalize_label(tag);
    if tag.contains(&normalize_label(slot.label())) {
        return true;
    }
    tag.contains("main course") && matches!(slot, MealSlot::Lunch | MealSlot::Dinner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FoodItem;

    fn food(name: &str, tags: &[&str]) -> FoodItem {
        let mut item = FoodItem::new(name);
        item.meal_types = tags.iter().map(|t| t.to_string()).collect();
        item
    }

    #[test]
    fn tags_match_slots_loosely() {
        assert!(tag_matches("early_morning", MealSlot::EarlyMorning));
        assert!(tag_matches("Mid-Morning  Snack", MealSlot::MidMorningSnack));
        assert!(tag_matches("Main Course", MealSlot::Dinner));
        assert!(!tag_matches("Main Course", MealSlot::Breakfast));
        assert!(!tag_matches("Snack", MealSlot::AfternoonSnack));
    }

    #[test]
    fn builds_slot_lists_with_fallback() {
        let items = vec![
            food("Idli", &["Breakfast"]),
            food("Dal Rice", &["Main Course"]),
            food("Almonds", &["Early-Morning", "Mid-Morning Snack"]),
            food("Not In Vocab", &["Breakfast"]),
            food("Forbidden", &["Breakfast"]),
        ];
        let vocab = Vocabulary::from_food_names(["Idli", "Dal Rice", "Almonds", "Forbidden"]);
        let catalog = FoodCatalog::with_all_columns(items);
        let index = CandidateIndex::build(&catalog, &[0, 1, 2, 3], &vocab);

        let idli = vocab.id("Idli").expect("idli");
        let dal = vocab.id("Dal Rice").expect("dal");
        assert_eq!(index.slot(MealSlot::Breakfast), &[idli]);
        assert!(index.contains(MealSlot::Lunch, dal));
        assert!(index.contains(MealSlot::Dinner, dal));
        assert!(!index.contains(MealSlot::Breakfast, vocab.id("Forbidden").expect("id")));
        assert_eq!(index.allowed().len(), 3);
        assert_eq!(
            index.fallback_slots(),
            &[MealSlot::AfternoonSnack, MealSlot::Bedtime]
        );
        assert_eq!(index.slot(MealSlot::Bedtime).len(), 3);
    }
}
