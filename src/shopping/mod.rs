//! Shopping list construction.
//!
//! Rolls every generated meal's ingredient list into one deduplicated,
//! categorized shopping list. Aggregation is deterministic and
//! independent of meal order except for which original spelling is
//! displayed (first occurrence wins).

pub mod aggregate;
pub mod categorize;

pub use aggregate::{AggregatedIngredient, Aggregator};
pub use categorize::{
    categorize_ingredients, Category, CategorizedShoppingList, ShoppingSection,
};

use crate::types::GeneratedMeal;

/// Aggregate and categorize in one step.
pub fn build_shopping_list(meals: &[GeneratedMeal]) -> CategorizedShoppingList {
    let aggregator = Aggregator::new();
    let aggregated = aggregator.aggregate(meals);
    categorize_ingredients(aggregated)
}
