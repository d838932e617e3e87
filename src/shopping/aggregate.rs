//! Ingredient aggregation across meals.

use std::collections::HashMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::GeneratedMeal;

/// Leading modifiers stripped when building the dedup key, so
/// "fresh basil" and "basil" combine into one line item.
const LEADING_MODIFIERS: [&str; 6] = ["fresh", "dried", "chopped", "minced", "sliced", "diced"];

/// One deduplicated shopping list line.
///
/// `item` keeps the spelling of the first occurrence; `amount` is the
/// combined display text; `original_amounts` is append-only and retains
/// every contributing amount string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedIngredient {
    pub item: String,
    pub amount: String,
    pub original_amounts: Vec<String>,
}

/// Combines ingredient lists from many meals into deduplicated totals.
///
/// Quantities with an identical unit token are summed; anything else
/// falls back to a lossless " + " join. No unit conversion is ever
/// attempted.
pub struct Aggregator {
    number: Regex,
    unit: Regex,
}

impl Aggregator {
    pub fn new() -> Self {
        Self {
            number: Regex::new(r"^(\d+\.?\d*)").expect("static pattern"),
            unit: Regex::new(r"\d+\.?\d*\s+(.+)").expect("static pattern"),
        }
    }

    /// Aggregate every ingredient across every meal, in meal order.
    pub fn aggregate(&self, meals: &[GeneratedMeal]) -> Vec<AggregatedIngredient> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut aggregated: Vec<AggregatedIngredient> = Vec::new();

        for meal in meals {
            for ingredient in &meal.ingredients {
                let key = normalize_item_name(&ingredient.item);
                match index.get(&key) {
                    Some(&position) => {
                        let entry = &mut aggregated[position];
                        entry.original_amounts.push(ingredient.amount.clone());
                        entry.amount = self.combine_amounts(&entry.original_amounts);
                    }
                    None => {
                        index.insert(key, aggregated.len());
                        aggregated.push(AggregatedIngredient {
                            item: ingredient.item.clone(),
                            amount: ingredient.amount.clone(),
                            original_amounts: vec![ingredient.amount.clone()],
                        });
                    }
                }
            }
        }

        aggregated
    }

    fn combine_amounts(&self, amounts: &[String]) -> String {
        if amounts.len() == 1 {
            return amounts[0].clone();
        }

        let numbers: Vec<Option<f64>> = amounts.iter().map(|a| self.extract_number(a)).collect();
        let units: Vec<String> = amounts.iter().map(|a| self.extract_unit(a)).collect();

        let all_same_unit = units.iter().all(|u| u == &units[0]);
        if all_same_unit && numbers.iter().all(|n| n.is_some()) {
            let sum: f64 = numbers.iter().map(|n| n.unwrap_or(0.0)).sum();
            return format!("{} {}", format_quantity(sum), units[0])
                .trim_end()
                .to_string();
        }

        amounts.join(" + ")
    }

    fn extract_number(&self, amount: &str) -> Option<f64> {
        self.number
            .captures(amount)
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse::<f64>().ok())
    }

    fn extract_unit(&self, amount: &str) -> String {
        self.unit
            .captures(amount)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default()
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Dedup key: lowercase, with one leading descriptive modifier stripped.
fn normalize_item_name(item: &str) -> String {
    let lowered = item.to_lowercase();
    let trimmed = lowered.trim();
    for modifier in LEADING_MODIFIERS {
        if let Some(rest) = trimmed.strip_prefix(modifier) {
            if let Some(stripped) = rest.strip_prefix(char::is_whitespace) {
                return stripped.trim_start().to_string();
            }
        }
    }
    trimmed.to_string()
}

/// Render a summed quantity the way people write it: "3", not "3.0".
fn format_quantity(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}
