//! Household preference merging.
//!
//! Reconciles the plan owner's dietary targets with any household
//! members' constraints into one effective target: the union of
//! restrictions and the most restrictive numeric bounds.

use crate::types::{HouseholdMemberConstraint, MealPreferences};

/// The merged target handed to prompt building.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectivePreferences {
    pub dietary_restrictions: Vec<String>,
    pub min_protein_per_meal: u32,
    pub max_calories_per_meal: u32,
}

/// Merge the primary preferences with household member constraints.
///
/// Restrictions are unioned case-sensitively, with no synonym folding.
/// `min_protein_per_meal` takes the maximum and `max_calories_per_meal`
/// the minimum across all participants; members with a null field sit
/// that reduction out. With no members the primary values pass through
/// unchanged. The result does not depend on member ordering: primary
/// restrictions keep their given order and member contributions are
/// appended deduplicated in sorted order.
pub fn merge_preferences(
    primary: &MealPreferences,
    members: &[HouseholdMemberConstraint],
) -> EffectivePreferences {
    if members.is_empty() {
        return EffectivePreferences {
            dietary_restrictions: primary.dietary_restrictions.clone(),
            min_protein_per_meal: primary.min_protein_per_meal,
            max_calories_per_meal: primary.max_calories_per_meal,
        };
    }

    let mut restrictions = primary.dietary_restrictions.clone();
    let mut additions: Vec<&String> = members
        .iter()
        .flat_map(|member| member.dietary_restrictions.iter())
        .filter(|restriction| !restrictions.contains(restriction))
        .collect();
    additions.sort();
    additions.dedup();
    restrictions.extend(additions.into_iter().cloned());

    let min_protein = members
        .iter()
        .filter_map(|member| member.min_protein_per_meal)
        .fold(primary.min_protein_per_meal, u32::max);

    let max_calories = members
        .iter()
        .filter_map(|member| member.max_calories_per_meal)
        .fold(primary.max_calories_per_meal, u32::min);

    EffectivePreferences {
        dietary_restrictions: restrictions,
        min_protein_per_meal: min_protein,
        max_calories_per_meal: max_calories,
    }
}
