//! Prompt construction for the generation call.

use crate::preferences::EffectivePreferences;
use crate::types::PlanRequest;

fn plural(count: u32, singular: &str, plural: &str) -> String {
    if count == 1 {
        singular.to_string()
    } else {
        plural.to_string()
    }
}

/// System prompt: role, hard requirements, output contract.
pub fn build_system_prompt(request: &PlanRequest, merged: &EffectivePreferences) -> String {
    let servings = request.servings_per_meal;
    let restrictions = if merged.dietary_restrictions.is_empty() {
        "none".to_string()
    } else {
        merged.dietary_restrictions.join(", ")
    };

    format!(
        "You are a meal planning expert. Generate a weekly dinner meal plan based on user preferences.\n\
         \n\
         Requirements:\n\
         - Create {meals} unique dinner recipes\n\
         - Each meal serves {servings} {people}\n\
         - Meet nutritional targets: minimum {protein}g protein, maximum {calories} calories per serving\n\
         - Respect dietary restrictions: {restrictions}\n\
         - Ensure variety (avoid recent meals if provided)\n\
         \n\
         For each meal, provide:\n\
         - Name (clear, appetizing)\n\
         - Description (2-3 sentences about flavor and appeal)\n\
         - Ingredients with specific quantities (for {servings} {servings_word})\n\
         - Step-by-step cooking instructions\n\
         - Prep time and cook time estimates\n\
         - Nutritional information per serving (calories, protein, carbs, fat, fiber)\n\
         \n\
         Output Format: Return a single JSON object with a \"meals\" array. Each meal must have: \
         day, name, description, ingredients (array of {{\"item\", \"amount\"}} objects), \
         instructions (array of strings), prepTime, cookTime, and nutrition \
         ({{\"calories\", \"protein\", \"carbs\", \"fat\", \"fiber\"}} as numbers). \
         Return only valid JSON, no surrounding prose.",
        meals = request.number_of_meals,
        servings = servings,
        people = plural(servings, "person", "people"),
        protein = merged.min_protein_per_meal,
        calories = merged.max_calories_per_meal,
        restrictions = restrictions,
        servings_word = plural(servings, "serving", "servings"),
    )
}

/// User prompt: the concrete ask for this week, plus the variety hint
/// built from recent meal names.
pub fn build_user_prompt(
    request: &PlanRequest,
    merged: &EffectivePreferences,
    recent_meals: &[String],
    week_label: &str,
) -> String {
    let servings = request.servings_per_meal;
    let mut prompt = format!(
        "Create a dinner meal plan for {week}.\n\
         \n\
         Requirements:\n\
         - High protein (minimum {protein}g per serving)\n\
         - Low calorie (maximum {calories} calories per serving)\n\
         - {meals} different dinners\n\
         - Each meal serves {servings} {people}\n\
         - Include complete nutritional information per serving\n\
         - Include ingredient lists with quantities for {servings} {servings_word}\n\
         - Include step-by-step cooking instructions",
        week = week_label,
        protein = merged.min_protein_per_meal,
        calories = merged.max_calories_per_meal,
        meals = request.number_of_meals,
        servings = servings,
        people = plural(servings, "person", "people"),
        servings_word = plural(servings, "serving", "servings"),
    );

    if !merged.dietary_restrictions.is_empty() {
        prompt.push_str(&format!(
            "\n- Dietary restrictions: {}",
            merged.dietary_restrictions.join(", ")
        ));
    }

    if !recent_meals.is_empty() {
        prompt.push_str(
            "\n\n**IMPORTANT - Meal Variety:**\n\
             The following meals were recommended in recent weeks. \
             Please ensure variety by creating DIFFERENT meals:\n",
        );
        for (index, name) in recent_meals.iter().enumerate() {
            prompt.push_str(&format!("{}. {}\n", index + 1, name));
        }
        prompt.push_str(
            "\nAvoid repeating these exact meals or very similar variations. \
             Aim for diverse proteins, cooking methods, and flavor profiles.",
        );
    }

    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> PlanRequest {
        PlanRequest {
            user_id: "u1".to_string(),
            plan_id: "mp-1".to_string(),
            number_of_meals: 5,
            servings_per_meal: 2,
            min_protein_per_meal: 40,
            max_calories_per_meal: 600,
            dietary_restrictions: vec!["nut-free".to_string()],
            household_members: vec![],
            price_lookup_enabled: false,
            model_id: "model-a".to_string(),
            recipients: vec![],
            test_mode: false,
        }
    }

    fn merged() -> EffectivePreferences {
        EffectivePreferences {
            dietary_restrictions: vec!["nut-free".to_string(), "vegan".to_string()],
            min_protein_per_meal: 50,
            max_calories_per_meal: 550,
        }
    }

    #[test]
    fn system_prompt_uses_merged_targets() {
        let prompt = build_system_prompt(&request(), &merged());
        assert!(prompt.contains("minimum 50g protein"));
        assert!(prompt.contains("maximum 550 calories"));
        assert!(prompt.contains("nut-free, vegan"));
        assert!(prompt.contains("5 unique dinner recipes"));
        assert!(prompt.contains("serves 2 people"));
    }

    #[test]
    fn user_prompt_includes_variety_hint_when_history_exists() {
        let recent = vec!["Chicken curry".to_string(), "Beef tacos".to_string()];
        let prompt = build_user_prompt(&request(), &merged(), &recent, "Week of August 9, 2026");
        assert!(prompt.contains("Week of August 9, 2026"));
        assert!(prompt.contains("1. Chicken curry"));
        assert!(prompt.contains("2. Beef tacos"));
        assert!(prompt.contains("DIFFERENT meals"));
    }

    #[test]
    fn user_prompt_omits_variety_block_without_history() {
        let prompt = build_user_prompt(&request(), &merged(), &[], "Week of August 9, 2026");
        assert!(!prompt.contains("Meal Variety"));
    }

    #[test]
    fn singular_servings_read_naturally() {
        let mut single = request();
        single.servings_per_meal = 1;
        let prompt = build_system_prompt(&single, &merged());
        assert!(prompt.contains("serves 1 person"));
    }
}
