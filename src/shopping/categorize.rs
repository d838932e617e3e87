//! Ingredient categorization.

use serde::{Deserialize, Serialize};

use super::aggregate::AggregatedIngredient;

/// Shopping list sections, in display and match-priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    Produce,
    MeatSeafood,
    DairyEggs,
    SpicesSeasonings,
    PantryStaples,
    Other,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Produce,
        Category::MeatSeafood,
        Category::DairyEggs,
        Category::SpicesSeasonings,
        Category::PantryStaples,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Produce => "Produce",
            Category::MeatSeafood => "Meat & Seafood",
            Category::DairyEggs => "Dairy & Eggs",
            Category::SpicesSeasonings => "Spices & Seasonings",
            Category::PantryStaples => "Pantry Staples",
            Category::Other => "Other",
        }
    }

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Produce => &[
                "lettuce", "tomato", "onion", "garlic", "pepper", "carrot", "celery",
                "spinach", "kale", "broccoli", "cauliflower", "zucchini", "mushroom",
                "avocado", "lemon", "lime", "potato", "sweet potato", "corn", "peas",
                "bean sprouts", "cabbage", "cucumber", "basil", "cilantro", "parsley",
                "ginger", "scallion", "shallot", "bell pepper", "jalapeno", "chili",
            ],
            Category::MeatSeafood => &[
                "chicken", "beef", "pork", "turkey", "lamb", "fish", "salmon", "tuna",
                "shrimp", "scallop", "steak", "ground beef", "ground turkey", "sausage",
                "bacon", "tilapia", "cod", "mahi mahi",
            ],
            Category::DairyEggs => &[
                "milk", "cheese", "yogurt", "butter", "cream", "egg", "parmesan",
                "mozzarella", "cheddar", "feta", "goat cheese", "sour cream",
                "half and half",
            ],
            Category::SpicesSeasonings => &[
                "salt", "pepper", "paprika", "cumin", "oregano", "thyme", "rosemary",
                "cinnamon", "nutmeg", "cayenne", "chili powder", "curry", "turmeric",
                "coriander", "bay leaf", "vanilla", "soy sauce", "sesame oil",
                "olive oil", "vegetable oil", "vinegar", "worcestershire",
            ],
            Category::PantryStaples => &[
                "rice", "pasta", "flour", "sugar", "bread", "tortilla", "quinoa",
                "oats", "beans", "lentils", "chickpeas", "broth", "stock",
                "coconut milk", "tomato sauce", "tomato paste", "canned tomatoes",
                "honey", "maple syrup", "peanut butter", "almond butter", "tahini",
                "noodles",
            ],
            Category::Other => &[],
        }
    }
}

/// Assign an ingredient name to exactly one category.
///
/// Categories are tested in declaration order; the first keyword hit
/// wins and anything unmatched lands in `Other`, so every input has a
/// category.
pub fn determine_category(item: &str) -> Category {
    let lower = item.to_lowercase();
    for category in Category::ALL {
        if category
            .keywords()
            .iter()
            .any(|keyword| lower.contains(keyword))
        {
            return category;
        }
    }
    Category::Other
}

/// One non-empty section of the shopping list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingSection {
    pub category: Category,
    pub items: Vec<AggregatedIngredient>,
}

/// Ordered category → items mapping. Empty categories are omitted;
/// non-empty ones keep declaration order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CategorizedShoppingList {
    pub sections: Vec<ShoppingSection>,
}

impl CategorizedShoppingList {
    pub fn section(&self, category: Category) -> Option<&ShoppingSection> {
        self.sections.iter().find(|s| s.category == category)
    }

    pub fn total_items(&self) -> usize {
        self.sections.iter().map(|s| s.items.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }
}

/// Group aggregated ingredients into their categories.
pub fn categorize_ingredients(ingredients: Vec<AggregatedIngredient>) -> CategorizedShoppingList {
    let mut buckets: Vec<Vec<AggregatedIngredient>> = Category::ALL.iter().map(|_| Vec::new()).collect();

    for ingredient in ingredients {
        let category = determine_category(&ingredient.item);
        let slot = Category::ALL
            .iter()
            .position(|c| *c == category)
            .unwrap_or(Category::ALL.len() - 1);
        buckets[slot].push(ingredient);
    }

    let sections = Category::ALL
        .iter()
        .zip(buckets)
        .filter(|(_, items)| !items.is_empty())
        .map(|(category, items)| ShoppingSection {
            category: *category,
            items,
        })
        .collect();

    CategorizedShoppingList { sections }
}
