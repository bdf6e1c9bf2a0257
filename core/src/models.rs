use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};

/// Where a shopping list row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemSource {
    Recipe,
    Manual,
}

impl ItemSource {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ItemSource::Recipe => "recipe",
            ItemSource::Manual => "manual",
        }
    }
}

impl fmt::Display for ItemSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ItemSource {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "recipe" => Ok(ItemSource::Recipe),
            "manual" => Ok(ItemSource::Manual),
            _ => bail!("Invalid source '{s}'. Must be one of: recipe, manual"),
        }
    }
}

// --- Recipe library ---

#[derive(Debug, Clone, Serialize)]
pub struct Recipe {
    pub id: i64,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Ingredient {
    pub id: i64,
    pub name: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeIngredient {
    pub id: i64,
    pub recipe_id: i64,
    pub ingredient_id: i64,
    pub quantity: f64,
    pub unit: String,
    // Joined fields for display
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ingredient_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipeDetail {
    pub id: i64,
    pub name: String,
    pub created_at: String,
    pub ingredients: Vec<RecipeIngredient>,
}

/// One raw ingredient requirement as handed over by a recipe lookup.
///
/// `ingredient_name` is `None` when the recipe points at an ingredient that
/// no longer exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RecipeIngredientRow {
    pub recipe_id: i64,
    pub recipe_name: String,
    pub ingredient_id: i64,
    pub ingredient_name: Option<String>,
    pub ingredient_category: Option<String>,
    pub quantity: f64,
    pub unit: String,
}

// --- Shopping list ---

/// A consolidated ingredient line produced by one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatedIngredient {
    pub name: String,
    pub category: Option<String>,
    pub quantity: f64,
    pub unit: String,
    pub state_key: String,
    pub have: bool,
    pub source: ItemSource,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingItem {
    pub id: i64,
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub source: ItemSource,
    pub have: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewShoppingItem {
    pub ingredient_name: String,
    pub quantity: f64,
    pub unit: String,
    pub category: Option<String>,
    pub source: ItemSource,
    pub have: bool,
    pub state_key: Option<String>,
}

impl NewShoppingItem {
    /// Recipe-sourced row for an aggregated ingredient, with `have` carried
    /// forward from the durable state.
    #[must_use]
    pub fn from_aggregated(ingredient: AggregatedIngredient, have: bool) -> Self {
        Self {
            ingredient_name: ingredient.name,
            quantity: ingredient.quantity,
            unit: ingredient.unit,
            category: ingredient.category,
            source: ItemSource::Recipe,
            have,
            state_key: Some(ingredient.state_key),
        }
    }

    #[must_use]
    pub fn manual(name: &str, quantity: f64, unit: &str, category: Option<&str>) -> Self {
        Self {
            ingredient_name: name.trim().to_string(),
            quantity,
            unit: unit.trim().to_string(),
            category: category
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            source: ItemSource::Manual,
            have: false,
            state_key: None,
        }
    }
}

/// Durable completion mark, keyed by normalized state key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingState {
    pub id: i64,
    pub key: String,
    pub quantity: f64,
    pub unit: String,
    pub checked: bool,
    pub updated_at: String,
}

/// Filters for listing shopping items. All set fields must match.
#[derive(Debug, Clone, Default)]
pub struct ItemFilter {
    pub search_term: Option<String>,
    pub source: Option<ItemSource>,
    pub category: Option<String>,
    pub have: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShoppingSummary {
    pub total: i64,
    pub checked: i64,
    pub recipe_count: i64,
    pub manual_count: i64,
    pub categories: Vec<String>,
    pub completion_percentage: f64,
}

// --- Service results ---

#[derive(Debug, Clone, Serialize)]
pub struct GenerationResult {
    pub success: bool,
    pub items_created: usize,
    pub total_items: usize,
    pub message: String,
    pub items: Vec<ShoppingItem>,
}

impl GenerationResult {
    #[must_use]
    pub fn failure(message: String) -> Self {
        Self {
            success: false,
            items_created: 0,
            total_items: 0,
            message,
            items: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToggleResult {
    pub item_id: i64,
    pub have: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_key: Option<String>,
    /// True when the new value was written through to the state store.
    pub state_synced: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeContribution {
    pub recipe_name: String,
    pub quantity: f64,
    pub unit: String,
}

/// Per-recipe contributions for each shopping list line, keyed by state key.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BreakdownResult {
    pub entries: BTreeMap<String, Vec<RecipeContribution>>,
}

impl BreakdownResult {
    #[must_use]
    pub fn get(&self, state_key: &str) -> Option<&[RecipeContribution]> {
        self.entries.get(state_key).map(Vec::as_slice)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A committed change to the shopping list, delivered to service listeners.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ListChange {
    Generated {
        items_created: usize,
        recipe_items_cleared: usize,
    },
    Toggled {
        item_id: i64,
        have: bool,
    },
    BulkToggled {
        updated: usize,
    },
    ManualAdded {
        item_id: i64,
    },
    ItemDeleted {
        item_id: i64,
    },
    ItemsCleared {
        source: Option<ItemSource>,
        removed: usize,
    },
    CompletedCleared {
        removed: usize,
    },
    StatesCleared {
        removed: usize,
    },
}

// --- Validation ---

pub fn validate_quantity(quantity: f64) -> Result<()> {
    if !quantity.is_finite() {
        bail!("Quantity must be a finite number");
    }
    if quantity <= 0.0 {
        bail!("Quantity must be greater than 0");
    }
    Ok(())
}

/// Validate a manually entered shopping item: name must not be empty and the
/// quantity must be positive.
pub fn validate_manual_item(name: &str, quantity: f64, unit: &str) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Item name must not be empty");
    }
    if name.contains("::") {
        bail!("Item name must not contain '::'");
    }
    validate_quantity(quantity)?;
    if unit.chars().any(char::is_control) {
        bail!("Unit must not contain control characters");
    }
    Ok(())
}
