use std::collections::{BTreeMap, HashMap};

use anyhow::Result;

use crate::models::{
    AggregatedIngredient, BreakdownResult, ItemSource, RecipeContribution, RecipeIngredientRow,
};
use crate::state_key::{create_key, normalize_unit};
use crate::units::UnitTable;

/// Source of raw per-recipe ingredient requirements.
///
/// The database implements this over its recipe tables; anything else that
/// stores recipes can be plugged into the shopping list service instead.
pub trait RecipeLookup {
    /// Ingredient rows for every listed recipe. Ids are distinct; unknown
    /// ids simply produce no rows.
    fn ingredient_rows(&self, recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientRow>>;
}

/// A lookup row after scaling by how many times its recipe was selected.
#[derive(Debug, Clone)]
struct ScaledRow {
    recipe_name: String,
    ingredient_id: i64,
    name: String,
    category: Option<String>,
    quantity: f64,
    unit: String,
}

/// Grouping key for one shopping list line.
///
/// Rows whose unit is in the ingredient's conversion family share one bucket
/// (`raw_unit: None`) and are summed in base units. Any other unit gets a
/// bucket of its own, so unrelated units are never added together.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct BucketKey {
    ingredient_id: i64,
    raw_unit: Option<String>,
}

impl BucketKey {
    fn for_row(table: &UnitTable, row: &ScaledRow) -> Self {
        let raw_unit = if table.is_convertible(&row.name, &row.unit) {
            None
        } else {
            Some(normalize_unit(&row.unit))
        };
        Self {
            ingredient_id: row.ingredient_id,
            raw_unit,
        }
    }
}

#[derive(Debug, Clone)]
struct IngredientAccumulator {
    name: String,
    category: Option<String>,
    convertible: bool,
    // base units when convertible, otherwise the raw unit's quantity
    quantity: f64,
    last_unit: String,
}

impl IngredientAccumulator {
    fn new(table: &UnitTable, row: &ScaledRow) -> Self {
        let base = table.to_base(&row.name, row.quantity, &row.unit);
        Self {
            name: row.name.clone(),
            category: row.category.clone(),
            convertible: base.is_some(),
            quantity: base.unwrap_or(row.quantity),
            last_unit: row.unit.clone(),
        }
    }

    fn add(&mut self, table: &UnitTable, row: &ScaledRow) {
        self.quantity += if self.convertible {
            table
                .to_base(&self.name, row.quantity, &row.unit)
                .unwrap_or(row.quantity)
        } else {
            row.quantity
        };
        self.last_unit.clone_from(&row.unit);
    }

    /// Total expressed in the last-seen unit, then normalized.
    fn normalized(&self, table: &UnitTable) -> (f64, String) {
        let total = if self.convertible {
            table
                .factor(&self.name, &self.last_unit)
                .map_or(self.quantity, |f| self.quantity / f)
        } else {
            self.quantity
        };
        table.convert(&self.name, total, &self.last_unit)
    }

    fn finish(&self, table: &UnitTable) -> AggregatedIngredient {
        let (quantity, unit) = self.normalized(table);
        let state_key = create_key(&self.name, &unit);
        AggregatedIngredient {
            name: self.name.clone(),
            category: self.category.clone(),
            quantity,
            unit,
            state_key,
            have: false,
            source: ItemSource::Recipe,
        }
    }
}

/// Fetch rows for the distinct ids and scale each by its occurrence count.
#[allow(clippy::cast_precision_loss)]
fn scaled_rows(lookup: &dyn RecipeLookup, recipe_ids: &[i64]) -> Result<Vec<ScaledRow>> {
    let mut counts: HashMap<i64, usize> = HashMap::new();
    let mut distinct: Vec<i64> = Vec::new();
    for &id in recipe_ids {
        let count = counts.entry(id).or_insert(0);
        if *count == 0 {
            distinct.push(id);
        }
        *count += 1;
    }

    let rows = lookup.ingredient_rows(&distinct)?;
    tracing::debug!(
        recipes = distinct.len(),
        rows = rows.len(),
        "fetched ingredient rows"
    );

    let mut scaled = Vec::with_capacity(rows.len());
    for row in rows {
        let Some(&count) = counts.get(&row.recipe_id) else {
            tracing::debug!(recipe_id = row.recipe_id, "skipping row for unrequested recipe");
            continue;
        };
        let Some(name) = row
            .ingredient_name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
        else {
            tracing::debug!(
                recipe_id = row.recipe_id,
                ingredient_id = row.ingredient_id,
                "skipping dangling ingredient reference"
            );
            continue;
        };
        scaled.push(ScaledRow {
            recipe_name: row.recipe_name,
            ingredient_id: row.ingredient_id,
            name,
            category: row.ingredient_category,
            quantity: row.quantity * count as f64,
            unit: row.unit,
        });
    }
    Ok(scaled)
}

fn accumulate<'a>(
    table: &UnitTable,
    rows: impl IntoIterator<Item = &'a ScaledRow>,
) -> BTreeMap<BucketKey, IngredientAccumulator> {
    let mut buckets: BTreeMap<BucketKey, IngredientAccumulator> = BTreeMap::new();
    for row in rows {
        buckets
            .entry(BucketKey::for_row(table, row))
            .and_modify(|acc| acc.add(table, row))
            .or_insert_with(|| IngredientAccumulator::new(table, row));
    }
    buckets
}

/// Merge the ingredients of the selected recipes into consolidated lines.
///
/// A recipe listed twice contributes twice. Output order is stable but not
/// meaningful.
pub fn aggregate(
    lookup: &dyn RecipeLookup,
    table: &UnitTable,
    recipe_ids: &[i64],
) -> Result<Vec<AggregatedIngredient>> {
    if recipe_ids.is_empty() {
        return Ok(Vec::new());
    }
    let rows = scaled_rows(lookup, recipe_ids)?;
    let aggregated: Vec<AggregatedIngredient> = accumulate(table, &rows)
        .values()
        .map(|acc| acc.finish(table))
        .collect();
    tracing::debug!(lines = aggregated.len(), "aggregated ingredients");
    Ok(aggregated)
}

/// Per-recipe contributions behind each line `aggregate` would produce,
/// keyed by the line's state key.
pub fn breakdown(
    lookup: &dyn RecipeLookup,
    table: &UnitTable,
    recipe_ids: &[i64],
) -> Result<BreakdownResult> {
    if recipe_ids.is_empty() {
        return Ok(BreakdownResult::default());
    }
    let rows = scaled_rows(lookup, recipe_ids)?;
    let totals = accumulate(table, &rows);

    let mut per_recipe: BTreeMap<BucketKey, Vec<(String, IngredientAccumulator)>> =
        BTreeMap::new();
    for row in &rows {
        let contributions = per_recipe.entry(BucketKey::for_row(table, row)).or_default();
        match contributions
            .iter_mut()
            .find(|(recipe, _)| *recipe == row.recipe_name)
        {
            Some((_, acc)) => acc.add(table, row),
            None => contributions.push((
                row.recipe_name.clone(),
                IngredientAccumulator::new(table, row),
            )),
        }
    }

    let mut result = BreakdownResult::default();
    for (bucket, contributions) in per_recipe {
        let Some(total) = totals.get(&bucket) else {
            continue;
        };
        let state_key = total.finish(table).state_key;
        let entry = result.entries.entry(state_key).or_default();
        for (recipe_name, acc) in contributions {
            let (quantity, unit) = acc.normalized(table);
            entry.push(RecipeContribution {
                recipe_name,
                quantity,
                unit,
            });
        }
    }
    Ok(result)
}
