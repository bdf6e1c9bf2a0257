use anyhow::{Context, Result, bail};
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::db::Database;
use larder_core::export::format_quantity;
use larder_core::models::{Recipe, ShoppingItem, validate_quantity};

/// Parse an amount with an optional unit: "2", "2tbsp", "1.5 cup", "3 cloves".
/// `unit_flag` supplies the unit when the amount has none.
pub(crate) fn parse_amount(s: &str, unit_flag: Option<&str>) -> Result<(f64, String)> {
    let s = s.trim();

    let (quantity, unit) = if let Ok(q) = s.parse::<f64>() {
        (q, String::new())
    } else if let Some((q, unit)) = split_number_unit(s) {
        (q, unit.trim().to_string())
    } else {
        bail!("Invalid quantity '{s}'. Use a number like '2', '2tbsp' or '1.5 cup'")
    };
    validate_quantity(quantity).with_context(|| format!("Invalid quantity '{s}'"))?;

    match unit_flag.map(str::trim).filter(|u| !u.is_empty()) {
        Some(flag) if !unit.is_empty() && !flag.eq_ignore_ascii_case(&unit) => {
            bail!("Quantity '{s}' already has unit '{unit}', which conflicts with --unit {flag}")
        }
        Some(flag) if unit.is_empty() => Ok((quantity, flag.to_string())),
        _ => Ok((quantity, unit)),
    }
}

/// Split "500ml", "2.5tbsp" or "2 cups" into (500.0, "ml") etc.
fn split_number_unit(s: &str) -> Option<(f64, &str)> {
    let idx = s.find(|c: char| c.is_alphabetic())?;
    if idx == 0 {
        return None;
    }
    let (num_part, unit_part) = s.split_at(idx);
    let qty: f64 = num_part.trim().parse().ok()?;
    if unit_part.is_empty() {
        return None;
    }
    Some((qty, unit_part))
}

/// Look a recipe up by numeric id first, then by name.
pub(crate) fn resolve_recipe(db: &Database, reference: &str) -> Result<Recipe> {
    let reference = reference.trim();
    if let Ok(id) = reference.parse::<i64>() {
        if let Some(recipe) = db.get_recipe_by_id(id)? {
            return Ok(recipe);
        }
    }
    db.get_recipe_by_name(reference)?
        .with_context(|| format!("Recipe '{reference}' not found"))
}

/// Resolve every reference, keeping repeats so a recipe can be selected twice.
pub(crate) fn resolve_recipe_ids(db: &Database, references: &[String]) -> Result<Vec<i64>> {
    references
        .iter()
        .map(|r| resolve_recipe(db, r).map(|recipe| recipe.id))
        .collect()
}

pub(crate) fn format_amount(quantity: f64, unit: &str) -> String {
    let quantity = format_quantity(quantity);
    if unit.is_empty() {
        quantity
    } else {
        format!("{quantity} {unit}")
    }
}

pub(crate) fn print_items_table(items: &[ShoppingItem]) {
    #[derive(Tabled)]
    struct ItemRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "")]
        have: &'static str,
        #[tabled(rename = "Item")]
        name: String,
        #[tabled(rename = "Amount")]
        amount: String,
        #[tabled(rename = "Category")]
        category: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let rows: Vec<ItemRow> = items
        .iter()
        .map(|i| ItemRow {
            id: i.id,
            have: if i.have { "[x]" } else { "[ ]" },
            name: truncate(&i.ingredient_name, 35),
            amount: format_amount(i.quantity, &i.unit),
            category: i.category.as_deref().map(|c| truncate(c, 20)).unwrap_or_default(),
            source: i.source.to_string(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(3)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
