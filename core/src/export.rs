use std::io::Write;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::models::{ItemSource, ShoppingItem};

/// One CSV row of an exported shopping list.
#[derive(Debug, Serialize)]
struct ExportRow<'a> {
    ingredient: &'a str,
    quantity: String,
    unit: &'a str,
    category: &'a str,
    source: ItemSource,
    have: bool,
}

/// Render a quantity without float noise: `1` rather than `1.0`, at most
/// three decimals otherwise.
#[must_use]
pub fn format_quantity(quantity: f64) -> String {
    let rounded = format!("{quantity:.3}");
    let trimmed = rounded.trim_end_matches('0').trim_end_matches('.');
    if trimmed == "-0" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Write items as CSV with the header
/// `ingredient,quantity,unit,category,source,have`.
pub fn write_items_csv<W: Write>(writer: W, items: &[ShoppingItem]) -> Result<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    for item in items {
        wtr.serialize(ExportRow {
            ingredient: &item.ingredient_name,
            quantity: format_quantity(item.quantity),
            unit: &item.unit,
            category: item.category.as_deref().unwrap_or(""),
            source: item.source,
            have: item.have,
        })
        .with_context(|| format!("Failed to write CSV row for '{}'", item.ingredient_name))?;
    }
    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}
