use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::Path;
use std::process;

use larder_core::models::{ItemFilter, ItemSource, validate_manual_item};
use larder_core::service::ShoppingListService;

use super::helpers::{
    format_amount, json_error, parse_amount, print_items_table, resolve_recipe_ids,
};

pub(crate) fn cmd_list_generate(
    svc: &ShoppingListService,
    recipes: &[String],
    keep_existing: bool,
    json: bool,
) -> Result<()> {
    let ids = resolve_recipe_ids(svc.database(), recipes)?;
    let result = svc.generate(&ids, !keep_existing);

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if result.success {
        println!("{}", result.message);
        if !result.items.is_empty() {
            print_items_table(&result.items);
        }
        let total = result.total_items;
        println!("{total} items on the list");
    } else {
        eprintln!("{}", result.message);
    }

    if !result.success {
        process::exit(1);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_list_show(
    svc: &ShoppingListService,
    search: Option<String>,
    source: Option<&str>,
    category: Option<String>,
    have: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
    json: bool,
) -> Result<()> {
    let filter = ItemFilter {
        search_term: search,
        source: source.map(str::parse::<ItemSource>).transpose()?,
        category,
        have,
        limit,
        offset,
    };
    let items = svc.list(&filter)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        eprintln!("No items on the shopping list");
        process::exit(2);
    }
    print_items_table(&items);
    Ok(())
}

pub(crate) fn cmd_list_toggle(svc: &ShoppingListService, item_id: i64, json: bool) -> Result<()> {
    let Some(result) = svc.toggle(item_id)? else {
        if json {
            println!("{}", json_error(&format!("Item {item_id} not found")));
        } else {
            eprintln!("Item {item_id} not found");
        }
        process::exit(2);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        let mark = if result.have { "checked" } else { "unchecked" };
        println!("Item {item_id} {mark}");
    }
    Ok(())
}

pub(crate) fn cmd_list_check(
    svc: &ShoppingListService,
    item_ids: &[i64],
    uncheck: bool,
    json: bool,
) -> Result<()> {
    let updates: HashMap<i64, bool> = item_ids.iter().map(|id| (*id, !uncheck)).collect();
    let updated = svc.bulk_toggle(&updates)?;
    let skipped = updates.len() - updated;

    if json {
        println!(
            "{}",
            serde_json::json!({ "updated": updated, "skipped": skipped })
        );
    } else {
        let mark = if uncheck { "Unchecked" } else { "Checked" };
        println!("{mark} {updated} items");
        if skipped > 0 {
            eprintln!("Skipped {skipped} unknown item ids");
        }
    }
    Ok(())
}

pub(crate) fn cmd_list_add(
    svc: &ShoppingListService,
    name: &str,
    quantity_str: &str,
    unit: Option<&str>,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    let (quantity, unit) = parse_amount(quantity_str, unit)?;
    validate_manual_item(name, quantity, &unit)?;
    let item = svc.add_manual(name, quantity, &unit, category)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&item)?);
    } else {
        let amount = format_amount(item.quantity, &item.unit);
        let name = &item.ingredient_name;
        let id = item.id;
        println!("Added {amount} {name} (id: {id})");
    }
    Ok(())
}

pub(crate) fn cmd_list_delete(svc: &ShoppingListService, item_id: i64, json: bool) -> Result<()> {
    if svc.delete_item(item_id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": item_id }));
        } else {
            println!("Deleted item {item_id}");
        }
    } else {
        if json {
            println!("{}", json_error(&format!("Item {item_id} not found")));
        } else {
            eprintln!("Item {item_id} not found");
        }
        process::exit(2);
    }
    Ok(())
}

pub(crate) fn cmd_list_clear(
    svc: &ShoppingListService,
    source: Option<&str>,
    json: bool,
) -> Result<()> {
    let source = source.map(str::parse::<ItemSource>).transpose()?;
    let removed = svc.clear_items(source)?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        match source {
            Some(s) => println!("Removed {removed} {s} items"),
            None => println!("Removed {removed} items"),
        }
    }
    Ok(())
}

pub(crate) fn cmd_list_clear_completed(svc: &ShoppingListService, json: bool) -> Result<()> {
    let removed = svc.clear_completed()?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Removed {removed} completed items");
    }
    Ok(())
}

pub(crate) fn cmd_list_reset_state(svc: &ShoppingListService, json: bool) -> Result<()> {
    let removed = svc.clear_states()?;
    if json {
        println!("{}", serde_json::json!({ "removed": removed }));
    } else {
        println!("Forgot {removed} remembered check marks");
    }
    Ok(())
}

pub(crate) fn cmd_list_export(
    svc: &ShoppingListService,
    output: Option<&Path>,
    json: bool,
) -> Result<()> {
    let Some(path) = output else {
        svc.export_csv(std::io::stdout().lock())?;
        return Ok(());
    };

    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    let rows = svc.export_csv(file)?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "exported": rows, "path": path.display().to_string() })
        );
    } else {
        println!("Exported {rows} items to {}", path.display());
    }
    Ok(())
}
