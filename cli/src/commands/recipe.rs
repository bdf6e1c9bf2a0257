use anyhow::{Result, bail};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::db::Database;

use super::helpers::{format_amount, json_error, parse_amount, resolve_recipe, truncate};

pub(crate) fn cmd_recipe_create(db: &Database, name: &str, json: bool) -> Result<()> {
    if name.trim().is_empty() {
        bail!("Recipe name must not be empty");
    }
    let recipe = db.create_recipe(name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&recipe)?);
    } else {
        let id = recipe.id;
        let name = &recipe.name;
        println!("Created recipe: {name} (id: {id})");
        println!("Add ingredients with: larder recipe add-ingredient \"{name}\" <ingredient> <quantity>");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_add_ingredient(
    db: &Database,
    recipe_ref: &str,
    ingredient_name: &str,
    quantity_str: &str,
    unit: Option<&str>,
    category: Option<&str>,
    json: bool,
) -> Result<()> {
    if ingredient_name.trim().is_empty() {
        bail!("Ingredient name must not be empty");
    }
    let recipe = resolve_recipe(db, recipe_ref)?;
    let (quantity, unit) = parse_amount(quantity_str, unit)?;

    let ingredient = db.upsert_ingredient(ingredient_name, category)?;
    let added = db.add_recipe_ingredient(recipe.id, ingredient.id, quantity, &unit)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&added)?);
    } else {
        let amount = format_amount(quantity, &unit);
        let ingredient = &ingredient.name;
        let recipe = &recipe.name;
        println!("Added {amount} {ingredient} to {recipe}");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_show(db: &Database, recipe_ref: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(db, recipe_ref)?;
    let Some(detail) = db.get_recipe_detail(recipe.id)? else {
        bail!("Recipe '{recipe_ref}' not found");
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&detail)?);
        return Ok(());
    }

    let name = &detail.name;
    let id = detail.id;
    println!("=== {name} (id: {id}) ===\n");

    if detail.ingredients.is_empty() {
        println!("  No ingredients yet");
        return Ok(());
    }

    println!("  INGREDIENTS:");
    for ing in &detail.ingredients {
        let iname = ing.ingredient_name.as_deref().unwrap_or("?");
        let amount = format_amount(ing.quantity, &ing.unit);
        let category = ing
            .category
            .as_ref()
            .map(|c| format!(" ({c})"))
            .unwrap_or_default();
        println!("    {iname}{category}: {amount}");
    }
    Ok(())
}

pub(crate) fn cmd_recipe_list(db: &Database, json: bool) -> Result<()> {
    #[derive(Tabled)]
    struct RecipeRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Ingredients")]
        ingredients: usize,
    }

    let recipes = db.list_recipes()?;
    if recipes.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No recipes found");
        }
        process::exit(2);
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&recipes)?);
        return Ok(());
    }

    let mut rows = Vec::with_capacity(recipes.len());
    for r in &recipes {
        rows.push(RecipeRow {
            id: r.id,
            name: truncate(&r.name, 30),
            ingredients: db.get_recipe_ingredients(r.id)?.len(),
        });
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(2..)).with(Alignment::right()))
        .to_string();
    println!("{table}");

    Ok(())
}

pub(crate) fn cmd_recipe_delete(db: &Database, recipe_ref: &str, json: bool) -> Result<()> {
    let recipe = resolve_recipe(db, recipe_ref)?;
    if db.delete_recipe(recipe.id)? {
        if json {
            println!("{}", serde_json::json!({ "deleted": recipe.id }));
        } else {
            let name = &recipe.name;
            println!("Deleted recipe {name}");
        }
    } else {
        if json {
            println!("{}", json_error(&format!("Recipe '{recipe_ref}' not found")));
        } else {
            eprintln!("Recipe '{recipe_ref}' not found");
        }
        process::exit(2);
    }
    Ok(())
}
