use anyhow::Result;
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use larder_core::service::ShoppingListService;

use super::helpers::{format_amount, resolve_recipe_ids, truncate};

pub(crate) fn cmd_list_summary(svc: &ShoppingListService, json: bool) -> Result<()> {
    let summary = svc.summary()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    if summary.total == 0 {
        eprintln!("The shopping list is empty");
        process::exit(2);
    }

    let total = summary.total;
    let checked = summary.checked;
    let pct = summary.completion_percentage;
    println!("=== Shopping list ===\n");
    println!("  {checked}/{total} items checked ({pct:.0}%)");
    let recipe = summary.recipe_count;
    let manual = summary.manual_count;
    println!("  From recipes: {recipe}  |  Added by hand: {manual}");
    if !summary.categories.is_empty() {
        println!("  Categories: {}", summary.categories.join(", "));
    }
    Ok(())
}

pub(crate) fn cmd_list_breakdown(
    svc: &ShoppingListService,
    recipes: &[String],
    json: bool,
) -> Result<()> {
    #[derive(Tabled)]
    struct ContributionRow {
        #[tabled(rename = "Item")]
        key: String,
        #[tabled(rename = "Recipe")]
        recipe: String,
        #[tabled(rename = "Amount")]
        amount: String,
    }

    let ids = resolve_recipe_ids(svc.database(), recipes)?;
    let report = svc.breakdown(&ids)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    if report.is_empty() {
        eprintln!("Selected recipes have no ingredients");
        process::exit(2);
    }

    let rows: Vec<ContributionRow> = report
        .entries
        .iter()
        .flat_map(|(key, contributions)| {
            contributions.iter().map(move |c| ContributionRow {
                key: truncate(key, 35),
                recipe: truncate(&c.recipe_name, 30),
                amount: format_amount(c.quantity, &c.unit),
            })
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
