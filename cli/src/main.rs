mod commands;
mod config;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

use crate::commands::{
    cmd_list_add, cmd_list_breakdown, cmd_list_check, cmd_list_clear, cmd_list_clear_completed,
    cmd_list_delete, cmd_list_export, cmd_list_generate, cmd_list_reset_state, cmd_list_show,
    cmd_list_summary, cmd_list_toggle, cmd_recipe_add_ingredient, cmd_recipe_create,
    cmd_recipe_delete, cmd_recipe_list, cmd_recipe_show,
};
use crate::config::Config;
use larder_core::db::Database;
use larder_core::service::ShoppingListService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "A shopping list that merges the ingredients of your recipes"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage recipes and their ingredients
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Build and work through the shopping list
    List {
        #[command(subcommand)]
        command: ListCommands,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Create {
        /// Recipe name
        name: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an ingredient to a recipe
    AddIngredient {
        /// Recipe name or ID
        recipe: String,
        /// Ingredient name (created if it does not exist yet)
        ingredient: String,
        /// Quantity (e.g. "2", "8tbsp", "1.5 cup")
        quantity: String,
        /// Unit, when the quantity does not include one
        #[arg(short, long)]
        unit: Option<String>,
        /// Category used to group the ingredient on the list
        #[arg(short, long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a recipe's ingredients
    Show {
        /// Recipe name or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List all recipes
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe name or ID
        recipe: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum ListCommands {
    /// Generate the list from recipes (repeat a recipe to double it)
    Generate {
        /// Recipe names or IDs
        #[arg(required = true)]
        recipes: Vec<String>,
        /// Keep existing recipe items instead of replacing them
        #[arg(long)]
        keep_existing: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the shopping list
    Show {
        /// Only items whose name contains this text
        #[arg(short, long)]
        search: Option<String>,
        /// Only items from this source: recipe, manual
        #[arg(long)]
        source: Option<String>,
        /// Only items in this category
        #[arg(short, long)]
        category: Option<String>,
        /// Only checked items
        #[arg(long, conflicts_with = "unchecked")]
        checked: bool,
        /// Only unchecked items
        #[arg(long)]
        unchecked: bool,
        /// Maximum number of items to show
        #[arg(long)]
        limit: Option<i64>,
        /// Number of items to skip
        #[arg(long)]
        offset: Option<i64>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Flip the check mark on an item
    Toggle {
        /// Item ID
        item_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check (or uncheck) several items at once
    Check {
        /// Item IDs
        #[arg(required = true)]
        item_ids: Vec<i64>,
        /// Uncheck instead of check
        #[arg(long)]
        uncheck: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add an item by hand
    Add {
        /// Item name
        name: String,
        /// Quantity (e.g. "1", "2 rolls", "500g")
        quantity: String,
        /// Unit, when the quantity does not include one
        #[arg(short, long)]
        unit: Option<String>,
        /// Category
        #[arg(short, long)]
        category: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an item
    Delete {
        /// Item ID
        item_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove items, optionally only those from one source
    Clear {
        /// Source to clear: recipe, manual (default: everything)
        #[arg(long)]
        source: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove every checked item
    ClearCompleted {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show progress through the list
    Summary {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show which recipes contribute to each item
    Breakdown {
        /// Recipe names or IDs
        #[arg(required = true)]
        recipes: Vec<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export the list as CSV
    Export {
        /// Output file (default: stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Forget remembered check marks for future generations
    ResetState {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(log_filter())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn log_filter() -> EnvFilter {
    log_filter_from(&std::env::var("RUST_LOG").unwrap_or_default())
}

/// `RUST_LOG` directives when given, otherwise warnings and errors only.
fn log_filter_from(directives: &str) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .parse_lossy(directives)
}

#[allow(clippy::too_many_lines)]
fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::open(&config.db_path)?;
    let svc = ShoppingListService::from_database(db).with_unit_table(config.load_unit_table()?);
    tracing::debug!(db = %config.db_path.display(), "opened shopping list");

    match cli.command {
        Commands::Recipe { command } => {
            let db = svc.database();
            match command {
                RecipeCommands::Create { name, json } => cmd_recipe_create(db, &name, json),
                RecipeCommands::AddIngredient {
                    recipe,
                    ingredient,
                    quantity,
                    unit,
                    category,
                    json,
                } => cmd_recipe_add_ingredient(
                    db,
                    &recipe,
                    &ingredient,
                    &quantity,
                    unit.as_deref(),
                    category.as_deref(),
                    json,
                ),
                RecipeCommands::Show { recipe, json } => cmd_recipe_show(db, &recipe, json),
                RecipeCommands::List { json } => cmd_recipe_list(db, json),
                RecipeCommands::Delete { recipe, json } => cmd_recipe_delete(db, &recipe, json),
            }
        }
        Commands::List { command } => match command {
            ListCommands::Generate {
                recipes,
                keep_existing,
                json,
            } => cmd_list_generate(&svc, &recipes, keep_existing, json),
            ListCommands::Show {
                search,
                source,
                category,
                checked,
                unchecked,
                limit,
                offset,
                json,
            } => {
                let have = match (checked, unchecked) {
                    (true, _) => Some(true),
                    (_, true) => Some(false),
                    _ => None,
                };
                cmd_list_show(
                    &svc,
                    search,
                    source.as_deref(),
                    category,
                    have,
                    limit,
                    offset,
                    json,
                )
            }
            ListCommands::Toggle { item_id, json } => cmd_list_toggle(&svc, item_id, json),
            ListCommands::Check {
                item_ids,
                uncheck,
                json,
            } => cmd_list_check(&svc, &item_ids, uncheck, json),
            ListCommands::Add {
                name,
                quantity,
                unit,
                category,
                json,
            } => cmd_list_add(
                &svc,
                &name,
                &quantity,
                unit.as_deref(),
                category.as_deref(),
                json,
            ),
            ListCommands::Delete { item_id, json } => cmd_list_delete(&svc, item_id, json),
            ListCommands::Clear { source, json } => cmd_list_clear(&svc, source.as_deref(), json),
            ListCommands::ClearCompleted { json } => cmd_list_clear_completed(&svc, json),
            ListCommands::Summary { json } => cmd_list_summary(&svc, json),
            ListCommands::Breakdown { recipes, json } => cmd_list_breakdown(&svc, &recipes, json),
            ListCommands::Export { output, json } => {
                cmd_list_export(&svc, output.as_deref(), json)
            }
            ListCommands::ResetState { json } => cmd_list_reset_state(&svc, json),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_generate_with_repeats() {
        let cli = Cli::try_parse_from(["larder", "list", "generate", "1", "1", "Soup"]).unwrap();
        match cli.command {
            Commands::List {
                command:
                    ListCommands::Generate {
                        recipes,
                        keep_existing,
                        ..
                    },
            } => {
                assert_eq!(recipes, vec!["1", "1", "Soup"]);
                assert!(!keep_existing);
            }
            _ => panic!("expected list generate"),
        }
    }

    #[test]
    fn test_checked_and_unchecked_conflict() {
        assert!(Cli::try_parse_from(["larder", "list", "show", "--checked", "--unchecked"]).is_err());
    }

    #[test]
    fn test_log_filter_defaults_to_warn() {
        assert_eq!(log_filter_from("").to_string(), "warn");
    }

    #[test]
    fn test_log_filter_env_level_wins() {
        assert_eq!(log_filter_from("debug").to_string(), "debug");
        assert_eq!(
            log_filter_from("larder_core=trace").to_string(),
            "larder_core=trace"
        );
    }

    #[test]
    fn test_generate_requires_recipes() {
        assert!(Cli::try_parse_from(["larder", "list", "generate"]).is_err());
    }
}
