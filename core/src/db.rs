use std::collections::BTreeMap;
use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Value, ValueRef};
use rusqlite::functions::FunctionFlags;
use rusqlite::{Connection, OptionalExtension, ToSql, Transaction, params, params_from_iter};

use crate::aggregate::RecipeLookup;
use crate::models::{
    Ingredient, ItemFilter, ItemSource, NewShoppingItem, Recipe, RecipeDetail, RecipeIngredient,
    RecipeIngredientRow, ShoppingItem, ShoppingState, ShoppingSummary,
};
use crate::state_key::normalize_key;

impl ToSql for ItemSource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ItemSource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "recipe" => Ok(ItemSource::Recipe),
            "manual" => Ok(ItemSource::Manual),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        register_functions(&self.conn)?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS recipes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE COLLATE NOCASE,
                    category TEXT
                );

                CREATE TABLE IF NOT EXISTS recipe_ingredients (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    recipe_id INTEGER NOT NULL REFERENCES recipes(id) ON DELETE CASCADE,
                    ingredient_id INTEGER NOT NULL REFERENCES ingredients(id),
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL DEFAULT ''
                );

                CREATE TABLE IF NOT EXISTS shopping_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    ingredient_name TEXT NOT NULL,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL DEFAULT '',
                    category TEXT,
                    source TEXT NOT NULL CHECK (source IN ('recipe', 'manual')),
                    have INTEGER NOT NULL DEFAULT 0,
                    state_key TEXT,
                    created_at TEXT NOT NULL,
                    CHECK (source = 'recipe' OR state_key IS NULL)
                );

                CREATE TABLE IF NOT EXISTS shopping_states (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    key TEXT NOT NULL UNIQUE,
                    quantity REAL NOT NULL,
                    unit TEXT NOT NULL DEFAULT '',
                    checked INTEGER NOT NULL DEFAULT 0,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_recipe_ingredients_recipe ON recipe_ingredients(recipe_id);
                CREATE INDEX IF NOT EXISTS idx_shopping_items_source ON shopping_items(source);
                CREATE INDEX IF NOT EXISTS idx_shopping_items_state_key ON shopping_items(state_key);

                PRAGMA user_version = 1;",
            )?;
        }

        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Begin a transaction on the shared connection. Rolled back on drop
    /// unless committed.
    pub fn transaction(&self) -> Result<Transaction<'_>> {
        self.conn
            .unchecked_transaction()
            .context("Failed to begin transaction")
    }

    pub fn items(&self) -> ShoppingItemStore<'_> {
        ShoppingItemStore::new(&self.conn)
    }

    pub fn states(&self) -> ShoppingStateStore<'_> {
        ShoppingStateStore::new(&self.conn)
    }

    // --- Row mapping helpers ---

    fn recipe_from_row(row: &rusqlite::Row) -> rusqlite::Result<Recipe> {
        Ok(Recipe {
            id: row.get(0)?,
            name: row.get(1)?,
            created_at: row.get(2)?,
        })
    }

    fn ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<Ingredient> {
        Ok(Ingredient {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
        })
    }

    // --- Recipes ---

    pub fn create_recipe(&self, name: &str) -> Result<Recipe> {
        let now = Local::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO recipes (name, created_at) VALUES (?1, ?2)",
                params![name.trim(), now],
            )
            .with_context(|| format!("Failed to create recipe '{}'", name.trim()))?;
        let id = self.conn.last_insert_rowid();
        Ok(Recipe {
            id,
            name: name.trim().to_string(),
            created_at: now,
        })
    }

    pub fn get_recipe_by_id(&self, id: i64) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM recipes WHERE id = ?1",
                params![id],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn get_recipe_by_name(&self, name: &str) -> Result<Option<Recipe>> {
        let recipe = self
            .conn
            .query_row(
                "SELECT id, name, created_at FROM recipes WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                Self::recipe_from_row,
            )
            .optional()?;
        Ok(recipe)
    }

    pub fn list_recipes(&self) -> Result<Vec<Recipe>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name, created_at FROM recipes ORDER BY name COLLATE NOCASE")?;
        let recipes = stmt
            .query_map([], Self::recipe_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(recipes)
    }

    pub fn delete_recipe(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM recipes WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Insert an ingredient or return the existing one with the same name.
    /// A provided category replaces the stored one.
    pub fn upsert_ingredient(&self, name: &str, category: Option<&str>) -> Result<Ingredient> {
        let category = category.map(str::trim).filter(|c| !c.is_empty());
        self.conn.execute(
            "INSERT INTO ingredients (name, category) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET category = COALESCE(excluded.category, ingredients.category)",
            params![name.trim(), category],
        )?;
        self.conn
            .query_row(
                "SELECT id, name, category FROM ingredients WHERE name = ?1 COLLATE NOCASE",
                params![name.trim()],
                Self::ingredient_from_row,
            )
            .context("Ingredient not found")
    }

    pub fn add_recipe_ingredient(
        &self,
        recipe_id: i64,
        ingredient_id: i64,
        quantity: f64,
        unit: &str,
    ) -> Result<RecipeIngredient> {
        self.conn
            .execute(
                "INSERT INTO recipe_ingredients (recipe_id, ingredient_id, quantity, unit) VALUES (?1, ?2, ?3, ?4)",
                params![recipe_id, ingredient_id, quantity, unit.trim()],
            )
            .context("Failed to add recipe ingredient")?;
        let id = self.conn.last_insert_rowid();
        self.conn
            .query_row(
                "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity, ri.unit, i.name, i.category
                 FROM recipe_ingredients ri
                 LEFT JOIN ingredients i ON i.id = ri.ingredient_id
                 WHERE ri.id = ?1",
                params![id],
                Self::recipe_ingredient_from_row,
            )
            .context("Recipe ingredient not found")
    }

    fn recipe_ingredient_from_row(row: &rusqlite::Row) -> rusqlite::Result<RecipeIngredient> {
        Ok(RecipeIngredient {
            id: row.get(0)?,
            recipe_id: row.get(1)?,
            ingredient_id: row.get(2)?,
            quantity: row.get(3)?,
            unit: row.get(4)?,
            ingredient_name: row.get(5)?,
            category: row.get(6)?,
        })
    }

    pub fn get_recipe_ingredients(&self, recipe_id: i64) -> Result<Vec<RecipeIngredient>> {
        let mut stmt = self.conn.prepare(
            "SELECT ri.id, ri.recipe_id, ri.ingredient_id, ri.quantity, ri.unit, i.name, i.category
             FROM recipe_ingredients ri
             LEFT JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id = ?1
             ORDER BY ri.id",
        )?;
        let ingredients = stmt
            .query_map(params![recipe_id], Self::recipe_ingredient_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ingredients)
    }

    pub fn get_recipe_detail(&self, recipe_id: i64) -> Result<Option<RecipeDetail>> {
        let Some(recipe) = self.get_recipe_by_id(recipe_id)? else {
            return Ok(None);
        };
        let ingredients = self.get_recipe_ingredients(recipe.id)?;
        Ok(Some(RecipeDetail {
            id: recipe.id,
            name: recipe.name,
            created_at: recipe.created_at,
            ingredients,
        }))
    }
}

impl RecipeLookup for Database {
    fn ingredient_rows(&self, recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientRow>> {
        if recipe_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; recipe_ids.len()].join(", ");
        let sql = format!(
            "SELECT ri.recipe_id, r.name, ri.ingredient_id, i.name, i.category, ri.quantity, ri.unit
             FROM recipe_ingredients ri
             JOIN recipes r ON r.id = ri.recipe_id
             LEFT JOIN ingredients i ON i.id = ri.ingredient_id
             WHERE ri.recipe_id IN ({placeholders})
             ORDER BY ri.recipe_id, ri.id"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(recipe_ids.iter()), |row| {
                Ok(RecipeIngredientRow {
                    recipe_id: row.get(0)?,
                    recipe_name: row.get(1)?,
                    ingredient_id: row.get(2)?,
                    ingredient_name: row.get(3)?,
                    ingredient_category: row.get(4)?,
                    quantity: row.get(5)?,
                    unit: row.get(6)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to load recipe ingredients")?;
        Ok(rows)
    }
}

/// SQLite's `lower()` and `LIKE` only fold ASCII; searches go through this.
fn register_functions(conn: &Connection) -> Result<()> {
    conn.create_scalar_function(
        "unicode_lower",
        1,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let value: Option<String> = ctx.get(0)?;
            Ok(value.map(|v| v.to_lowercase()))
        },
    )
    .context("Failed to register SQL functions")
}

// --- Shopping items ---

const ITEM_COLUMNS: &str =
    "id, ingredient_name, quantity, unit, category, source, have, state_key, created_at";

/// Displayed shopping list rows. Bound to a connection or an open transaction.
pub struct ShoppingItemStore<'c> {
    conn: &'c Connection,
}

impl<'c> ShoppingItemStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn item_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingItem> {
        Ok(ShoppingItem {
            id: row.get(0)?,
            ingredient_name: row.get(1)?,
            quantity: row.get(2)?,
            unit: row.get(3)?,
            category: row.get(4)?,
            source: row.get(5)?,
            have: row.get(6)?,
            state_key: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    pub fn create(&self, item: &NewShoppingItem) -> Result<ShoppingItem> {
        let now = Local::now().to_rfc3339();
        // manual rows never take part in state tracking
        let state_key = match item.source {
            ItemSource::Recipe => item.state_key.as_deref().map(normalize_key),
            ItemSource::Manual => None,
        };
        self.conn.execute(
            "INSERT INTO shopping_items (ingredient_name, quantity, unit, category, source, have, state_key, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                item.ingredient_name,
                item.quantity,
                item.unit,
                item.category,
                item.source,
                item.have,
                state_key,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_by_id(id)?.context("Shopping item not found")
    }

    pub fn get_by_id(&self, id: i64) -> Result<Option<ShoppingItem>> {
        let item = self
            .conn
            .query_row(
                &format!("SELECT {ITEM_COLUMNS} FROM shopping_items WHERE id = ?1"),
                params![id],
                Self::item_from_row,
            )
            .optional()?;
        Ok(item)
    }

    pub fn list(&self, filter: &ItemFilter) -> Result<Vec<ShoppingItem>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<Value> = Vec::new();

        if let Some(term) = filter
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            clauses.push("unicode_lower(ingredient_name) LIKE ? ESCAPE '\\'");
            args.push(Value::Text(format!(
                "%{}%",
                escape_like(&term.to_lowercase())
            )));
        }
        if let Some(source) = filter.source {
            clauses.push("source = ?");
            args.push(Value::Text(source.as_str().to_string()));
        }
        if let Some(category) = filter.category.as_deref() {
            clauses.push("category = ? COLLATE NOCASE");
            args.push(Value::Text(category.trim().to_string()));
        }
        if let Some(have) = filter.have {
            clauses.push("have = ?");
            args.push(Value::Integer(i64::from(have)));
        }

        let mut sql = format!("SELECT {ITEM_COLUMNS} FROM shopping_items");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(
            " ORDER BY category IS NULL, category COLLATE NOCASE, ingredient_name COLLATE NOCASE, id",
        );
        if filter.limit.is_some() || filter.offset.is_some() {
            sql.push_str(" LIMIT ? OFFSET ?");
            args.push(Value::Integer(filter.limit.unwrap_or(-1)));
            args.push(Value::Integer(filter.offset.unwrap_or(0).max(0)));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let items = stmt
            .query_map(params_from_iter(args.iter()), Self::item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM shopping_items", [], |row| row.get(0))?;
        Ok(usize::try_from(count)?)
    }

    pub fn update_have(&self, id: i64, have: bool) -> Result<bool> {
        let rows = self.conn.execute(
            "UPDATE shopping_items SET have = ?1 WHERE id = ?2",
            params![have, id],
        )?;
        Ok(rows > 0)
    }

    /// Set `have` on every recipe row carrying `key`. Returns rows changed.
    pub fn update_have_by_state_key(&self, key: &str, have: bool) -> Result<usize> {
        let rows = self.conn.execute(
            "UPDATE shopping_items SET have = ?1 WHERE source = 'recipe' AND state_key = ?2",
            params![have, normalize_key(key)],
        )?;
        Ok(rows)
    }

    pub fn delete(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM shopping_items WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Remove every row, or only rows of one source.
    pub fn clear(&self, source: Option<ItemSource>) -> Result<usize> {
        let rows = match source {
            Some(source) => self.conn.execute(
                "DELETE FROM shopping_items WHERE source = ?1",
                params![source],
            )?,
            None => self.conn.execute("DELETE FROM shopping_items", [])?,
        };
        Ok(rows)
    }

    pub fn delete_completed(&self) -> Result<usize> {
        let rows = self
            .conn
            .execute("DELETE FROM shopping_items WHERE have = 1", [])?;
        Ok(rows)
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn summary(&self) -> Result<ShoppingSummary> {
        let (total, checked, recipe_count, manual_count): (i64, i64, i64, i64) =
            self.conn.query_row(
                "SELECT COUNT(*),
                        COALESCE(SUM(have), 0),
                        COALESCE(SUM(source = 'recipe'), 0),
                        COALESCE(SUM(source = 'manual'), 0)
                 FROM shopping_items",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        let mut stmt = self.conn.prepare(
            "SELECT MIN(category) FROM shopping_items
             WHERE category IS NOT NULL AND TRIM(category) != ''
             GROUP BY category COLLATE NOCASE
             ORDER BY MIN(category) COLLATE NOCASE",
        )?;
        let categories = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let completion_percentage = if total == 0 {
            0.0
        } else {
            checked as f64 / total as f64 * 100.0
        };

        Ok(ShoppingSummary {
            total,
            checked,
            recipe_count,
            manual_count,
            categories,
            completion_percentage,
        })
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

// --- Shopping states ---

/// Durable check marks keyed by state key. Outlives the item rows.
pub struct ShoppingStateStore<'c> {
    conn: &'c Connection,
}

impl<'c> ShoppingStateStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn state_from_row(row: &rusqlite::Row) -> rusqlite::Result<ShoppingState> {
        Ok(ShoppingState {
            id: row.get(0)?,
            key: row.get(1)?,
            quantity: row.get(2)?,
            unit: row.get(3)?,
            checked: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }

    pub fn get(&self, key: &str) -> Result<Option<ShoppingState>> {
        let state = self
            .conn
            .query_row(
                "SELECT id, key, quantity, unit, checked, updated_at FROM shopping_states WHERE key = ?1",
                params![normalize_key(key)],
                Self::state_from_row,
            )
            .optional()?;
        Ok(state)
    }

    /// Insert or update the row for `key` in place.
    pub fn save(&self, key: &str, quantity: f64, unit: &str, checked: bool) -> Result<ShoppingState> {
        let key = normalize_key(key);
        let now = Local::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO shopping_states (key, quantity, unit, checked, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(key) DO UPDATE SET
                quantity = excluded.quantity,
                unit = excluded.unit,
                checked = excluded.checked,
                updated_at = excluded.updated_at",
            params![key, quantity, unit, checked, now],
        )?;
        self.get(&key)?.context("Shopping state not found")
    }

    /// Set `checked` for every known key. Returns how many rows matched.
    pub fn bulk_update_checked(&self, updates: &HashMap<String, bool>) -> Result<usize> {
        let normalized: BTreeMap<String, bool> = updates
            .iter()
            .map(|(key, checked)| (normalize_key(key), *checked))
            .collect();

        let now = Local::now().to_rfc3339();
        let mut stmt = self
            .conn
            .prepare("UPDATE shopping_states SET checked = ?1, updated_at = ?2 WHERE key = ?3")?;
        let mut matched = 0;
        for (key, checked) in &normalized {
            matched += stmt.execute(params![checked, now, key])?;
        }
        Ok(matched)
    }

    pub fn list(&self) -> Result<Vec<ShoppingState>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, key, quantity, unit, checked, updated_at FROM shopping_states ORDER BY key",
        )?;
        let states = stmt
            .query_map([], Self::state_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(states)
    }

    pub fn clear_all(&self) -> Result<usize> {
        let rows = self.conn.execute("DELETE FROM shopping_states", [])?;
        Ok(rows)
    }
}
