use std::collections::HashMap;
use std::io::Write;
use std::path::Path;

use anyhow::Result;

use crate::aggregate::{self, RecipeLookup};
use crate::db::{Database, ShoppingItemStore, ShoppingStateStore};
use crate::export;
use crate::models::{
    BreakdownResult, GenerationResult, ItemFilter, ItemSource, ListChange, NewShoppingItem,
    ShoppingItem, ShoppingSummary, ToggleResult,
};
use crate::units::UnitTable;

pub type ChangeListener = Box<dyn Fn(&ListChange)>;

/// Entry point for every shopping list operation.
///
/// Each mutating call runs in its own transaction on the owned database and
/// notifies subscribed listeners only after it commits.
pub struct ShoppingListService {
    db: Database,
    units: UnitTable,
    listeners: Vec<ChangeListener>,
}

impl ShoppingListService {
    pub fn new(db_path: &str) -> Result<Self> {
        let db = Database::open(Path::new(db_path))?;
        Ok(Self::from_database(db))
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self::from_database(db))
    }

    #[must_use]
    pub fn from_database(db: Database) -> Self {
        Self {
            db,
            units: UnitTable::builtin(),
            listeners: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_unit_table(mut self, units: UnitTable) -> Self {
        self.units = units;
        self
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn unit_table(&self) -> &UnitTable {
        &self.units
    }

    /// Register a callback invoked after every committed change.
    pub fn subscribe(&mut self, listener: impl Fn(&ListChange) + 'static) {
        self.listeners.push(Box::new(listener));
    }

    fn notify(&self, change: &ListChange) {
        for listener in &self.listeners {
            listener(change);
        }
    }

    // --- Generation ---

    /// Build the recipe part of the list from the database's own recipes.
    pub fn generate(&self, recipe_ids: &[i64], clear_existing: bool) -> GenerationResult {
        self.generate_with(&self.db, recipe_ids, clear_existing)
    }

    /// Build the recipe part of the list from any recipe source.
    ///
    /// Clearing, aggregation and insertion share one transaction: a failure
    /// leaves the previous list untouched and is reported in the result.
    pub fn generate_with(
        &self,
        lookup: &dyn RecipeLookup,
        recipe_ids: &[i64],
        clear_existing: bool,
    ) -> GenerationResult {
        if recipe_ids.is_empty() {
            let total_items = match self.db.items().count() {
                Ok(total) => total,
                Err(e) => {
                    return GenerationResult::failure(format!(
                        "Failed to count shopping items: {e:#}"
                    ));
                }
            };
            return GenerationResult {
                success: true,
                items_created: 0,
                total_items,
                message: "No recipes selected; nothing to generate".to_string(),
                items: Vec::new(),
            };
        }

        match self.try_generate(lookup, recipe_ids, clear_existing) {
            Ok((result, cleared)) => {
                tracing::info!(
                    recipes = recipe_ids.len(),
                    created = result.items_created,
                    cleared,
                    "generated shopping list"
                );
                self.notify(&ListChange::Generated {
                    items_created: result.items_created,
                    recipe_items_cleared: cleared,
                });
                result
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "shopping list generation failed");
                GenerationResult::failure(format!("Failed to generate shopping list: {e:#}"))
            }
        }
    }

    fn try_generate(
        &self,
        lookup: &dyn RecipeLookup,
        recipe_ids: &[i64],
        clear_existing: bool,
    ) -> Result<(GenerationResult, usize)> {
        let tx = self.db.transaction()?;
        let items = ShoppingItemStore::new(&tx);
        let states = ShoppingStateStore::new(&tx);

        let cleared = if clear_existing {
            items.clear(Some(ItemSource::Recipe))?
        } else {
            0
        };

        let aggregated = aggregate::aggregate(lookup, &self.units, recipe_ids)?;
        let mut created = Vec::with_capacity(aggregated.len());
        for ingredient in aggregated {
            let have = states
                .get(&ingredient.state_key)?
                .is_some_and(|state| state.checked);
            created.push(items.create(&NewShoppingItem::from_aggregated(ingredient, have))?);
        }
        let total_items = items.count()?;
        tx.commit()?;

        let items_created = created.len();
        let message = if items_created == 0 {
            "Selected recipes have no ingredients".to_string()
        } else {
            format!("Added {items_created} items from {} recipes", recipe_ids.len())
        };
        Ok((
            GenerationResult {
                success: true,
                items_created,
                total_items,
                message,
                items: created,
            },
            cleared,
        ))
    }

    // --- Check marks ---

    /// Flip `have` on one item. `None` when the item does not exist.
    pub fn toggle(&self, item_id: i64) -> Result<Option<ToggleResult>> {
        let tx = self.db.transaction()?;
        let items = ShoppingItemStore::new(&tx);
        let states = ShoppingStateStore::new(&tx);

        let Some(item) = items.get_by_id(item_id)? else {
            return Ok(None);
        };
        let have = !item.have;
        items.update_have(item.id, have)?;
        let state_synced = write_through(&items, &states, &item, have)?;
        tx.commit()?;

        self.notify(&ListChange::Toggled { item_id, have });
        Ok(Some(ToggleResult {
            item_id,
            have,
            state_key: item.state_key,
            state_synced,
        }))
    }

    /// Set `have` for many items at once. Unknown ids are skipped; returns
    /// how many items were updated.
    pub fn bulk_toggle(&self, updates: &HashMap<i64, bool>) -> Result<usize> {
        let mut ids: Vec<(i64, bool)> = updates.iter().map(|(id, have)| (*id, *have)).collect();
        ids.sort_unstable();

        let tx = self.db.transaction()?;
        let items = ShoppingItemStore::new(&tx);
        let states = ShoppingStateStore::new(&tx);

        let mut updated = 0;
        for (id, have) in ids {
            let Some(item) = items.get_by_id(id)? else {
                tracing::debug!(item_id = id, "bulk toggle skipping unknown item");
                continue;
            };
            items.update_have(id, have)?;
            write_through(&items, &states, &item, have)?;
            updated += 1;
        }
        tx.commit()?;

        if updated > 0 {
            self.notify(&ListChange::BulkToggled { updated });
        }
        Ok(updated)
    }

    // --- Manual items ---

    pub fn add_manual(
        &self,
        name: &str,
        quantity: f64,
        unit: &str,
        category: Option<&str>,
    ) -> Result<ShoppingItem> {
        let tx = self.db.transaction()?;
        let item =
            ShoppingItemStore::new(&tx).create(&NewShoppingItem::manual(name, quantity, unit, category))?;
        tx.commit()?;

        self.notify(&ListChange::ManualAdded { item_id: item.id });
        Ok(item)
    }

    pub fn delete_item(&self, item_id: i64) -> Result<bool> {
        let tx = self.db.transaction()?;
        let deleted = ShoppingItemStore::new(&tx).delete(item_id)?;
        tx.commit()?;

        if deleted {
            self.notify(&ListChange::ItemDeleted { item_id });
        }
        Ok(deleted)
    }

    // --- Bulk removal ---

    /// Delete every checked item, whatever its source.
    pub fn clear_completed(&self) -> Result<usize> {
        let tx = self.db.transaction()?;
        let removed = ShoppingItemStore::new(&tx).delete_completed()?;
        tx.commit()?;

        tracing::info!(removed, "cleared completed items");
        if removed > 0 {
            self.notify(&ListChange::CompletedCleared { removed });
        }
        Ok(removed)
    }

    pub fn clear_items(&self, source: Option<ItemSource>) -> Result<usize> {
        let tx = self.db.transaction()?;
        let removed = ShoppingItemStore::new(&tx).clear(source)?;
        tx.commit()?;

        tracing::info!(removed, source = ?source, "cleared shopping items");
        self.notify(&ListChange::ItemsCleared { source, removed });
        Ok(removed)
    }

    /// Forget every remembered check mark. Current rows keep their `have`.
    pub fn clear_states(&self) -> Result<usize> {
        let tx = self.db.transaction()?;
        let removed = ShoppingStateStore::new(&tx).clear_all()?;
        tx.commit()?;

        tracing::info!(removed, "cleared shopping states");
        self.notify(&ListChange::StatesCleared { removed });
        Ok(removed)
    }

    // --- Queries ---

    pub fn get_item(&self, item_id: i64) -> Result<Option<ShoppingItem>> {
        self.db.items().get_by_id(item_id)
    }

    pub fn list(&self, filter: &ItemFilter) -> Result<Vec<ShoppingItem>> {
        self.db.items().list(filter)
    }

    pub fn search(&self, term: &str) -> Result<Vec<ShoppingItem>> {
        self.db.items().list(&ItemFilter {
            search_term: Some(term.to_string()),
            ..ItemFilter::default()
        })
    }

    pub fn summary(&self) -> Result<ShoppingSummary> {
        self.db.items().summary()
    }

    pub fn breakdown(&self, recipe_ids: &[i64]) -> Result<BreakdownResult> {
        self.breakdown_with(&self.db, recipe_ids)
    }

    pub fn breakdown_with(
        &self,
        lookup: &dyn RecipeLookup,
        recipe_ids: &[i64],
    ) -> Result<BreakdownResult> {
        aggregate::breakdown(lookup, &self.units, recipe_ids)
    }

    /// Write the whole list as CSV. Returns the number of rows written.
    pub fn export_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let items = self.db.items().list(&ItemFilter::default())?;
        export::write_items_csv(writer, &items)?;
        Ok(items.len())
    }
}

/// Mirror a recipe item's new `have` into its durable state and into every
/// other recipe row sharing the same key. Returns whether a state row was
/// written.
fn write_through(
    items: &ShoppingItemStore,
    states: &ShoppingStateStore,
    item: &ShoppingItem,
    have: bool,
) -> Result<bool> {
    match (item.source, item.state_key.as_deref()) {
        (ItemSource::Recipe, Some(key)) => {
            states.save(key, item.quantity, &item.unit, have)?;
            items.update_have_by_state_key(key, have)?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecipeIngredientRow;
    use std::cell::RefCell;
    use std::rc::Rc;

    struct MockLookup {
        rows: Vec<RecipeIngredientRow>,
    }

    impl RecipeLookup for MockLookup {
        fn ingredient_rows(&self, recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientRow>> {
            Ok(self
                .rows
                .iter()
                .filter(|r| recipe_ids.contains(&r.recipe_id))
                .cloned()
                .collect())
        }
    }

    struct FailingLookup;

    impl RecipeLookup for FailingLookup {
        fn ingredient_rows(&self, _recipe_ids: &[i64]) -> Result<Vec<RecipeIngredientRow>> {
            anyhow::bail!("recipe store unavailable")
        }
    }

    fn row(recipe_id: i64, ingredient_id: i64, name: &str, quantity: f64, unit: &str) -> RecipeIngredientRow {
        RecipeIngredientRow {
            recipe_id,
            recipe_name: format!("Recipe {recipe_id}"),
            ingredient_id,
            ingredient_name: Some(name.to_string()),
            ingredient_category: Some("Pantry".to_string()),
            quantity,
            unit: unit.to_string(),
        }
    }

    fn sample_lookup() -> MockLookup {
        MockLookup {
            rows: vec![
                row(1, 10, "Flour", 1.0, "cup"),
                row(1, 11, "Butter", 4.0, "tbsp"),
                row(2, 11, "Butter", 4.0, "tbsp"),
                row(2, 12, "Eggs", 2.0, ""),
            ],
        }
    }

    fn find<'a>(items: &'a [ShoppingItem], name: &str) -> &'a ShoppingItem {
        items
            .iter()
            .find(|i| i.ingredient_name == name)
            .unwrap_or_else(|| panic!("{name} missing"))
    }

    fn snapshot(items: &[ShoppingItem]) -> Vec<(String, String, String, bool)> {
        let mut rows: Vec<_> = items
            .iter()
            .map(|i| {
                (
                    i.ingredient_name.clone(),
                    format!("{:.4}", i.quantity),
                    i.unit.clone(),
                    i.have,
                )
            })
            .collect();
        rows.sort();
        rows
    }

    #[test]
    fn test_generate_creates_recipe_items() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let result = svc.generate_with(&sample_lookup(), &[1, 2], true);

        assert!(result.success, "{}", result.message);
        assert_eq!(result.items_created, 3);
        assert_eq!(result.total_items, 3);

        let butter = find(&result.items, "Butter");
        assert!((butter.quantity - 1.0).abs() < 0.01);
        assert_eq!(butter.unit, "stick");
        assert_eq!(butter.state_key.as_deref(), Some("butter::stick"));
        assert!(result.items.iter().all(|i| i.source == ItemSource::Recipe && !i.have));
    }

    #[test]
    fn test_generate_repeated_recipe() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = MockLookup {
            rows: vec![row(1, 10, "Flour", 1.0, "cup"), row(2, 12, "Eggs", 2.0, "")],
        };
        let result = svc.generate_with(&lookup, &[1, 1, 2], true);
        let flour = find(&result.items, "Flour");
        assert!((flour.quantity - 2.0).abs() < 0.01);
        assert_eq!(flour.unit, "cup");
    }

    #[test]
    fn test_generate_empty_ids_is_noop() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.generate_with(&sample_lookup(), &[1], true);
        svc.add_manual("Milk", 1.0, "l", None).unwrap();

        let result = svc.generate_with(&FailingLookup, &[], true);
        assert!(result.success);
        assert_eq!(result.items_created, 0);
        assert_eq!(result.total_items, 3);
        assert!(result.items.is_empty());
        assert_eq!(svc.list(&ItemFilter::default()).unwrap().len(), 3);
    }

    #[test]
    fn test_generate_twice_is_idempotent() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = sample_lookup();
        svc.generate_with(&lookup, &[1, 2, 2], true);
        let first = svc.list(&ItemFilter::default()).unwrap();
        svc.generate_with(&lookup, &[1, 2, 2], true);
        let second = svc.list(&ItemFilter::default()).unwrap();

        assert_eq!(first.len(), second.len());
        assert_eq!(snapshot(&first), snapshot(&second));
    }

    #[test]
    fn test_generate_without_clear_appends() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = sample_lookup();
        svc.generate_with(&lookup, &[1], true);
        let result = svc.generate_with(&lookup, &[2], false);
        assert!(result.success);
        assert_eq!(result.items_created, 2);
        assert_eq!(result.total_items, 4);
    }

    #[test]
    fn test_regenerate_keeps_manual_items() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = sample_lookup();
        svc.add_manual("Paper Towels", 1.0, "roll", Some("Household"))
            .unwrap();
        svc.generate_with(&lookup, &[1], true);
        svc.generate_with(&lookup, &[2], true);

        let manual = svc
            .list(&ItemFilter {
                source: Some(ItemSource::Manual),
                ..ItemFilter::default()
            })
            .unwrap();
        assert_eq!(manual.len(), 1);

        let recipe = svc
            .list(&ItemFilter {
                source: Some(ItemSource::Recipe),
                ..ItemFilter::default()
            })
            .unwrap();
        // only recipe 2's butter and eggs; nothing stale from recipe 1
        assert_eq!(recipe.len(), 2);
        assert!(recipe.iter().all(|i| i.ingredient_name != "Flour"));
    }

    #[test]
    fn test_check_mark_survives_regeneration() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = sample_lookup();
        let result = svc.generate_with(&lookup, &[1, 2], true);
        let flour = find(&result.items, "Flour");

        let toggled = svc.toggle(flour.id).unwrap().unwrap();
        assert!(toggled.have);
        assert!(toggled.state_synced);

        let regenerated = svc.generate_with(&lookup, &[1, 2], true);
        assert!(find(&regenerated.items, "Flour").have);
        assert!(!find(&regenerated.items, "Eggs").have);

        let state = svc.database().states().get("flour::cup").unwrap().unwrap();
        assert!(state.checked);
    }

    #[test]
    fn test_item_have_matches_state_after_toggle() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let result = svc.generate_with(&sample_lookup(), &[1, 2], true);
        let butter = find(&result.items, "Butter").clone();

        for _ in 0..3 {
            svc.toggle(butter.id).unwrap().unwrap();
            let item = svc.get_item(butter.id).unwrap().unwrap();
            let state = svc
                .database()
                .states()
                .get(butter.state_key.as_deref().unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(item.have, state.checked);
        }
    }

    #[test]
    fn test_toggle_syncs_rows_sharing_a_state_key() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = MockLookup {
            rows: vec![row(1, 10, "Flour", 1.0, "cup")],
        };
        let first = svc.generate_with(&lookup, &[1], true);
        let second = svc.generate_with(&lookup, &[1], false);
        let a = first.items[0].clone();
        let b = second.items[0].clone();
        assert_eq!(a.state_key, b.state_key);

        svc.toggle(a.id).unwrap().unwrap();
        let state = svc.database().states().get("flour::cup").unwrap().unwrap();
        assert!(state.checked);
        assert!(svc.get_item(a.id).unwrap().unwrap().have);
        assert!(svc.get_item(b.id).unwrap().unwrap().have);

        svc.bulk_toggle(&HashMap::from([(b.id, false)])).unwrap();
        let state = svc.database().states().get("flour::cup").unwrap().unwrap();
        assert!(!state.checked);
        assert!(!svc.get_item(a.id).unwrap().unwrap().have);
        assert!(!svc.get_item(b.id).unwrap().unwrap().have);
    }

    #[test]
    fn test_toggle_twice_restores() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let item = svc.add_manual("Milk", 1.0, "l", None).unwrap();
        assert!(svc.toggle(item.id).unwrap().unwrap().have);
        assert!(!svc.toggle(item.id).unwrap().unwrap().have);
        assert!(!svc.get_item(item.id).unwrap().unwrap().have);
    }

    #[test]
    fn test_toggle_unknown_item() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        assert!(svc.toggle(404).unwrap().is_none());
    }

    #[test]
    fn test_manual_toggle_does_not_write_state() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let item = svc.add_manual("Milk", 1.0, "l", None).unwrap();
        assert!(item.state_key.is_none());
        assert!(!item.have);
        assert_eq!(item.source, ItemSource::Manual);

        let toggled = svc.toggle(item.id).unwrap().unwrap();
        assert!(!toggled.state_synced);
        assert!(svc.database().states().list().unwrap().is_empty());
    }

    #[test]
    fn test_bulk_toggle_skips_unknown_ids() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let result = svc.generate_with(&sample_lookup(), &[1, 2], true);
        let flour = find(&result.items, "Flour");
        let eggs = find(&result.items, "Eggs");

        let updates = HashMap::from([(flour.id, true), (eggs.id, true), (9999, true)]);
        assert_eq!(svc.bulk_toggle(&updates).unwrap(), 2);

        assert!(svc.get_item(flour.id).unwrap().unwrap().have);
        assert!(svc.get_item(eggs.id).unwrap().unwrap().have);
        assert!(!find(&svc.list(&ItemFilter::default()).unwrap(), "Butter").have);
        assert!(svc.database().states().get("eggs::").unwrap().unwrap().checked);
    }

    #[test]
    fn test_clear_completed_removes_checked_of_any_source() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.add_manual("Milk", 1.0, "l", None).unwrap();
        svc.add_manual("Bread", 1.0, "loaf", None).unwrap();
        let lookup = MockLookup {
            rows: vec![row(1, 10, "Flour", 1.0, "cup")],
        };
        let result = svc.generate_with(&lookup, &[1], true);
        svc.toggle(result.items[0].id).unwrap();

        assert_eq!(svc.clear_completed().unwrap(), 1);
        let left = svc.list(&ItemFilter::default()).unwrap();
        assert_eq!(left.len(), 2);
        assert!(left.iter().all(|i| i.source == ItemSource::Manual && !i.have));
    }

    #[test]
    fn test_clear_items_by_source() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.add_manual("Milk", 1.0, "l", None).unwrap();
        svc.generate_with(&sample_lookup(), &[1, 2], true);

        assert_eq!(svc.clear_items(Some(ItemSource::Manual)).unwrap(), 1);
        assert_eq!(svc.summary().unwrap().recipe_count, 3);
        assert_eq!(svc.clear_items(Some(ItemSource::Recipe)).unwrap(), 3);
        assert_eq!(svc.summary().unwrap().total, 0);
    }

    #[test]
    fn test_clear_states_forgets_marks() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let lookup = sample_lookup();
        let result = svc.generate_with(&lookup, &[1], true);
        svc.toggle(find(&result.items, "Flour").id).unwrap();
        assert_eq!(svc.clear_states().unwrap(), 1);

        let regenerated = svc.generate_with(&lookup, &[1], true);
        assert!(!find(&regenerated.items, "Flour").have);
    }

    #[test]
    fn test_failed_generation_leaves_list_untouched() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.generate_with(&sample_lookup(), &[1, 2], true);
        svc.add_manual("Milk", 1.0, "l", None).unwrap();

        let result = svc.generate_with(&FailingLookup, &[1], true);
        assert!(!result.success);
        assert!(result.message.contains("recipe store unavailable"));
        assert_eq!(result.items_created, 0);

        let summary = svc.summary().unwrap();
        assert_eq!(summary.recipe_count, 3);
        assert_eq!(summary.manual_count, 1);
    }

    #[test]
    fn test_search_delegates_to_item_store() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.generate_with(&sample_lookup(), &[1, 2], true);
        svc.add_manual("Butternut squash", 1.0, "", Some("Produce"))
            .unwrap();

        let found = svc.search("butter").unwrap();
        assert_eq!(found.len(), 2);
        assert!(svc.search("caviar").unwrap().is_empty());
    }

    #[test]
    fn test_delete_item() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let item = svc.add_manual("Milk", 1.0, "l", None).unwrap();
        assert!(svc.delete_item(item.id).unwrap());
        assert!(!svc.delete_item(item.id).unwrap());
    }

    #[test]
    fn test_listeners_notified_after_commit() {
        let mut svc = ShoppingListService::new_in_memory().unwrap();
        let events: Rc<RefCell<Vec<ListChange>>> = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        svc.subscribe(move |change| sink.borrow_mut().push(change.clone()));

        let result = svc.generate_with(&sample_lookup(), &[1, 2], true);
        svc.toggle(result.items[0].id).unwrap();
        svc.generate_with(&FailingLookup, &[1], true);
        svc.toggle(777).unwrap();

        svc.bulk_toggle(&HashMap::from([(888, true)])).unwrap();
        svc.clear_completed().unwrap();
        svc.clear_completed().unwrap();

        let events = events.borrow();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[0],
            ListChange::Generated {
                items_created: 3,
                recipe_items_cleared: 0
            }
        );
        assert!(matches!(events[1], ListChange::Toggled { have: true, .. }));
        assert_eq!(events[2], ListChange::CompletedCleared { removed: 1 });
    }

    #[test]
    fn test_generate_from_database_recipes() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        let db = svc.database();
        let cookies = db.create_recipe("Cookies").unwrap();
        let butter = db.upsert_ingredient("Butter", Some("Dairy")).unwrap();
        let sugar = db.upsert_ingredient("Sugar", Some("Baking")).unwrap();
        db.add_recipe_ingredient(cookies.id, butter.id, 4.0, "tbsp")
            .unwrap();
        db.add_recipe_ingredient(cookies.id, sugar.id, 8.0, "tbsp")
            .unwrap();

        let result = svc.generate(&[cookies.id, cookies.id], true);
        assert!(result.success, "{}", result.message);
        let butter_item = find(&result.items, "Butter");
        assert_eq!(butter_item.unit, "stick");
        assert!((butter_item.quantity - 1.0).abs() < 0.01);
        assert_eq!(butter_item.category.as_deref(), Some("Dairy"));
        let sugar_item = find(&result.items, "Sugar");
        assert_eq!(sugar_item.unit, "cup");
        assert!((sugar_item.quantity - 1.0).abs() < 0.01);

        let report = svc.breakdown(&[cookies.id, cookies.id]).unwrap();
        let contributions = report.get("butter::stick").unwrap();
        assert_eq!(contributions.len(), 1);
        assert_eq!(contributions[0].recipe_name, "Cookies");
    }

    #[test]
    fn test_custom_unit_table() {
        let table = UnitTable::from_toml_str("[ingredients.rice]\ng = 1\nkg = 1000\n").unwrap();
        let svc = ShoppingListService::new_in_memory()
            .unwrap()
            .with_unit_table(table);
        let lookup = MockLookup {
            rows: vec![row(1, 30, "Rice", 600.0, "g"), row(2, 30, "Rice", 400.0, "g")],
        };
        let result = svc.generate_with(&lookup, &[1, 2], true);
        let rice = find(&result.items, "Rice");
        assert!((rice.quantity - 1.0).abs() < 0.01);
        assert_eq!(rice.unit, "kg");
    }

    #[test]
    fn test_export_csv() {
        let svc = ShoppingListService::new_in_memory().unwrap();
        svc.generate_with(&sample_lookup(), &[1], true);
        svc.add_manual("Milk", 1.0, "l", None).unwrap();

        let mut out = Vec::new();
        assert_eq!(svc.export_csv(&mut out).unwrap(), 3);
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("ingredient,quantity,unit,category,source,have"));
        assert!(text.contains("Milk,1,l,,manual,false"));
    }
}
