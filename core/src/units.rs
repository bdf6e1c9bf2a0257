use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::state_key::normalize_unit;

/// Tolerance used when deciding whether a base quantity divides evenly.
const EVEN_TOLERANCE: f64 = 1e-9;

static BUILTIN: LazyLock<UnitTable> = LazyLock::new(UnitTable::builtin);

/// Ingredient-specific unit families. Every unit in a family has a factor
/// relative to a common base unit for that ingredient.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTable {
    // ingredient name (lowercase) -> units ordered by descending factor
    groups: HashMap<String, Vec<(String, f64)>>,
}

#[derive(Debug, Deserialize)]
struct UnitTableFile {
    #[serde(default)]
    ingredients: HashMap<String, HashMap<String, f64>>,
}

impl Default for UnitTable {
    fn default() -> Self {
        Self::builtin()
    }
}

impl UnitTable {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            groups: HashMap::new(),
        }
    }

    /// Butter, flour and sugar, all based on teaspoons.
    #[must_use]
    pub fn builtin() -> Self {
        let mut table = Self::empty();
        table.insert_group(
            "butter",
            &[("tsp", 1.0), ("tbsp", 3.0), ("stick", 24.0), ("cup", 48.0)],
        );
        table.insert_group("flour", &[("tsp", 1.0), ("tbsp", 3.0), ("cup", 48.0)]);
        table.insert_group("sugar", &[("tsp", 1.0), ("tbsp", 3.0), ("cup", 48.0)]);
        table
    }

    /// Parse a table from TOML:
    ///
    /// ```toml
    /// [ingredients.butter]
    /// tsp = 1
    /// tbsp = 3
    /// stick = 24
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let file: UnitTableFile = toml::from_str(s).context("Failed to parse unit table")?;
        let mut table = Self::empty();
        for (name, units) in &file.ingredients {
            if name.trim().is_empty() {
                bail!("Unit table ingredient names must not be empty");
            }
            if units.is_empty() {
                bail!("Ingredient '{name}' must list at least one unit");
            }
            for (unit, factor) in units {
                if !factor.is_finite() || *factor <= 0.0 {
                    bail!("Factor for '{unit}' in '{name}' must be greater than 0 (got {factor})");
                }
            }
            let pairs: Vec<(&str, f64)> = units.iter().map(|(u, f)| (u.as_str(), *f)).collect();
            table.insert_group(name, &pairs);
        }
        Ok(table)
    }

    /// Add every family from `other`, replacing same-named ingredients.
    pub fn extend(&mut self, other: UnitTable) {
        self.groups.extend(other.groups);
    }

    fn insert_group(&mut self, name: &str, units: &[(&str, f64)]) {
        let mut sorted: Vec<(String, f64)> = units
            .iter()
            .map(|(unit, factor)| (normalize_unit(unit), *factor))
            .collect();
        sorted.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted.dedup_by(|a, b| a.0 == b.0);
        self.groups.insert(name.trim().to_lowercase(), sorted);
    }

    fn group(&self, name: &str) -> Option<&[(String, f64)]> {
        self.groups
            .get(&name.trim().to_lowercase())
            .map(Vec::as_slice)
    }

    #[must_use]
    pub fn ingredient_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.groups.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Factor of `unit` relative to the ingredient's base unit, if the unit
    /// belongs to the ingredient's family.
    #[must_use]
    pub fn factor(&self, name: &str, unit: &str) -> Option<f64> {
        let unit = normalize_unit(unit);
        self.group(name)?
            .iter()
            .find(|(u, _)| *u == unit)
            .map(|(_, f)| *f)
    }

    #[must_use]
    pub fn is_convertible(&self, name: &str, unit: &str) -> bool {
        self.factor(name, unit).is_some()
    }

    #[must_use]
    pub fn to_base(&self, name: &str, quantity: f64, unit: &str) -> Option<f64> {
        self.factor(name, unit).map(|f| quantity * f)
    }

    /// Convert to the largest unit that represents the quantity exactly,
    /// e.g. 8 tbsp of butter becomes 1 stick.
    ///
    /// Unknown ingredients and units outside the ingredient's family come
    /// back unchanged. When no unit divides evenly the quantity stays in the
    /// original unit.
    #[must_use]
    pub fn convert(&self, name: &str, quantity: f64, unit: &str) -> (f64, String) {
        let Some(group) = self.group(name) else {
            return (quantity, unit.to_string());
        };
        let Some(factor) = self.factor(name, unit) else {
            return (quantity, unit.to_string());
        };

        let base = quantity * factor;
        for (candidate, candidate_factor) in group {
            if divides_evenly(base, *candidate_factor) {
                return (base / candidate_factor, candidate.clone());
            }
        }
        (base / factor, unit.to_string())
    }
}

fn divides_evenly(base: f64, factor: f64) -> bool {
    let ratio = base / factor;
    (ratio - ratio.round()).abs() < EVEN_TOLERANCE
}

/// Convert with the built-in table.
#[must_use]
pub fn convert(name: &str, quantity: f64, unit: &str) -> (f64, String) {
    BUILTIN.convert(name, quantity, unit)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_converted(actual: (f64, String), quantity: f64, unit: &str) {
        assert!(
            (actual.0 - quantity).abs() < 1e-9,
            "expected {quantity} {unit}, got {} {}",
            actual.0,
            actual.1
        );
        assert_eq!(actual.1, unit);
    }

    #[test]
    fn test_butter_tbsp_to_stick() {
        assert_converted(convert("butter", 8.0, "tbsp"), 1.0, "stick");
    }

    #[test]
    fn test_flour_tbsp_to_cup() {
        assert_converted(convert("flour", 16.0, "tbsp"), 1.0, "cup");
    }

    #[test]
    fn test_prefers_largest_clean_unit() {
        // 16 tbsp butter = 48 tsp = 1 cup, not 2 sticks
        assert_converted(convert("butter", 16.0, "tbsp"), 1.0, "cup");
        assert_converted(convert("butter", 3.0, "stick"), 3.0, "stick");
        assert_converted(convert("sugar", 6.0, "tsp"), 2.0, "tbsp");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_converted(convert("  Butter ", 8.0, "Tbsp."), 1.0, "stick");
    }

    #[test]
    fn test_unknown_ingredient_unchanged() {
        assert_converted(convert("milk", 16.0, "tbsp"), 16.0, "tbsp");
    }

    #[test]
    fn test_unknown_unit_unchanged() {
        assert_converted(convert("flour", 500.0, "g"), 500.0, "g");
        assert_converted(convert("flour", 2.0, "Pinch"), 2.0, "Pinch");
    }

    #[test]
    fn test_uneven_quantity_falls_back_to_original_unit() {
        assert_converted(convert("sugar", 0.5, "tsp"), 0.5, "tsp");
    }

    #[test]
    fn test_fractional_cup_drops_to_tbsp() {
        // 1.5 cups = 72 tsp = 24 tbsp
        assert_converted(convert("flour", 1.5, "cup"), 24.0, "tbsp");
    }

    #[test]
    fn test_zero_and_negative_follow_same_arithmetic() {
        assert_converted(convert("flour", 0.0, "tbsp"), 0.0, "cup");
        assert_converted(convert("butter", -8.0, "tbsp"), -1.0, "stick");
    }

    #[test]
    fn test_factor_and_to_base() {
        let table = UnitTable::builtin();
        assert_eq!(table.factor("butter", "stick"), Some(24.0));
        assert_eq!(table.factor("butter", "g"), None);
        assert_eq!(table.to_base("flour", 2.0, "cup"), Some(96.0));
        assert!(table.is_convertible("Sugar", "TBSP"));
        assert!(!table.is_convertible("salt", "tsp"));
    }

    #[test]
    fn test_from_toml_str() {
        let table = UnitTable::from_toml_str(
            "[ingredients.rice]\ng = 1\nkg = 1000\n\n[ingredients.Milk]\nml = 1\nl = 1000.0\n",
        )
        .unwrap();
        assert_eq!(table.ingredient_names(), vec!["milk", "rice"]);
        assert_converted(table.convert("rice", 2000.0, "g"), 2.0, "kg");
        assert_converted(table.convert("milk", 250.0, "ml"), 250.0, "ml");
        // builtins are not implied
        assert_converted(table.convert("butter", 8.0, "tbsp"), 8.0, "tbsp");
    }

    #[test]
    fn test_from_toml_str_rejects_bad_factors() {
        assert!(UnitTable::from_toml_str("[ingredients.rice]\ng = 0\n").is_err());
        assert!(UnitTable::from_toml_str("[ingredients.rice]\ng = -2\n").is_err());
        assert!(UnitTable::from_toml_str("[ingredients.rice]\n").is_err());
        assert!(UnitTable::from_toml_str("not toml = [").is_err());
    }

    #[test]
    fn test_extend_overrides_builtin() {
        let mut table = UnitTable::builtin();
        let overrides =
            UnitTable::from_toml_str("[ingredients.butter]\ng = 1\nstick = 113\n").unwrap();
        table.extend(overrides);
        assert_converted(table.convert("butter", 226.0, "g"), 2.0, "stick");
        assert!(!table.is_convertible("butter", "tbsp"));
        assert_converted(table.convert("flour", 16.0, "tbsp"), 1.0, "cup");
    }
}
