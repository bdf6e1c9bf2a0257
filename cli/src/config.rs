use anyhow::{Context, Result};
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

use larder_core::units::UnitTable;

/// Environment variable that points the CLI at a different database file.
pub const DB_ENV_VAR: &str = "LARDER_DB";

pub struct Config {
    pub db_path: PathBuf,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "larder").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let db_path = resolve_db_path(&data_dir, std::env::var_os(DB_ENV_VAR).map(PathBuf::from));

        Ok(Config { db_path, data_dir })
    }

    pub fn units_path(&self) -> PathBuf {
        self.data_dir.join("units.toml")
    }

    /// Built-in unit families, overridden by `units.toml` when present.
    pub fn load_unit_table(&self) -> Result<UnitTable> {
        load_unit_table_from(&self.units_path())
    }
}

fn resolve_db_path(data_dir: &Path, override_path: Option<PathBuf>) -> PathBuf {
    override_path
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| data_dir.join("larder.db"))
}

fn load_unit_table_from(path: &Path) -> Result<UnitTable> {
    let mut table = UnitTable::builtin();
    if !path.exists() {
        return Ok(table);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read unit table: {}", path.display()))?;
    let overrides = UnitTable::from_toml_str(&contents)
        .with_context(|| format!("Invalid unit table: {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        ingredients = overrides.ingredient_names().len(),
        "loaded unit overrides"
    );
    table.extend(overrides);
    Ok(table)
}
