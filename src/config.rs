use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::analyzers::types::YearRange;

/// Env var overriding the store path.
pub const DATABASE_ENV: &str = "TAXI_CO2_DB";

/// A vehicle class and the relations holding its trips.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    pub name: String,
    pub raw_relation: String,
    pub enriched_relation: String,
}

impl ClassConfig {
    pub fn new(name: &str, raw_relation: &str, enriched_relation: &str) -> Self {
        Self {
            name: name.to_string(),
            raw_relation: raw_relation.to_string(),
            enriched_relation: enriched_relation.to_string(),
        }
    }
}

/// Pipeline settings. Stored as a JSON object on disk; every field is
/// optional and falls back to its default:
/// ```json
/// {
///   "database": "emissions.sqlite",
///   "classes": [
///     { "name": "yellow", "raw_relation": "yellow_taxi_data", "enriched_relation": "final_yellow_data" }
///   ],
///   "year_min": 2015,
///   "year_max": 2024
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub database: PathBuf,
    pub classes: Vec<ClassConfig>,
    pub emissions_relation: String,
    pub year_min: i32,
    pub year_max: i32,
    pub metric: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("emissions.sqlite"),
            classes: vec![
                ClassConfig::new("yellow", "yellow_taxi_data", "final_yellow_data"),
                ClassConfig::new("green", "green_taxi_data", "final_green_data"),
            ],
            emissions_relation: "vehicle_emissions".to_string(),
            year_min: 2015,
            year_max: 2024,
            metric: "trip_co2_kgs".to_string(),
        }
    }
}

impl PipelineConfig {
    /// Loads the config from a JSON file at `path`, or the defaults when no
    /// path is given. `TAXI_CO2_DB` overrides the database path either way.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config {}", path.display()))?;
                serde_json::from_str(&content)
                    .with_context(|| format!("parsing config {}", path.display()))?
            }
            None => Self::default(),
        };

        if let Ok(database) = std::env::var(DATABASE_ENV) {
            if !database.is_empty() {
                config.database = PathBuf::from(database);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.classes.is_empty() {
            bail!("config lists no vehicle classes");
        }
        let mut seen = HashSet::new();
        for class in &self.classes {
            if !seen.insert(class.name.to_ascii_lowercase()) {
                bail!("vehicle class `{}` is listed twice", class.name);
            }
        }
        self.years()?;
        Ok(())
    }

    pub fn years(&self) -> Result<YearRange> {
        Ok(YearRange::new(self.year_min, self.year_max)?)
    }

    /// Looks a class up by name, case-insensitively.
    pub fn class(&self, name: &str) -> Result<&ClassConfig> {
        self.classes
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
            .with_context(|| format!("unknown vehicle class `{name}`"))
    }
}
