#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas, catalog loading and runtime-state persistence for the
//! mixing rig.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated.
//! - The ingredient catalog is a strict-header CSV; recipes are a TOML
//!   table array.
//! - `StateStore` persists the self-tuned runtime state (run-on weights,
//!   scale calibration) back to disk after every mutation.
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Ingredient catalog CSV schema.
///
/// Expected headers:
/// id,name,valve
///
/// `valve` is the 1-based pump number shown to operators; `0` marks a
/// hand-poured ingredient with no valve of its own.
///
/// Example:
/// id,name,valve
/// vodka,Vodka,1
/// lime,Lime cordial,2
/// sugar,Sugar syrup,0
#[derive(Debug, Deserialize, Clone)]
pub struct IngredientRow {
    pub id: String,
    pub name: String,
    pub valve: u8,
}

#[derive(Debug, Deserialize)]
pub struct Pins {
    /// Output pins per valve, ordered by internal valve index.
    pub valve_pins: Vec<u8>,
    pub pump_pin: u8,
    pub hx711_dt: Option<u8>,
    pub hx711_sck: Option<u8>,
}

/// Engine tuning thresholds, read-only to the control loop.
#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct EngineCfg {
    /// Minimum weight that counts as "a glass is on the scale" (g).
    pub glass_weight_g: f64,
    /// Weight advance below this delta counts as stagnant flow (g).
    pub empty_delta_g: f64,
    /// Stagnant flow for at least this long means the ingredient is empty.
    pub empty_window_ms: u64,
    /// Run-on settling: consecutive samples closer than this are settled (g).
    pub settle_delta_g: f64,
    /// Glass placement debounce band between consecutive samples (g).
    pub settle_band_g: f64,
    /// Control-loop pacing; also the worst-case cancellation latency.
    pub sample_period_ms: u64,
    /// Max wait per scale read (ms).
    pub sensor_timeout_ms: u64,
}

impl Default for EngineCfg {
    fn default() -> Self {
        Self {
            glass_weight_g: 120.0,
            empty_delta_g: 2.0,
            empty_window_ms: 5_000,
            settle_delta_g: 0.1,
            settle_band_g: 1.0,
            sample_period_ms: 50,
            sensor_timeout_ms: 150,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct SessionCfg {
    /// Reference mass placed on the scale during ratio calibration (g).
    pub reference_mass_g: f64,
    /// Idle poll between service passes (ms).
    pub idle_poll_ms: u64,
    /// Seed for per-valve run-on weight before the first measured pour (g).
    pub run_on_seed_g: f64,
}

impl Default for SessionCfg {
    fn default() -> Self {
        Self {
            reference_mass_g: 500.0,
            idle_poll_ms: 50,
            run_on_seed_g: 5.0,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

/// Scale calibration persisted between runs.
#[derive(Debug, Deserialize, Serialize, Clone, Copy)]
pub struct PersistedCalibration {
    /// Raw-counts zero point.
    pub offset_raw: f64,
    /// Raw counts per gram.
    pub counts_per_gram: f64,
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub engine: EngineCfg,
    #[serde(default)]
    pub session: SessionCfg,
    #[serde(default)]
    pub logging: Logging,
    /// Optional persisted calibration; preferred at startup over defaults.
    #[serde(default)]
    pub calibration: Option<PersistedCalibration>,
    /// Where the self-tuned runtime state is written back to.
    #[serde(default)]
    pub state_file: Option<PathBuf>,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.valve_pins.is_empty() {
            eyre::bail!("pins.valve_pins must name at least one valve");
        }
        let mut seen = std::collections::HashSet::new();
        for &pin in self.pins.valve_pins.iter().chain([&self.pins.pump_pin]) {
            if !seen.insert(pin) {
                eyre::bail!("pin {pin} is assigned twice");
            }
        }

        // Engine tuning
        if !(self.engine.glass_weight_g.is_finite() && self.engine.glass_weight_g > 0.0) {
            eyre::bail!("engine.glass_weight_g must be finite and > 0");
        }
        if !(self.engine.empty_delta_g.is_finite() && self.engine.empty_delta_g >= 0.0) {
            eyre::bail!("engine.empty_delta_g must be finite and >= 0");
        }
        if self.engine.empty_window_ms == 0 {
            eyre::bail!("engine.empty_window_ms must be >= 1");
        }
        if !(self.engine.settle_delta_g.is_finite() && self.engine.settle_delta_g > 0.0) {
            eyre::bail!("engine.settle_delta_g must be finite and > 0");
        }
        if !(self.engine.settle_band_g.is_finite() && self.engine.settle_band_g > 0.0) {
            eyre::bail!("engine.settle_band_g must be finite and > 0");
        }
        if self.engine.sample_period_ms == 0 {
            eyre::bail!("engine.sample_period_ms must be >= 1");
        }
        if self.engine.sample_period_ms > 1_000 {
            eyre::bail!("engine.sample_period_ms above 1s makes cancellation unusably slow");
        }
        if self.engine.sensor_timeout_ms == 0 {
            eyre::bail!("engine.sensor_timeout_ms must be >= 1");
        }

        // Session
        if !(self.session.reference_mass_g.is_finite() && self.session.reference_mass_g > 0.0) {
            eyre::bail!("session.reference_mass_g must be finite and > 0");
        }
        if self.session.idle_poll_ms == 0 {
            eyre::bail!("session.idle_poll_ms must be >= 1");
        }
        if !(self.session.run_on_seed_g.is_finite() && self.session.run_on_seed_g >= 0.0) {
            eyre::bail!("session.run_on_seed_g must be finite and >= 0");
        }

        // Calibration
        if let Some(cal) = &self.calibration {
            if !cal.offset_raw.is_finite() {
                eyre::bail!("calibration.offset_raw must be finite");
            }
            if !(cal.counts_per_gram.is_finite() && cal.counts_per_gram != 0.0) {
                eyre::bail!("calibration.counts_per_gram must be finite and non-zero");
            }
        }

        Ok(())
    }
}

/// Load the ingredient catalog, enforcing the exact `id,name,valve` header
/// and 1-based valve numbers within the configured valve count.
pub fn load_ingredients_csv(path: &Path, valve_count: usize) -> eyre::Result<Vec<IngredientRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open ingredient CSV {:?}: {}", path, e))?;

    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["id", "name", "valve"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "ingredient CSV must have headers 'id,name,valve', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    let mut ids = std::collections::HashSet::new();
    for (idx, rec) in rdr.deserialize::<IngredientRow>().enumerate() {
        let row = match rec {
            Ok(row) => row,
            Err(e) => eyre::bail!("invalid CSV row {}: {}", idx + 2, e),
        };
        if row.id.trim().is_empty() || row.name.trim().is_empty() {
            eyre::bail!("CSV row {}: id and name must be non-empty", idx + 2);
        }
        if usize::from(row.valve) > valve_count {
            eyre::bail!(
                "CSV row {}: valve {} exceeds the configured {} valves",
                idx + 2,
                row.valve,
                valve_count
            );
        }
        if !ids.insert(row.id.clone()) {
            eyre::bail!("CSV row {}: duplicate ingredient id '{}'", idx + 2, row.id);
        }
        rows.push(row);
    }
    Ok(rows)
}

/// Recipe book TOML schema: `[[recipe]]` tables with ordered parts.
#[derive(Debug, Deserialize, Clone)]
pub struct RecipeBook {
    #[serde(default)]
    pub recipe: Vec<RecipeRow>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecipeRow {
    pub id: String,
    pub name: String,
    pub parts: Vec<PartRow>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PartRow {
    pub ingredient: String,
    pub amount_ml: f64,
}

pub fn load_recipes_toml(s: &str) -> eyre::Result<RecipeBook> {
    let book: RecipeBook = toml::from_str(s).map_err(|e| eyre::eyre!("parse recipe TOML: {e}"))?;
    let mut ids = std::collections::HashSet::new();
    for recipe in &book.recipe {
        if !ids.insert(recipe.id.clone()) {
            eyre::bail!("duplicate recipe id '{}'", recipe.id);
        }
        for part in &recipe.parts {
            if !(part.amount_ml.is_finite() && part.amount_ml > 0.0) {
                eyre::bail!(
                    "recipe '{}': part '{}' amount must be finite and > 0",
                    recipe.id,
                    part.ingredient
                );
            }
        }
    }
    Ok(book)
}

/// Runtime state persisted between processes: the self-tuned run-on weights
/// and the scale calibration constants.
#[derive(Debug, Deserialize, Serialize, Default, Clone, PartialEq)]
pub struct PersistedState {
    pub run_on_weight: Vec<f64>,
    pub scale_offset: f64,
    pub scale_ratio: f64,
}

/// TOML-backed store for `PersistedState`.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Read the persisted state; `Ok(None)` when no state was saved yet.
    pub fn load(&self) -> eyre::Result<Option<PersistedState>> {
        match std::fs::read_to_string(&self.path) {
            Ok(s) => {
                let state: PersistedState = toml::from_str(&s)
                    .map_err(|e| eyre::eyre!("parse state file {:?}: {}", self.path, e))?;
                Ok(Some(state))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(eyre::eyre!("read state file {:?}: {}", self.path, e)),
        }
    }

    pub fn save(&self, state: &PersistedState) -> eyre::Result<()> {
        let body = toml::to_string_pretty(state)
            .map_err(|e| eyre::eyre!("serialize runtime state: {e}"))?;
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| eyre::eyre!("create state dir {:?}: {}", dir, e))?;
        }
        std::fs::write(&self.path, body)
            .map_err(|e| eyre::eyre!("write state file {:?}: {}", self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
