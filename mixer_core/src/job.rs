//! Queue items, recipes, ingredients and the job-source interface.
//!
//! The job source is the remote read model the engine polls and the write
//! channel it reports through. Reads return the latest known snapshot and
//! may be momentarily stale; the engine re-polls instead of assuming its own
//! writes have propagated. The `status` field of a job is mutated by remote
//! actors (user cancellation) at any instant, so the engine never assumes
//! exclusive ownership of it.

use crate::error::Result;

pub type JobId = String;

/// Lifecycle of one queue item.
///
/// queued → (waiting_for_glass)? → mixing → {error ⇄ mixing}* →
/// {completed | canceled} → finished. `Error` is the transient
/// ingredient-empty sub-state, never terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    WaitingForGlass,
    Mixing,
    Error,
    Completed,
    Canceled,
    Finished,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::WaitingForGlass => "waiting_for_glass",
            Self::Mixing => "mixing",
            Self::Error => "error",
            Self::Completed => "completed",
            Self::Canceled => "canceled",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared rig mode, owned by the external controller. The engine reads it
/// every poll and only writes the forward transitions it is responsible for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlobalMode {
    Idle,
    Mixing,
    Tare,
    StartCalibrating,
    Calibrate,
    IngredientEmpty,
}

impl GlobalMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Mixing => "mixing",
            Self::Tare => "tare",
            Self::StartCalibrating => "start_calibrating",
            Self::Calibrate => "calibrate",
            Self::IngredientEmpty => "ingredient_empty",
        }
    }
}

impl std::fmt::Display for GlobalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an operator-visible log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Warning => "warning",
            Self::Error => "error",
        }
    }
}

/// One ingredient + volume entry within a recipe.
#[derive(Debug, Clone, PartialEq)]
pub struct Part {
    pub ingredient_id: String,
    pub amount_ml: f64,
}

/// Ordered list of parts; immutable once a job starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    pub parts: Vec<Part>,
}

/// Catalog entry. `valve` is the internal 0-based valve index; `None` is a
/// hand-poured ingredient with no valve of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingredient {
    pub id: String,
    pub name: String,
    pub valve: Option<u8>,
}

impl Ingredient {
    /// 1-based valve number used on every external surface; 0 means
    /// hand-poured. Internal index 0 is "first" externally.
    pub fn valve_number(&self) -> u8 {
        self.valve.map_or(0, |v| v + 1)
    }
}

/// One queued request to mix a specific recipe for a specific requester.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub recipe_id: String,
    pub user: String,
    pub status: JobStatus,
}

/// Remote queue, catalog and status store.
///
/// Writes are fire-and-forget from the engine's perspective: the engine
/// logs a reported failure and keeps going. Reads return the latest known
/// snapshot.
pub trait JobSource {
    /// Next job to run, if any.
    fn find_current_job(&mut self) -> Result<Option<Job>>;

    /// Latest status of the given job. Re-polled every sample iteration.
    fn job_status(&mut self, job_id: &str) -> Result<JobStatus>;

    fn update_status(&mut self, job_id: &str, status: JobStatus) -> Result<()>;
    fn update_progress(&mut self, job_id: &str, progress: u8) -> Result<()>;
    fn update_current_part(&mut self, job_id: &str, part: &Part) -> Result<()>;

    fn load_recipe(&mut self, recipe_id: &str) -> Result<Recipe>;
    fn find_ingredient(&mut self, ingredient_id: &str) -> Result<Ingredient>;

    fn global_mode(&mut self) -> Result<GlobalMode>;
    fn set_global_mode(&mut self, mode: GlobalMode) -> Result<()>;

    /// Live-weight diagnostics flag.
    fn scale_stream_enabled(&mut self) -> Result<bool>;
    fn publish_weight(&mut self, grams: f64) -> Result<()>;

    /// One-shot empty notice; `valve_number` is 1-based, 0 = hand-poured.
    fn notify_ingredient_empty(&mut self, valve_number: u8) -> Result<()>;

    fn append_log(&mut self, level: LogLevel, message: &str) -> Result<()>;
    fn append_history(&mut self, recipe_id: &str, user: &str) -> Result<()>;
}
