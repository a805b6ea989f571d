//! Test and simulation doubles for the mixing engine.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mixer_traits::{Clock, Indicator, LightEffect, PinBank, PinLevel};

use crate::error::{MixerError, Result};
use crate::job::{GlobalMode, Ingredient, Job, JobSource, JobStatus, LogLevel, Part, Recipe};

/// Pin bank that records every write.
#[derive(Debug, Default)]
pub struct RecordingPins {
    pub writes: Vec<(u8, PinLevel)>,
}

impl RecordingPins {
    /// Last written level of a pin; pins start low.
    pub fn level(&self, pin: u8) -> PinLevel {
        self.writes
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map_or(PinLevel::Low, |(_, l)| *l)
    }

    /// Number of High writes to a pin.
    pub fn highs(&self, pin: u8) -> usize {
        self.writes
            .iter()
            .filter(|(p, l)| *p == pin && *l == PinLevel::High)
            .count()
    }
}

impl PinBank for RecordingPins {
    fn set_pin(
        &mut self,
        pin: u8,
        level: PinLevel,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.writes.push((pin, level));
        Ok(())
    }
}

/// Indicator that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct QuietLight;

impl Indicator for QuietLight {
    fn apply(&mut self, _effect: LightEffect) {}
    fn tick(&mut self) {}
}

/// Deterministic clock whose `sleep` advances virtual time instead of
/// blocking. Clones share the same timeline.
#[derive(Debug, Clone)]
pub struct ManualClock {
    origin: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    pub fn advance(&self, d: Duration) {
        if let Ok(mut off) = self.offset.lock() {
            *off = off.saturating_add(d);
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let off = self.offset.lock().map(|g| *g).unwrap_or(Duration::ZERO);
        self.origin + off
    }

    fn sleep(&self, d: Duration) {
        self.advance(d);
    }
}

/// Shared backing state for `MemoryJobs`: the queue item, the global mode,
/// catalog data, and a record of every write the engine makes. Tests and
/// the CLI mutate it from outside through the `Arc<Mutex<_>>`.
#[derive(Debug)]
pub struct JobBoard {
    pub job: Option<Job>,
    pub mode: GlobalMode,
    pub scale_stream: bool,
    pub recipes: HashMap<String, Recipe>,
    pub ingredients: HashMap<String, Ingredient>,
    pub status_writes: Vec<JobStatus>,
    pub progress_writes: Vec<u8>,
    pub part_writes: Vec<Part>,
    pub empty_notices: Vec<u8>,
    pub job_log: Vec<(LogLevel, String)>,
    pub history: Vec<(String, String)>,
    pub published_weights: Vec<f64>,
}

impl Default for JobBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl JobBoard {
    pub fn new() -> Self {
        Self {
            job: None,
            mode: GlobalMode::Idle,
            scale_stream: false,
            recipes: HashMap::new(),
            ingredients: HashMap::new(),
            status_writes: Vec::new(),
            progress_writes: Vec::new(),
            part_writes: Vec::new(),
            empty_notices: Vec::new(),
            job_log: Vec::new(),
            history: Vec::new(),
            published_weights: Vec::new(),
        }
    }

    pub fn with_job(mut self, job: Job) -> Self {
        self.job = Some(job);
        self
    }

    pub fn with_recipe(mut self, recipe: Recipe) -> Self {
        self.recipes.insert(recipe.id.clone(), recipe);
        self
    }

    pub fn with_ingredient(mut self, ingredient: Ingredient) -> Self {
        self.ingredients.insert(ingredient.id.clone(), ingredient);
        self
    }
}

/// In-memory `JobSource` over a shared `JobBoard`.
#[derive(Clone)]
pub struct MemoryJobs {
    board: Arc<Mutex<JobBoard>>,
}

impl MemoryJobs {
    pub fn new(board: JobBoard) -> Self {
        Self {
            board: Arc::new(Mutex::new(board)),
        }
    }

    pub fn shared(&self) -> Arc<Mutex<JobBoard>> {
        Arc::clone(&self.board)
    }

    fn with_board<T>(&self, f: impl FnOnce(&mut JobBoard) -> Result<T>) -> Result<T> {
        let mut board = self
            .board
            .lock()
            .map_err(|_| eyre::Report::new(MixerError::State("job board poisoned".into())))?;
        f(&mut board)
    }
}

impl JobSource for MemoryJobs {
    fn find_current_job(&mut self) -> Result<Option<Job>> {
        self.with_board(|b| {
            Ok(b.job
                .clone()
                .filter(|job| job.status == JobStatus::Queued))
        })
    }

    fn job_status(&mut self, job_id: &str) -> Result<JobStatus> {
        self.with_board(|b| match &b.job {
            Some(job) if job.id == job_id => Ok(job.status),
            _ => Err(eyre::Report::new(MixerError::JobSource(format!(
                "unknown job {job_id}"
            )))),
        })
    }

    fn update_status(&mut self, job_id: &str, status: JobStatus) -> Result<()> {
        self.with_board(|b| {
            if let Some(job) = b.job.as_mut().filter(|j| j.id == job_id) {
                job.status = status;
            }
            b.status_writes.push(status);
            Ok(())
        })
    }

    fn update_progress(&mut self, _job_id: &str, progress: u8) -> Result<()> {
        self.with_board(|b| {
            b.progress_writes.push(progress);
            Ok(())
        })
    }

    fn update_current_part(&mut self, _job_id: &str, part: &Part) -> Result<()> {
        let part = part.clone();
        self.with_board(move |b| {
            b.part_writes.push(part);
            Ok(())
        })
    }

    fn load_recipe(&mut self, recipe_id: &str) -> Result<Recipe> {
        self.with_board(|b| {
            b.recipes.get(recipe_id).cloned().ok_or_else(|| {
                eyre::Report::new(MixerError::JobSource(format!("unknown recipe {recipe_id}")))
            })
        })
    }

    fn find_ingredient(&mut self, ingredient_id: &str) -> Result<Ingredient> {
        self.with_board(|b| {
            b.ingredients.get(ingredient_id).cloned().ok_or_else(|| {
                eyre::Report::new(MixerError::JobSource(format!(
                    "unknown ingredient {ingredient_id}"
                )))
            })
        })
    }

    fn global_mode(&mut self) -> Result<GlobalMode> {
        self.with_board(|b| Ok(b.mode))
    }

    fn set_global_mode(&mut self, mode: GlobalMode) -> Result<()> {
        self.with_board(|b| {
            b.mode = mode;
            Ok(())
        })
    }

    fn scale_stream_enabled(&mut self) -> Result<bool> {
        self.with_board(|b| Ok(b.scale_stream))
    }

    fn publish_weight(&mut self, grams: f64) -> Result<()> {
        self.with_board(|b| {
            b.published_weights.push(grams);
            Ok(())
        })
    }

    fn notify_ingredient_empty(&mut self, valve_number: u8) -> Result<()> {
        self.with_board(|b| {
            b.empty_notices.push(valve_number);
            Ok(())
        })
    }

    fn append_log(&mut self, level: LogLevel, message: &str) -> Result<()> {
        let message = message.to_string();
        self.with_board(move |b| {
            b.job_log.push((level, message));
            Ok(())
        })
    }

    fn append_history(&mut self, recipe_id: &str, user: &str) -> Result<()> {
        let entry = (recipe_id.to_string(), user.to_string());
        self.with_board(move |b| {
            b.history.push(entry);
            Ok(())
        })
    }
}
