//! Closed-loop dispensing engine.
//!
//! Drives the valve bank from live load-cell readings: pours each part of a
//! recipe to its target weight, detects stalled flow (empty ingredient
//! source), measures the drip that follows valve closure and feeds it back
//! into the next pour, and honors cancellation and container removal at
//! every sample point.

use std::sync::Arc;
use std::time::Duration;

use eyre::WrapErr;
use mixer_traits::{Clock, Indicator, LightEffect, MonotonicClock, PinBank, Scale};

use crate::error::{BuildError, Result, map_adapter_error};
use crate::job::{GlobalMode, JobSource, JobStatus, LogLevel, Part, Recipe};
use crate::progress::{BLUE, YELLOW, compute_progress, progress_effect};
use crate::state::{MixerRuntimeState, StatePersist};
use crate::valves::ValveBank;

/// Read-only thresholds for the control loop, loaded from shared
/// configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineTuning {
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
    /// Loop pacing; also the worst-case cancellation latency.
    pub sample_period_ms: u64,
    /// Max wait per scale read (ms).
    pub sensor_timeout_ms: u64,
}

impl Default for EngineTuning {
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

impl From<&mixer_config::EngineCfg> for EngineTuning {
    fn from(cfg: &mixer_config::EngineCfg) -> Self {
        Self {
            glass_weight_g: cfg.glass_weight_g,
            empty_delta_g: cfg.empty_delta_g,
            empty_window_ms: cfg.empty_window_ms,
            settle_delta_g: cfg.settle_delta_g,
            settle_band_g: cfg.settle_band_g,
            sample_period_ms: cfg.sample_period_ms,
            sensor_timeout_ms: cfg.sensor_timeout_ms,
        }
    }
}

/// Running totals for one recipe. The reported progress only ever moves
/// forward within a job.
#[derive(Debug, Clone, Copy)]
struct MixTally {
    total_g: f64,
    mixed_g: f64,
    reported: u8,
}

/// How one part's inner loop ended.
struct PourOutcome {
    completed: bool,
    poured_g: f64,
}

/// The dispensing control engine. Owns the sensor, actuator and light
/// handles for the duration of a job; the job source is polled for status
/// on every sample.
pub struct MixEngine<S, P, I, J>
where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    scale: S,
    valves: ValveBank<P>,
    light: I,
    jobs: J,
    state: MixerRuntimeState,
    persist: Box<dyn StatePersist>,
    tuning: EngineTuning,
    clock: Arc<dyn Clock + Send + Sync>,
}

/// Validate and assemble a `MixEngine`. The persisted calibration in
/// `state` is applied to the scale here, so readings are in calibrated
/// grams from the first sample.
#[allow(clippy::too_many_arguments)]
pub fn build_engine<S, P, I, J>(
    mut scale: S,
    valves: ValveBank<P>,
    light: I,
    jobs: J,
    tuning: EngineTuning,
    state: MixerRuntimeState,
    persist: Box<dyn StatePersist>,
    clock: Option<Box<dyn Clock + Send + Sync>>,
) -> Result<MixEngine<S, P, I, J>>
where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    if state.run_on_weight.len() != valves.valve_count() {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "run-on table size must match valve count",
        )));
    }
    if state.run_on_weight.iter().any(|g| !(g.is_finite() && *g >= 0.0)) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "run-on weights must be finite and >= 0",
        )));
    }
    if !(tuning.glass_weight_g.is_finite() && tuning.glass_weight_g > 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "glass_weight_g must be finite and > 0",
        )));
    }
    if !(tuning.empty_delta_g.is_finite() && tuning.empty_delta_g >= 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "empty_delta_g must be finite and >= 0",
        )));
    }
    if tuning.empty_window_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "empty_window_ms must be >= 1",
        )));
    }
    if !(tuning.settle_delta_g.is_finite() && tuning.settle_delta_g > 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "settle_delta_g must be finite and > 0",
        )));
    }
    if !(tuning.settle_band_g.is_finite() && tuning.settle_band_g > 0.0) {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "settle_band_g must be finite and > 0",
        )));
    }
    if tuning.sample_period_ms == 0 || tuning.sample_period_ms > 1_000 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "sample_period_ms must be in 1..=1000",
        )));
    }
    if tuning.sensor_timeout_ms == 0 {
        return Err(eyre::Report::new(BuildError::InvalidConfig(
            "sensor_timeout_ms must be >= 1",
        )));
    }

    scale.set_offset(state.scale_offset);
    scale.set_ratio(state.scale_ratio);

    let clock: Arc<dyn Clock + Send + Sync> = match clock {
        Some(b) => Arc::from(b),
        None => Arc::new(MonotonicClock::new()),
    };

    Ok(MixEngine {
        scale,
        valves,
        light,
        jobs,
        state,
        persist,
        tuning,
        clock,
    })
}

impl<S, P, I, J> MixEngine<S, P, I, J>
where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    /// True when `weight_g` can only be explained by a container on the
    /// scale; the boundary itself counts as present.
    pub fn container_present(&self, weight_g: f64) -> bool {
        weight_g >= self.tuning.glass_weight_g
    }

    /// Latest calibrated reading in grams.
    pub fn read_weight(&mut self) -> Result<f64> {
        let timeout = Duration::from_millis(self.tuning.sensor_timeout_ms);
        self.scale
            .read_grams(timeout)
            .map_err(|e| eyre::Report::new(map_adapter_error(&*e)))
            .wrap_err("reading scale")
    }

    pub fn state(&self) -> &MixerRuntimeState {
        &self.state
    }

    pub fn tuning(&self) -> &EngineTuning {
        &self.tuning
    }

    pub fn jobs_mut(&mut self) -> &mut J {
        &mut self.jobs
    }

    pub fn valves(&self) -> &ValveBank<P> {
        &self.valves
    }

    pub fn light_apply(&mut self, effect: LightEffect) {
        self.light.apply(effect);
    }

    pub fn light_tick(&mut self) {
        self.light.tick();
    }

    pub(crate) fn pace(&self) {
        self.clock
            .sleep(Duration::from_millis(self.tuning.sample_period_ms));
    }

    /// Status write, fire-and-forget: a failed write is logged and never
    /// blocks the pour.
    pub fn try_update_status(&mut self, job_id: &str, status: JobStatus) {
        if let Err(e) = self.jobs.update_status(job_id, status) {
            tracing::warn!(error = %e, job_id, status = %status, "update_status failed");
        }
    }

    /// Operator-visible log event, fire-and-forget.
    pub fn job_log(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!("{message}"),
            LogLevel::Warning => tracing::warn!("{message}"),
            LogLevel::Error => tracing::error!("{message}"),
        }
        if let Err(e) = self.jobs.append_log(level, &message) {
            tracing::warn!(error = %e, "append_log failed");
        }
    }

    fn job_canceled(&mut self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.job_status(job_id)? == JobStatus::Canceled)
    }

    fn persist_state(&mut self) {
        if let Err(e) = self.persist.persist(&self.state) {
            tracing::warn!(error = %e, "persisting runtime state failed");
        }
    }

    fn report_progress(&mut self, job_id: &str, tally: &mut MixTally, mixed_g: f64) {
        // Clamped to its running maximum: reported progress never moves
        // backwards within a job.
        let next = compute_progress(mixed_g, tally.total_g).max(tally.reported);
        if next != tally.reported {
            tally.reported = next;
            if let Err(e) = self.jobs.update_progress(job_id, next) {
                tracing::warn!(error = %e, progress = next, "update_progress failed");
            }
        }
        self.light.apply(progress_effect(next));
    }

    /// Pour every part of the recipe in order. Returns the completion
    /// verdict: `false` means canceled, container removed, or a refill
    /// that could not be resolved. Adapter failures are errors; even then
    /// the valve and pump have been shut off before this returns.
    pub fn mix_recipe(&mut self, job_id: &str, recipe: &Recipe) -> Result<bool> {
        let total_g: f64 = recipe.parts.iter().map(|p| p.amount_ml).sum();
        let mut tally = MixTally {
            total_g,
            mixed_g: 0.0,
            reported: 0,
        };

        let mut completed = true;
        for part in &recipe.parts {
            if !self.pour_part(job_id, part, &mut tally)? {
                completed = false;
                break;
            }
        }

        if completed {
            self.report_progress(job_id, &mut tally, total_g);
            self.job_log(LogLevel::Debug, "Mixing successfully completed".to_string());
        }
        Ok(completed)
    }

    /// One part: tare, actuate, pour to target, and (for valved parts)
    /// measure the run-on drip.
    fn pour_part(&mut self, job_id: &str, part: &Part, tally: &mut MixTally) -> Result<bool> {
        let ingredient = self.jobs.find_ingredient(&part.ingredient_id)?;
        let valve = ingredient.valve;
        let tare_g = self.read_weight()?;

        tracing::debug!(
            ingredient = %ingredient.name,
            amount_ml = part.amount_ml,
            valve = ingredient.valve_number(),
            "pouring part"
        );
        self.job_log(
            LogLevel::Debug,
            format!(
                "Mixing {}ml of ingredient {}",
                part.amount_ml, ingredient.name
            ),
        );
        if let Err(e) = self.jobs.update_current_part(job_id, part) {
            tracing::warn!(error = %e, "update_current_part failed");
        }

        if let Some(v) = valve {
            self.valves.open(v)?;
        }

        // Subtract the drip measured last time so the delivered volume
        // converges on the true target over repeated pours.
        let run_on_g = valve.map_or(0.0, |v| self.state.run_on_weight[usize::from(v)]);
        let target_g = (part.amount_ml - run_on_g).max(1.0);

        // The loop result is captured so this close can never be skipped,
        // error paths included.
        let poured = self.pour_until(job_id, valve, tare_g, target_g, tally);
        if let Err(e) = self.valves.close() {
            tracing::error!(error = %e, "closing valve after pour failed");
        }
        let PourOutcome {
            completed,
            poured_g,
        } = poured?;

        if !completed {
            return Ok(false);
        }
        match valve {
            // Hand-poured part: nothing drips, but the nominal amount still
            // counts toward the total so progress stays monotone.
            None => {
                tally.mixed_g += part.amount_ml;
                Ok(true)
            }
            Some(v) => {
                if self.settle_run_on(job_id, v, part.amount_ml, poured_g, tally)? {
                    tally.mixed_g += part.amount_ml;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Inner sampling loop for one part. Exits when the target weight is
    /// reached, the pour is canceled or the container leaves the scale.
    fn pour_until(
        &mut self,
        job_id: &str,
        valve: Option<u8>,
        tare_g: f64,
        target_g: f64,
        tally: &mut MixTally,
    ) -> Result<PourOutcome> {
        let mut poured_g = 0.0_f64;
        let mut flow_epoch = self.clock.now();
        while poured_g < target_g {
            self.report_progress(job_id, tally, tally.mixed_g + poured_g);
            let weight_g = self.read_weight()?;

            // Flow is stagnant when the reading has not advanced past the
            // last poured amount by more than the configured delta; the
            // timer only resets when it has. Slow pours keep resetting it,
            // an exhausted ingredient does not.
            if poured_g + self.tuning.empty_delta_g > weight_g - tare_g {
                if self.clock.ms_since(flow_epoch) >= self.tuning.empty_window_ms {
                    let resumed = self.wait_for_refill(job_id, valve)?;
                    flow_epoch = self.clock.now();
                    if !resumed {
                        return Ok(PourOutcome {
                            completed: false,
                            poured_g,
                        });
                    }
                    if valve.is_none() {
                        // The operator resolved a hand-poured part by hand.
                        return Ok(PourOutcome {
                            completed: true,
                            poured_g,
                        });
                    }
                }
            } else {
                flow_epoch = self.clock.now();
            }

            let mut keep_going = true;
            if !self.container_present(weight_g) {
                self.job_log(
                    LogLevel::Warning,
                    "Glass was lifted while mixing cocktail".to_string(),
                );
                keep_going = false;
            }
            if self.job_canceled(job_id)? {
                self.job_log(
                    LogLevel::Warning,
                    "Mixing was canceled by user".to_string(),
                );
                keep_going = false;
            }
            poured_g = weight_g - tare_g;
            if !keep_going {
                return Ok(PourOutcome {
                    completed: false,
                    poured_g,
                });
            }
            self.light.tick();
            self.pace();
        }
        Ok(PourOutcome {
            completed: true,
            poured_g,
        })
    }

    /// Stall recovery: report the empty ingredient and block until the
    /// external controller and the operator have worked through the
    /// two-phase refill handshake.
    ///
    /// Phase one waits for the shared mode to leave `Mixing`, the
    /// acknowledgement that the empty notice was received. Racing ahead
    /// here would let this write cross the controller's own transition.
    /// Phase two waits for the operator to finish the refill (mode leaves
    /// `IngredientEmpty`). Both phases re-check container presence and
    /// cancellation on every poll.
    fn wait_for_refill(&mut self, job_id: &str, valve: Option<u8>) -> Result<bool> {
        if let Err(e) = self.valves.close() {
            tracing::error!(error = %e, "closing valve for refill failed");
        }

        // Log first, then the status transition: the log stream alone has
        // to reconstruct the causal chain.
        let valve_number = valve.map_or(0, |v| v + 1);
        self.job_log(
            LogLevel::Warning,
            format!("Ingredient at valve {valve_number} empty"),
        );
        self.try_update_status(job_id, JobStatus::Error);
        if let Err(e) = self.jobs.notify_ingredient_empty(valve_number) {
            tracing::warn!(error = %e, "notify_ingredient_empty failed");
        }

        while self.jobs.global_mode()? == GlobalMode::Mixing {
            if !self.refill_wait_ok(job_id, valve_number, "waiting for acknowledgement")? {
                return Ok(false);
            }
            self.pace();
        }

        self.light.apply(LightEffect::Blink {
            color: YELLOW,
            period_ms: 1000,
        });
        while self.jobs.global_mode()? == GlobalMode::IngredientEmpty {
            if !self.refill_wait_ok(job_id, valve_number, "refilling ingredient")? {
                return Ok(false);
            }
            self.light.tick();
            self.pace();
        }

        self.try_update_status(job_id, JobStatus::Mixing);
        if let Some(v) = valve {
            self.valves.open(v)?;
        }
        Ok(true)
    }

    fn refill_wait_ok(&mut self, job_id: &str, valve_number: u8, phase: &str) -> Result<bool> {
        let weight_g = self.read_weight()?;
        if !self.container_present(weight_g) {
            self.job_log(
                LogLevel::Warning,
                format!("Glass was lifted while {phase} for valve {valve_number}"),
            );
            return Ok(false);
        }
        if self.job_canceled(job_id)? {
            self.job_log(
                LogLevel::Warning,
                format!("Mixing was canceled by user while {phase} for valve {valve_number}"),
            );
            return Ok(false);
        }
        Ok(true)
    }

    /// Measure the drip that follows valve closure and store it as the
    /// valve's new run-on weight. Replaces rather than averages: the most
    /// recent pour is taken as the most representative.
    fn settle_run_on(
        &mut self,
        job_id: &str,
        valve: u8,
        part_amount_ml: f64,
        poured_g: f64,
        tally: &mut MixTally,
    ) -> Result<bool> {
        let start_g = self.read_weight()?;
        if !self.container_present(start_g) || self.job_canceled(job_id)? {
            return Ok(false);
        }

        let valve_number = valve + 1;
        let mut newer_g = start_g;
        loop {
            let older_g = newer_g;
            newer_g = self.read_weight()?;
            if !self.container_present(newer_g) || newer_g < start_g {
                self.job_log(
                    LogLevel::Warning,
                    format!(
                        "Glass was lifted while waiting for run on weight for valve {valve_number}"
                    ),
                );
                return Ok(false);
            }
            if self.job_canceled(job_id)? {
                self.job_log(
                    LogLevel::Warning,
                    format!(
                        "Mixing was canceled by user while waiting for run on weight for valve {valve_number}"
                    ),
                );
                return Ok(false);
            }
            if newer_g < older_g + self.tuning.settle_delta_g {
                break;
            }
            // Progress may move during the drip, but never past the part's
            // nominal amount.
            let mixed_g = tally.mixed_g + poured_g + (older_g - start_g);
            if mixed_g <= tally.mixed_g + part_amount_ml {
                self.report_progress(job_id, tally, mixed_g);
            }
            self.light.tick();
            self.pace();
        }

        let run_on_g = newer_g - start_g;
        if run_on_g >= 0.0 {
            self.state.run_on_weight[usize::from(valve)] = run_on_g;
            self.persist_state();
            self.job_log(
                LogLevel::Debug,
                format!("Set run-on-weight to {run_on_g:.2}g for valve {valve_number}"),
            );
        }
        Ok(true)
    }

    /// Wait until a container is on the scale and standing still (no
    /// sample moving more than the settle band from the previous one).
    /// Returns `false` when the job is canceled during the wait.
    pub fn wait_for_container(&mut self, job_id: &str) -> Result<bool> {
        let mut current_g = self.read_weight()?;
        if self.container_present(current_g) {
            return Ok(true);
        }
        self.try_update_status(job_id, JobStatus::WaitingForGlass);
        self.light.apply(LightEffect::Pulse {
            color: BLUE,
            period_ms: 1000,
        });
        loop {
            if self.job_canceled(job_id)? {
                self.job_log(
                    LogLevel::Warning,
                    "Mixing was canceled while waiting for glass".to_string(),
                );
                return Ok(false);
            }
            self.light.tick();
            self.pace();
            let previous_g = current_g;
            current_g = self.read_weight()?;
            if self.container_present(current_g)
                && (current_g - previous_g).abs() <= self.tuning.settle_band_g
            {
                return Ok(true);
            }
        }
    }

    /// Block until the container has been taken off the scale.
    pub fn wait_until_removed(&mut self) -> Result<()> {
        loop {
            let weight_g = self.read_weight()?;
            if !self.container_present(weight_g) {
                return Ok(());
            }
            self.light.tick();
            self.clock.sleep(Duration::from_millis(100));
        }
    }

    /// Record the averaged raw reading as the new zero point and persist
    /// it. Returns the offset.
    pub fn tare(&mut self) -> Result<f64> {
        let timeout = Duration::from_millis(self.tuning.sensor_timeout_ms);
        let offset_raw = self
            .scale
            .average_raw(timeout)
            .map_err(|e| eyre::Report::new(map_adapter_error(&*e)))
            .wrap_err("sampling tare weight")?;
        self.scale.set_offset(offset_raw);
        self.state.scale_offset = offset_raw;
        self.persist_state();
        tracing::info!(offset_raw, "scale tared");
        Ok(offset_raw)
    }

    /// With the reference mass on the (previously tared) scale, derive and
    /// persist the counts-per-gram ratio. Returns the ratio.
    pub fn calibrate(&mut self, known_mass_g: f64) -> Result<f64> {
        if !(known_mass_g.is_finite() && known_mass_g > 0.0) {
            return Err(eyre::Report::new(crate::error::MixerError::Config(
                "reference mass must be finite and > 0".to_string(),
            )));
        }
        let timeout = Duration::from_millis(self.tuning.sensor_timeout_ms);
        let averaged = self
            .scale
            .average_raw(timeout)
            .map_err(|e| eyre::Report::new(map_adapter_error(&*e)))
            .wrap_err("sampling reference mass")?;
        let ratio = (averaged - self.state.scale_offset) / known_mass_g;
        self.scale.set_ratio(ratio);
        self.state.scale_ratio = ratio;
        self.persist_state();
        tracing::info!(ratio, known_mass_g, "scale ratio calibrated");
        Ok(ratio)
    }
}
