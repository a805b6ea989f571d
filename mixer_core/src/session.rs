//! Per-job sequencing around the engine.
//!
//! Thin orchestrator with no control content of its own: waits for a
//! container, runs the engine, waits for removal, and services the shared
//! calibration/diagnostics modes between jobs.

use mixer_traits::{Indicator, LightEffect, PinBank, Scale};

use crate::engine::MixEngine;
use crate::error::Result;
use crate::job::{GlobalMode, JobSource, JobStatus, LogLevel};
use crate::progress::{BLUE, RED, VIOLET};

pub struct Session<S, P, I, J>
where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    engine: MixEngine<S, P, I, J>,
    reference_mass_g: f64,
}

impl<S, P, I, J> Session<S, P, I, J>
where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    pub fn new(engine: MixEngine<S, P, I, J>, reference_mass_g: f64) -> Self {
        Self {
            engine,
            reference_mass_g,
        }
    }

    pub fn engine(&self) -> &MixEngine<S, P, I, J> {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MixEngine<S, P, I, J> {
        &mut self.engine
    }

    /// Serve jobs until the process is stopped. A failed pass is logged and
    /// the loop keeps going: the rig stays available rather than crashing
    /// on a single fault.
    pub fn run_forever(&mut self) {
        self.engine.job_log(LogLevel::Debug, "Mixer started".to_string());
        if let Err(e) = self.engine.jobs_mut().set_global_mode(GlobalMode::Idle) {
            tracing::warn!(error = %e, "set_global_mode failed");
        }
        self.engine.light_apply(LightEffect::Rainbow { period_ms: 20_000 });
        loop {
            if let Err(e) = self.service_once() {
                tracing::error!(error = %e, "service pass failed");
                self.engine
                    .job_log(LogLevel::Error, format!("Unexpected error: {e:#}"));
            }
        }
    }

    /// One service pass: run the next queued job if there is one, then
    /// handle calibration modes and the live-weight stream.
    pub fn service_once(&mut self) -> Result<()> {
        self.service_queue()?;
        self.service_mode()?;
        self.service_scale_stream()?;
        self.engine.light_tick();
        self.engine.pace();
        Ok(())
    }

    fn service_queue(&mut self) -> Result<()> {
        let Some(job) = self.engine.jobs_mut().find_current_job()? else {
            return Ok(());
        };
        if let Err(e) = self.engine.jobs_mut().set_global_mode(GlobalMode::Mixing) {
            tracing::warn!(error = %e, "set_global_mode failed");
        }

        let mut completed = self.engine.wait_for_container(&job.id)?;
        if completed {
            self.engine.try_update_status(&job.id, JobStatus::Mixing);
            self.engine.light_apply(LightEffect::Solid(VIOLET));
            let recipe = self.engine.jobs_mut().load_recipe(&job.recipe_id)?;
            self.engine
                .job_log(LogLevel::Debug, format!("Mixing cocktail {}", recipe.name));
            completed = self.engine.mix_recipe(&job.id, &recipe)?;
        }

        if completed {
            self.engine.try_update_status(&job.id, JobStatus::Completed);
            if let Err(e) = self
                .engine
                .jobs_mut()
                .append_history(&job.recipe_id, &job.user)
            {
                tracing::warn!(error = %e, "append_history failed");
            }
            self.engine.light_apply(LightEffect::Pulse {
                color: BLUE,
                period_ms: 1000,
            });
        } else {
            self.engine.try_update_status(&job.id, JobStatus::Canceled);
            self.engine.light_apply(LightEffect::Blink {
                color: RED,
                period_ms: 1000,
            });
        }

        self.engine.wait_until_removed()?;
        self.engine.light_apply(LightEffect::Fade {
            color: RED,
            ms: 200,
        });
        self.engine.try_update_status(&job.id, JobStatus::Finished);
        self.engine
            .job_log(LogLevel::Debug, format!("Finished item {} from queue", job.id));
        self.engine.light_apply(LightEffect::Rainbow { period_ms: 20_000 });
        if let Err(e) = self.engine.jobs_mut().set_global_mode(GlobalMode::Idle) {
            tracing::warn!(error = %e, "set_global_mode failed");
        }
        Ok(())
    }

    fn service_mode(&mut self) -> Result<()> {
        match self.engine.jobs_mut().global_mode()? {
            GlobalMode::Tare => {
                self.engine.tare()?;
                self.set_mode_idle();
            }
            GlobalMode::StartCalibrating => {
                let _offset = self.engine.tare()?;
                // Operator-paced: wait for the reference mass to be placed
                // and confirmed. A reset to Idle abandons the procedure.
                loop {
                    match self.engine.jobs_mut().global_mode()? {
                        GlobalMode::Calibrate => break,
                        GlobalMode::Idle => return Ok(()),
                        _ => self.engine.pace(),
                    }
                }
                self.engine.calibrate(self.reference_mass_g)?;
                self.set_mode_idle();
            }
            _ => {}
        }
        Ok(())
    }

    fn service_scale_stream(&mut self) -> Result<()> {
        if self.engine.jobs_mut().scale_stream_enabled()? {
            let weight_g = self.engine.read_weight()?;
            if let Err(e) = self.engine.jobs_mut().publish_weight(weight_g) {
                tracing::warn!(error = %e, "publish_weight failed");
            }
        }
        Ok(())
    }

    fn set_mode_idle(&mut self) {
        if let Err(e) = self.engine.jobs_mut().set_global_mode(GlobalMode::Idle) {
            tracing::warn!(error = %e, "set_global_mode failed");
        }
    }
}
