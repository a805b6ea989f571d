#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core mixing logic (hardware-agnostic).
//!
//! This crate provides the closed-loop dispensing engine for a multi-valve
//! cocktail rig. All hardware interactions go through the
//! `mixer_traits::Scale`, `mixer_traits::PinBank` and
//! `mixer_traits::Indicator` traits; the remote job queue is reached through
//! the `JobSource` trait.
//!
//! ## Architecture
//!
//! - **Jobs**: queue items, recipes, ingredients, job-source interface
//!   (`job` module)
//! - **Valves**: valve/pump pin mapping with energize ordering (`valves`)
//! - **Progress**: percent computation and the cosmetic color ramp
//!   (`progress`)
//! - **Engine**: pour loop, stall detection, refill handshake, run-on
//!   compensation, calibration (`engine`)
//! - **Session**: per-job state machine wrapping the engine (`session`)
//! - **State**: self-tuned runtime state and its persistence hook (`state`)
//!
//! ## Control model
//!
//! One synchronous loop paced by an injectable `Clock`. Job status is
//! re-read from the job source on every sample, so external cancellation
//! takes effect within one sample interval. Every exit path out of a pour
//! closes the valve and pump before returning.

pub mod engine;
pub mod error;
pub mod job;
pub mod mocks;
pub mod progress;
pub mod session;
pub mod state;
pub mod valves;

pub use engine::{EngineTuning, MixEngine, build_engine};
pub use error::{BuildError, MixerError, Result};
pub use job::{GlobalMode, Ingredient, Job, JobId, JobSource, JobStatus, LogLevel, Part, Recipe};
pub use progress::{compute_progress, progress_effect};
pub use session::Session;
pub use state::{MixerRuntimeState, NoopPersist, StatePersist};
pub use valves::ValveBank;
