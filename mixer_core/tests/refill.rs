//! Stall detection and the two-phase refill handshake.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixer_core::mocks::{JobBoard, ManualClock, MemoryJobs, QuietLight, RecordingPins};
use mixer_core::{
    EngineTuning, GlobalMode, Ingredient, Job, JobStatus, LogLevel, MixEngine, MixerRuntimeState,
    NoopPersist, Part, Recipe, ValveBank, build_engine,
};
use mixer_traits::{PinLevel, Scale};

/// Scale that replays a grams sequence and plays back external-controller
/// actions (mode flips, cancellation) keyed on the read index.
struct HandshakeScale {
    readings: Vec<f64>,
    idx: usize,
    board: Arc<Mutex<JobBoard>>,
    mode_at_read: Vec<(usize, GlobalMode)>,
    cancel_at_read: Option<usize>,
}

impl HandshakeScale {
    fn new(readings: impl Into<Vec<f64>>, board: Arc<Mutex<JobBoard>>) -> Self {
        Self {
            readings: readings.into(),
            idx: 0,
            board,
            mode_at_read: Vec::new(),
            cancel_at_read: None,
        }
    }

    fn mode_at_read(mut self, idx: usize, mode: GlobalMode) -> Self {
        self.mode_at_read.push((idx, mode));
        self
    }

    fn cancel_at_read(mut self, idx: usize) -> Self {
        self.cancel_at_read = Some(idx);
        self
    }
}

impl Scale for HandshakeScale {
    fn read_grams(&mut self, _timeout: Duration) -> Result<f64, Box<dyn Error + Send + Sync>> {
        if let Ok(mut board) = self.board.lock() {
            for (at, mode) in &self.mode_at_read {
                if *at == self.idx {
                    board.mode = *mode;
                }
            }
            if self.cancel_at_read == Some(self.idx)
                && let Some(job) = board.job.as_mut()
            {
                job.status = JobStatus::Canceled;
            }
        }
        let v = if self.idx < self.readings.len() {
            self.readings[self.idx]
        } else {
            self.readings.last().copied().unwrap_or(0.0)
        };
        self.idx += 1;
        Ok(v)
    }

    fn average_raw(&mut self, _timeout: Duration) -> Result<f64, Box<dyn Error + Send + Sync>> {
        Ok(0.0)
    }

    fn set_offset(&mut self, _offset_raw: f64) {}
    fn set_ratio(&mut self, _counts_per_gram: f64) {}
}

fn tuning() -> EngineTuning {
    EngineTuning {
        glass_weight_g: 100.0,
        empty_delta_g: 2.0,
        empty_window_ms: 200,
        settle_delta_g: 0.1,
        settle_band_g: 1.0,
        sample_period_ms: 50,
        sensor_timeout_ms: 150,
    }
}

fn board(valve: Option<u8>, amount_ml: f64) -> JobBoard {
    let mut b = JobBoard::new()
        .with_job(Job {
            id: "job-1".into(),
            recipe_id: "single".into(),
            user: "anna".into(),
            status: JobStatus::Mixing,
        })
        .with_recipe(Recipe {
            id: "single".into(),
            name: "Single".into(),
            parts: vec![Part {
                ingredient_id: "ing".into(),
                amount_ml,
            }],
        })
        .with_ingredient(Ingredient {
            id: "ing".into(),
            name: "Ingredient".into(),
            valve,
        });
    // The controller marked the rig busy when the job started.
    b.mode = GlobalMode::Mixing;
    b
}

type TestEngine = MixEngine<HandshakeScale, RecordingPins, QuietLight, MemoryJobs>;

fn engine_for(
    board: JobBoard,
    rig: impl FnOnce(Arc<Mutex<JobBoard>>) -> HandshakeScale,
) -> (TestEngine, Arc<Mutex<JobBoard>>) {
    let jobs = MemoryJobs::new(board);
    let shared = jobs.shared();
    let scale = rig(Arc::clone(&shared));
    let engine = build_engine(
        scale,
        ValveBank::new(RecordingPins::default(), vec![40, 41], 14),
        QuietLight,
        jobs,
        tuning(),
        MixerRuntimeState::new(2),
        Box::new(NoopPersist),
        Some(Box::new(ManualClock::new())),
    )
    .expect("build engine");
    (engine, shared)
}

fn single_recipe(board: &Arc<Mutex<JobBoard>>) -> Recipe {
    board.lock().unwrap().recipes.get("single").cloned().expect("recipe")
}

#[test]
fn stall_triggers_handshake_and_pour_resumes() {
    // Stagnant weight for a full detection window, then the operator works
    // through the handshake and the pour finishes from where it stopped.
    //
    // Reads: tare, 5 stagnant pour samples (stall at the fifth), 4 samples
    // during the two refill waits, then flow back up to target and settle.
    let mut readings = vec![500.0; 10];
    readings.extend([505.0, 510.0, 515.0, 520.0, 525.0]);
    readings.extend([525.0, 526.0, 527.0, 527.0]);

    let (mut engine, shared) = engine_for(board(Some(0), 30.0), |b| {
        HandshakeScale::new(readings, b)
            .mode_at_read(7, GlobalMode::IngredientEmpty)
            .mode_at_read(9, GlobalMode::Mixing)
    });
    let recipe = single_recipe(&shared);

    let completed = engine.mix_recipe("job-1", &recipe).expect("mix ok");
    assert!(completed, "pour should resume and finish after refill");

    // The drip after the resumed pour replaces the seeded run-on weight.
    assert!((engine.state().run_on_weight[0] - 2.0).abs() < 1e-9);

    let pins = engine.valves().pins();
    assert_eq!(pins.highs(40), 2, "valve opened once, then reopened once");
    assert_eq!(pins.highs(14), 2);
    assert_eq!(pins.level(40), PinLevel::Low);
    assert_eq!(pins.level(14), PinLevel::Low);

    let b = shared.lock().unwrap();
    assert_eq!(b.empty_notices, vec![1], "one-shot, 1-based valve number");
    assert_eq!(
        b.status_writes,
        vec![JobStatus::Error, JobStatus::Mixing],
        "error is a transient sub-state nested inside mixing"
    );
    assert!(
        b.job_log
            .iter()
            .any(|(lvl, msg)| *lvl == LogLevel::Warning && msg.contains("valve 1 empty"))
    );
}

#[test]
fn cancellation_during_acknowledgement_wait_aborts_recovery() {
    // The controller never acknowledges; the user cancels instead. The
    // valve must stay closed and the job ends incomplete.
    let readings = vec![500.0; 9];

    let (mut engine, shared) = engine_for(board(Some(0), 30.0), |b| {
        HandshakeScale::new(readings, b).cancel_at_read(8)
    });
    let recipe = single_recipe(&shared);

    let completed = engine.mix_recipe("job-1", &recipe).expect("mix ok");
    assert!(!completed);
    assert!((engine.state().run_on_weight[0] - 5.0).abs() < 1e-9, "no run-on update");

    let pins = engine.valves().pins();
    assert_eq!(pins.highs(40), 1, "never reopened");
    assert_eq!(pins.level(40), PinLevel::Low);
    assert_eq!(pins.level(14), PinLevel::Low);

    let b = shared.lock().unwrap();
    assert_eq!(b.status_writes, vec![JobStatus::Error]);
    assert_eq!(b.empty_notices, vec![1]);
}

#[test]
fn glass_removed_during_refill_aborts_recovery() {
    let mut readings = vec![500.0; 8];
    readings.push(20.0);

    let (mut engine, shared) = engine_for(board(Some(0), 30.0), |b| {
        HandshakeScale::new(readings, b).mode_at_read(7, GlobalMode::IngredientEmpty)
    });
    let recipe = single_recipe(&shared);

    let completed = engine.mix_recipe("job-1", &recipe).expect("mix ok");
    assert!(!completed);

    let pins = engine.valves().pins();
    assert_eq!(pins.highs(40), 1, "never reopened");
    assert_eq!(pins.level(40), PinLevel::Low);

    let b = shared.lock().unwrap();
    assert!(
        b.job_log
            .iter()
            .any(|(_, msg)| msg.contains("refilling ingredient for valve 1"))
    );
}

#[test]
fn hand_poured_stall_completes_the_part_after_recovery() {
    // A hand-poured part is still guarded by stall detection; recovery
    // resolves it as done, with the 0 valve number in the empty notice.
    let readings = vec![500.0; 10];

    let (mut engine, shared) = engine_for(board(None, 20.0), |b| {
        HandshakeScale::new(readings, b)
            .mode_at_read(7, GlobalMode::IngredientEmpty)
            .mode_at_read(9, GlobalMode::Mixing)
    });
    let recipe = single_recipe(&shared);

    let completed = engine.mix_recipe("job-1", &recipe).expect("mix ok");
    assert!(completed);
    assert!(engine.valves().pins().writes.is_empty(), "no actuation at all");

    let b = shared.lock().unwrap();
    assert_eq!(b.empty_notices, vec![0], "0 marks the hand-poured notice");
    assert_eq!(b.progress_writes.last(), Some(&100));
}
