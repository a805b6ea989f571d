//! Session sequencing: status lifecycle, calibration modes, diagnostics.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mixer_core::mocks::{JobBoard, ManualClock, MemoryJobs, QuietLight, RecordingPins};
use mixer_core::{
    EngineTuning, GlobalMode, Ingredient, Job, JobStatus, MixerRuntimeState, NoopPersist, Part,
    Recipe, Session, ValveBank, build_engine,
};
use mixer_traits::{Clock, Scale};

struct SessionScale {
    readings: Vec<f64>,
    idx: usize,
    raw_readings: Vec<f64>,
    raw_idx: usize,
    board: Arc<Mutex<JobBoard>>,
    cancel_at_read: Option<usize>,
}

impl SessionScale {
    fn new(readings: impl Into<Vec<f64>>, board: Arc<Mutex<JobBoard>>) -> Self {
        Self {
            readings: readings.into(),
            idx: 0,
            raw_readings: Vec::new(),
            raw_idx: 0,
            board,
            cancel_at_read: None,
        }
    }

    fn with_raw(mut self, raw: impl Into<Vec<f64>>) -> Self {
        self.raw_readings = raw.into();
        self
    }

    fn cancel_at_read(mut self, idx: usize) -> Self {
        self.cancel_at_read = Some(idx);
        self
    }
}

impl Scale for SessionScale {
    fn read_grams(&mut self, _timeout: Duration) -> Result<f64, Box<dyn Error + Send + Sync>> {
        if self.cancel_at_read == Some(self.idx)
            && let Ok(mut board) = self.board.lock()
            && let Some(job) = board.job.as_mut()
        {
            job.status = JobStatus::Canceled;
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
        let v = if self.raw_idx < self.raw_readings.len() {
            self.raw_readings[self.raw_idx]
        } else {
            self.raw_readings.last().copied().unwrap_or(0.0)
        };
        self.raw_idx += 1;
        Ok(v)
    }

    fn set_offset(&mut self, _offset_raw: f64) {}
    fn set_ratio(&mut self, _counts_per_gram: f64) {}
}

fn tuning(sample_period_ms: u64) -> EngineTuning {
    EngineTuning {
        glass_weight_g: 100.0,
        empty_delta_g: 0.5,
        empty_window_ms: 100_000,
        settle_delta_g: 0.1,
        settle_band_g: 1.0,
        sample_period_ms,
        sensor_timeout_ms: 150,
    }
}

type TestSession = Session<SessionScale, RecordingPins, QuietLight, MemoryJobs>;

fn session_for(
    board: JobBoard,
    rig: impl FnOnce(Arc<Mutex<JobBoard>>) -> SessionScale,
    clock: Option<Box<dyn Clock + Send + Sync>>,
    sample_period_ms: u64,
) -> (TestSession, Arc<Mutex<JobBoard>>) {
    let jobs = MemoryJobs::new(board);
    let shared = jobs.shared();
    let scale = rig(Arc::clone(&shared));
    let engine = build_engine(
        scale,
        ValveBank::new(RecordingPins::default(), vec![40, 41], 14),
        QuietLight,
        jobs,
        tuning(sample_period_ms),
        MixerRuntimeState::new(2),
        Box::new(NoopPersist),
        clock,
    )
    .expect("build engine");
    (Session::new(engine, 500.0), shared)
}

fn manual_clock() -> Option<Box<dyn Clock + Send + Sync>> {
    Some(Box::new(ManualClock::new()))
}

#[test]
fn completed_job_walks_the_full_status_sequence() {
    let board = JobBoard::new()
        .with_job(Job {
            id: "job-1".into(),
            recipe_id: "gimlet".into(),
            user: "bob".into(),
            status: JobStatus::Queued,
        })
        .with_recipe(Recipe {
            id: "gimlet".into(),
            name: "Gimlet".into(),
            parts: vec![Part {
                ingredient_id: "gin".into(),
                amount_ml: 10.0,
            }],
        })
        .with_ingredient(Ingredient {
            id: "gin".into(),
            name: "Gin".into(),
            valve: Some(0),
        });
    // Glass already on and still; pour 6g; drip settles instantly; glass
    // stays for one removal poll, then leaves.
    let readings = vec![500.0, 500.0, 502.0, 504.0, 506.0, 506.0, 506.0, 506.0, 0.0];

    let (mut session, shared) = session_for(board, |b| SessionScale::new(readings, b), manual_clock(), 50);
    session.service_once().expect("service pass");

    let b = shared.lock().unwrap();
    assert_eq!(
        b.status_writes,
        vec![JobStatus::Mixing, JobStatus::Completed, JobStatus::Finished]
    );
    assert_eq!(b.history, vec![("gimlet".to_string(), "bob".to_string())]);
    assert_eq!(b.job.as_ref().map(|j| j.status), Some(JobStatus::Finished));
    assert_eq!(b.mode, GlobalMode::Idle, "rig reports idle after the job");
    assert_eq!(b.progress_writes.last(), Some(&100));
}

#[test]
fn cancellation_while_waiting_for_glass_finishes_canceled() {
    let board = JobBoard::new()
        .with_job(Job {
            id: "job-2".into(),
            recipe_id: "gimlet".into(),
            user: "bob".into(),
            status: JobStatus::Queued,
        })
        .with_recipe(Recipe {
            id: "gimlet".into(),
            name: "Gimlet".into(),
            parts: Vec::new(),
        });
    // No glass ever arrives; the user cancels from the queue.
    let readings = vec![20.0; 8];

    let (mut session, shared) = session_for(
        board,
        |b| SessionScale::new(readings, b).cancel_at_read(3),
        manual_clock(),
        50,
    );
    session.service_once().expect("service pass");

    let b = shared.lock().unwrap();
    assert_eq!(
        b.status_writes,
        vec![
            JobStatus::WaitingForGlass,
            JobStatus::Canceled,
            JobStatus::Finished
        ]
    );
    assert!(b.history.is_empty(), "no history entry for a canceled job");
    assert!(
        b.job_log
            .iter()
            .any(|(_, msg)| msg.contains("canceled while waiting for glass"))
    );
}

#[test]
fn empty_recipe_completes_at_100_without_pouring() {
    let board = JobBoard::new()
        .with_job(Job {
            id: "job-3".into(),
            recipe_id: "nothing".into(),
            user: "bob".into(),
            status: JobStatus::Queued,
        })
        .with_recipe(Recipe {
            id: "nothing".into(),
            name: "Nothing".into(),
            parts: Vec::new(),
        });
    let readings = vec![500.0, 500.0, 0.0];

    let (mut session, shared) = session_for(board, |b| SessionScale::new(readings, b), manual_clock(), 50);
    session.service_once().expect("service pass");

    let b = shared.lock().unwrap();
    assert_eq!(b.progress_writes, vec![100]);
    assert_eq!(
        b.status_writes,
        vec![JobStatus::Mixing, JobStatus::Completed, JobStatus::Finished]
    );
}

#[test]
fn tare_mode_stores_offset_and_returns_to_idle() {
    let mut board = JobBoard::new();
    board.mode = GlobalMode::Tare;

    let (mut session, shared) = session_for(
        board,
        |b| SessionScale::new(Vec::new(), b).with_raw(vec![8_400.0]),
        manual_clock(),
        50,
    );
    session.service_once().expect("service pass");

    assert!((session.engine().state().scale_offset - 8_400.0).abs() < f64::EPSILON);
    assert_eq!(shared.lock().unwrap().mode, GlobalMode::Idle);
}

#[test]
fn calibration_waits_for_the_reference_mass_confirmation() {
    let mut board = JobBoard::new();
    board.mode = GlobalMode::StartCalibrating;

    // Real clock with 1ms pacing: the operator confirmation arrives from
    // another thread, as it does in production.
    let (mut session, shared) = session_for(
        board,
        |b| SessionScale::new(Vec::new(), b).with_raw(vec![8_400.0, 116_400.0]),
        None,
        1,
    );

    let confirm = {
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            shared.lock().unwrap().mode = GlobalMode::Calibrate;
        })
    };
    session.service_once().expect("service pass");
    confirm.join().expect("confirm thread");

    let state = session.engine().state();
    assert!((state.scale_offset - 8_400.0).abs() < f64::EPSILON);
    assert!((state.scale_ratio - 216.0).abs() < 1e-9);
    assert_eq!(shared.lock().unwrap().mode, GlobalMode::Idle);
}

#[test]
fn abandoned_calibration_leaves_ratio_untouched() {
    let mut board = JobBoard::new();
    board.mode = GlobalMode::StartCalibrating;

    let (mut session, shared) = session_for(
        board,
        |b| SessionScale::new(Vec::new(), b).with_raw(vec![8_400.0]),
        None,
        1,
    );

    let abandon = {
        let shared = Arc::clone(&shared);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            shared.lock().unwrap().mode = GlobalMode::Idle;
        })
    };
    session.service_once().expect("service pass");
    abandon.join().expect("abandon thread");

    let state = session.engine().state();
    assert!((state.scale_offset - 8_400.0).abs() < f64::EPSILON, "tare did run");
    assert!((state.scale_ratio - 1.0).abs() < f64::EPSILON, "ratio untouched");
}

#[test]
fn scale_stream_publishes_the_live_weight() {
    let mut board = JobBoard::new();
    board.scale_stream = true;

    let (mut session, shared) = session_for(board, |b| SessionScale::new(vec![42.5], b), manual_clock(), 50);
    session.service_once().expect("service pass");

    assert_eq!(shared.lock().unwrap().published_weights, vec![42.5]);
}
