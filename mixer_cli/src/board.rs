//! Local job board: catalog seeding, job enqueueing and the operator
//! command feed.
//!
//! Operator commands arrive on stdin, cross a channel, and are applied to
//! the shared board/rig state by a dedicated thread. The engine itself
//! stays a single poll-based loop and just observes the mutations.

use std::io::BufRead;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel as xch;
use mixer_config::{IngredientRow, RecipeBook};
use mixer_core::mocks::JobBoard;
use mixer_core::{GlobalMode, Ingredient, Job, JobStatus, Part, Recipe};
use mixer_hardware::RigState;

static JOB_SEQ: AtomicU64 = AtomicU64::new(1);

/// Build a board holding the ingredient catalog and recipe book.
///
/// Catalog valve numbers are 1-based with 0 = hand-poured; this is the one
/// place they are mapped onto internal 0-based indices.
pub fn seed_board(ingredients: &[IngredientRow], book: &RecipeBook) -> JobBoard {
    let mut board = JobBoard::new();
    for row in ingredients {
        board.ingredients.insert(
            row.id.clone(),
            Ingredient {
                id: row.id.clone(),
                name: row.name.clone(),
                valve: row.valve.checked_sub(1),
            },
        );
    }
    for recipe in &book.recipe {
        board.recipes.insert(
            recipe.id.clone(),
            Recipe {
                id: recipe.id.clone(),
                name: recipe.name.clone(),
                parts: recipe
                    .parts
                    .iter()
                    .map(|p| Part {
                        ingredient_id: p.ingredient.clone(),
                        amount_ml: p.amount_ml,
                    })
                    .collect(),
            },
        );
    }
    board
}

pub fn enqueue(board: &Arc<Mutex<JobBoard>>, recipe_id: &str, user: &str) -> eyre::Result<()> {
    let mut b = board
        .lock()
        .map_err(|_| eyre::eyre!("job board poisoned"))?;
    if !b.recipes.contains_key(recipe_id) {
        eyre::bail!("unknown recipe '{recipe_id}'");
    }
    if b.job.as_ref().is_some_and(|j| j.status != JobStatus::Finished) {
        eyre::bail!("a job is already queued or running");
    }
    let id = format!("job-{}", JOB_SEQ.fetch_add(1, Ordering::Relaxed));
    tracing::info!(job = %id, recipe = recipe_id, user, "job queued");
    b.job = Some(Job {
        id,
        recipe_id: recipe_id.to_string(),
        user: user.to_string(),
        status: JobStatus::Queued,
    });
    Ok(())
}

/// Commands an operator can type while the rig serves jobs.
#[derive(Debug, Clone)]
pub enum OperatorCommand {
    /// Cancel the active job.
    Cancel,
    /// Put the (simulated) glass on / take it off the cell.
    GlassOn,
    GlassOff,
    /// Mark a 1-based valve's source dry / refilled in the simulation.
    Empty(u8),
    Refill(u8),
    /// Refill handshake: acknowledge the empty notice, then resume.
    Ack,
    Resume,
    /// Queue another job.
    Enqueue { recipe_id: String, user: String },
    /// Live-weight diagnostics stream.
    StreamOn,
    StreamOff,
    /// Calibration modes.
    Tare,
    Calibrate,
    CalibrateConfirm,
}

pub fn parse_command(line: &str) -> Option<OperatorCommand> {
    let mut words = line.split_whitespace();
    let cmd = match (words.next()?, words.next()) {
        ("cancel", None) => OperatorCommand::Cancel,
        ("glass", Some("on")) => OperatorCommand::GlassOn,
        ("glass", Some("off")) => OperatorCommand::GlassOff,
        ("empty", Some(n)) => OperatorCommand::Empty(n.parse().ok()?),
        ("refill", Some(n)) => OperatorCommand::Refill(n.parse().ok()?),
        ("ack", None) => OperatorCommand::Ack,
        ("resume", None) => OperatorCommand::Resume,
        ("mix", Some(recipe)) => OperatorCommand::Enqueue {
            recipe_id: recipe.to_string(),
            user: words.next().unwrap_or("operator").to_string(),
        },
        ("stream", Some("on")) => OperatorCommand::StreamOn,
        ("stream", Some("off")) => OperatorCommand::StreamOff,
        ("tare", None) => OperatorCommand::Tare,
        ("calibrate", None) => OperatorCommand::Calibrate,
        ("confirm", None) => OperatorCommand::CalibrateConfirm,
        _ => return None,
    };
    Some(cmd)
}

pub fn spawn_stdin_reader(tx: xch::Sender<OperatorCommand>) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(cmd) => {
                    if tx.send(cmd).is_err() {
                        break;
                    }
                }
                None => tracing::warn!(line = %line, "unrecognized operator command"),
            }
        }
        tracing::debug!("stdin reader exiting");
    })
}

pub fn spawn_command_applier(
    rx: xch::Receiver<OperatorCommand>,
    board: Arc<Mutex<JobBoard>>,
    rig: Option<Arc<Mutex<RigState>>>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || {
        for cmd in rx.iter() {
            if let Err(e) = apply_command(&cmd, &board, rig.as_ref()) {
                tracing::warn!(error = %e, ?cmd, "operator command failed");
            }
        }
        tracing::debug!("command applier exiting");
    })
}

fn apply_command(
    cmd: &OperatorCommand,
    board: &Arc<Mutex<JobBoard>>,
    rig: Option<&Arc<Mutex<RigState>>>,
) -> eyre::Result<()> {
    let lock_board = || {
        board
            .lock()
            .map_err(|_| eyre::eyre!("job board poisoned"))
    };
    match cmd {
        OperatorCommand::Cancel => {
            let mut b = lock_board()?;
            match b.job.as_mut() {
                Some(job) if job.status != JobStatus::Finished => {
                    job.status = JobStatus::Canceled;
                    tracing::info!(job = %job.id, "job canceled by operator");
                }
                _ => eyre::bail!("no active job to cancel"),
            }
        }
        OperatorCommand::Ack => lock_board()?.mode = GlobalMode::IngredientEmpty,
        OperatorCommand::Resume => lock_board()?.mode = GlobalMode::Mixing,
        OperatorCommand::Tare => lock_board()?.mode = GlobalMode::Tare,
        OperatorCommand::Calibrate => lock_board()?.mode = GlobalMode::StartCalibrating,
        OperatorCommand::CalibrateConfirm => lock_board()?.mode = GlobalMode::Calibrate,
        OperatorCommand::StreamOn => lock_board()?.scale_stream = true,
        OperatorCommand::StreamOff => lock_board()?.scale_stream = false,
        OperatorCommand::Enqueue { recipe_id, user } => enqueue(board, recipe_id, user)?,
        OperatorCommand::GlassOn
        | OperatorCommand::GlassOff
        | OperatorCommand::Empty(_)
        | OperatorCommand::Refill(_) => {
            let Some(rig) = rig else {
                eyre::bail!("rig commands only apply to the simulated rig");
            };
            let mut state = rig
                .lock()
                .map_err(|_| eyre::eyre!("sim rig poisoned"))?;
            match cmd {
                OperatorCommand::GlassOn => state.glass_on = true,
                OperatorCommand::GlassOff => {
                    state.glass_on = false;
                    // A fresh glass arrives empty.
                    state.poured_g = 0.0;
                }
                OperatorCommand::Empty(n) => match n.checked_sub(1) {
                    Some(idx) => {
                        state.empty_valves.insert(idx);
                    }
                    None => eyre::bail!("valve numbers are 1-based"),
                },
                OperatorCommand::Refill(n) => match n.checked_sub(1) {
                    Some(idx) => {
                        state.empty_valves.remove(&idx);
                    }
                    None => eyre::bail!("valve numbers are 1-based"),
                },
                _ => unreachable!(),
            }
        }
    }
    Ok(())
}
