mod board;
mod cli;
mod error_fmt;
mod rt;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use eyre::WrapErr;
use mixer_config::{Config, IngredientRow, RecipeBook, StateStore};
use mixer_core::mocks::{JobBoard, MemoryJobs};
use mixer_core::{
    JobSource, JobStatus, LogLevel, MixerRuntimeState, NoopPersist, Session, StatePersist,
    ValveBank, build_engine,
};
use mixer_hardware::{ConsoleLight, SimRig};
use mixer_traits::{Indicator, PinBank, PinLevel, Scale};

use crate::board::OperatorCommand;
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE, RtLock};

fn main() {
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);
    if let Err(err) = run(cli) {
        report_error(&err);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> eyre::Result<()> {
    color_eyre::install()?;

    let raw = std::fs::read_to_string(&cli.config)
        .wrap_err_with(|| format!("read config {:?}", cli.config))?;
    let cfg = mixer_config::load_toml(&raw)
        .map_err(|e| eyre::eyre!("parse config {:?}: {e}", cli.config))?;
    cfg.validate()?;

    init_logging(cli.json, &cli.log_level, &cfg.logging)?;

    let ingredients = mixer_config::load_ingredients_csv(&cli.ingredients, cfg.pins.valve_pins.len())?;
    let recipes_raw = std::fs::read_to_string(&cli.recipes)
        .wrap_err_with(|| format!("read recipe book {:?}", cli.recipes))?;
    let book = mixer_config::load_recipes_toml(&recipes_raw)?;

    match cli.cmd {
        Commands::Recipes => cmd_recipes(&book, cli.json),
        Commands::SelfCheck => cmd_self_check(&cfg, &ingredients, &book, cli.json),
        Commands::Serve {
            enqueue,
            user,
            glass,
            once,
            rt,
            rt_prio,
            rt_lock,
        } => cmd_serve(
            &cfg,
            &ingredients,
            &book,
            enqueue.as_deref(),
            &user,
            glass,
            once,
            rt,
            rt_prio,
            rt_lock,
        ),
    }
}

fn init_logging(json: bool, level: &str, logging: &mixer_config::Logging) -> eyre::Result<()> {
    use tracing_appender::rolling::{RollingFileAppender, Rotation};
    use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

    let level = logging.level.as_deref().unwrap_or(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match &logging.file {
        Some(file) => {
            let path = std::path::Path::new(file);
            let dir = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let name = path
                .file_name()
                .map_or_else(|| std::ffi::OsString::from("mixer.log"), |n| n.to_os_string());
            let rotation = match logging.rotation.as_deref() {
                Some("daily") => Rotation::DAILY,
                Some("hourly") => Rotation::HOURLY,
                _ => Rotation::NEVER,
            };
            let appender = RollingFileAppender::new(rotation, dir, name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let _ = FILE_GUARD.set(guard);
            Some(fmt::layer().json().with_ansi(false).with_writer(writer))
        }
        None => None,
    };

    let registry = tracing_subscriber::registry().with(filter).with(file_layer);
    if json {
        registry.with(fmt::layer().json().with_ansi(false)).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
    Ok(())
}

fn cmd_recipes(book: &RecipeBook, json: bool) -> eyre::Result<()> {
    if json {
        let items: Vec<_> = book
            .recipe
            .iter()
            .map(|r| {
                serde_json::json!({
                    "id": r.id,
                    "name": r.name,
                    "parts": r.parts.iter().map(|p| {
                        serde_json::json!({ "ingredient": p.ingredient, "amount_ml": p.amount_ml })
                    }).collect::<Vec<_>>(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
    } else {
        for r in &book.recipe {
            println!("{} ({})", r.name, r.id);
            for p in &r.parts {
                println!("  {:>6.1} ml  {}", p.amount_ml, p.ingredient);
            }
        }
    }
    Ok(())
}

fn cmd_self_check(
    cfg: &Config,
    ingredients: &[IngredientRow],
    book: &RecipeBook,
    json: bool,
) -> eyre::Result<()> {
    // Config and catalogs already parsed by the time we get here; exercise
    // the simulated rig end to end.
    let rig = SimRig::new(cfg.pins.valve_pins.clone(), cfg.pins.pump_pin);
    let mut scale = rig.scale();
    let weight = scale
        .read_grams(Duration::from_millis(50))
        .map_err(|e| eyre::eyre!("sim scale read: {e}"))?;
    let mut pins = rig.pins();
    pins.set_pin(cfg.pins.pump_pin, PinLevel::High)
        .and_then(|()| pins.set_pin(cfg.pins.pump_pin, PinLevel::Low))
        .map_err(|e| eyre::eyre!("sim pin write: {e}"))?;

    if json {
        println!(
            "{}",
            serde_json::json!({
                "ok": true,
                "valves": cfg.pins.valve_pins.len(),
                "ingredients": ingredients.len(),
                "recipes": book.recipe.len(),
                "sim_weight_g": weight,
            })
        );
    } else {
        println!(
            "ok: {} valves, {} ingredients, {} recipes, sim scale reads {weight:.2}g",
            cfg.pins.valve_pins.len(),
            ingredients.len(),
            book.recipe.len()
        );
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_serve(
    cfg: &Config,
    ingredients: &[IngredientRow],
    book: &RecipeBook,
    enqueue: Option<&str>,
    user: &str,
    glass: bool,
    once: bool,
    rt: bool,
    rt_prio: Option<i32>,
    rt_lock: Option<RtLock>,
) -> eyre::Result<()> {
    rt::setup_rt_once(rt, rt_prio, rt_lock.unwrap_or_else(RtLock::os_default));

    let jobs = MemoryJobs::new(board::seed_board(ingredients, book));
    let shared_board = jobs.shared();

    let valve_count = cfg.pins.valve_pins.len();
    let mut state = MixerRuntimeState::seeded(valve_count, cfg.session.run_on_seed_g);
    if let Some(cal) = &cfg.calibration {
        state.scale_offset = cal.offset_raw;
        state.scale_ratio = cal.counts_per_gram;
    }
    let persist: Box<dyn StatePersist> = match &cfg.state_file {
        Some(path) => {
            let store = StateStore::new(path.clone());
            if let Some(p) = store.load().wrap_err("load state file")? {
                state = MixerRuntimeState::from_persisted(&p, valve_count, cfg.session.run_on_seed_g);
                tracing::info!(path = %store.path().display(), "runtime state restored");
            }
            Box::new(store)
        }
        None => Box::new(NoopPersist),
    };

    if let Some(recipe_id) = enqueue {
        board::enqueue(&shared_board, recipe_id, user)?;
    }

    let (tx, rx) = crossbeam_channel::unbounded();
    let _stdin_reader = board::spawn_stdin_reader(tx.clone());

    // First ctrl-c cancels the active job; the second one quits.
    {
        let tx = tx.clone();
        let presses = Arc::new(AtomicUsize::new(0));
        ctrlc::set_handler(move || {
            if presses.fetch_add(1, Ordering::SeqCst) == 0 {
                tracing::warn!("ctrl-c: canceling the active job (press again to quit)");
                let _ = tx.send(OperatorCommand::Cancel);
            } else {
                std::process::exit(130);
            }
        })
        .wrap_err("install ctrl-c handler")?;
    }

    #[cfg(not(feature = "hardware"))]
    {
        let rig = SimRig::new(cfg.pins.valve_pins.clone(), cfg.pins.pump_pin);
        if glass {
            let shared = rig.shared();
            if let Ok(mut s) = shared.lock() {
                s.glass_on = true;
            }
        }
        let _applier =
            board::spawn_command_applier(rx, Arc::clone(&shared_board), Some(rig.shared()));
        let valves = ValveBank::new(rig.pins(), cfg.pins.valve_pins.clone(), cfg.pins.pump_pin);
        let engine = build_engine(
            rig.scale(),
            valves,
            ConsoleLight::default(),
            jobs,
            (&cfg.engine).into(),
            state,
            persist,
            None,
        )?;
        tracing::info!(valves = valve_count, "serving against the simulated rig");
        serve_loop(
            Session::new(engine, cfg.session.reference_mass_g),
            &shared_board,
            once,
        );
    }

    #[cfg(feature = "hardware")]
    {
        use mixer_hardware::{GpioPins, HardwareScale};

        if glass {
            tracing::warn!("--glass only applies to the simulated rig");
        }
        let dt = cfg
            .pins
            .hx711_dt
            .ok_or_else(|| eyre::eyre!("pins.hx711_dt is required for the hardware rig"))?;
        let sck = cfg
            .pins
            .hx711_sck
            .ok_or_else(|| eyre::eyre!("pins.hx711_sck is required for the hardware rig"))?;
        let scale = HardwareScale::try_new(dt, sck, 25).map_err(|e| eyre::eyre!("open hx711: {e}"))?;
        let mut output_pins = cfg.pins.valve_pins.clone();
        output_pins.push(cfg.pins.pump_pin);
        let pins =
            GpioPins::try_new(&output_pins).map_err(|e| eyre::eyre!("open actuator pins: {e}"))?;
        let _applier = board::spawn_command_applier(rx, Arc::clone(&shared_board), None);
        let valves = ValveBank::new(pins, cfg.pins.valve_pins.clone(), cfg.pins.pump_pin);
        let engine = build_engine(
            scale,
            valves,
            ConsoleLight::default(),
            jobs,
            (&cfg.engine).into(),
            state,
            persist,
            None,
        )?;
        tracing::info!(valves = valve_count, "serving against the hardware rig");
        serve_loop(
            Session::new(engine, cfg.session.reference_mass_g),
            &shared_board,
            once,
        );
    }

    Ok(())
}

fn serve_loop<S, P, I, J>(
    mut session: Session<S, P, I, J>,
    board: &Arc<Mutex<JobBoard>>,
    once: bool,
) where
    S: Scale,
    P: PinBank,
    I: Indicator,
    J: JobSource,
{
    if once {
        loop {
            if let Err(e) = session.service_once() {
                tracing::error!(error = %e, "service pass failed");
                session
                    .engine_mut()
                    .job_log(LogLevel::Error, format!("Unexpected error: {e:#}"));
            }
            let drained = board
                .lock()
                .map(|b| b.job.as_ref().is_none_or(|j| j.status == JobStatus::Finished))
                .unwrap_or(true);
            if drained {
                break;
            }
        }
        tracing::info!("queue drained, exiting");
    } else {
        session.run_forever();
    }
}

fn report_error(err: &eyre::Report) {
    if JSON_MODE.get().copied().unwrap_or(false) {
        let payload = serde_json::json!({
            "error": {
                "message": format!("{err:#}"),
                "help": error_fmt::humanize(err),
            }
        });
        eprintln!("{payload}");
    } else {
        eprintln!("{}", error_fmt::humanize(err));
    }
}
