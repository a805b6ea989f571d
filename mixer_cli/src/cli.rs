//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(name = "mixer", version, about = "Cocktail mixer control rig")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/mixer.toml")]
    pub config: PathBuf,

    /// Ingredient catalog CSV (strict header: id,name,valve)
    #[arg(long, value_name = "FILE", default_value = "etc/ingredients.csv")]
    pub ingredients: PathBuf,

    /// Recipe book TOML
    #[arg(long, value_name = "FILE", default_value = "etc/recipes.toml")]
    pub recipes: PathBuf,

    /// Log as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        #[cfg(target_os = "linux")]
        {
            return RtLock::Current;
        }
        #[allow(unreachable_code)]
        RtLock::None
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Serve the job queue against the rig
    Serve {
        /// Queue one job for this recipe id at startup
        #[arg(long, value_name = "RECIPE")]
        enqueue: Option<String>,

        /// Requester recorded on queued jobs and in the pour history
        #[arg(long, default_value = "operator")]
        user: String,

        /// Start with the glass already on the simulated cell
        #[arg(long, action = ArgAction::SetTrue)]
        glass: bool,

        /// Exit once the queue is drained (useful for scripting)
        #[arg(long, action = ArgAction::SetTrue)]
        once: bool,

        /// Enable real-time mode (SCHED_FIFO + mlockall on Linux)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on Linux: attempts SCHED_FIFO priority and locks process memory to reduce sampling jitter in the pour loop. May require elevated privileges or raised memlock ulimits."
        )]
        rt: bool,

        /// Real-time priority for SCHED_FIFO on Linux (1..=max)
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,

        /// Select memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
    },
    /// List the recipe book
    Recipes,
    /// Quick health check (config parses, catalog loads, sim rig responds)
    SelfCheck,
}
