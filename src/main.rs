// Entry point for `provisionctl`: parses arguments and dispatches to the
// installer orchestrator. Exit codes follow §6: 0 completed, 1 step failed,
// 64 invalid arguments, 65 tool not found, 2 plan paused. The orchestration
// itself lives in the library crate so integration tests can drive it
// directly without going through the binary.

use clap::{Parser, Subcommand};
use provisionctl::{cli, log_debug, logger};

#[derive(Parser)]
#[command(name = "provisionctl")]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Enables detailed debug output.
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolves and runs the install plan for a tool.
    Install {
        /// Recipe id in the registry, e.g. 'cargo-audit'.
        tool: String,
    },
    /// Resolves a tool's plan and prints it without running anything.
    Plan {
        tool: String,
    },
    /// Resumes a previously interrupted plan by id.
    Resume {
        plan_id: String,
    },
    /// Lists plans in `running` or `paused` state.
    Pending,
}

/// Installs a SIGINT handler that flips the process-wide cancellation token
/// (§4.9): the scheduler notices it between dispatch rounds, and any
/// in-flight child gets SIGTERM then SIGKILL after the grace period.
#[cfg(unix)]
fn install_sigint_handler() {
    extern "C" fn handle_sigint(_: std::os::raw::c_int) {
        provisionctl::executor::global_cancel_token().cancel();
    }
    // Touch the token once up front so the `OnceLock` is already initialized
    // before the handler can fire; the handler itself only does an atomic
    // store afterward.
    let _ = provisionctl::executor::global_cancel_token();
    unsafe {
        let handler = nix::sys::signal::SigHandler::Handler(handle_sigint);
        let _ = nix::sys::signal::signal(nix::sys::signal::Signal::SIGINT, handler);
    }
}

#[cfg(not(unix))]
fn install_sigint_handler() {}

fn main() {
    install_sigint_handler();
    let cli = Cli::parse();
    logger::init(cli.debug);
    log_debug!("[provisionctl] parsed command line, debug={}", cli.debug);

    let exit_code = match cli.command {
        Commands::Install { tool } => cli::commands::run_install(&tool),
        Commands::Plan { tool } => cli::commands::run_plan(&tool),
        Commands::Resume { plan_id } => cli::commands::run_resume(&plan_id),
        Commands::Pending => cli::commands::run_pending(),
    };

    std::process::exit(exit_code);
}
