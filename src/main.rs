mod commands;
mod config;
mod error;
mod monitor;
mod queue;
mod registry;
mod scheduler;
mod statusdoc;
mod store;
mod subprocess;
mod telemetry;

use std::process::ExitCode;

use clap::{Parser, Subcommand};

use commands::coordinator::{CoordinatorArgs, ReportArgs};
use commands::init::InitArgs;
use commands::task::TaskCommand;
use commands::test_results::TestResultsArgs;
use commands::worker::WorkerArgs;

#[derive(Debug, Parser)]
#[command(
    name = "swarm",
    version,
    about = "Git-native coordination runtime for fleets of AI coding agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Bootstrap the coordination documents in a project
    Init(InitArgs),
    /// Run the coordinator (failure detection, prioritization, scaling)
    Coordinator(CoordinatorArgs),
    /// Run a worker process
    Worker(WorkerArgs),
    /// Manage tasks in the queue
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },
    /// Print current agent and task counts as JSON
    Report(ReportArgs),
    /// Update an agent's status document with CI test results
    TestResults(TestResultsArgs),
}

impl Commands {
    const fn name(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Coordinator(_) => "coordinator",
            Self::Worker(_) => "worker",
            Self::Task { .. } => "task",
            Self::Report(_) => "report",
            Self::TestResults(_) => "test-results",
        }
    }
}

fn main() -> ExitCode {
    telemetry::init();

    let cli = Cli::parse();

    let _span = tracing::info_span!("command", name = cli.command.name()).entered();

    let result = match cli.command {
        Commands::Init(args) => args.execute(),
        Commands::Coordinator(args) => args.execute(),
        Commands::Worker(args) => args.execute(),
        Commands::Task { command } => command.execute(),
        Commands::Report(args) => args.execute(),
        Commands::TestResults(args) => args.execute(),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if let Some(exit_err) = e.downcast_ref::<error::ExitError>() {
                eprintln!("error: {exit_err}");
                exit_err.exit_code()
            } else {
                eprintln!("error: {e:#}");
                ExitCode::FAILURE
            }
        }
    }
}
