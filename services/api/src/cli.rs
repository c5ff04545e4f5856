use crate::commands::{run_allocation, run_prediction, PredictArgs, RunArgs};
use crate::server;
use clap::{Args, Parser, Subcommand};
use smart_alloc::error::AppError;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Smart Hostel Allocation",
    about = "Score hostel applicants and allocate bed spaces from the command line",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Run one batch allocation over a dataset and print the outcome
    Run(RunArgs),
    /// Score a single applicant with the domain-knowledge formula
    Predict(PredictArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// JSON dataset (hostels, rooms, applications) to preload into the store
    #[arg(long)]
    pub(crate) dataset: Option<PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Run(args) => run_allocation(args),
        Command::Predict(args) => run_prediction(args),
    }
}
