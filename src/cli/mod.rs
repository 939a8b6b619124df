//! CLI module for modgate
//!
//! Provides command-line access to a file-backed engine:
//! - init: Create the data directory and seed the store
//! - list / check / status: Resolve and report
//! - set-module / set-feature: Write through the engine

mod args;
mod commands;
mod errors;
mod io;

pub use args::{Cli, Command, Toggle};
pub use commands::{check, init, list, run_command, seed_document, set_feature, set_module, status, Config};
pub use errors::{CliError, CliErrorCode, CliResult};
pub use io::{write_error, write_response};

/// Parse arguments, run one command on a current-thread runtime, and write
/// the JSON response.
pub fn run() -> CliResult<()> {
    let cli = Cli::parse_args();
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(run_command(cli.command)) {
        Ok(data) => write_response(data),
        Err(e) => {
            write_error(e.code_str(), e.message())?;
            Err(e)
        }
    }
}
