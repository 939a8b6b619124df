//! CLI argument definitions using clap
//!
//! Commands:
//! - modgate init --config <path>
//! - modgate list --config <path>
//! - modgate check --config <path> <module> [feature]
//! - modgate set-module --config <path> <id> <status>
//! - modgate set-feature --config <path> <module> <feature> <on|off>
//! - modgate status --config <path>

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// modgate - module and feature status engine
#[derive(Parser, Debug)]
#[command(name = "modgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the data directory and seed the store
    Init {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,
    },

    /// List modules and features with their resolved state
    List {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,
    },

    /// Resolve one module, or one feature of it
    Check {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,

        /// Module code
        module: String,

        /// Feature code
        feature: Option<String>,
    },

    /// Change a module's status by id
    SetModule {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,

        /// Module storage id
        id: String,

        /// active, inactive, degraded or maintenance
        status: String,
    },

    /// Enable or disable a feature
    SetFeature {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,

        /// Module code
        module: String,

        /// Feature code
        feature: String,

        #[arg(value_enum)]
        state: Toggle,
    },

    /// Print engine state and counters
    Status {
        /// Path to configuration file
        #[arg(long, default_value = "./modgate.json")]
        config: PathBuf,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Toggle {
    On,
    Off,
}

impl Toggle {
    pub fn enabled(self) -> bool {
        self == Toggle::On
    }
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}
