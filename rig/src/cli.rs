//! CLI argument parsing for the rig self-check

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "rig")]
#[command(author, version, about = "Run threadrig self-check scenarios", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Staggered sleepers; the barrier must wait for the slowest
    Sleep {
        /// Number of sleeping workers
        #[arg(short, long, default_value = "4")]
        workers: usize,

        /// Extra sleep per worker in milliseconds
        #[arg(short, long, default_value = "250")]
        step_ms: u64,
    },

    /// One failing worker must cancel a spinning sibling
    Fault {
        /// Delay before the failure in milliseconds
        #[arg(short, long, default_value = "500")]
        delay_ms: u64,
    },

    /// Failure raised from a sub-thread and re-raised by the worker
    Wrapped {
        /// Delay before the failure in milliseconds
        #[arg(short, long, default_value = "500")]
        delay_ms: u64,
    },

    /// A bridged assertion failure inside a worker
    Contract,

    /// Every worker fails at once; exactly one fault may be kept
    Storm {
        /// Number of failing workers
        #[arg(short, long, default_value = "8")]
        workers: usize,
    },

    /// Run every scenario with default parameters
    All,
}
