use std::time::Duration;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use tracing::info;

use threadrig::cli::{Cli, Command};
use threadrig::config::RigConfig;
use threadrig::scenario::{self, ScenarioReport};

fn setup_logging(level: Option<&str>) -> Result<()> {
    let level = match level.map(|s| s.to_uppercase()) {
        None => tracing::Level::WARN,
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to WARN", s);
                tracing::Level::WARN
            }
        },
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
    Ok(())
}

fn print_report(report: &ScenarioReport) {
    let status = if report.passed() { "✓".green() } else { "✗".red() };
    let outcome = if report.success {
        "success".to_string()
    } else {
        format!(
            "fault {:?} from {}",
            report.fault.as_deref().unwrap_or(""),
            report.origin.as_deref().unwrap_or("?").yellow()
        )
    };

    println!(
        "{} {} {} {}",
        status,
        report.name.cyan(),
        outcome,
        format!("({} ms, {} aborted, {} discarded)", report.elapsed.as_millis(), report.aborted, report.discarded).dimmed()
    );
    for problem in &report.problems {
        println!("    {}", problem.red());
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = RigConfig::load(cli.config.as_ref()).context("Failed to load configuration")?;

    info!("rig starting");

    let reports = match cli.command {
        Command::Sleep { workers, step_ms } => {
            vec![scenario::staggered_sleep(&config, workers, Duration::from_millis(step_ms))?]
        }
        Command::Fault { delay_ms } => vec![scenario::single_fault(&config, Duration::from_millis(delay_ms))?],
        Command::Wrapped { delay_ms } => vec![scenario::wrapped_fault(&config, Duration::from_millis(delay_ms))?],
        Command::Contract => vec![scenario::contract_failure(&config)?],
        Command::Storm { workers } => vec![scenario::fault_storm(&config, workers)?],
        Command::All => scenario::run_all(&config)?,
    };

    for report in &reports {
        print_report(report);
    }

    let failed = reports.iter().filter(|report| !report.passed()).count();
    if failed > 0 {
        return Err(eyre::eyre!("{} scenario(s) did not behave as expected", failed));
    }
    Ok(())
}
