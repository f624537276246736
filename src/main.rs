mod cli;
mod commands;
mod engine;
mod paths;
mod program;
mod progress;
mod providers;
mod ui;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{Cli, Command};
use commands::Outcome;
use declarative::AbortSignal;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
    pub stack: String,
    pub config_file: Option<PathBuf>,
    pub config_overrides: Vec<String>,
    pub simulate: bool,
    pub detailed_exitcode: bool,
    /// Tripped by Ctrl-C; stops dispatch of pending operations
    pub abort: AbortSignal,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .format_timestamp(None)
        .init();

    let ctx = Context {
        verbose: cli.verbose,
        quiet: cli.quiet,
        stack: cli.stack,
        config_file: cli.config_file.map(|p| {
            let expanded = p.to_str().map(paths::expand);
            expanded.unwrap_or(p)
        }),
        config_overrides: cli.config,
        simulate: cli.simulate,
        detailed_exitcode: cli.detailed_exitcode,
        abort: AbortSignal::new(),
    };
    install_interrupt_handler(&ctx.abort);

    match run(&ctx, cli.command) {
        Ok(outcome) => ExitCode::from(outcome.exit_code(ctx.detailed_exitcode)),
        Err(err) => {
            report_error(&err);
            ExitCode::from(1)
        }
    }
}

fn run(ctx: &Context, command: Command) -> Result<Outcome> {
    log::debug!("Running on stack '{}' (verbosity {})", ctx.stack, ctx.verbose);
    match command {
        Command::Preview(args) => commands::preview::run(ctx, &args),
        Command::Apply(args) => commands::apply::run(ctx, &args),
        Command::Destroy(args) => commands::destroy::run(ctx, &args),
        Command::Outputs(args) => commands::stack::outputs(ctx, &args),
        Command::Unlock => commands::stack::unlock(ctx),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "wpstack", &mut io::stdout());
            Ok(Outcome::Done)
        }
    }
}

/// First Ctrl-C lets in-flight operations finish; a second one exits.
fn install_interrupt_handler(abort: &AbortSignal) {
    let abort = abort.clone();
    let result = ctrlc::set_handler(move || {
        if abort.is_aborted() {
            std::process::exit(130);
        }
        eprintln!("\nInterrupted: waiting for running operations to finish (Ctrl-C again to exit)");
        abort.abort();
    });
    if let Err(e) = result {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }
}

fn report_error(err: &anyhow::Error) {
    let category = err
        .chain()
        .find_map(|e| e.downcast_ref::<declarative::Error>())
        .map(|e| e.category().description());
    match category {
        Some(category) => ui::error(&format!("{category}: {err:#}")),
        None => ui::error(&format!("{err:#}")),
    }
}
