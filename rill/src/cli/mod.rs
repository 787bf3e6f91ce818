use anyhow::Result;
use clap::{Parser, Subcommand};
use rill_tracing::{init_tracing_subscriber, TracingSubscriberOptions};

mod commands;
mod shared;
use self::commands::{check, dump, run};

use check::Command as CheckCommand;
use dump::Command as DumpCommand;
use run::Command as RunCommand;

#[derive(Debug, Parser)]
#[clap(name = "rill", version)]
/// Compiler and register virtual machine for the rill language.
struct Opt {
    /// The command to run
    #[clap(subcommand)]
    command: Rill,
    /// Use verbose output
    #[clap(short = 'v', long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
    /// Silence all output
    #[clap(short = 's', long, global = true)]
    silent: bool,
}

#[derive(Debug, Subcommand)]
enum Rill {
    Run(RunCommand),
    Check(CheckCommand),
    Dump(DumpCommand),
}

pub(crate) fn run_cli() -> Result<i32> {
    let opt = Opt::parse();

    // `--trace` events are emitted at TRACE level, so the flag has to
    // widen the subscriber's filter as well.
    let verbosity = match &opt.command {
        Rill::Run(command) if command.trace => 2,
        _ => opt.verbose,
    };
    init_tracing_subscriber(TracingSubscriberOptions {
        verbosity: Some(verbosity),
        silent: Some(opt.silent),
        ..Default::default()
    });

    match opt.command {
        Rill::Run(command) => run::exec(command),
        Rill::Check(command) => check::exec(command).map(|_| 0),
        Rill::Dump(command) => dump::exec(command).map(|_| 0),
    }
}
