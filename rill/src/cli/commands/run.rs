use crate::cli::shared::compile_file;
use anyhow::{anyhow, Result};
use clap::Parser;
use rill_vm::Vm;
use std::{io, path::PathBuf};

/// Compile a program and execute it.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Path of the program to run
    pub path: PathBuf,
    /// Log every instruction before it executes
    #[clap(long)]
    pub trace: bool,
}

pub(crate) fn exec(command: Command) -> Result<i32> {
    let program = compile_file(&command.path)?;
    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut vm = Vm::new(stdin.lock(), stdout.lock());
    vm.set_trace(command.trace);
    let exit = vm
        .run(&program)
        .map_err(|trap| anyhow!("{}: {}", command.path.display(), trap))?;
    Ok(exit as i32)
}
