use crate::cli::shared::compile_file;
use anyhow::Result;
use clap::Parser;
use rill_bytecode::printer::disassemble;
use std::path::PathBuf;

/// Compile a program and print its disassembly.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Path of the program to dump
    pub path: PathBuf,
}

pub(crate) fn exec(command: Command) -> Result<()> {
    let program = compile_file(&command.path)?;
    tracing::info!("{}", disassemble(&program));
    Ok(())
}
