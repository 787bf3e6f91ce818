use crate::cli::shared::compile_file;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Compile a program without executing it.
#[derive(Debug, Parser)]
pub(crate) struct Command {
    /// Path of the program to check
    pub path: PathBuf,
}

pub(crate) fn exec(command: Command) -> Result<()> {
    let program = compile_file(&command.path)?;
    tracing::debug!(
        "compiled {} instruction(s), {} constant(s)",
        program.code.len(),
        program.constants.len()
    );
    rill_tracing::println_green(&format!("ok: {}", command.path.display()));
    Ok(())
}
