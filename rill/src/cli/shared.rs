use anyhow::{anyhow, Context, Result};
use rill_bytecode::Program;
use rill_error::error::CompileError;
use rill_types::Spanned;
use std::{fs, path::Path, sync::Arc};

/// Reads and compiles a source file, rendering any compile error with
/// the file, line and column it points at.
pub(crate) fn compile_file(path: &Path) -> Result<Program> {
    let src: Arc<str> = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?
        .into();
    rill_parse::compile(src, Some(Arc::new(path.to_path_buf()))).map_err(render_error)
}

fn render_error(error: CompileError) -> anyhow::Error {
    let span = error.span();
    let (line, col) = span.line_col();
    match span.path() {
        Some(path) => anyhow!("{}:{}:{}: {}", path.display(), line, col, error),
        None => anyhow!("{}:{}: {}", line, col, error),
    }
}
