//! Restricted compilation: source text to an immutable compiled unit.
//!
//! Compilation never runs user code. It lexes, parses and applies the
//! static restriction pass; any problem is returned as a list of
//! positioned diagnostics.

use crate::ast::Module;
use crate::checker;
use crate::parser::parse;
use std::fmt;
use thiserror::Error;

/// Default cap on strategy source size.
pub const DEFAULT_MAX_SOURCE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {}: {}", self.line, self.column, self.message)
    }
}

/// Compilation failed; every diagnostic is listed, one per line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", render(.diagnostics))]
pub struct CompileError {
    pub diagnostics: Vec<Diagnostic>,
}

fn render(diagnostics: &[Diagnostic]) -> String {
    diagnostics
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

impl CompileError {
    fn single(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self {
            diagnostics: vec![Diagnostic {
                line,
                column,
                message: message.into(),
            }],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompileOptions {
    pub max_source_bytes: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            max_source_bytes: DEFAULT_MAX_SOURCE_BYTES,
        }
    }
}

/// A script that passed every static check.
#[derive(Debug, Clone)]
pub struct CompiledUnit {
    module: Module,
    source_bytes: usize,
}

impl CompiledUnit {
    pub(crate) fn module(&self) -> &Module {
        &self.module
    }

    pub fn source_bytes(&self) -> usize {
        self.source_bytes
    }

    pub fn statement_count(&self) -> usize {
        self.module.body.len()
    }
}

pub fn compile(source: &str, options: &CompileOptions) -> Result<CompiledUnit, CompileError> {
    if source.trim().is_empty() {
        return Err(CompileError::single(1, 1, "strategy source is empty"));
    }
    if source.len() > options.max_source_bytes {
        return Err(CompileError::single(
            1,
            1,
            format!(
                "strategy source is {} bytes, the limit is {}",
                source.len(),
                options.max_source_bytes
            ),
        ));
    }

    let module = parse(source)
        .map_err(|e| CompileError::single(e.line(), e.column(), format!("syntax error: {}", e.message())))?;

    let diagnostics = checker::check(&module);
    if !diagnostics.is_empty() {
        tracing::debug!(count = diagnostics.len(), "strategy rejected by restriction pass");
        return Err(CompileError { diagnostics });
    }

    Ok(CompiledUnit {
        module,
        source_bytes: source.len(),
    })
}
