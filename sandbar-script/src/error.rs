//! Runtime errors raised while a script runs.

use std::fmt;
use thiserror::Error;

/// Category of a runtime failure, named the way strategy authors know them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Type,
    Value,
    Name,
    Attribute,
    Index,
    ZeroDivision,
    Memory,
    StepBudget,
    Recursion,
    IllegalOrder,
    Indicator,
    Api,
}

impl ErrorKind {
    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Name => "NameError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Index => "IndexError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Memory => "MemoryError",
            ErrorKind::StepBudget => "StepBudgetExceeded",
            ErrorKind::Recursion => "RecursionLimit",
            ErrorKind::IllegalOrder => "IllegalOrder",
            ErrorKind::Indicator => "IndicatorError",
            ErrorKind::Api => "StrategyApiError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind}: {message}{}", line_suffix(.line))]
pub struct RuntimeError {
    pub kind: ErrorKind,
    pub message: String,
    /// Script line of the innermost statement that failed.
    pub line: Option<usize>,
    /// Calls that were active, innermost first.
    pub trace: Vec<String>,
}

fn line_suffix(line: &Option<usize>) -> String {
    line.map(|l| format!(" (line {l})")).unwrap_or_default()
}

impl RuntimeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            trace: Vec::new(),
        }
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }

    pub fn memory_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Memory, message)
    }

    pub fn index_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Index, message)
    }

    pub fn attribute_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attribute, message)
    }

    pub fn api_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Api, message)
    }

    /// Attach a line unless a more precise one is already set.
    pub fn at_line(mut self, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
        }
        self
    }

    pub fn with_frame(mut self, frame: String) -> Self {
        self.trace.push(frame);
        self
    }
}

pub type RtResult<T> = Result<T, RuntimeError>;
