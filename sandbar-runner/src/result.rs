//! The single result document of a run and its terminal sink.

use crate::error::PipelineError;
use crate::metrics::MetricsSummary;
use serde::Serialize;
use std::io::{self, Write};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

/// Exactly one of these is produced per invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum RunResult {
    Success {
        html_report: String,
        metrics: MetricsSummary,
    },
    Failure {
        error: String,
        traceback: String,
    },
}

impl RunResult {
    pub fn failure(err: &PipelineError) -> Self {
        RunResult::Failure {
            error: err.message(),
            traceback: err.traceback(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RunResult::Success { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_FAILURE
        }
    }

    /// Write the document to the sink its variant belongs to: success to
    /// `stdout`, failure to `stderr`. Returns the process exit code.
    pub fn emit<O: Write, E: Write>(&self, stdout: &mut O, stderr: &mut E) -> io::Result<i32> {
        let sink: &mut dyn Write = if self.is_success() { stdout } else { stderr };
        serde_json::to_writer(&mut *sink, self)?;
        sink.write_all(b"\n")?;
        sink.flush()?;
        Ok(self.exit_code())
    }
}

impl From<Result<crate::pipeline::RunOutput, PipelineError>> for RunResult {
    fn from(result: Result<crate::pipeline::RunOutput, PipelineError>) -> Self {
        match result {
            Ok(output) => RunResult::Success {
                html_report: output.html_report,
                metrics: output.metrics,
            },
            Err(err) => RunResult::failure(&err),
        }
    }
}
