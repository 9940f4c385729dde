//! Failure reporter: turns a [`RunResult`] into a process exit code and a
//! human-readable line.
//!
//! Exit codes: `0` success or nothing due, `1` processing or configuration
//! failure, `2` state store failure.

use std::io::Write;

use tracing::{error, info};

use crate::coordinator::{RunOutcome, RunResult};

/// Exit code for a run, without side effects.
pub fn exit_code(result: &RunResult) -> u8 {
    match &result.outcome {
        RunOutcome::Success | RunOutcome::NoOpNothingDue => 0,
        RunOutcome::Failure(e) => e.exit_code(),
    }
}

/// Report to stdout/stderr and return the exit code.
pub fn report(result: &RunResult) -> u8 {
    report_to(result, &mut std::io::stdout(), &mut std::io::stderr())
}

/// Report to the given streams. Informational lines go to `out`, the error
/// to `err`.
pub fn report_to(result: &RunResult, out: &mut dyn Write, err: &mut dyn Write) -> u8 {
    // Write failures on the console are not worth a different exit code.
    match &result.outcome {
        RunOutcome::Success => {
            info!(items = result.items_processed, "run succeeded");
            let _ = writeln!(
                out,
                "Processed {} new discussion item(s).",
                result.items_processed
            );
        }
        RunOutcome::NoOpNothingDue => {
            info!("run finished with nothing due");
            let _ = writeln!(out, "Nothing due.");
        }
        RunOutcome::Failure(e) => {
            error!(kind = e.kind(), error = %e, exit_code = e.exit_code(), "run failed");
            let _ = writeln!(err, "error: {e}");
        }
    }
    exit_code(result)
}
