use std::process::{Command, Output};
use tracing::debug;

use crate::error::SystemError;

/// Run a command and capture its output without checking the exit status
pub(crate) fn output(program: &str, args: &[&str]) -> Result<Output, SystemError> {
    debug!("Running {} {}", program, args.join(" "));
    Command::new(program)
        .args(args)
        .output()
        .map_err(|source| SystemError::Spawn {
            program: program.to_string(),
            source,
        })
}

/// Run a command and fail unless it exits successfully
pub(crate) fn run(program: &str, args: &[&str]) -> Result<Output, SystemError> {
    let output = output(program, args)?;
    if !output.status.success() {
        return Err(SystemError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}

/// Run a command whose failure does not matter
pub(crate) fn run_allow_failure(program: &str, args: &[&str]) {
    if let Err(e) = run(program, args) {
        debug!("Ignoring failure: {}", e);
    }
}

/// True when the binary could not be found at all
pub(crate) fn is_missing_binary(err: &SystemError) -> bool {
    matches!(err, SystemError::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
}
