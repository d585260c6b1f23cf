//! PowerShell invocation with cmdlet error detection.
//!
//! Cmdlet errors do not change the exit code of `powershell.exe` unless the
//! preference is `Stop`, so output is also scanned for the name of the
//! failing cmdlet followed by its message.

use std::sync::Arc;

use tracing::debug;
use unidisk_core::command::{check_failures, run_checked, CommandOutput};
use unidisk_core::{CommandRunner, ErrorAction, Result};

pub const PROGRAM: &str = "powershell.exe";

// Failure signatures. Each matches only when followed by further text.
pub const GET_DISK: &str = "Get-Disk";
pub const GET_PARTITION: &str = "Get-Partition";
pub const NO_PARTITIONS: &str = "Get-Partition : No MSFT_Partition objects found";
pub const GET_VOLUME: &str = "Get-Volume";
pub const CLEAR_DISK: &str = "Clear-Disk";
pub const SET_DISK: &str = "Set-Disk";
pub const NEW_PARTITION: &str = "New-Partition";
pub const FORMAT_VOLUME: &str = "Format-Volume";
pub const SET_PARTITION: &str = "Set-Partition";
pub const REMOVE_ACCESS_PATH: &str = "Remove-PartitionAccessPath";

#[derive(Clone)]
pub struct PowerShell {
    runner: Arc<dyn CommandRunner>,
    error_action: ErrorAction,
    params: Vec<String>,
}

impl std::fmt::Debug for PowerShell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PowerShell")
            .field("error_action", &self.error_action)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PowerShell {
    pub fn new(runner: Arc<dyn CommandRunner>, error_action: ErrorAction) -> Self {
        Self {
            runner,
            error_action,
            params: vec!["-NoProfile".to_string()],
        }
    }

    /// Full argument list for `script`.
    pub fn arguments(&self, script: &str) -> Vec<String> {
        let mut args = self.params.clone();
        args.push("-Command".to_string());
        args.push(format!(
            "$ErrorActionPreference=\"{}\"; {}",
            self.error_action.as_str(),
            script
        ));
        args
    }

    /// Runs `script` without inspecting its output.
    pub fn raw(&self, script: &str) -> Result<CommandOutput> {
        debug!(script, "powershell");
        run_checked(self.runner.as_ref(), PROGRAM, &self.arguments(script))
    }

    /// Runs `script` and fails if the output carries any of `failures`.
    pub fn command(&self, script: &str, failures: &[&str]) -> Result<CommandOutput> {
        let output = self.raw(script)?;
        check_failures(&output.combined(), failures)?;
        Ok(output)
    }
}

/// Quotes `value` as a single-quoted PowerShell string literal.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use unidisk_core::{ErrorKind, ScriptedRunner};

    #[test]
    fn preference_is_embedded() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push_ok("[]");
        let ps = PowerShell::new(runner.clone(), ErrorAction::Stop);
        ps.command("Get-Disk", &[GET_DISK]).unwrap();
        assert_eq!(
            runner.calls()[0],
            vec![
                "powershell.exe".to_string(),
                "-NoProfile".to_string(),
                "-Command".to_string(),
                "$ErrorActionPreference=\"Stop\"; Get-Disk".to_string(),
            ]
        );
    }

    #[test]
    fn cmdlet_errors_in_output_are_detected() {
        let runner = Arc::new(ScriptedRunner::new());
        runner
            .push_ok("Clear-Disk : Access to a CIM resource was not available to the client.")
            .push_ok("clear-disk : lower case still counts")
            .push_ok("Clear-Disk");
        let ps = PowerShell::new(runner, ErrorAction::Continue);

        let err = ps.command("Clear-Disk -Number '1'", &[CLEAR_DISK]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendOutput);
        let err = ps.command("Clear-Disk -Number '1'", &[CLEAR_DISK]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendOutput);
        // A bare name with nothing after it is not an error report.
        ps.command("Clear-Disk -Number '1'", &[CLEAR_DISK]).unwrap();
    }

    #[test]
    fn process_failure_is_backend_command() {
        let runner = Arc::new(ScriptedRunner::new());
        runner.push(Err(std::io::Error::new(std::io::ErrorKind::NotFound, "powershell.exe")));
        let err = PowerShell::new(runner, ErrorAction::Continue).raw("Get-Disk").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BackendCommand);
    }

    #[test]
    fn quoting() {
        assert_eq!(quote("USB"), "'USB'");
        assert_eq!(quote("Bob's"), "'Bob''s'");
    }
}
