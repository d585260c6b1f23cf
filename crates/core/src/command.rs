//! Process execution seam shared by every backend.
//!
//! Backends never spawn processes directly. They go through a
//! [`CommandRunner`], which lets tests substitute [`ScriptedRunner`] and lets
//! callers wrap execution (elevation, timeouts) without touching the backends.

use std::collections::VecDeque;
use std::io;
use std::process::Command;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(0),
            stdout: stdout.into(),
            stderr: Vec::new(),
        }
    }

    pub fn failed(status: i32, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            status: Some(status),
            stdout: Vec::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// stdout followed by stderr, lossily decoded.
    pub fn combined(&self) -> String {
        let mut text = String::from_utf8_lossy(&self.stdout).to_string();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&String::from_utf8_lossy(&self.stderr));
        }
        text
    }
}

pub trait CommandRunner: Send + Sync {
    /// Runs `program` with `args` to completion. Only a failure to spawn is an
    /// error here; exit status is reported in the output.
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        debug!(command = %render(program, args), "exec");
        let output = Command::new(program).args(args).output()?;
        Ok(CommandOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

pub fn render(program: &str, args: &[String]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Runs a command and maps spawn failures and non-zero exits to
/// [`ErrorKind::BackendCommand`].
pub fn run_checked(
    runner: &dyn CommandRunner,
    program: &str,
    args: &[String],
) -> Result<CommandOutput> {
    let rendered = render(program, args);
    let output = runner
        .run(program, args)
        .map_err(|err| Error::with_source(ErrorKind::BackendCommand, rendered.clone(), err))?;
    if !output.success() {
        let status = output
            .status
            .map(|code| code.to_string())
            .unwrap_or_else(|| "signal".to_string());
        return Err(Error::new(
            ErrorKind::BackendCommand,
            format!("{rendered} exited with {status}: {}", output.combined().trim()),
        ));
    }
    Ok(output)
}

/// Reports whether `output` carries `signature` followed by further text.
/// Matching is ASCII case-insensitive.
pub fn contains_failure(output: &str, signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    let haystack = output.to_ascii_lowercase();
    let needle = signature.to_ascii_lowercase();
    haystack
        .match_indices(&needle)
        .any(|(idx, _)| idx + needle.len() < haystack.len())
}

/// Fails with [`ErrorKind::BackendOutput`] on the first matching signature.
pub fn check_failures(output: &str, signatures: &[&str]) -> Result<()> {
    for signature in signatures {
        if contains_failure(output, signature) {
            return Err(Error::new(
                ErrorKind::BackendOutput,
                format!("output contains {signature:?}: {}", output.trim()),
            ));
        }
    }
    Ok(())
}

/// Decodes JSON command output, mapping empty output to
/// [`ErrorKind::Empty`] and decode failures to [`ErrorKind::Unmarshal`].
pub fn decode_json<T: serde::de::DeserializeOwned>(raw: &[u8]) -> Result<T> {
    if raw.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::new(ErrorKind::Empty, "output was empty"));
    }
    serde_json::from_slice(raw).map_err(|err| {
        Error::with_source(
            ErrorKind::Unmarshal,
            format!("decoding {:?}", String::from_utf8_lossy(raw).trim()),
            err,
        )
    })
}

/// Queue-driven [`CommandRunner`] for tests. Responses are handed out in
/// order; every invocation is recorded.
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    responses: Mutex<VecDeque<io::Result<CommandOutput>>>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: io::Result<CommandOutput>) -> &Self {
        if let Ok(mut queue) = self.responses.lock() {
            queue.push_back(response);
        }
        self
    }

    pub fn push_ok(&self, stdout: impl Into<Vec<u8>>) -> &Self {
        self.push(Ok(CommandOutput::ok(stdout)))
    }

    pub fn push_failure(&self, status: i32, stderr: impl Into<Vec<u8>>) -> &Self {
        self.push(Ok(CommandOutput::failed(status, stderr)))
    }

    /// Every invocation so far as `[program, args...]`.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
    }

    pub fn remaining(&self) -> usize {
        self.responses.lock().map(|queue| queue.len()).unwrap_or(0)
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(&self, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            let mut call = vec![program.to_string()];
            call.extend(args.iter().cloned());
            calls.push(call);
        }
        let next = self
            .responses
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        next.unwrap_or_else(|| {
            Err(io::Error::new(
                io::ErrorKind::Other,
                format!("unexpected command: {}", render(program, args)),
            ))
        })
    }
}
