//! Process actions: `execute_command` and `execute_python`
//!
//! Both are off unless `security.allow_code_execution` is set. Commands run
//! execve-style in the workspace with stdin closed; no shell is involved, so
//! pipes and redirects are rejected rather than interpreted.

use async_trait::async_trait;
use sdk::{Action, ActionParams, EngineError};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const SHELLS: &[&str] = &["sh", "bash", "zsh", "fish", "dash", "cmd", "powershell", "pwsh"];
const BLOCKED: &[&str] = &["rm", "del", "format", "fdisk", "mkfs", "shutdown", "reboot", "sudo", "su"];
const DEFAULT_TIMEOUT_SECS: u64 = 30;

fn execution_disabled() -> EngineError {
    EngineError::PermissionDenied(
        "code execution is disabled (security.allow_code_execution)".to_string(),
    )
}

fn has_shell_metacharacters(s: &str) -> bool {
    s.chars()
        .any(|c| matches!(c, '|' | '&' | ';' | '`' | '\n' | '<' | '>' | '$'))
}

/// Reject shells, destructive programs and shell syntax in arguments
pub fn validate_command(program: &str, args: &[String]) -> Result<(), EngineError> {
    let base = Path::new(program)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(program)
        .to_lowercase();

    if SHELLS.contains(&base.as_str()) {
        return Err(EngineError::PermissionDenied(format!(
            "shell invocation '{}' is not allowed",
            program
        )));
    }
    if BLOCKED.contains(&base.as_str()) {
        return Err(EngineError::PermissionDenied(format!(
            "command '{}' is blocked",
            program
        )));
    }
    if let Some(arg) = std::iter::once(program)
        .chain(args.iter().map(String::as_str))
        .find(|a| has_shell_metacharacters(a))
    {
        return Err(EngineError::Validation(format!(
            "shell metacharacters in argument: {}",
            arg
        )));
    }
    Ok(())
}

/// Run a program to completion and collect its output
async fn run(
    program: &str,
    args: &[String],
    work_dir: &Path,
    timeout: Duration,
) -> Result<Value, EngineError> {
    let child = Command::new(program)
        .args(args)
        .current_dir(work_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| EngineError::ActionFailed(format!("Failed to start {}: {}", program, e)))?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| EngineError::ActionTimeout(timeout.as_secs()))??;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let return_code = output.status.code();

    if !output.status.success() {
        warn!("{} exited with {:?}", program, return_code);
        return Err(EngineError::ActionFailed(format!(
            "{} failed with return code {}: {}",
            program,
            return_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
            stderr.trim()
        )));
    }

    Ok(json!({
        "stdout": stdout,
        "stderr": stderr,
        "return_code": return_code,
    }))
}

pub struct ExecuteCommand {
    work_dir: PathBuf,
    enabled: bool,
}

impl ExecuteCommand {
    pub fn new(work_dir: PathBuf, enabled: bool) -> Self {
        Self { work_dir, enabled }
    }
}

#[async_trait]
impl Action for ExecuteCommand {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Run a program with arguments in the workspace (no shell)"
    }

    fn parameters(&self) -> &[&'static str] {
        &["command", "args", "timeout"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        if !self.enabled {
            return Err(execution_disabled());
        }

        let command = params.str("command")?;
        let mut args = params.str_list("args")?;

        // A bare command line is split on whitespace when no args are given
        let mut words = command.split_whitespace().map(String::from);
        let program = words
            .next()
            .ok_or_else(|| EngineError::Validation("empty command".to_string()))?;
        if args.is_empty() {
            args = words.collect();
        }

        validate_command(&program, &args)?;
        let timeout = params.u64_opt("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);

        info!("Executing command: {} {:?}", program, args);
        run(&program, &args, &self.work_dir, Duration::from_secs(timeout)).await
    }
}

pub struct ExecutePython {
    work_dir: PathBuf,
    enabled: bool,
    interpreter: String,
}

impl ExecutePython {
    pub fn new(work_dir: PathBuf, enabled: bool) -> Self {
        let interpreter = if cfg!(windows) { "python" } else { "python3" };
        Self {
            work_dir,
            enabled,
            interpreter: interpreter.to_string(),
        }
    }
}

#[async_trait]
impl Action for ExecutePython {
    fn name(&self) -> &str {
        "execute_python"
    }

    fn description(&self) -> &str {
        "Run a Python snippet with the system interpreter"
    }

    fn parameters(&self) -> &[&'static str] {
        &["code", "timeout"]
    }

    async fn execute(&self, params: &ActionParams) -> Result<Value, EngineError> {
        if !self.enabled {
            return Err(execution_disabled());
        }

        let code = params.str("code")?;
        let timeout = params.u64_opt("timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);

        info!("Executing {} bytes of Python", code.len());
        run(
            &self.interpreter,
            &["-c".to_string(), code.to_string()],
            &self.work_dir,
            Duration::from_secs(timeout),
        )
        .await
    }
}
