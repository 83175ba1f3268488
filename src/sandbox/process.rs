//! Process Sandbox
//!
//! Runs a python module's entry point in a short-lived interpreter
//! process. A small driver script applies CPU and address-space rlimits
//! inside the child, executes the module with the payload in scope,
//! and reports a single JSON object on stdout. The parent enforces the
//! wall-clock limit and kills the child when it is exceeded.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::types::{Sandbox, SandboxLimits, SandboxOutcome};

/// Driver executed via `python -c`. Argv: module path, entry name,
/// CPU seconds, memory MB. Payload arrives as JSON on stdin; the
/// result leaves as JSON on the last stdout line. User prints are
/// swallowed so they cannot corrupt the protocol.
const DRIVER: &str = r#"
import io
import json
import resource
import sys


def apply_limits(cpu_s, mem_mb):
    try:
        resource.setrlimit(resource.RLIMIT_CPU, (cpu_s, cpu_s))
    except (ValueError, OSError):
        pass
    try:
        mem = mem_mb * 1024 * 1024
        resource.setrlimit(resource.RLIMIT_AS, (mem, mem))
    except (ValueError, OSError):
        pass


def main():
    module_path = sys.argv[1]
    entry = sys.argv[2]
    cpu_s = int(sys.argv[3])
    mem_mb = int(sys.argv[4])

    out = {"ok": False}
    try:
        payload = json.load(sys.stdin)
    except Exception:
        payload = {}

    try:
        with open(module_path, "r") as f:
            code = f.read()
    except Exception as e:
        out["error"] = str(e)
        print(json.dumps(out))
        return

    apply_limits(cpu_s, mem_mb)

    scope = {"input_data": payload, "payload": payload}
    real_stdout = sys.stdout
    sys.stdout = io.StringIO()
    try:
        exec(compile(code, module_path, "exec"), scope)
        fn = scope.get(entry)
        if callable(fn):
            out["result"] = fn(payload)
            out["ok"] = True
        else:
            out["error"] = "Entry point not found: " + entry
            out["entry_missing"] = True
    except MemoryError:
        out["error"] = "Memory limit exceeded"
    except BaseException as e:
        out["error"] = type(e).__name__ + ": " + str(e)
    finally:
        sys.stdout = real_stdout

    print(json.dumps(out, default=str))


main()
"#;

pub struct ProcessSandbox {
    python_bin: String,
}

impl ProcessSandbox {
    pub fn new(python_bin: &str) -> Self {
        ProcessSandbox {
            python_bin: python_bin.to_string(),
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run_module(
        &self,
        module_path: &str,
        entry: &str,
        payload: &Value,
        limits: &SandboxLimits,
    ) -> SandboxOutcome {
        if !Path::new(module_path).exists() {
            return SandboxOutcome::failure(format!("Module not found: {}", module_path));
        }

        let mut command = Command::new(&self.python_bin);
        command
            .arg("-c")
            .arg(DRIVER)
            .arg(module_path)
            .arg(entry)
            .arg(limits.cpu_s.to_string())
            .arg(limits.mem_mb.to_string())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                return SandboxOutcome::failure(format!(
                    "Failed to start {}: {}",
                    self.python_bin, e
                ))
            }
        };

        if let Some(mut stdin) = child.stdin.take() {
            // A closed pipe means the child already exited; the parse
            // below reports the outcome either way.
            let _ = stdin.write_all(payload.to_string().as_bytes()).await;
        }

        let deadline = Duration::from_secs(limits.timeout_s);
        match timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => parse_output(&output.stdout, &output.stderr),
            Ok(Err(e)) => SandboxOutcome::failure(format!("Interpreter error: {}", e)),
            // Dropping the future drops the child handle, which kills
            // the process (kill_on_drop).
            Err(_) => SandboxOutcome::timed_out(),
        }
    }
}

fn parse_output(stdout: &[u8], stderr: &[u8]) -> SandboxOutcome {
    let stdout = String::from_utf8_lossy(stdout);
    let last_line = stdout.lines().rev().find(|l| !l.trim().is_empty());

    match last_line.and_then(|l| serde_json::from_str::<SandboxOutcome>(l).ok()) {
        Some(outcome) => outcome,
        None => {
            let stderr = String::from_utf8_lossy(stderr);
            if !stderr.trim().is_empty() {
                debug!("Sandbox produced no result: {}", stderr.trim());
            }
            SandboxOutcome::failure("No result returned".to_string())
        }
    }
}
