//! Sandboxed code executor
//!
//! Every invocation gets a brand-new child process:
//!
//! ```text
//! execute(code)
//!     │
//!     ├─ scratch dir (tempfile, removed on drop)
//!     ├─ spawn interpreter ── env cleared, own process group,
//!     │                       caps dropped, IP sockets denied
//!     ├─ code ──► stdin (then closed)
//!     │
//!     ├─ race: collect(stdout, stderr, exit status)  vs  deadline
//!     │         │                                         │
//!     │         ├─ output capped, excess discarded        │
//!     │         ├─ interpreter exits: short drain,        │
//!     │         │  then SIGKILL leftover group members    │
//!     │         ▼                                         ▼
//!     │   Ok(CapturedOutput) / Err(Runtime)        SIGKILL group, reap,
//!     │                                            Err(Timeout)
//!     └─ exactly one settlement
//! ```

use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use seccompiler::BpfProgram;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, info, info_span, warn, Instrument};

use super::capabilities::CapabilityDropper;
use super::seccomp::{self, NetworkSeccomp};
use crate::config::{RuntimeKind, SandboxSettings};
use crate::metrics::{CODE_EXECUTIONS, CODE_EXECUTION_DURATION};

/// Returned instead of empty text when the code logged nothing
pub const NO_OUTPUT_PLACEHOLDER: &str = "Code executed successfully with no output.";

/// Default wall-clock deadline
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Most stdout kept from one execution; the rest is read and discarded
pub const MAX_OUTPUT_BYTES: usize = 1 << 20;

/// Last line of an output that hit [`MAX_OUTPUT_BYTES`]
pub const OUTPUT_TRUNCATED_NOTICE: &str = "[output truncated]";

/// Most stderr kept for an error message
const MAX_ERROR_BYTES: usize = 64 * 1024;

/// How long pipes may stay open after the interpreter itself has exited
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// PATH handed to the child; everything else in the environment is dropped
const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

const JS_HARNESS: &str = include_str!("harness.js");

/// Error type for sandboxed execution
#[derive(Debug, thiserror::Error)]
pub enum ExecutionError {
    /// The deadline passed; the process group was killed and no output kept
    #[error("Code execution timed out after {secs} seconds.")]
    Timeout { secs: u64 },
    /// The code failed; `output` holds what it logged before failing
    #[error("{message}")]
    Runtime { message: String, output: String },
    #[error("Failed to start sandbox: {0}")]
    Spawn(#[source] io::Error),
    #[error("Sandbox I/O error: {0}")]
    Io(#[from] io::Error),
}

impl ExecutionError {
    /// Output captured before the failure, if the failure kept any
    pub fn partial_output(&self) -> Option<&str> {
        match self {
            ExecutionError::Runtime { output, .. } => Some(output),
            _ => None,
        }
    }

    fn status_label(&self) -> &'static str {
        match self {
            ExecutionError::Timeout { .. } => "timeout",
            ExecutionError::Runtime { .. } => "error",
            ExecutionError::Spawn(_) | ExecutionError::Io(_) => "spawn_error",
        }
    }
}

/// Successful execution result
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedOutput {
    /// Logged lines joined with `\n`, or [`NO_OUTPUT_PLACEHOLDER`]
    pub output: String,
    pub duration_ms: f64,
}

/// Interpreter invocation for the isolated context
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxRuntime {
    pub program: String,
    pub args: Vec<String>,
}

impl SandboxRuntime {
    /// `node` evaluating stdin inside a fresh V8 context
    pub fn javascript() -> Self {
        Self {
            program: "node".to_string(),
            args: vec!["-e".to_string(), JS_HARNESS.to_string()],
        }
    }

    /// POSIX shell reading the script from stdin, failing on unset variables
    pub fn shell() -> Self {
        Self {
            program: "/bin/sh".to_string(),
            args: vec!["-eu".to_string(), "-s".to_string()],
        }
    }

    pub fn for_kind(kind: RuntimeKind) -> Self {
        match kind {
            RuntimeKind::Javascript => Self::javascript(),
            RuntimeKind::Shell => Self::shell(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }
}

/// Executes untrusted code in throwaway child processes
#[derive(Debug, Clone)]
pub struct SandboxExecutor {
    runtime: SandboxRuntime,
    timeout: Duration,
    deny_network: bool,
}

impl Default for SandboxExecutor {
    fn default() -> Self {
        Self::new(SandboxRuntime::javascript(), DEFAULT_TIMEOUT)
    }
}

/// Everything the forked child applies to itself before `exec`
struct ChildHardening {
    seccomp: Option<BpfProgram>,
    caps: CapabilityDropper,
}

impl ChildHardening {
    /// Runs between fork and exec: raw syscalls only, no allocation
    fn apply(&self) -> io::Result<()> {
        // SAFETY: setpgid is async-signal-safe
        if unsafe { libc::setpgid(0, 0) } != 0 {
            return Err(io::Error::last_os_error());
        }
        self.caps.apply_in_child();
        if let Some(program) = &self.seccomp {
            seccomp::apply_in_child(program)?;
        }
        Ok(())
    }
}

struct RawOutput {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    stdout_truncated: bool,
    status: ExitStatus,
}

/// Bytes read from one pipe, up to a cap
struct Capped {
    bytes: Vec<u8>,
    truncated: bool,
}

impl SandboxExecutor {
    pub fn new(runtime: SandboxRuntime, timeout: Duration) -> Self {
        Self {
            runtime,
            timeout,
            deny_network: true,
        }
    }

    pub fn from_settings(settings: &SandboxSettings) -> Self {
        let mut runtime = SandboxRuntime::for_kind(settings.runtime);
        if let Some(program) = &settings.program {
            runtime = runtime.with_program(program.clone());
        }
        Self::new(runtime, Duration::from_secs(settings.timeout_secs.max(1)))
            .with_network_denied(settings.deny_network)
    }

    pub fn with_network_denied(mut self, deny: bool) -> Self {
        self.deny_network = deny;
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn runtime(&self) -> &SandboxRuntime {
        &self.runtime
    }

    /// Run `code` in a fresh isolated child and settle exactly once
    pub async fn execute(&self, code: &str) -> Result<CapturedOutput, ExecutionError> {
        let span = info_span!(
            "code_execution",
            program = %self.runtime.program,
            code_len = code.len(),
            otel.name = "code_execution"
        );

        let start = Instant::now();
        let result = self.run(code, start).instrument(span).await;
        let elapsed = start.elapsed();

        CODE_EXECUTION_DURATION.observe(elapsed.as_secs_f64());
        match &result {
            Ok(captured) => {
                CODE_EXECUTIONS.with_label_values(&["success"]).inc();
                info!(duration_ms = captured.duration_ms, "Code execution succeeded");
            }
            Err(e) => {
                CODE_EXECUTIONS.with_label_values(&[e.status_label()]).inc();
                warn!(error = %e, duration_ms = elapsed.as_secs_f64() * 1000.0, "Code execution failed");
            }
        }
        result
    }

    async fn run(&self, code: &str, start: Instant) -> Result<CapturedOutput, ExecutionError> {
        let scratch = tempfile::Builder::new()
            .prefix("nexus-sandbox-")
            .tempdir()
            .map_err(ExecutionError::Spawn)?;

        let hardening = ChildHardening {
            seccomp: if self.deny_network {
                Some(NetworkSeccomp::with_inet_denied().build().map_err(ExecutionError::Spawn)?)
            } else {
                None
            },
            caps: CapabilityDropper::for_current_process(),
        };

        let mut cmd = Command::new(&self.runtime.program);
        cmd.args(&self.runtime.args)
            .current_dir(scratch.path())
            .env_clear()
            .env("PATH", SANDBOX_PATH)
            .env("HOME", scratch.path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // SAFETY: the hook only issues raw syscalls (setpgid, prctl, capset,
        // seccomp) on data prepared before fork.
        unsafe {
            cmd.pre_exec(move || hardening.apply());
        }

        let mut child = cmd.spawn().map_err(ExecutionError::Spawn)?;
        let pid = child.id();
        debug!(?pid, "Sandbox child spawned");

        let settled = tokio::time::timeout(self.timeout, collect(&mut child, pid, code)).await;

        match settled {
            Ok(raw) => {
                let raw = raw?;
                let duration_ms = start.elapsed().as_secs_f64() * 1000.0;
                settle(raw, duration_ms)
            }
            Err(_elapsed) => {
                terminate(&mut child, pid).await;
                Err(ExecutionError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
        }
    }
}

/// Feed the code, drain both pipes and wait for exit
async fn collect(child: &mut Child, pid: Option<u32>, code: &str) -> Result<RawOutput, ExecutionError> {
    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sandbox stdin not captured"))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sandbox stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "sandbox stderr not captured"))?;

    // Pipes are drained on their own task so a backgrounded descendant that
    // inherited them cannot hide the interpreter's exit.
    let mut readers = tokio::spawn(async move {
        tokio::join!(
            read_capped(stdout, MAX_OUTPUT_BYTES),
            read_capped(stderr, MAX_ERROR_BYTES)
        )
    });

    let feed = async move {
        // A child that exits without reading stdin closes the pipe early;
        // that is its business, not an executor failure.
        let _ = stdin.write_all(code.as_bytes()).await;
        drop(stdin);
    };
    let ((), status) = tokio::join!(feed, child.wait());
    let status = status?;

    let drained = tokio::time::timeout(DRAIN_GRACE, &mut readers).await;
    // The interpreter is gone; whatever is left of its group goes with it
    kill_group(pid);
    let joined = match drained {
        Ok(joined) => joined,
        Err(_) => {
            debug!(?pid, "Output pipes held open after exit; group killed");
            readers.await
        }
    };
    let (out, err) = joined.map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let (out, err) = (out?, err?);

    if out.truncated {
        warn!(limit = MAX_OUTPUT_BYTES, "Sandbox output truncated");
    }
    Ok(RawOutput {
        stdout: out.bytes,
        stderr: err.bytes,
        stdout_truncated: out.truncated,
        status,
    })
}

/// Keep the first `limit` bytes and discard the rest, so the child never
/// blocks on a full pipe and the host never buffers more than `limit`
async fn read_capped<R: AsyncRead + Unpin>(mut reader: R, limit: usize) -> io::Result<Capped> {
    let mut bytes = Vec::new();
    (&mut reader).take(limit as u64).read_to_end(&mut bytes).await?;
    let discarded = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await?;
    Ok(Capped {
        bytes,
        truncated: discarded > 0,
    })
}

fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid {
        if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL) {
            debug!(error = %e, "killpg failed; group already gone");
        }
    }
}

/// Kill the whole process group and reap the child
async fn terminate(child: &mut Child, pid: Option<u32>) {
    kill_group(pid);
    let _ = child.start_kill();
    let _ = child.wait().await;
}

/// Join logged lines in order
fn captured_log(stdout: &[u8]) -> String {
    String::from_utf8_lossy(stdout)
        .lines()
        .collect::<Vec<_>>()
        .join("\n")
}

fn settle(raw: RawOutput, duration_ms: f64) -> Result<CapturedOutput, ExecutionError> {
    let mut output = captured_log(&raw.stdout);
    if raw.stdout_truncated {
        output.push('\n');
        output.push_str(OUTPUT_TRUNCATED_NOTICE);
    }

    if raw.status.success() {
        let output = if output.is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            output
        };
        return Ok(CapturedOutput {
            output,
            duration_ms,
        });
    }

    let stderr = String::from_utf8_lossy(&raw.stderr).trim().to_string();
    let message = if !stderr.is_empty() {
        stderr
    } else if let Some(code) = raw.status.code() {
        format!("Process exited with status {}", code)
    } else if let Some(signal) = raw.status.signal() {
        format!("Process terminated by signal {}", signal)
    } else {
        "Process failed".to_string()
    };

    Err(ExecutionError::Runtime { message, output })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(code: i32) -> ExitStatus {
        // Raw wait status: exit code lives in the second byte
        ExitStatus::from_raw(code << 8)
    }

    #[test]
    fn test_settle_joins_lines() {
        let raw = RawOutput {
            stdout: b"a\nb\n".to_vec(),
            stderr: Vec::new(),
            stdout_truncated: false,
            status: status(0),
        };
        let captured = settle(raw, 1.0).unwrap();
        assert_eq!(captured.output, "a\nb");
    }

    #[test]
    fn test_settle_placeholder_for_silence() {
        let raw = RawOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            status: status(0),
        };
        assert_eq!(settle(raw, 1.0).unwrap().output, NO_OUTPUT_PLACEHOLDER);
    }

    #[test]
    fn test_settle_runtime_error_keeps_partial_log() {
        let raw = RawOutput {
            stdout: b"before\n".to_vec(),
            stderr: b"boom is not defined\n".to_vec(),
            stdout_truncated: false,
            status: status(1),
        };
        match settle(raw, 1.0).unwrap_err() {
            ExecutionError::Runtime { message, output } => {
                assert_eq!(message, "boom is not defined");
                assert_eq!(output, "before");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_settle_silent_failure_reports_status() {
        let raw = RawOutput {
            stdout: Vec::new(),
            stderr: Vec::new(),
            stdout_truncated: false,
            status: status(3),
        };
        let err = settle(raw, 1.0).unwrap_err();
        assert_eq!(err.to_string(), "Process exited with status 3");
    }

    #[test]
    fn test_timeout_message() {
        let err = ExecutionError::Timeout { secs: 5 };
        assert_eq!(err.to_string(), "Code execution timed out after 5 seconds.");
        assert!(err.partial_output().is_none());
    }

    #[test]
    fn test_runtime_from_settings() {
        let settings = SandboxSettings {
            runtime: RuntimeKind::Shell,
            program: Some("/usr/bin/dash".to_string()),
            timeout_secs: 2,
            deny_network: false,
        };
        let executor = SandboxExecutor::from_settings(&settings);
        assert_eq!(executor.runtime().program, "/usr/bin/dash");
        assert_eq!(executor.timeout(), Duration::from_secs(2));
        assert!(!executor.deny_network);
    }

    #[test]
    fn test_javascript_runtime_embeds_harness() {
        let runtime = SandboxRuntime::javascript();
        assert_eq!(runtime.program, "node");
        assert_eq!(runtime.args[0], "-e");
        assert!(runtime.args[1].contains("runInContext"));
    }

    #[test]
    fn test_settle_marks_truncated_output() {
        let raw = RawOutput {
            stdout: b"xxxx".to_vec(),
            stderr: Vec::new(),
            stdout_truncated: true,
            status: status(0),
        };
        let captured = settle(raw, 1.0).unwrap();
        assert_eq!(captured.output, format!("xxxx\n{}", OUTPUT_TRUNCATED_NOTICE));
    }

    #[tokio::test]
    async fn test_read_capped_discards_excess() {
        let capped = read_capped(&b"abcdef"[..], 4).await.unwrap();
        assert_eq!(capped.bytes, b"abcd");
        assert!(capped.truncated);

        let exact = read_capped(&b"abcd"[..], 4).await.unwrap();
        assert_eq!(exact.bytes, b"abcd");
        assert!(!exact.truncated);
    }
}
