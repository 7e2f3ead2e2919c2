//! Integration tests for the sandboxed executor
//!
//! Most cases use the POSIX shell runtime so they run anywhere. Cases that
//! need the JavaScript runtime or bash skip themselves when the interpreter
//! is not installed.

use std::path::Path;
use std::time::{Duration, Instant};

use nexus::sandbox::{
    ExecutionError, SandboxExecutor, SandboxRuntime, DEFAULT_TIMEOUT, MAX_OUTPUT_BYTES,
    NO_OUTPUT_PLACEHOLDER, OUTPUT_TRUNCATED_NOTICE,
};
use nexus::tools::execution_envelope;

/// Directories on the PATH handed to sandboxed children
const SANDBOX_BIN_DIRS: [&str; 3] = ["/usr/local/bin", "/usr/bin", "/bin"];

fn shell(timeout: Duration) -> SandboxExecutor {
    SandboxExecutor::new(SandboxRuntime::shell(), timeout)
}

fn installed(program: &str) -> bool {
    SANDBOX_BIN_DIRS
        .iter()
        .any(|dir| Path::new(dir).join(program).exists())
}

fn javascript(timeout: Duration) -> Option<SandboxExecutor> {
    installed("node").then(|| SandboxExecutor::new(SandboxRuntime::javascript(), timeout))
}

fn bash() -> Option<SandboxExecutor> {
    Path::new("/bin/bash")
        .exists()
        .then(|| SandboxExecutor::new(SandboxRuntime::shell().with_program("/bin/bash"), DEFAULT_TIMEOUT))
}

#[tokio::test]
async fn test_lines_are_joined_in_order() {
    let captured = shell(DEFAULT_TIMEOUT).execute("echo a; echo b").await.unwrap();
    assert_eq!(captured.output, "a\nb");
}

#[tokio::test]
async fn test_silent_code_gets_placeholder() {
    let captured = shell(DEFAULT_TIMEOUT).execute(":").await.unwrap();
    assert_eq!(captured.output, NO_OUTPUT_PLACEHOLDER);
}

#[tokio::test]
async fn test_runtime_error_keeps_partial_output() {
    let err = shell(DEFAULT_TIMEOUT)
        .execute("echo before; echo oops >&2; exit 3")
        .await
        .unwrap_err();
    match err {
        ExecutionError::Runtime { message, output } => {
            assert_eq!(message, "oops");
            assert_eq!(output, "before");
        }
        other => panic!("unexpected settlement: {other:?}"),
    }
}

#[tokio::test]
async fn test_timeout_kills_and_settles() {
    let start = Instant::now();
    let settlement = shell(Duration::from_secs(1)).execute("echo started; sleep 10").await;
    assert!(start.elapsed() < Duration::from_secs(5));

    let envelope: serde_json::Value = serde_json::from_str(&execution_envelope(&settlement)).unwrap();
    assert_eq!(
        envelope,
        serde_json::json!({"result": null, "error": "Code execution timed out after 1 seconds."})
    );
}

#[tokio::test]
async fn test_timeout_kills_background_children() {
    // The backgrounded sleep shares the process group and must die with it
    let start = Instant::now();
    let err = shell(Duration::from_secs(1))
        .execute("sleep 30 & wait")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutionError::Timeout { secs: 1 }));
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_background_child_does_not_hold_up_settlement() {
    let start = Instant::now();
    let captured = shell(Duration::from_secs(3))
        .execute("echo done; sleep 30 &")
        .await
        .unwrap();
    assert_eq!(captured.output, "done");
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_output_flood_is_capped() {
    // 4 MiB on stdout, four times the cap
    let captured = shell(DEFAULT_TIMEOUT)
        .execute("head -c 4194304 /dev/zero | tr '\\0' x; echo")
        .await
        .unwrap();

    assert!(captured.output.ends_with(OUTPUT_TRUNCATED_NOTICE));
    assert!(captured.output.len() <= MAX_OUTPUT_BYTES + OUTPUT_TRUNCATED_NOTICE.len() + 1);
    assert!(captured.output.starts_with("xxxx"));
}

#[tokio::test]
async fn test_output_under_cap_is_untouched() {
    let captured = shell(DEFAULT_TIMEOUT)
        .execute("head -c 1000 /dev/zero | tr '\\0' x; echo")
        .await
        .unwrap();
    assert_eq!(captured.output, "x".repeat(1000));
}

#[tokio::test]
async fn test_ip_sockets_are_denied() {
    let Some(executor) = bash() else {
        eprintln!("Skipping test: /bin/bash not found");
        return;
    };
    let err = executor
        .execute("exec 3<>/dev/tcp/127.0.0.1/9")
        .await
        .unwrap_err();
    match err {
        ExecutionError::Runtime { message, .. } => {
            assert!(message.contains("Permission denied"), "unexpected error: {message}");
        }
        other => panic!("unexpected settlement: {other:?}"),
    }
}

#[tokio::test]
async fn test_ip_sockets_allowed_when_not_denied() {
    let Some(executor) = bash() else {
        eprintln!("Skipping test: /bin/bash not found");
        return;
    };
    let settlement = executor
        .with_network_denied(false)
        .execute("exec 3<>/dev/tcp/127.0.0.1/9")
        .await;
    // Nothing listens on the discard port; the point is reaching connect()
    if let Err(ExecutionError::Runtime { message, .. }) = settlement {
        assert!(!message.contains("Permission denied"), "unexpected error: {message}");
    }
}

#[tokio::test]
async fn test_capabilities_are_shed() {
    let captured = shell(DEFAULT_TIMEOUT)
        .execute("grep -E '^Cap(Eff|Prm|Amb):' /proc/self/status")
        .await
        .unwrap();
    for line in captured.output.lines() {
        let mask = line.split_whitespace().nth(1).unwrap();
        assert!(mask.chars().all(|c| c == '0'), "capability left in child: {line}");
    }
}

#[tokio::test]
async fn test_default_deadline_is_five_seconds() {
    let start = Instant::now();
    let settlement = shell(DEFAULT_TIMEOUT).execute("while :; do :; done").await;
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(8));
    let envelope: serde_json::Value = serde_json::from_str(&execution_envelope(&settlement)).unwrap();
    assert_eq!(envelope["result"], serde_json::Value::Null);
    assert_eq!(envelope["error"], "Code execution timed out after 5 seconds.");
}

#[tokio::test]
async fn test_host_environment_is_not_visible() {
    std::env::set_var("NEXUS_TEST_HOST_SECRET", "hunter2");
    let settlement = shell(DEFAULT_TIMEOUT).execute("echo \"$NEXUS_TEST_HOST_SECRET\"").await;

    let envelope: serde_json::Value = serde_json::from_str(&execution_envelope(&settlement)).unwrap();
    assert!(envelope["error"].is_string());
    assert!(!envelope.to_string().contains("hunter2"));
}

#[tokio::test]
async fn test_each_call_gets_fresh_scratch_dir() {
    let executor = shell(DEFAULT_TIMEOUT);
    executor.execute("echo leftover > state.txt").await.unwrap();
    let err = executor.execute("cat state.txt").await.unwrap_err();
    assert!(matches!(err, ExecutionError::Runtime { .. }));
}

#[tokio::test]
async fn test_missing_interpreter_is_spawn_error() {
    let runtime = SandboxRuntime::shell().with_program("/nonexistent/interpreter");
    let err = SandboxExecutor::new(runtime, DEFAULT_TIMEOUT).execute("echo hi").await.unwrap_err();
    assert!(matches!(err, ExecutionError::Spawn(_)));

    let envelope: serde_json::Value = serde_json::from_str(&execution_envelope(&Err(err))).unwrap();
    assert!(envelope["result"].is_null());
    assert!(envelope["error"].as_str().unwrap().starts_with("Failed to start sandbox"));
}

#[tokio::test]
async fn test_javascript_console_log_lines() {
    let Some(executor) = javascript(DEFAULT_TIMEOUT) else {
        eprintln!("Skipping test: node not found");
        return;
    };
    let captured = executor.execute("console.log('a'); console.log('b')").await.unwrap();
    assert_eq!(captured.output, "a\nb");
}

#[tokio::test]
async fn test_javascript_objects_are_serialized() {
    let Some(executor) = javascript(DEFAULT_TIMEOUT) else {
        eprintln!("Skipping test: node not found");
        return;
    };
    let captured = executor.execute("console.log({x: 1}, [1, 2])").await.unwrap();
    assert_eq!(captured.output, "{\"x\":1} [1,2]");
}

#[tokio::test]
async fn test_javascript_host_state_is_unreachable() {
    let Some(executor) = javascript(DEFAULT_TIMEOUT) else {
        eprintln!("Skipping test: node not found");
        return;
    };
    let err = executor
        .execute("console.log('start'); console.log(process.env.HOME)")
        .await
        .unwrap_err();
    match err {
        ExecutionError::Runtime { message, output } => {
            assert_eq!(message, "process is not defined");
            assert_eq!(output, "start");
        }
        other => panic!("unexpected settlement: {other:?}"),
    }
}

#[tokio::test]
async fn test_javascript_infinite_loop_times_out() {
    let Some(executor) = javascript(Duration::from_secs(1)) else {
        eprintln!("Skipping test: node not found");
        return;
    };
    let err = executor.execute("while (true) {}").await.unwrap_err();
    assert!(matches!(err, ExecutionError::Timeout { secs: 1 }));
}

#[tokio::test]
async fn test_javascript_log_flood_is_capped() {
    let Some(executor) = javascript(DEFAULT_TIMEOUT) else {
        eprintln!("Skipping test: node not found");
        return;
    };
    let captured = executor
        .execute("for (let i = 0; i < 200; i++) console.log('x'.repeat(1 << 16))")
        .await
        .unwrap();
    assert!(captured.output.ends_with(OUTPUT_TRUNCATED_NOTICE));
    assert!(captured.output.len() <= MAX_OUTPUT_BYTES + OUTPUT_TRUNCATED_NOTICE.len() + 1);
}
