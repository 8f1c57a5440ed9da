//! Sandboxed script execution.
//!
//! Each run gets a fresh [`rhai`] engine and a fresh output buffer, so
//! concurrent or sequential runs can never observe each other's state.
//! The engine exposes no filesystem, network, or environment bindings —
//! the only way for a script to communicate is the logging primitive
//! (`print`, aliased as `log`), whose output is captured line by line.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use rhai::{Dynamic, Engine, EvalAltResult, ImmutableString};
use thiserror::Error;
use tracing::debug;

use crate::config::SandboxConfig;

/// How often (in engine operations) the progress callback checks the
/// wall-clock deadline.
const DEADLINE_CHECK_INTERVAL: u64 = 1_024;

#[derive(Debug, Error)]
pub enum SandboxError {
    /// The script threw, hit a runtime error, or failed to parse.
    #[error("{0}")]
    Execution(String),
    /// The wall-clock deadline expired and the run was terminated.
    #[error("execution timed out after {0} ms")]
    Timeout(u64),
    /// The engine operation ceiling was reached.
    #[error("operation limit exceeded")]
    OperationLimit,
    /// The executor thread failed to complete (panic or cancellation).
    #[error("executor task failed: {0}")]
    Internal(String),
}

/// Runs untrusted source text in an isolation boundary and captures its
/// logged output.
#[derive(Debug, Clone)]
pub struct Sandbox {
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    /// Executes `source` and returns the captured output on success.
    ///
    /// Evaluation is synchronous, so it runs on the blocking thread pool.
    /// At most one evaluation per call; no retries.
    pub async fn execute(&self, source: &str) -> Result<String, SandboxError> {
        let source = source.to_string();
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || run_script(&source, &config))
            .await
            .map_err(|e| SandboxError::Internal(e.to_string()))?
    }
}

/// Locks the output buffer, recovering the guard if a previous holder
/// panicked (the buffer content stays valid either way).
fn lock_buffer(buffer: &Mutex<String>) -> MutexGuard<'_, String> {
    buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn run_script(source: &str, config: &SandboxConfig) -> Result<String, SandboxError> {
    let started = Instant::now();
    let buffer = Arc::new(Mutex::new(String::new()));

    let mut engine = Engine::new();

    // Capture the `print` builtin into this run's buffer
    {
        let buffer = buffer.clone();
        engine.on_print(move |text| {
            let mut out = lock_buffer(&buffer);
            out.push_str(text);
            out.push('\n');
        });
    }

    // `log("...")` — console-style alias for scripts ported from the
    // original JavaScript surface
    {
        let buffer = buffer.clone();
        engine.register_fn("log", move |text: ImmutableString| {
            let mut out = lock_buffer(&buffer);
            out.push_str(&text);
            out.push('\n');
        });
    }

    engine.set_max_operations(config.max_operations);

    // Wall-clock deadline, enforced through the progress callback.
    // Returning Some(_) terminates the script with ErrorTerminated.
    let deadline = started + config.timeout();
    engine.on_progress(move |ops| {
        if ops % DEADLINE_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
            Some(Dynamic::UNIT)
        } else {
            None
        }
    });

    match engine.run(source) {
        Ok(()) => {
            let output = lock_buffer(&buffer).clone();
            debug!(
                "Script completed in {} ms ({} bytes of output)",
                started.elapsed().as_millis(),
                output.len()
            );
            Ok(output)
        }
        Err(err) => Err(map_error(*err, config)),
    }
}

fn map_error(err: EvalAltResult, config: &SandboxConfig) -> SandboxError {
    match err {
        // `throw value` — surface the thrown value itself, the way the
        // caller wrote it
        EvalAltResult::ErrorRuntime(value, _) => {
            let message = value.to_string();
            if message.is_empty() {
                SandboxError::Execution("script threw an unspecified error".to_string())
            } else {
                SandboxError::Execution(message)
            }
        }
        EvalAltResult::ErrorTerminated(..) => SandboxError::Timeout(config.timeout_ms),
        EvalAltResult::ErrorTooManyOperations(_) => SandboxError::OperationLimit,
        other => SandboxError::Execution(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> Sandbox {
        Sandbox::new(SandboxConfig::default())
    }

    fn sandbox_with(timeout_ms: u64, max_operations: u64) -> Sandbox {
        Sandbox::new(SandboxConfig {
            timeout_ms,
            max_operations,
        })
    }

    // ── Output capture ──────────────────────────────────

    #[tokio::test]
    async fn test_print_appends_newline() {
        let output = sandbox().execute(r#"print("hi");"#).await.unwrap();
        assert_eq!(output, "hi\n");
    }

    #[tokio::test]
    async fn test_output_preserves_emission_order() {
        let output = sandbox()
            .execute(r#"print("one"); print("two"); print("three");"#)
            .await
            .unwrap();
        assert_eq!(output, "one\ntwo\nthree\n");
    }

    #[tokio::test]
    async fn test_log_alias() {
        let output = sandbox()
            .execute(r#"log("hello"); log("world");"#)
            .await
            .unwrap();
        assert_eq!(output, "hello\nworld\n");
    }

    #[tokio::test]
    async fn test_print_non_string_values() {
        let output = sandbox().execute(r#"print(6 * 7);"#).await.unwrap();
        assert_eq!(output, "42\n");
    }

    #[tokio::test]
    async fn test_silent_script_yields_empty_output() {
        let output = sandbox().execute("let x = 1 + 1;").await.unwrap();
        assert_eq!(output, "");
    }

    // ── Failure paths ───────────────────────────────────

    #[tokio::test]
    async fn test_throw_surfaces_thrown_value() {
        let err = sandbox().execute(r#"throw "boom";"#).await.unwrap_err();
        match err {
            SandboxError::Execution(msg) => assert_eq!(msg, "boom"),
            other => panic!("expected Execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_bare_throw_has_nonempty_message() {
        let err = sandbox().execute("throw;").await.unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_parse_error_is_reported() {
        let err = sandbox().execute("let = ;").await.unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
        assert!(!err.to_string().is_empty());
    }

    #[tokio::test]
    async fn test_executor_recovers_after_failure() {
        let sandbox = sandbox();
        sandbox.execute(r#"throw "boom";"#).await.unwrap_err();
        // An unrelated run afterwards is unaffected
        let output = sandbox.execute(r#"print("still alive");"#).await.unwrap();
        assert_eq!(output, "still alive\n");
    }

    // ── Isolation ───────────────────────────────────────

    #[tokio::test]
    async fn test_no_host_bindings_exposed() {
        // No file, network, or env functions are registered; calling one
        // is just an unknown-function error inside the sandbox.
        let err = sandbox()
            .execute(r#"open_file("/etc/passwd");"#)
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
    }

    #[tokio::test]
    async fn test_state_does_not_leak_between_runs() {
        let sandbox = sandbox();
        sandbox.execute("let secret = 42;").await.unwrap();
        // The variable does not exist in the next run's scope
        let err = sandbox.execute("print(secret);").await.unwrap_err();
        assert!(matches!(err, SandboxError::Execution(_)));
    }

    #[tokio::test]
    async fn test_concurrent_runs_never_interleave() {
        let sandbox = sandbox();
        let a = sandbox.execute(r#"print("A"); print("A"); print("A");"#);
        let b = sandbox.execute(r#"print("B"); print("B"); print("B");"#);
        let (a, b) = tokio::join!(a, b);
        assert_eq!(a.unwrap(), "A\nA\nA\n");
        assert_eq!(b.unwrap(), "B\nB\nB\n");
    }

    // ── Bounded execution ───────────────────────────────

    #[tokio::test]
    async fn test_infinite_loop_times_out() {
        // Unlimited operations, 100 ms deadline
        let sandbox = sandbox_with(100, 0);
        let err = sandbox
            .execute("let x = 0; loop { x += 1; }")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::Timeout(100)));
    }

    #[tokio::test]
    async fn test_operation_ceiling() {
        let sandbox = sandbox_with(60_000, 500);
        let err = sandbox
            .execute("let x = 0; while x < 1000000 { x += 1; }")
            .await
            .unwrap_err();
        assert!(matches!(err, SandboxError::OperationLimit));
    }

    #[tokio::test]
    async fn test_timeout_does_not_poison_executor() {
        let sandbox = sandbox_with(100, 0);
        sandbox
            .execute("let x = 0; loop { x += 1; }")
            .await
            .unwrap_err();
        let output = sandbox.execute(r#"print("ok");"#).await.unwrap();
        assert_eq!(output, "ok\n");
    }
}
