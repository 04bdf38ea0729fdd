//! Tool execution for a single test case.
//!
//! Spawns the external toolchain process, captures combined stdout/stderr,
//! enforces the per-case timeout, and compares the result against the test
//! definition. The child is killed and reaped on every exit path, including
//! timeout and run-level cancellation; on unix the whole process group goes
//! down with it, since toolchain invocations spawn helper processes.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use regex::Regex;

use crate::config::RunConfig;
use crate::discovery::TestCase;
use crate::gate::CaseBinding;
use crate::parallel::CancelToken;
use crate::report::{ErrorKind, ExecutionResult, Outcome};
use crate::testdef::TestDef;

/// Cap on captured output kept per case
const MAX_CAPTURE: usize = 64 * 1024;

/// Interval at which a running child is polled for exit/timeout/cancel
const POLL_INTERVAL: Duration = Duration::from_millis(25);

static ANSI_COLORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;]*[A-Za-z]").unwrap());

/// Executes one gated test case. Implemented by the real tool executor and
/// by test stubs, so the scheduler is exercisable without subprocesses.
pub trait Execute: Sync {
    fn execute(
        &self,
        case: &TestCase,
        binding: &CaseBinding,
        cancel: &CancelToken,
    ) -> ExecutionResult;
}

/// The real executor: one external toolchain invocation per case
pub struct ToolExecutor {
    config: Arc<RunConfig>,
}

impl ToolExecutor {
    pub fn new(config: Arc<RunConfig>) -> Self {
        Self { config }
    }

    fn tool_path(&self, tool: &str) -> Option<PathBuf> {
        self.config.toolchain_dir.as_ref().map(|dir| dir.join(tool))
    }
}

/// Normalize captured output: lossy UTF-8, `\n` line endings, shell colors
/// stripped.
fn normalize_output(raw: &[u8]) -> String {
    let text = String::from_utf8_lossy(raw);
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    ANSI_COLORS.replace_all(&text, "").into_owned()
}

fn reader_thread(
    stream: impl Read + Send + 'static,
) -> std::thread::JoinHandle<Vec<u8>> {
    std::thread::spawn(move || {
        let mut stream = stream;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match stream.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if buf.len() < MAX_CAPTURE {
                        buf.extend_from_slice(&chunk[..n]);
                    }
                }
            }
        }
        buf.truncate(MAX_CAPTURE);
        buf
    })
}

enum WaitOutcome {
    Exited(Option<i32>),
    TimedOut,
    Cancelled,
}

/// Kill the child and, on unix, its whole process group. The child is
/// spawned as a group leader, so helpers it forked die with it.
#[cfg(unix)]
fn kill_tree(child: &mut std::process::Child) {
    let pgid = child.id() as libc::pid_t;
    unsafe {
        libc::killpg(pgid, libc::SIGKILL);
    }
    let _ = child.kill();
}

#[cfg(not(unix))]
fn kill_tree(child: &mut std::process::Child) {
    let _ = child.kill();
}

/// Poll the child until exit, timeout, or cancellation. The child is always
/// reaped before returning.
fn wait_for_child(
    child: &mut std::process::Child,
    timeout: Duration,
    cancel: &CancelToken,
) -> std::io::Result<WaitOutcome> {
    let started = Instant::now();
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(WaitOutcome::Exited(status.code()));
        }
        if cancel.is_cancelled() {
            kill_tree(child);
            child.wait()?;
            return Ok(WaitOutcome::Cancelled);
        }
        if started.elapsed() >= timeout {
            kill_tree(child);
            child.wait()?;
            return Ok(WaitOutcome::TimedOut);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

impl Execute for ToolExecutor {
    fn execute(
        &self,
        case: &TestCase,
        binding: &CaseBinding,
        cancel: &CancelToken,
    ) -> ExecutionResult {
        let started = Instant::now();
        let error = |kind: ErrorKind, detail: String, output: Option<String>| ExecutionResult {
            path: case.path.clone(),
            outcome: Outcome::Error { kind, detail },
            duration_ms: started.elapsed().as_millis() as u64,
            output,
        };

        let def = match TestDef::load(&case.def_file) {
            Ok(def) => def,
            Err(e) => return error(ErrorKind::Harness, e.to_string(), None),
        };

        let Some(tool_path) = self.tool_path(&def.tool) else {
            return error(
                ErrorKind::Spawn,
                "no toolchain_dir configured".to_string(),
                None,
            );
        };

        let mut command = Command::new(&tool_path);
        command
            .args(&def.args)
            .current_dir(&case.dir)
            .stdin(Stdio::null());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            // Group leader, so kill_tree can take helpers down with it
            command.process_group(0);
        }
        for (label, path) in &binding.aux {
            command.env(format!("REGRESS_{}", label.to_uppercase()), path);
        }

        // One pipe serves both streams, preserving the tool's own stdout/
        // stderr interleaving; separate pipes would reorder diagnostics.
        let (pipe_rx, pipe_tx) = match std::io::pipe() {
            Ok(pair) => pair,
            Err(e) => {
                return error(ErrorKind::Harness, format!("failed to create pipe: {e}"), None);
            }
        };
        let pipe_tx_err = match pipe_tx.try_clone() {
            Ok(tx) => tx,
            Err(e) => {
                return error(ErrorKind::Harness, format!("failed to clone pipe: {e}"), None);
            }
        };
        command.stdout(pipe_tx).stderr(pipe_tx_err);

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                return error(
                    ErrorKind::Spawn,
                    format!("failed to start '{}': {}", tool_path.display(), e),
                    None,
                );
            }
        };
        // The command still holds the write ends; drop it so the reader sees
        // EOF once the child (and its helpers) exit.
        drop(command);

        // Drain the pipe off-thread so a chatty tool cannot fill the pipe
        // buffer and wedge the timeout loop.
        let reader = reader_thread(pipe_rx);

        let timeout = def
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.config.timeout);
        let waited = wait_for_child(&mut child, timeout, cancel);

        let raw = reader.join().unwrap_or_default();
        let output = normalize_output(&raw);
        let excerpt = (!output.is_empty()).then(|| output.clone());

        let exit_code = match waited {
            Ok(WaitOutcome::Exited(code)) => code,
            Ok(WaitOutcome::TimedOut) => {
                return error(
                    ErrorKind::Timeout,
                    format!("timed out after {}s", timeout.as_secs()),
                    excerpt,
                );
            }
            Ok(WaitOutcome::Cancelled) => {
                return error(ErrorKind::Cancelled, "run cancelled".to_string(), excerpt);
            }
            Err(e) => {
                return error(ErrorKind::Harness, format!("wait failed: {e}"), excerpt);
            }
        };

        let outcome = match def.expect.check(&case.dir, &output, exit_code) {
            Ok(None) => Outcome::Pass,
            Ok(Some(detail)) => Outcome::Fail { detail },
            Err(e) => Outcome::Error {
                kind: ErrorKind::Harness,
                detail: e.to_string(),
            },
        };

        ExecutionResult {
            path: case.path.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            output: if outcome.is_pass() { None } else { excerpt },
            outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigFile, Overrides};
    use crate::discovery::Category;
    use std::fs;
    use std::path::Path;

    #[cfg(unix)]
    fn write_tool(dir: &Path, name: &str, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{script}\n")).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn setup(def: &str, tool_script: Option<&str>) -> (tempfile::TempDir, ToolExecutor, TestCase) {
        let tmp = tempfile::tempdir().unwrap();
        let toolchain = tmp.path().join("bin");
        let tests = tmp.path().join("tests");
        let case_dir = tests.join("case");
        fs::create_dir_all(&toolchain).unwrap();
        fs::create_dir_all(&case_dir).unwrap();
        fs::write(case_dir.join("test.toml"), def).unwrap();
        #[cfg(unix)]
        if let Some(script) = tool_script {
            write_tool(&toolchain, "decomp", script);
        }
        #[cfg(not(unix))]
        let _ = tool_script;

        let mut file = ConfigFile::default();
        file.runner.tests_dir = Some(tests.clone());
        file.runner.toolchain_dir = Some(toolchain);
        file.runner.timeout_secs = 10;
        let config = Arc::new(RunConfig::resolve(file, Overrides::default()).unwrap());

        let case = TestCase {
            path: "case".to_string(),
            category: Category::Plain,
            dir: case_dir.clone(),
            def_file: case_dir.join("test.toml"),
        };
        (tmp, ToolExecutor::new(config), case)
    }

    #[test]
    fn normalizes_line_endings_and_colors() {
        let raw = b"line1\r\nline2\r\x1b[31mred\x1b[0m\n";
        assert_eq!(normalize_output(raw), "line1\nline2\nred\n");
    }

    #[cfg(unix)]
    #[test]
    fn passing_invocation() {
        let (_tmp, executor, case) = setup(
            "[expect]\noutput = \"hello\\n\"\n",
            Some("echo hello"),
        );
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert_eq!(result.outcome, Outcome::Pass);
        assert!(result.output.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn output_mismatch_is_fail_with_capture() {
        let (_tmp, executor, case) = setup(
            "[expect]\noutput = \"expected\\n\"\n",
            Some("echo actual"),
        );
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert!(matches!(result.outcome, Outcome::Fail { .. }));
        assert_eq!(result.output.as_deref(), Some("actual\n"));
    }

    #[cfg(unix)]
    #[test]
    fn combined_output_preserves_interleaving() {
        // Diagnostics written between stdout lines must stay in emission
        // order, as an exact expectation authored against a real run has them
        let (_tmp, executor, case) = setup(
            "[expect]\noutput = \"one\\ntwo\\nthree\\n\"\n",
            Some("echo one; echo two >&2; echo three"),
        );
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_spawned_helpers() {
        // The tool forks a helper that appends to a file; after the group
        // kill the file must stop growing
        let (_tmp, executor, case) = setup(
            "timeout_secs = 1\n",
            Some("( while true; do echo tick >> ticks; sleep 0.1; done ) &\nwait"),
        );
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert!(matches!(
            result.outcome,
            Outcome::Error {
                kind: ErrorKind::Timeout,
                ..
            }
        ));

        let ticks = case.dir.join("ticks");
        std::thread::sleep(Duration::from_millis(300));
        let size = fs::metadata(&ticks).map(|m| m.len()).unwrap_or(0);
        std::thread::sleep(Duration::from_millis(500));
        let later = fs::metadata(&ticks).map(|m| m.len()).unwrap_or(0);
        assert_eq!(size, later, "helper process survived the group kill");
    }

    #[cfg(unix)]
    #[test]
    fn stderr_is_captured_with_stdout() {
        let (_tmp, executor, case) = setup(
            "[expect]\noutput_pattern = \"warning: oops\"\n",
            Some("echo out; echo 'warning: oops' >&2"),
        );
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_expectation() {
        let (_tmp, executor, case) = setup("[expect]\nexit_code = 3\n", Some("exit 3"));
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[cfg(unix)]
    #[test]
    fn missing_tool_is_spawn_error() {
        let (_tmp, executor, case) = setup("tool = \"no-such-tool\"\n", Some("true"));
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert!(matches!(
            result.outcome,
            Outcome::Error {
                kind: ErrorKind::Spawn,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn timeout_kills_and_reports_error() {
        let (_tmp, executor, case) = setup("timeout_secs = 1\n", Some("sleep 30"));
        let started = Instant::now();
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert!(matches!(
            result.outcome,
            Outcome::Error {
                kind: ErrorKind::Timeout,
                ..
            }
        ));
        // Killed shortly after the 1s budget, nowhere near the sleep
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[test]
    fn cancelled_in_flight_is_terminated() {
        let cancel = CancelToken::new();
        cancel.cancel();
        let (_tmp, executor, case) = setup("", Some("sleep 30"));
        let result = executor.execute(&case, &CaseBinding::default(), &cancel);
        assert!(matches!(
            result.outcome,
            Outcome::Error {
                kind: ErrorKind::Cancelled,
                ..
            }
        ));
    }

    #[cfg(unix)]
    #[test]
    fn binding_exported_as_environment() {
        let tmp = tempfile::tempdir().unwrap();
        let script = tmp.path().join("plugin.py");
        fs::write(&script, "# plugin").unwrap();

        let (_tmp, executor, case) = setup(
            "[expect]\noutput_pattern = \"plugin.py\"\n",
            Some("echo \"$REGRESS_SCRIPT\""),
        );
        let mut binding = CaseBinding::default();
        binding.aux.insert("script".to_string(), script);
        let result = executor.execute(&case, &binding, &CancelToken::new());
        assert_eq!(result.outcome, Outcome::Pass);
    }

    #[test]
    fn malformed_definition_is_harness_error() {
        let (_tmp, executor, case) = setup("not [valid toml", Some("true"));
        let result = executor.execute(&case, &CaseBinding::default(), &CancelToken::new());
        assert!(matches!(
            result.outcome,
            Outcome::Error {
                kind: ErrorKind::Harness,
                ..
            }
        ));
    }
}
