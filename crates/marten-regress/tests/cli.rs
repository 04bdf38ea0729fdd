//! End-to-end tests of the `regress` binary against real fixture trees.

#![cfg(unix)]

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;

struct Fixture {
    _tmp: tempfile::TempDir,
    config_path: PathBuf,
    root: PathBuf,
}

impl Fixture {
    /// A toolchain dir with a fake `decomp` tool plus a tests tree
    fn new(extra_config: &str) -> Self {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().to_path_buf();
        let toolchain = root.join("bin");
        fs::create_dir_all(&toolchain).unwrap();

        let tool = toolchain.join("decomp");
        fs::write(&tool, "#!/bin/sh\necho \"decompiled $1\"\n").unwrap();
        fs::set_permissions(&tool, fs::Permissions::from_mode(0o755)).unwrap();

        fs::create_dir_all(root.join("tests")).unwrap();

        let config_path = root.join("regress.toml");
        fs::write(
            &config_path,
            format!(
                "[runner]\ntoolchain_dir = \"{}\"\ntests_dir = \"{}\"\njobs = 2\ntimeout_secs = 10\n{}",
                toolchain.display(),
                root.join("tests").display(),
                extra_config,
            ),
        )
        .unwrap();

        Self {
            _tmp: tmp,
            config_path,
            root,
        }
    }

    fn add_case(&self, rel: &str, def: &str) {
        let dir = self.root.join("tests").join(rel);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("test.toml"), def).unwrap();
    }

    fn command(&self) -> Command {
        let mut cmd = Command::cargo_bin("regress").unwrap();
        cmd.arg("--config").arg(&self.config_path);
        cmd
    }
}

fn passing_def() -> &'static str {
    "args = [\"sample\"]\n\n[expect]\noutput = \"decompiled sample\\n\"\n"
}

#[test]
fn passing_run_exits_zero() {
    let fixture = Fixture::new("");
    fixture.add_case("arith/add", passing_def());
    fixture.add_case("strings/cat", passing_def());

    fixture
        .command()
        .assert()
        .success()
        .stdout(predicate::str::contains("Total:   2"))
        .stdout(predicate::str::contains("Result: OK"));
}

#[test]
fn failing_case_exits_one() {
    let fixture = Fixture::new("");
    fixture.add_case("arith/add", passing_def());
    fixture.add_case(
        "arith/bad",
        "args = [\"x\"]\n\n[expect]\noutput = \"something else\\n\"\n",
    );

    fixture
        .command()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Failed:  1"))
        .stdout(predicate::str::contains("arith/bad"));
}

#[test]
fn missing_tests_root_is_startup_failure() {
    let fixture = Fixture::new("");
    fs::remove_dir_all(fixture.root.join("tests")).unwrap();

    fixture
        .command()
        .assert()
        .code(2)
        .stderr(predicate::str::contains("tests root"));
}

#[test]
fn skip_c_compilation_flag() {
    let fixture = Fixture::new("skip_c_compilation_tests = true\n");
    fixture.add_case("arith/add", passing_def());
    fixture.add_case(
        "compiled/loop",
        "category = \"c-compilation\"\nargs = [\"x\"]\n",
    );

    fixture
        .command()
        .assert()
        .success()
        .stdout(predicate::str::contains("Skipped: 1"));
}

#[test]
fn misconfigured_plugin_category_skips_but_run_completes() {
    let fixture = Fixture::new("[runner.idaplugin]\nenabled = true\n");
    fixture.add_case("arith/add", passing_def());
    fixture.add_case("plugin/ida", "category = \"ida-plugin\"\n");

    fixture
        .command()
        .assert()
        .success()
        .stdout(predicate::str::contains("Passed:  1"))
        .stdout(predicate::str::contains("Skipped: 1"));
}

#[test]
fn strict_turns_skips_into_failure() {
    let fixture = Fixture::new("skip_c_compilation_tests = true\n");
    fixture.add_case(
        "compiled/loop",
        "category = \"c-compilation\"\nargs = [\"x\"]\n",
    );

    fixture.command().arg("--strict").assert().code(1);
}

#[test]
fn list_only_prints_without_running() {
    let fixture = Fixture::new("");
    fixture.add_case("arith/add", passing_def());
    fixture.add_case("zeta/last", passing_def());

    fixture
        .command()
        .arg("--list-only")
        .assert()
        .success()
        .stdout(predicate::str::contains("arith/add [plain]"))
        .stdout(predicate::str::contains("Total: 2 cases"));
}

#[test]
fn json_summary_is_machine_readable() {
    let fixture = Fixture::new("");
    fixture.add_case("arith/add", passing_def());

    let output = fixture.command().arg("--json").output().unwrap();
    assert!(output.status.success());

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["total"], 1);
    assert_eq!(summary["passed"], 1);
    assert_eq!(summary["results"][0]["path"], "arith/add");
    assert_eq!(summary["results"][0]["outcome"]["kind"], "pass");
}

#[test]
fn excluded_dirs_are_never_visited() {
    let fixture = Fixture::new("excluded_dirs = [\"bundled\"]\n");
    fixture.add_case("arith/add", passing_def());
    // Would fail if executed, but its subtree is pruned
    fixture.add_case("bundled/huge", "args = [\"x\"]\n\n[expect]\nexit_code = 9\n");

    fixture
        .command()
        .assert()
        .success()
        .stdout(predicate::str::contains("Total:   1"));
}

#[test]
fn timeout_case_still_lets_queue_drain() {
    let fixture = Fixture::new("");
    let slow = fixture.root.join("bin/slowtool");
    fs::write(&slow, "#!/bin/sh\nsleep 30\n").unwrap();
    fs::set_permissions(&slow, fs::Permissions::from_mode(0o755)).unwrap();

    fixture.add_case("slow/hang", "tool = \"slowtool\"\ntimeout_secs = 1\n");
    fixture.add_case("zeta/after", passing_def());

    fixture
        .command()
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Errors:  1"))
        .stdout(predicate::str::contains("Passed:  1"));
}

#[test]
fn summary_identical_across_worker_counts() {
    let fixture = Fixture::new("");
    fixture.add_case("a/one", passing_def());
    fixture.add_case("b/two", passing_def());
    fixture.add_case(
        "c/three",
        "args = [\"x\"]\n\n[expect]\noutput = \"wrong\\n\"\n",
    );

    let mut outputs = Vec::new();
    for jobs in ["1", "4"] {
        let output = fixture
            .command()
            .args(["--json", "--jobs", jobs])
            .output()
            .unwrap();
        let mut summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        // Durations vary run to run; everything else must not
        for result in summary["results"].as_array_mut().unwrap() {
            result.as_object_mut().unwrap().remove("duration_ms");
            result.as_object_mut().unwrap().remove("output");
        }
        outputs.push(summary);
    }
    assert_eq!(outputs[0], outputs[1]);
}
