//! CLI behavior, driven through the built binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn berylt() -> Command {
    Command::cargo_bin("berylt").expect("binary builds")
}

#[test]
fn test_run_executes_script() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("hello.brl");
    std::fs::write(&script, "puts 1 + 2\n").unwrap();
    berylt()
        .args(["run"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("3\n"));
}

#[test]
fn test_run_dump_disassembles() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("d.brl");
    std::fs::write(&script, "a = 1\n").unwrap();
    berylt()
        .args(["run", "--dump"])
        .arg(&script)
        .assert()
        .success()
        .stdout(predicate::str::contains("LOADI"))
        .stdout(predicate::str::contains("STOP"));
}

#[test]
fn test_compile_then_exec_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("c.brl");
    let image = dir.path().join("c.brb");
    std::fs::write(&script, "puts \"from image\"\n").unwrap();
    berylt()
        .args(["compile"])
        .arg(&script)
        .args(["-o"])
        .arg(&image)
        .assert()
        .success();
    berylt()
        .args(["exec"])
        .arg(&image)
        .assert()
        .success()
        .stdout(predicate::str::contains("from image"));
}

#[test]
fn test_unhandled_exception_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("boom.brl");
    std::fs::write(&script, "raise \"kaboom\"\n").unwrap();
    berylt()
        .args(["run"])
        .arg(&script)
        .assert()
        .failure()
        .stderr(predicate::str::contains("kaboom"));
}

#[test]
fn test_syntax_error_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("bad.brl");
    std::fs::write(&script, "def broken(\n").unwrap();
    berylt().args(["run"]).arg(&script).assert().failure();
}

#[test]
fn test_missing_file_reports_io_error() {
    berylt()
        .args(["run", "no-such-file.brl"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn test_repl_session() {
    berylt()
        .args(["repl"])
        .write_stdin("1 + 2\nquit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("=> 3"));
}

#[test]
fn test_repl_multiline_accumulation() {
    berylt()
        .args(["repl"])
        .write_stdin("def f(x)\nx * 2\nend\nf(21)\nexit\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("=> 42"));
}
