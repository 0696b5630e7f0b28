use std::process::Command;

fn recalc() -> Command {
    Command::new(env!("CARGO_BIN_EXE_recalc"))
}

#[test]
fn evaluates_a_single_formula() {
    let out = recalc().arg("1 + 2 * 3").output().expect("failed to run recalc");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    assert_eq!(String::from_utf8_lossy(&out.stdout).trim(), "1 + 2 * 3 => 7");
}

#[test]
fn evaluates_a_dependent_batch_with_vars() {
    let out = recalc()
        .args([
            "--var", "m=2", "--var", "n=4", "--var", "w=6",
            "x = y = a + b * c",
            "a = m + n",
            "b = a * 2",
            "c = n + w + b",
        ])
        .output()
        .expect("failed to run recalc");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("x = y = a + b * c => 270"), "got: {}", stdout);
    assert!(stdout.contains("a = m + n => 6"));
}

#[test]
fn vm_mode_reports_formula_errors_inline() {
    let out = recalc()
        .args(["--vm", "1 + 1", "7 / 0", "2 + 2"])
        .output()
        .expect("failed to run recalc");
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("1 + 1 => 2"));
    assert!(stdout.contains("7 / 0 => error: Division by zero."));
    assert!(stdout.contains("2 + 2 => 4"));
}

#[test]
fn tree_mode_runtime_error_exits_nonzero() {
    let out = recalc().args(["7 / 0"]).output().expect("failed to run recalc");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Division by zero."));
}

#[test]
fn json_output() {
    let out = recalc()
        .args(["--json", "1 + 2"])
        .output()
        .expect("failed to run recalc");
    assert!(out.status.success());
    let parsed: serde_json::Value =
        serde_json::from_slice(&out.stdout).expect("valid JSON output");
    assert_eq!(parsed[0]["outcome"]["Ok"], serde_json::json!(3));
}

#[test]
fn disassembly_output() {
    let out = recalc()
        .args(["--disasm", "a = 1 + 2"])
        .output()
        .expect("failed to run recalc");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("OP_BEGIN"));
    assert!(stdout.contains("OP_SET_GLOBAL"));
    assert!(stdout.contains("OP_EXIT"));
}

#[test]
fn parse_error_exits_nonzero_with_location() {
    let out = recalc().arg("(1 + 2").output().expect("failed to run recalc");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("[line 1] Error at end"), "stderr: {}", stderr);
}

#[test]
fn no_arguments_prints_usage() {
    let out = recalc().output().expect("failed to run recalc");
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("Usage:"));
}
