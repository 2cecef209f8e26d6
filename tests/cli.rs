use assert_cmd::prelude::*; // Add methods on commands
use predicates::prelude::*; // Used for writing assertions
use std::path::Path;
use std::process::Command; // Run programs

/// `bfr` isolated from any config file or env the developer has lying around.
fn bfr(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("bfr").unwrap();
    cmd.current_dir(dir)
        .env_remove("BFR_ROOT")
        .env_remove("RUST_LOG")
        .env("HOME", dir)
        .env("XDG_CONFIG_HOME", dir.join(".config"));
    cmd
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{output:?}");
    String::from_utf8(output.stdout).unwrap()
}

#[test]
fn no_commands_prints_usage_and_fails() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    bfr(dir.path())
        .assert()
        .code(1)
        .stdout(predicate::str::starts_with("Usage: bfr"));
    Ok(())
}

#[test]
fn unknown_command_warns_and_succeeds() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    bfr(dir.path())
        .args(["--platform", "posix-v2", "deploy"])
        .assert()
        .success()
        .stdout(predicate::eq("Unknown command: deploy\n"));
    Ok(())
}

#[test]
fn strict_turns_unknown_command_into_failure() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    bfr(dir.path())
        .args(["--strict", "--platform", "posix-v2", "deploy"])
        .assert()
        .code(1)
        .stdout(predicate::str::contains("Unknown command: deploy"));
    Ok(())
}

#[test]
fn clean_then_build_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_of(bfr(dir.path()).args(["--dry-run", "--platform", "posix-v2", "clean", "build"]));
    assert_eq!(out, "$ make clean\n$ make\n");
}

#[test]
fn flash_only_runs_the_flashing_tool() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_of(bfr(dir.path()).args(["--dry-run", "--platform", "posix-v2", "flash"]));
    assert_eq!(out, "$ st-flash write ./BareBones.bin 0x08000000\n");
}

#[test]
fn flashrun_without_script_stops_server_and_skips_debugger() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_of(bfr(dir.path()).args(["--dry-run", "--platform", "posix-v2", "flashrun"]));

    assert!(out.contains("$ openocd -f interface/stlink.cfg -f target/stm32f4x.cfg &"));
    assert!(out.contains("Error: flashrun aborted: debugger script not found: ./gdbscript"));
    assert!(!out.contains("gdb-multiarch"));
}

#[test]
fn flashrun_with_script_runs_full_sequence() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("gdbscript"), "continue\n").unwrap();
    let out = stdout_of(bfr(dir.path()).args(["--dry-run", "--platform", "posix-v2", "flashrun"]));

    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        [
            "$ st-flash write ./BareBones.bin 0x08000000",
            "$ openocd -f interface/stlink.cfg -f target/stm32f4x.cfg &",
            "$ gdb-multiarch ./BareBones.elf --batch --command=./gdbscript",
        ]
    );
}

#[test]
fn windows_run_attaches_without_flashing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("scripts");
    std::fs::create_dir(&root).unwrap();
    std::fs::write(root.join("gdbscript_windows"), "continue\n").unwrap();

    let out = stdout_of(
        bfr(dir.path())
            .env("BFR_ROOT", &root)
            .args(["--dry-run", "--platform", "windows", "run"]),
    );
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(lines.len(), 2, "{out}");
    assert_eq!(lines[0], "$ st-util &");
    assert!(lines[1].starts_with("$ arm-none-eabi-gdb.exe ./BareBones.elf --batch --command="));
    assert!(lines[1].ends_with("gdbscript_windows"));
}

#[test]
fn json_report_lists_every_command() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_of(bfr(dir.path()).args([
        "--dry-run",
        "--json",
        "--platform",
        "posix-v1",
        "build",
        "flash",
    ]));

    let report: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(report["platform"], "posix-v1");
    assert_eq!(report["dry_run"], true);
    let commands = report["commands"].as_array().unwrap();
    assert_eq!(commands.len(), 2);
    assert_eq!(commands[0]["action"], "build");
    assert_eq!(commands[0]["status"], "succeeded");
    assert_eq!(commands[1]["token"], "flash");
    assert_eq!(commands[1]["status"], "unknown");
}

#[test]
fn config_file_overrides_tools() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("bfr.toml"),
        "platform = \"posix-v2\"\nbinary = \"out/fw.bin\"\n\n[tools]\nbuild = [\"make\", \"-j8\"]\n",
    )
    .unwrap();

    let out = stdout_of(bfr(dir.path()).args(["--dry-run", "build", "flash"]));
    assert_eq!(out, "$ make -j8\n$ st-flash write out/fw.bin 0x08000000\n");
}

#[test]
fn missing_explicit_config_is_fatal() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    bfr(dir.path())
        .args(["--config", "nope.toml", "build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("configuration file not found"));
    Ok(())
}

#[test]
fn hyphenated_token_is_an_unknown_command() {
    let dir = tempfile::tempdir().unwrap();
    let out = stdout_of(bfr(dir.path()).args([
        "--dry-run",
        "--platform",
        "posix-v2",
        "build",
        "-x",
        "clean",
    ]));
    assert_eq!(out, "$ make\nUnknown command: -x\n$ make clean\n");
}

/// A project whose `build` tool prints to stdout.
#[cfg(unix)]
fn echoing_build(dir: &Path) {
    std::fs::write(
        dir.join("bfr.toml"),
        "platform = \"posix-v2\"\n\n[tools]\nbuild = [\"sh\", \"-c\", \"echo TOOL\"]\n",
    )
    .unwrap();
}

#[cfg(unix)]
#[test]
fn json_report_is_not_mixed_with_tool_output() {
    let dir = tempfile::tempdir().unwrap();
    echoing_build(dir.path());

    let output = bfr(dir.path()).args(["--json", "build"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");

    let report: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(report["commands"][0]["status"], "succeeded");
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("TOOL"), "{stderr}");
}

#[cfg(unix)]
#[test]
fn tool_output_follows_the_lines_before_it() {
    let dir = tempfile::tempdir().unwrap();
    echoing_build(dir.path());

    let out = stdout_of(bfr(dir.path()).args(["bogus", "build"]));
    let lines: Vec<&str> = out.lines().collect();
    assert_eq!(
        lines,
        ["Unknown command: bogus", "$ sh -c \"echo TOOL\"", "TOOL"]
    );
}
