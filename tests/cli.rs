use std::process::{Command, Output};

fn auh(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_auh"))
        .args(args)
        .env_remove("BUILDDIR")
        .env_remove("RUST_LOG")
        .output()
        .expect("run auh")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn help_describes_the_tool() {
    let output = auh(&["--help"]);
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("auh"));
    assert!(text.contains("--to-version"));
}

#[test]
fn package_is_required() {
    let output = auh(&[]);
    assert!(!output.status.success());
}

#[test]
fn build_dir_is_required() {
    let output = auh(&["foo"]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("no build directory"));
}

#[test]
fn missing_build_dir_is_reported() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let missing = temp_dir.path().join("build");
    let missing = missing.to_str().expect("utf-8 path");

    let output = auh(&["foo", "--build-dir", missing]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("does not exist"));
}

#[test]
fn to_version_needs_a_single_package() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let build = temp_dir.path().to_str().expect("utf-8 path");

    let output = auh(&["foo", "bar", "-t", "1.2", "--build-dir", build]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("exactly one package"));
}

#[test]
fn write_config_persists_defaults() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let build = temp_dir.path().to_str().expect("utf-8 path");

    let output = auh(&["--write-config", "--build-dir", build]);
    assert!(output.status.success(), "{}", stderr(&output));

    let path = temp_dir.path().join("upgrade-helper/config.json");
    let content = std::fs::read_to_string(&path).expect("read config");
    let config: serde_json::Value = serde_json::from_str(&content).expect("parse config");
    let machines = config
        .get("machines")
        .and_then(|value| value.as_array())
        .expect("machines array");
    assert!(!machines.is_empty());
    assert_eq!(config["retry_cooldown_days"], 7);
}

#[test]
fn broken_config_is_rejected() {
    let temp_dir = tempfile::tempdir().expect("create temp dir");
    let build = temp_dir.path().to_str().expect("utf-8 path");
    let config = temp_dir.path().join("auh.json");
    std::fs::write(&config, "{ not json").expect("write config");
    let config = config.to_str().expect("utf-8 path");

    let output = auh(&["foo", "--build-dir", build, "--config", config]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("config"));
}
