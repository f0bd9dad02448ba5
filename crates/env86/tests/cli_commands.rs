#![cfg(feature = "cli")]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "env86cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

/// An image directory with a three-part state whose middle chunk is missing.
fn write_image(dir: &Path) {
    std::fs::create_dir_all(dir.join("state")).expect("state dir should be creatable");
    std::fs::write(
        dir.join("image.json"),
        r#"{
            "initial_state_parts": 3,
            "memory_size": 0,
            "bios": { "url": "./seabios.bin" },
            "cmdline": "console=ttyS0"
        }"#,
    )
    .expect("manifest should be writable");
    std::fs::write(dir.join("state/initial.state.0"), b"abc").expect("chunk 0");
    std::fs::write(dir.join("state/initial.state.2"), b"def").expect("chunk 2");
}

fn env86(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_env86"))
        .args(["--log-level", "error", "--format", "json"])
        .args(args)
        .output()
        .expect("env86 should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be json")
}

#[test]
fn inspect_prints_the_effective_configuration() {
    let dir = unique_temp_dir("inspect");
    write_image(&dir);
    let image = dir.display().to_string();

    let output = env86(&["inspect", &image, "--tty", "--guest-service"]);
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let config = stdout_json(&output);
    assert_eq!(config["memory_size"], 512 * 1024 * 1024);
    assert_eq!(config["vga_memory_size"], 8 * 1024 * 1024);
    assert_eq!(config["bios"]["url"], format!("{image}/seabios.bin"));
    assert_eq!(config["filesystem"]["baseurl"], format!("{image}/fs/"));
    assert_eq!(config["initial_state"]["size"], 6);
    assert_eq!(config["EnableTTY"], true);
    assert_eq!(config["guest_service"], true);
    assert_eq!(config["autostart"], true);
    assert_eq!(config["cmdline"], "console=ttyS0");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn inspect_missing_image_fails() {
    let dir = unique_temp_dir("noimage");
    let output = env86(&["inspect", &dir.display().to_string()]);
    assert_eq!(output.status.code(), Some(1));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn inspect_rejects_negative_state_parts() {
    let dir = unique_temp_dir("negparts");
    std::fs::write(dir.join("image.json"), r#"{"initial_state_parts": -1}"#)
        .expect("manifest should be writable");

    let output = env86(&["inspect", &dir.display().to_string()]);
    assert_eq!(output.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn fetch_state_concatenates_present_chunks() {
    let dir = unique_temp_dir("state");
    write_image(&dir);
    let target = dir.join("out.state");

    let output = env86(&[
        "fetch-state",
        &dir.display().to_string(),
        "--output",
        target.to_str().unwrap(),
    ]);
    assert!(output.status.success());

    let summary = stdout_json(&output);
    assert_eq!(summary["parts"], 3);
    assert_eq!(summary["bytes"], 6);
    assert_eq!(std::fs::read(&target).unwrap(), b"abcdef");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn frames_decodes_a_capture_and_counts_noise() {
    let dir = unique_temp_dir("frames");
    let capture = dir.join("serial1.bin");
    let mut bytes = b"\r\n".to_vec();
    bytes.extend_from_slice(&[100, 0, 0, 0, 1, 0, 0, 0x40, 0, 0, 0, 0x80, 0]);
    bytes.extend_from_slice(&[104, 0, 0, 0, 1, 0, 0, 0, 3, b'a', b'c', b'k']);
    std::fs::write(&capture, &bytes).expect("capture should be writable");
    let path = capture.display().to_string();

    let output = env86(&["frames", &path]);
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["malformed"], 2);
    assert_eq!(report["trailing_bytes"], 0);
    let frames = report["frames"].as_array().expect("frames should be an array");
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0]["type"], "open");
    assert_eq!(frames[0]["size"], 13);
    assert_eq!(frames[1]["type"], "data");
    assert_eq!(frames[1]["payload"], "ack");

    let strict = env86(&["frames", &path, "--strict"]);
    assert_eq!(strict.status.code(), Some(60));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn version_reports_package_version() {
    let output = env86(&["version"]);
    assert!(output.status.success());
    assert_eq!(
        String::from_utf8_lossy(&output.stdout).trim(),
        format!("env86 {}", env!("CARGO_PKG_VERSION"))
    );
}
