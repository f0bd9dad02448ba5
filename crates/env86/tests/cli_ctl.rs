#![cfg(all(unix, feature = "cli"))]

use std::path::PathBuf;
use std::process::{Child, Command, Output, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use env86::frame::{EnvelopeConfig, RPC, TTY};
use env86::image::BootOptions;
use env86::peer::{
    connect_endpoint, ControlLink, Machine, PeerError, Result, RpcMessage, SocketSession, VmEvent,
};
use env86::transport::{MessageSink, MessageSource};
use serde_json::Value;

/// A machine with a fixed MAC and snapshot.
struct StubMachine;

impl Machine for StubMachine {
    fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    fn run(&mut self) -> Result<()> {
        Ok(())
    }

    fn save_state(&mut self) -> Result<Vec<u8>> {
        Ok(b"snapshot".to_vec())
    }

    fn restore_state(&mut self, _state: &[u8]) -> Result<()> {
        Ok(())
    }

    fn send_keyboard_text(&mut self, _text: &str) -> Result<()> {
        Ok(())
    }

    fn set_scale(&mut self, _x: f64, _y: f64) -> Result<()> {
        Ok(())
    }

    fn go_fullscreen(&mut self) -> Result<()> {
        Err(PeerError::Machine("no display".to_string()))
    }

    fn network_mac(&self) -> Result<[u8; 6]> {
        Ok([0x52, 0x54, 0x00, 0xab, 0xcd, 0xef])
    }

    fn capture_screenshot(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn send_serial_bytes(&mut self, _port: u8, _bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = PathBuf::from(format!(
        "/tmp/env86cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn spawn_ctl(socket: &str, args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_env86"))
        .args(["--log-level", "error", "--format", "json", "ctl", socket])
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("ctl command should start")
}

fn spawn_console(socket: &str, args: &[&str]) -> Child {
    Command::new(env!("CARGO_BIN_EXE_env86"))
        .args(["--log-level", "error", "console", socket])
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("console command should start")
}

fn wait_for_link(url: &str, timeout: Duration) -> ControlLink {
    let start = Instant::now();
    loop {
        match ControlLink::connect(url) {
            Ok(link) => return link,
            Err(err) => {
                assert!(start.elapsed() < timeout, "connect timeout: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    }
}

/// Boot a stub VM against the controller at `url` and run its session on a
/// background thread.
fn run_vm(url: &str) -> thread::JoinHandle<()> {
    run_vm_printing(url, &[])
}

/// Like [`run_vm`], with `console` written to serial port 0 after loading.
fn run_vm_printing(url: &str, console: &[&[u8]]) -> thread::JoinHandle<()> {
    let mut link = wait_for_link(url, Duration::from_secs(3));
    let overrides = link.request_config().expect("controller should answer config");
    let options: BootOptions =
        serde_json::from_value(overrides).expect("overrides should be boot options");

    let (mut session, events): (SocketSession<StubMachine>, _) = link
        .into_session(StubMachine, &options)
        .expect("session should start");
    events.vm(VmEvent::Loaded).expect("session should be running");
    for chunk in console {
        events
            .serial_output(0, chunk)
            .expect("session should be running");
    }
    thread::spawn(move || {
        let _ = session.run();
        drop(events);
    })
}

fn finish(child: Child) -> (Output, serde_json::Value) {
    let output = child.wait_with_output().expect("ctl should exit");
    let json = serde_json::from_slice(&output.stdout).unwrap_or(serde_json::Value::Null);
    (output, json)
}

#[test]
fn ctl_reads_the_mac_of_a_connecting_vm() {
    let dir = unique_temp_dir("mac");
    let url = format!("unix://{}/ctl", dir.display());

    let child = spawn_ctl(&url, &["mac", "--config", r#"{"EnableTTY": true}"#]);
    let vm = run_vm(&url);
    let (output, json) = finish(child);

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(json["op"], "mac");
    assert_eq!(json["result"], "52:54:00:ab:cd:ef");
    vm.join().expect("vm thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ctl_save_writes_the_snapshot() {
    let dir = unique_temp_dir("save");
    let url = dir.join("ctl").display().to_string();
    let state = dir.join("vm.state");

    let child = spawn_ctl(&url, &["save", "--output", state.to_str().unwrap()]);
    let vm = run_vm(&url);
    let (output, json) = finish(child);

    assert!(output.status.success());
    assert_eq!(json["size"], 8);
    assert_eq!(std::fs::read(&state).unwrap(), b"snapshot");
    vm.join().expect("vm thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ctl_reports_vm_side_failures() {
    let dir = unique_temp_dir("fullscreen");
    let url = dir.join("ctl").display().to_string();

    let child = spawn_ctl(&url, &["set-fullscreen"]);
    let vm = run_vm(&url);
    let (output, _) = finish(child);

    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("no display"));
    vm.join().expect("vm thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ctl_times_out_on_a_silent_vm() {
    let dir = unique_temp_dir("silent");
    let url = dir.join("ctl").display().to_string();

    let child = spawn_ctl(&url, &["pause", "--timeout", "300ms"]);
    let start = Instant::now();
    let _held = loop {
        match connect_endpoint(&url, &EnvelopeConfig::default()) {
            Ok(halves) => break halves,
            Err(err) => {
                assert!(start.elapsed() < Duration::from_secs(3), "connect timeout: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    };
    let (output, _) = finish(child);

    assert_eq!(output.status.code(), Some(124));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn ctl_rejects_bad_config_before_binding() {
    let dir = unique_temp_dir("badcfg");
    let sock = dir.join("ctl");

    let child = spawn_ctl(&sock.display().to_string(), &["mac", "--config", "[]"]);
    let (output, _) = finish(child);

    assert_eq!(output.status.code(), Some(64));
    assert!(!sock.exists());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn console_detaches_on_pattern_and_saves() {
    let dir = unique_temp_dir("console");
    let url = dir.join("ctl").display().to_string();
    let state = dir.join("vm.state");

    let child = spawn_console(
        &url,
        &[
            "--exit-on-pattern",
            "login: ",
            "--save-on-exit",
            state.to_str().unwrap(),
            "--nudge",
        ],
    );
    let vm = run_vm_printing(&url, &[b"Welcome to env86\nlog", b"in", b": "]);
    let output = child.wait_with_output().expect("console should exit");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("Welcome to env86\nlogin: "));
    assert_eq!(std::fs::read(&state).unwrap(), b"snapshot");
    vm.join().expect("vm thread should finish");
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn console_without_input_follows_the_vm_until_it_hangs_up() {
    let dir = unique_temp_dir("console-eof");
    let url = dir.join("ctl").display().to_string();

    let child = spawn_console(&url, &["--timeout", "3s"]);
    let start = Instant::now();
    let (mut sink, mut source) = loop {
        match connect_endpoint(&url, &EnvelopeConfig::default()) {
            Ok(halves) => break halves,
            Err(err) => {
                assert!(start.elapsed() < Duration::from_secs(3), "connect timeout: {err}");
                thread::sleep(Duration::from_millis(25));
            }
        }
    };

    for (id, op) in [(1, "loaded"), (2, "tty")] {
        let call = RpcMessage::call(id, op, Vec::new()).encode().unwrap();
        sink.send(RPC, &call).unwrap();
        let reply = source.recv().unwrap().expect("console should answer");
        assert_eq!(RpcMessage::decode(&reply.payload).unwrap(), RpcMessage::ok(id, Value::Null));
    }
    sink.send(TTY, b"# ").unwrap();
    drop((sink, source));

    let output = child.wait_with_output().expect("console should exit");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(output.stdout, b"# ");
    let _ = std::fs::remove_dir_all(&dir);
}
