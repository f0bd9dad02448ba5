use std::io::{self, IsTerminal, Read, Write};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::thread;
use std::time::Duration;

use env86_frame::{EnvelopeConfig, FrameError};
use env86_peer::{ControlListener, PeerError, RemoteVm, SocketSink, SocketSource, CTRL_D};
use env86_transport::TransportError;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::cmd::ctl::{install_ctrlc_handler, parse_config, parse_timeout};
use crate::cmd::ConsoleArgs;
use crate::exit::{io_error, peer_error, transport_error, CliError, CliResult, FAILURE, SUCCESS};

type Vm = RemoteVm<SocketSink, SocketSource>;

/// How often the console loop looks at stdin while the VM is quiet.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One read from the local terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ConsoleInput {
    Bytes(Vec<u8>),
    /// Ctrl-D, or end of file on a terminal.
    EndOfInput,
    /// Nothing more to forward; the console keeps running.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ending {
    ExitPattern,
    EndOfInput,
    VmClosed,
}

impl Ending {
    fn as_str(self) -> &'static str {
        match self {
            Ending::ExitPattern => "exit-pattern",
            Ending::EndOfInput => "end-of-input",
            Ending::VmClosed => "vm-closed",
        }
    }
}

pub fn run(args: ConsoleArgs) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let config = with_tty_enabled(parse_config(args.config.as_deref())?);

    let envelope = EnvelopeConfig {
        read_timeout: Some(timeout),
        ..EnvelopeConfig::default()
    };
    let listener = ControlListener::bind(&args.socket)
        .map_err(|err| peer_error("bind failed", err))?
        .with_config(config)
        .with_envelope_config(envelope);
    install_ctrlc_handler(listener.path().to_path_buf())?;
    info!(path = %listener.path().display(), "waiting for vm");

    let vm = listener
        .accept()
        .map_err(|err| peer_error("accept failed", err))?;
    let mut vm = match args.exit_on_pattern.as_deref() {
        Some(pattern) => vm.with_exit_pattern(pattern),
        None => vm,
    };
    vm.wait_loaded()
        .map_err(|err| peer_error("vm did not finish loading", err))?;
    while !vm.tty_open() {
        vm.handle_next()
            .map_err(|err| peer_error("vm did not open its console", err))?;
    }
    if args.nudge {
        vm.nudge_prompt()
            .map_err(|err| peer_error("console write failed", err))?;
    }

    set_read_timeout(&vm, POLL_INTERVAL)?;
    let (tx, rx) = mpsc::channel();
    spawn_stdin_reader(tx, io::stdin().is_terminal())?;
    let ending = pump(&mut vm, &rx)?;
    info!(
        ending = ending.as_str(),
        dropped = vm.tty_dropped(),
        "console finished"
    );

    if ending == Ending::EndOfInput {
        if let Err(err) = vm.close_tty() {
            debug!(error = %err, "console close not delivered");
        }
    }

    if let Some(path) = args.save_on_exit.as_deref() {
        if ending == Ending::VmClosed {
            return Err(CliError::new(
                FAILURE,
                "vm closed the console before its state could be saved",
            ));
        }
        set_read_timeout(&vm, timeout)?;
        let state = vm
            .save()
            .map_err(|err| peer_error("save on exit failed", err))?;
        std::fs::write(path, &state).map_err(|err| io_error("write failed", err))?;
        info!(path = %path.display(), size = state.len(), "state saved");
    }
    Ok(SUCCESS)
}

/// Shuttle bytes between stdin and the VM console until one side ends.
fn pump(vm: &mut Vm, input: &Receiver<ConsoleInput>) -> CliResult<Ending> {
    let mut input_open = true;
    loop {
        write_console(&vm.take_tty_output())?;
        if vm.exit_detected() {
            return Ok(Ending::ExitPattern);
        }

        while input_open {
            match input.try_recv() {
                Ok(ConsoleInput::Bytes(bytes)) => vm
                    .send_tty(&bytes)
                    .map_err(|err| peer_error("console write failed", err))?,
                Ok(ConsoleInput::EndOfInput) => return Ok(Ending::EndOfInput),
                Ok(ConsoleInput::Closed) | Err(TryRecvError::Disconnected) => {
                    debug!("no more console input");
                    input_open = false;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match vm.handle_next() {
            Ok(()) => {}
            Err(err) if is_idle(&err) => {}
            Err(PeerError::Disconnected(reason)) => {
                write_console(&vm.take_tty_output())?;
                info!(reason = reason.as_str(), "vm closed the console");
                return Ok(Ending::VmClosed);
            }
            Err(err) => return Err(peer_error("console read failed", err)),
        }
    }
}

fn classify(chunk: &[u8]) -> ConsoleInput {
    if chunk.contains(&CTRL_D) {
        ConsoleInput::EndOfInput
    } else {
        ConsoleInput::Bytes(chunk.to_vec())
    }
}

fn spawn_stdin_reader(tx: Sender<ConsoleInput>, terminal: bool) -> CliResult<()> {
    thread::Builder::new()
        .name("env86-stdin".to_string())
        .spawn(move || {
            let mut stdin = io::stdin().lock();
            let mut buf = [0u8; 1024];
            loop {
                let input = match stdin.read(&mut buf) {
                    Ok(0) if terminal => ConsoleInput::EndOfInput,
                    Ok(0) => ConsoleInput::Closed,
                    Ok(n) => classify(&buf[..n]),
                    Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!(error = %err, "stdin read failed");
                        ConsoleInput::Closed
                    }
                };
                let last = !matches!(input, ConsoleInput::Bytes(_));
                if tx.send(input).is_err() || last {
                    return;
                }
            }
        })
        .map_err(|err| io_error("stdin reader failed to start", err))?;
    Ok(())
}

fn write_console(bytes: &[u8]) -> CliResult<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    let mut stdout = io::stdout().lock();
    stdout
        .write_all(bytes)
        .map_err(|err| io_error("console output failed", err))?;
    stdout
        .flush()
        .map_err(|err| io_error("console output failed", err))
}

fn set_read_timeout(vm: &Vm, timeout: Duration) -> CliResult<()> {
    vm.source()
        .get_ref()
        .set_read_timeout(Some(timeout))
        .map_err(|err| transport_error("socket setup failed", err))
}

/// A read timeout on the control socket, not a failure.
fn is_idle(err: &PeerError) -> bool {
    let io = match err {
        PeerError::Transport(TransportError::Io(io))
        | PeerError::Frame(FrameError::Io(io))
        | PeerError::Io(io) => io,
        _ => return false,
    };
    matches!(io.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

/// The console needs the VM to forward its tty, whatever else the caller
/// passed in `--config`.
fn with_tty_enabled(mut config: Value) -> Value {
    if let Value::Object(map) = &mut config {
        map.insert("EnableTTY".to_string(), Value::Bool(true));
    }
    config
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn ctrl_d_anywhere_ends_input() {
        assert_eq!(classify(b"ls\n"), ConsoleInput::Bytes(b"ls\n".to_vec()));
        assert_eq!(classify(&[b'x', CTRL_D]), ConsoleInput::EndOfInput);
        assert_eq!(classify(&[CTRL_D]), ConsoleInput::EndOfInput);
    }

    #[test]
    fn console_config_always_enables_the_tty() {
        assert_eq!(
            with_tty_enabled(json!({"EnableTTY": false, "MemorySize": 64})),
            json!({"EnableTTY": true, "MemorySize": 64})
        );
        assert_eq!(with_tty_enabled(json!({})), json!({"EnableTTY": true}));
    }

    #[test]
    fn read_timeouts_are_idle_time() {
        let idle = PeerError::Transport(TransportError::Io(io::Error::new(
            io::ErrorKind::WouldBlock,
            "read timed out",
        )));
        assert!(is_idle(&idle));
        assert!(!is_idle(&PeerError::Disconnected("gone".to_string())));
        let reset = PeerError::Io(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
        assert!(!is_idle(&reset));
    }
}
