use std::path::{Path, PathBuf};
use std::time::Duration;

use env86_frame::EnvelopeConfig;
use env86_peer::{ControlListener, PeerError, RemoteVm, SocketSink, SocketSource};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::cmd::{CtlArgs, CtlOp};
use crate::exit::{io_error, peer_error, CliError, CliResult, FAILURE, INTERNAL, SUCCESS, USAGE};
use crate::output::{print_json, print_raw, print_table, OutputFormat};

type Vm = RemoteVm<SocketSink, SocketSource>;

/// An operation with its arguments already checked.
#[derive(Debug, Clone, PartialEq)]
enum Request {
    Pause,
    Unpause,
    Save,
    Restore(Vec<u8>),
    SendText(String),
    SetScale(f64, f64),
    SetFullscreen,
    Mac,
    Screenshot,
}

enum Outcome {
    Done,
    Text(String),
    Bytes(Vec<u8>),
    Empty,
}

#[derive(Serialize)]
struct CtlOutput<'a> {
    op: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    output: Option<String>,
}

pub fn run(args: CtlArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    let config = parse_config(args.config.as_deref())?;
    let request = request_from_args(args.op, &args.args)?;

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

    let mut vm = listener
        .accept()
        .map_err(|err| peer_error("accept failed", err))?;
    vm.wait_loaded()
        .map_err(|err| peer_error("vm did not finish loading", err))?;
    info!(tty = vm.tty_open(), "vm loaded");

    let name = op_name(args.op);
    let outcome =
        invoke(&mut vm, request).map_err(|err| peer_error(&format!("{name} failed"), err))?;
    report(name, outcome, args.output.as_deref(), format)?;
    Ok(SUCCESS)
}

fn op_name(op: CtlOp) -> &'static str {
    match op {
        CtlOp::Pause => "pause",
        CtlOp::Unpause => "unpause",
        CtlOp::Save => "save",
        CtlOp::Restore => "restore",
        CtlOp::SendText => "sendKeyboard",
        CtlOp::SetScale => "setScale",
        CtlOp::SetFullscreen => "setFullscreen",
        CtlOp::Mac => "mac",
        CtlOp::Screenshot => "screenshot",
    }
}

fn request_from_args(op: CtlOp, args: &[String]) -> CliResult<Request> {
    let expected = match op {
        CtlOp::Restore | CtlOp::SendText => 1,
        CtlOp::SetScale => 2,
        _ => 0,
    };
    if args.len() != expected {
        return Err(CliError::new(
            USAGE,
            format!(
                "{} takes {expected} argument(s), got {}",
                op_name(op),
                args.len()
            ),
        ));
    }

    Ok(match op {
        CtlOp::Pause => Request::Pause,
        CtlOp::Unpause => Request::Unpause,
        CtlOp::Save => Request::Save,
        CtlOp::Restore => {
            let state = std::fs::read(&args[0])
                .map_err(|err| io_error(&format!("read {} failed", args[0]), err))?;
            Request::Restore(state)
        }
        CtlOp::SendText => Request::SendText(args[0].clone()),
        CtlOp::SetScale => Request::SetScale(parse_scale(&args[0])?, parse_scale(&args[1])?),
        CtlOp::SetFullscreen => Request::SetFullscreen,
        CtlOp::Mac => Request::Mac,
        CtlOp::Screenshot => Request::Screenshot,
    })
}

fn parse_scale(input: &str) -> CliResult<f64> {
    input
        .parse::<f64>()
        .ok()
        .filter(|scale| scale.is_finite())
        .ok_or_else(|| CliError::new(USAGE, format!("invalid scale: {input}")))
}

pub(crate) fn parse_config(input: Option<&str>) -> CliResult<Value> {
    let Some(input) = input else {
        return Ok(Value::Object(Map::new()));
    };
    match serde_json::from_str(input) {
        Ok(Value::Object(map)) => Ok(Value::Object(map)),
        Ok(_) => Err(CliError::new(USAGE, "--config must be a JSON object")),
        Err(err) => Err(CliError::new(USAGE, format!("--config is not JSON: {err}"))),
    }
}

fn invoke(vm: &mut Vm, request: Request) -> Result<Outcome, PeerError> {
    Ok(match request {
        Request::Pause => vm.pause().map(|_| Outcome::Done)?,
        Request::Unpause => vm.unpause().map(|_| Outcome::Done)?,
        Request::Save => Outcome::Bytes(vm.save()?),
        Request::Restore(state) => vm.restore(&state).map(|_| Outcome::Done)?,
        Request::SendText(text) => vm.send_text(&text).map(|_| Outcome::Done)?,
        Request::SetScale(x, y) => vm.set_scale(x, y).map(|_| Outcome::Done)?,
        Request::SetFullscreen => vm.set_fullscreen().map(|_| Outcome::Done)?,
        Request::Mac => Outcome::Text(vm.mac()?),
        Request::Screenshot => vm.screenshot()?.map_or(Outcome::Empty, Outcome::Bytes),
    })
}

fn report(op: &str, outcome: Outcome, output: Option<&Path>, format: OutputFormat) -> CliResult<()> {
    let mut out = CtlOutput {
        op,
        result: None,
        size: None,
        output: None,
    };

    match outcome {
        Outcome::Done => out.result = Some("ok".to_string()),
        Outcome::Empty => out.result = Some("empty".to_string()),
        Outcome::Text(text) => out.result = Some(text),
        Outcome::Bytes(data) => {
            out.size = Some(data.len());
            match output {
                Some(path) => {
                    std::fs::write(path, &data).map_err(|err| io_error("write failed", err))?;
                    out.output = Some(path.display().to_string());
                }
                None if matches!(format, OutputFormat::Raw) => {
                    print_raw(&data);
                    return Ok(());
                }
                None => warn!(op, "binary result not written; pass --output or --format raw"),
            }
        }
    }

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => {
            let mut rows = vec![("op".to_string(), out.op.to_string())];
            rows.extend(out.result.map(|r| ("result".to_string(), r)));
            rows.extend(out.size.map(|s| ("size".to_string(), s.to_string())));
            rows.extend(out.output.map(|o| ("output".to_string(), o)));
            print_table(["FIELD", "VALUE"], rows);
        }
        OutputFormat::Raw => {
            if let Some(result) = out.result.or(out.output) {
                println!("{result}");
            }
        }
    }
    Ok(())
}

pub(crate) fn install_ctrlc_handler(socket: PathBuf) -> CliResult<()> {
    ctrlc::set_handler(move || {
        let _ = std::fs::remove_file(&socket);
        std::process::exit(FAILURE);
    })
    .map_err(|err| CliError::new(INTERNAL, format!("signal handler setup failed: {err}")))
}

pub(crate) fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "timeout must not be empty"));
    }

    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }

    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn timeouts_accept_seconds_and_millis() {
        assert_eq!(parse_timeout("5s").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_timeout("2").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_timeout("150ms").unwrap(), Duration::from_millis(150));
        assert!(parse_timeout("0s").is_err());
        assert!(parse_timeout("soon").is_err());
    }

    #[test]
    fn requests_check_arity() {
        assert_eq!(
            request_from_args(CtlOp::SetScale, &strings(&["2", "0.5"])).unwrap(),
            Request::SetScale(2.0, 0.5)
        );
        assert_eq!(
            request_from_args(CtlOp::SendText, &strings(&["root\n"])).unwrap(),
            Request::SendText("root\n".to_string())
        );

        let err = request_from_args(CtlOp::Mac, &strings(&["extra"])).unwrap_err();
        assert_eq!(err.code, USAGE);
        let err = request_from_args(CtlOp::SetScale, &strings(&["2", "wide"])).unwrap_err();
        assert_eq!(err.code, USAGE);
    }

    #[test]
    fn restore_reads_the_state_file() {
        let err = request_from_args(CtlOp::Restore, &strings(&["/nonexistent/env86.state"]))
            .unwrap_err();
        assert_eq!(err.code, FAILURE);
    }

    #[test]
    fn config_must_be_an_object() {
        assert_eq!(parse_config(None).unwrap(), Value::Object(Map::new()));
        assert_eq!(
            parse_config(Some(r#"{"EnableTTY": true}"#)).unwrap()["EnableTTY"],
            true
        );
        assert_eq!(parse_config(Some("[1]")).unwrap_err().code, USAGE);
        assert_eq!(parse_config(Some("{")).unwrap_err().code, USAGE);
    }
}
