mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "env86", version, about = "v86 image and control CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "ENV86_LOG",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::CtlOp;

    #[test]
    fn parses_inspect_flags() {
        let cli = Cli::try_parse_from([
            "env86",
            "inspect",
            "./images/alpine",
            "--tty",
            "--guest-service",
            "--control-url",
            "unix:///run/env86/ctl",
        ])
        .expect("inspect args should parse");

        let Command::Inspect(args) = cli.command else {
            panic!("expected inspect");
        };
        assert!(args.tty);
        assert!(args.guest_service);
        assert_eq!(args.guest_port, 1);
        assert_eq!(args.control_url.as_deref(), Some("unix:///run/env86/ctl"));
    }

    #[test]
    fn parses_ctl_operation_and_args() {
        let cli = Cli::try_parse_from([
            "env86", "ctl", "/tmp/ctl", "set-scale", "2", "1.5", "--timeout", "3s",
        ])
        .expect("ctl args should parse");

        let Command::Ctl(args) = cli.command else {
            panic!("expected ctl");
        };
        assert!(matches!(args.op, CtlOp::SetScale));
        assert_eq!(args.args, vec!["2", "1.5"]);
    }

    #[test]
    fn parses_console_options() {
        let cli = Cli::try_parse_from([
            "env86",
            "console",
            "unix:///tmp/ctl",
            "--exit-on-pattern",
            "login: ",
            "--save-on-exit",
            "vm.state",
            "--nudge",
        ])
        .expect("console args should parse");

        let Command::Console(args) = cli.command else {
            panic!("expected console");
        };
        assert_eq!(args.exit_on_pattern.as_deref(), Some("login: "));
        assert_eq!(args.save_on_exit, Some(std::path::PathBuf::from("vm.state")));
        assert!(args.nudge);
        assert_eq!(args.timeout, "30s");
    }

    #[test]
    fn frames_default_limit_fits_one_envelope() {
        let cli = Cli::try_parse_from(["env86", "frames", "capture.bin"])
            .expect("frames args should parse");
        let Command::Frames(args) = cli.command else {
            panic!("expected frames");
        };
        assert_eq!(
            args.max_payload + env86_frame::DATA_HEADER_SIZE,
            env86_frame::DEFAULT_MAX_PAYLOAD
        );
    }

    #[test]
    fn fetch_state_requires_output() {
        let err = Cli::try_parse_from(["env86", "fetch-state", "./images/alpine"])
            .expect_err("missing --output should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn rejects_unknown_ctl_operation() {
        let err = Cli::try_parse_from(["env86", "ctl", "/tmp/ctl", "reboot"])
            .expect_err("unknown op should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
