use clap::{Args, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod console;
pub mod ctl;
pub mod fetch_state;
pub mod frames;
pub mod inspect;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the effective boot configuration of an image.
    Inspect(InspectArgs),
    /// Download an image's initial state into one file.
    FetchState(FetchStateArgs),
    /// Decode guest-service frames from a captured serial stream.
    Frames(FramesArgs),
    /// Wait for a VM on a control socket and run one operation on it.
    Ctl(CtlArgs),
    /// Wait for a VM on a control socket and attach to its serial console.
    Console(ConsoleArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Inspect(args) => inspect::run(args, format),
        Command::FetchState(args) => fetch_state::run(args, format),
        Command::Frames(args) => frames::run(args, format),
        Command::Ctl(args) => ctl::run(args, format),
        Command::Console(args) => console::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Image base URL or directory.
    pub image: String,
    /// Forward serial port 0 to the controller.
    #[arg(long)]
    pub tty: bool,
    /// Enable the guest-service bridge.
    #[arg(long)]
    pub guest_service: bool,
    /// Serial port carrying guest-service frames.
    #[arg(long, default_value = "1")]
    pub guest_port: u8,
    /// Control endpoint of the host peer.
    #[arg(long, env = "ENV86_CONTROL_URL")]
    pub control_url: Option<String>,
    /// Where v86.wasm is served from.
    #[arg(long)]
    pub assets_url: Option<String>,
}

#[derive(Args, Debug)]
pub struct FetchStateArgs {
    /// Image base URL or directory.
    pub image: String,
    /// Destination file, `-` for stdout.
    #[arg(long, short = 'o')]
    pub output: PathBuf,
}

#[derive(Args, Debug)]
pub struct FramesArgs {
    /// Captured serial output, `-` for stdin.
    pub input: PathBuf,
    /// Largest data payload accepted before resynchronising.
    #[arg(long, default_value_t = env86_frame::DEFAULT_MAX_DATA_PAYLOAD)]
    pub max_payload: usize,
    /// Exit with status 60 if any bytes were discarded.
    #[arg(long)]
    pub strict: bool,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
pub enum CtlOp {
    Pause,
    Unpause,
    Save,
    Restore,
    SendText,
    SetScale,
    SetFullscreen,
    Mac,
    Screenshot,
}

#[derive(Args, Debug)]
pub struct CtlArgs {
    /// Control endpoint to bind (`unix://` prefix optional).
    pub socket: String,
    /// Operation to run once the VM has loaded.
    pub op: CtlOp,
    /// Operation arguments: text for send-text, X Y for set-scale, a state
    /// file for restore.
    #[arg(allow_negative_numbers = true)]
    pub args: Vec<String>,
    /// JSON object returned to the VM's `config` call.
    #[arg(long, value_name = "JSON")]
    pub config: Option<String>,
    /// Write binary results (save, screenshot) here instead of stdout.
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,
    /// Give up when the VM is silent this long (e.g. 30s, 500ms).
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ConsoleArgs {
    /// Control endpoint to bind (`unix://` prefix optional).
    pub socket: String,
    /// JSON object returned to the VM's `config` call. The tty is always enabled.
    #[arg(long, value_name = "JSON")]
    pub config: Option<String>,
    /// Detach once this text appears on the console.
    #[arg(long, value_name = "TEXT")]
    pub exit_on_pattern: Option<String>,
    /// Save the VM state to this file when the console ends.
    #[arg(long, value_name = "FILE")]
    pub save_on_exit: Option<PathBuf>,
    /// Send a newline once attached, so a restored guest redraws its prompt.
    #[arg(long)]
    pub nudge: bool,
    /// Give up when the VM is silent this long while starting up.
    #[arg(long, default_value = "30s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}
