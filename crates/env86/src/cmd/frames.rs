use std::io::Read;
use std::path::Path;

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use env86_frame::{Frame, FrameAssembler, Step};
use serde::Serialize;
use tracing::warn;

use crate::cmd::FramesArgs;
use crate::exit::{io_error, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{hex, payload_preview, print_json, print_raw, OutputFormat};

#[derive(Serialize)]
struct FrameRow {
    offset: usize,
    #[serde(rename = "type")]
    kind: &'static str,
    type_id: u8,
    size: usize,
    channel: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<String>,
    bytes: String,
}

#[derive(Serialize)]
struct FramesOutput {
    frames: Vec<FrameRow>,
    malformed: usize,
    discarded_bytes: usize,
    trailing_bytes: usize,
}

pub fn run(args: FramesArgs, format: OutputFormat) -> CliResult<i32> {
    let input = read_input(&args.input)?;
    let mut assembler = FrameAssembler::with_max_payload(args.max_payload);
    let (out, raw) = replay(&mut assembler, &input);

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_frames_table(&out),
        OutputFormat::Pretty => {
            for row in &out.frames {
                println!(
                    "@{} {} ({}) size={} channel={}{}",
                    row.offset,
                    row.kind,
                    row.type_id,
                    row.size,
                    row.channel,
                    row.payload
                        .as_deref()
                        .map(|p| format!(" payload={p}"))
                        .unwrap_or_default()
                );
            }
            print_summary(&out);
        }
        OutputFormat::Raw => print_raw(&raw),
    }

    if args.strict && (out.malformed > 0 || out.trailing_bytes > 0) {
        return Ok(DATA_INVALID);
    }
    Ok(SUCCESS)
}

fn read_input(path: &Path) -> CliResult<Vec<u8>> {
    if path == Path::new("-") {
        let mut data = Vec::new();
        std::io::stdin()
            .read_to_end(&mut data)
            .map_err(|err| io_error("read stdin failed", err))?;
        return Ok(data);
    }
    std::fs::read(path).map_err(|err| io_error(&format!("read {} failed", path.display()), err))
}

/// Feed `input` through `assembler`; also returns the bytes of every
/// complete frame back to back.
fn replay(assembler: &mut FrameAssembler, input: &[u8]) -> (FramesOutput, Vec<u8>) {
    let mut out = FramesOutput {
        frames: Vec::new(),
        malformed: 0,
        discarded_bytes: 0,
        trailing_bytes: 0,
    };
    let mut raw = Vec::new();

    for (index, &byte) in input.iter().enumerate() {
        match assembler.push(byte) {
            Step::Pending => {}
            Step::Frame(frame) => {
                raw.extend_from_slice(frame.as_bytes());
                out.frames.push(row(index + 1 - frame.len(), &frame));
            }
            Step::Malformed(bad) => {
                warn!(offset = index, reason = %bad.reason, "discarded {} bytes", bad.discarded.len());
                out.malformed += 1;
                out.discarded_bytes += bad.discarded.len();
            }
        }
    }
    out.trailing_bytes = assembler.buffered();
    (out, raw)
}

fn row(offset: usize, frame: &Frame) -> FrameRow {
    let kind = frame.message_type();
    FrameRow {
        offset,
        kind: kind.name(),
        type_id: kind.id(),
        size: frame.len(),
        channel: frame.channel_id(),
        payload: frame.payload().map(payload_preview),
        bytes: hex(frame.as_bytes()),
    }
}

fn print_frames_table(out: &FramesOutput) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec!["OFFSET", "TYPE", "SIZE", "CHANNEL", "PAYLOAD"]);
    for row in &out.frames {
        table.add_row(vec![
            row.offset.to_string(),
            format!("{} ({})", row.kind, row.type_id),
            row.size.to_string(),
            row.channel.to_string(),
            row.payload.clone().unwrap_or_else(|| "-".to_string()),
        ]);
    }
    println!("{table}");
    print_summary(out);
}

fn print_summary(out: &FramesOutput) {
    println!(
        "{} frames, {} malformed ({} bytes discarded), {} trailing bytes",
        out.frames.len(),
        out.malformed,
        out.discarded_bytes,
        out.trailing_bytes
    );
}
