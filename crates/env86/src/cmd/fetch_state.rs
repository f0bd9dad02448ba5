use std::path::Path;

use env86_image::{
    chunk_urls, download_chunks, manifest_url, AnyFetcher, Fetcher, ImageError, ImageManifest,
};
use serde::Serialize;
use tracing::info;

use crate::cmd::FetchStateArgs;
use crate::exit::{image_error, io_error, CliError, CliResult, DATA_INVALID, SUCCESS};
use crate::output::{print_json, print_raw, print_table, OutputFormat};

#[derive(Serialize)]
struct StateOutput {
    image: String,
    parts: u32,
    bytes: usize,
    output: String,
}

pub fn run(args: FetchStateArgs, format: OutputFormat) -> CliResult<i32> {
    let image = args.image.trim_end_matches('/');
    let fetcher = AnyFetcher;

    let url = manifest_url(image);
    let raw = fetcher
        .get(&url)
        .map_err(|err| image_error("manifest fetch failed", err))?
        .ok_or_else(|| image_error("manifest fetch failed", ImageError::MissingManifest(url)))?;
    let manifest =
        ImageManifest::parse(&raw).map_err(|err| image_error("manifest invalid", err))?;
    let parts = manifest
        .state_parts()
        .map_err(|err| image_error("manifest invalid", err))?;
    if parts == 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{image} has no initial state"),
        ));
    }

    let state = download_chunks(&fetcher, &chunk_urls(image, parts))
        .map_err(|err| image_error("state download failed", err))?;
    info!(parts, bytes = state.len(), "initial state downloaded");

    let to_stdout = args.output == Path::new("-");
    if to_stdout {
        print_raw(&state);
        return Ok(SUCCESS);
    }
    std::fs::write(&args.output, &state).map_err(|err| io_error("write failed", err))?;

    let out = StateOutput {
        image: image.to_string(),
        parts,
        bytes: state.len(),
        output: args.output.display().to_string(),
    };
    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table | OutputFormat::Pretty => print_table(
            ["FIELD", "VALUE"],
            [
                ("image".to_string(), out.image),
                ("parts".to_string(), out.parts.to_string()),
                ("bytes".to_string(), out.bytes.to_string()),
                ("output".to_string(), out.output),
            ],
        ),
        OutputFormat::Raw => println!("{}", out.output),
    }
    Ok(SUCCESS)
}
