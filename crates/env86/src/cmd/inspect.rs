use env86_image::{prepare, AnyFetcher, BootOptions};
use serde_json::Value;
use tracing::debug;

use crate::cmd::InspectArgs;
use crate::exit::{image_error, CliResult, SUCCESS};
use crate::output::{print_json, print_json_pretty, print_table, value_cell, OutputFormat};

pub fn run(args: InspectArgs, format: OutputFormat) -> CliResult<i32> {
    let options = BootOptions {
        control_url: args.control_url,
        enable_tty: args.tty,
        guest_service: args.guest_service,
        guest_port: args.guest_port,
        assets_url: args.assets_url,
    };

    let config = prepare(&AnyFetcher, &args.image, options)
        .map_err(|err| image_error("inspect failed", err))?;
    debug!(image = %config.image_url, "image prepared");

    let value = config
        .to_value()
        .map_err(|err| image_error("inspect failed", err))?;
    print_config(&value, format);
    Ok(SUCCESS)
}

fn print_config(value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json | OutputFormat::Raw => print_json(value),
        OutputFormat::Pretty => print_json_pretty(value),
        OutputFormat::Table => {
            let rows = value
                .as_object()
                .into_iter()
                .flatten()
                .map(|(key, value)| (key.clone(), value_cell(value)));
            print_table(["KEY", "VALUE"], rows);
        }
    }
}
