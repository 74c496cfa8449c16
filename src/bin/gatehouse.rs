// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Command-line entry point.
//!
//! ```text
//! gatehouse [--config <settings file>] [<manifest file>...]
//! ```
//!
//! Exits with 0 after a clean drain, 1 when the gateway cannot start and 2
//! when a server fails after starting or the drain overruns.

use std::path::PathBuf;
use std::process::ExitCode;

use gatehouse::{Gateway, error_fmt, info_fmt};

const USAGE: &str = "usage: gatehouse [--config <settings file>] [<manifest file>...]";

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    manifests: Vec<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args, String> {
    let mut parsed = Args::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                let path = args.next().ok_or_else(|| format!("{arg} needs a path"))?;
                parsed.config = Some(PathBuf::from(path));
            }
            "-h" | "--help" => return Err(String::new()),
            flag if flag.starts_with('-') => return Err(format!("unknown option {flag}")),
            path => parsed.manifests.push(PathBuf::from(path)),
        }
    }
    if parsed.config.is_none() && parsed.manifests.is_empty() {
        return Err("no settings file or manifest given".to_string());
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match parse_args(std::env::args().skip(1)) {
        Ok(args) => args,
        Err(message) => {
            if !message.is_empty() {
                eprintln!("{message}");
            }
            eprintln!("{USAGE}");
            return ExitCode::from(1);
        }
    };

    let mut loader = Gateway::loader();
    if let Some(config) = args.config {
        loader = loader.with_config_file(config);
    }
    for manifest in args.manifests {
        loader = loader.with_manifest(manifest);
    }

    let gateway = match loader.build().await {
        Ok(gateway) => gateway,
        Err(e) => {
            // Logging may not be up when settings fail.
            eprintln!("gatehouse: {e}");
            error_fmt!("Startup", "{}", e);
            return ExitCode::from(1);
        }
    };

    match gateway.run().await {
        Ok(()) => {
            info_fmt!("Gatehouse", "Stopped cleanly");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error_fmt!("Gatehouse", "{}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}
