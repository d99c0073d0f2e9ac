// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Copies stdin to stdout unchanged while shipping every line to the ingestion
//! endpoint configured through `INSIGHT_*` environment variables.
//!
//! ```text
//! make 2>&1 | INSIGHT_TOKEN=... INSIGHT_REGION=eu insight-tee
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

mod logger;

use std::env;
use std::io::{self, Read, Write};
use std::process::ExitCode;

use insight_shipper::{decorate_output, DecoratedOutput, ShipperConfig};
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

// Read size for stdin; matches a typical pipe buffer page
const BUFFER_SIZE: usize = 8192;

fn main() -> ExitCode {
    let log_level = env::var("INSIGHT_LOG_LEVEL")
        .map(|val| val.to_lowercase())
        .unwrap_or("info".to_string());
    init_logging(&log_level);

    let stdout = io::stdout();
    let mut output = match ShipperConfig::from_env() {
        Ok(config) => {
            debug!("Shipping to {:?}", config.resolve_endpoint().ok());
            decorate_output(&config, stdout)
        }
        Err(e) => {
            error!("Log shipping disabled: {e}");
            DecoratedOutput::Passthrough(stdout)
        }
    };

    let copied = copy_stdin(&mut output);
    let closed = output.close();

    match copied.and(closed) {
        Ok(()) => ExitCode::SUCCESS,
        // Downstream reader went away (e.g. `| head`)
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to copy output: {e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(log_level: &str) {
    let env_filter = format!("rustls=off,{log_level}");
    let filter = EnvFilter::try_new(env_filter).unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .event_format(logger::Formatter)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{} | ERROR | setting default subscriber failed: {e}", logger::PREFIX);
    }
    debug!("Logging subsystem enabled");
}

/// Forwards stdin chunk by chunk, flushing after each so nothing is held back.
fn copy_stdin<W: Write>(output: &mut W) -> io::Result<()> {
    let mut stdin = io::stdin().lock();
    let mut buf = [0u8; BUFFER_SIZE];
    loop {
        let n = match stdin.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        output.write_all(&buf[..n])?;
        output.flush()?;
    }
}
