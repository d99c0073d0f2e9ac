// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Entry points for hosts that own an output stream and want it mirrored.

use std::io::{self, Write};

use tracing::{debug, error};

use crate::config::ShipperConfig;
use crate::decorator::LineDecorator;
use crate::dispatcher::Dispatcher;
use crate::error::ShipError;
use crate::transport::TransportWriter;

/// Builds the shipping side of the pipeline: transport first, then the
/// dispatcher that owns it.
///
/// Fails with the first setup error; no worker thread exists in that case.
pub fn connect(config: &ShipperConfig) -> Result<Dispatcher, ShipError> {
    config.validate()?;
    let endpoint = config.resolve_endpoint()?;
    let transport = TransportWriter::open(
        &config.token,
        &endpoint,
        config.port,
        config.connect_timeout,
    )?;
    Dispatcher::with_grace_period(transport, config.shutdown_grace_period)
}

/// A host's output stream, mirrored to the ingestion endpoint when possible.
pub enum DecoratedOutput<W: Write> {
    Shipping(LineDecorator<W, Dispatcher>),
    /// Shipping could not be set up; the original stream, untouched.
    Passthrough(W),
}

/// Wraps `output` so every line written to it is also shipped.
///
/// Setup failures are logged and leave `output` as it was, so the host's own
/// output never depends on the ingestion endpoint being reachable.
pub fn decorate_output<W: Write>(config: &ShipperConfig, output: W) -> DecoratedOutput<W> {
    match connect(config) {
        Ok(dispatcher) => {
            debug!("Log shipping enabled");
            DecoratedOutput::Shipping(LineDecorator::with_encoding(
                output,
                dispatcher,
                config.line_encoding,
            ))
        }
        Err(e) => {
            error!("Log shipping disabled: {e}");
            DecoratedOutput::Passthrough(output)
        }
    }
}

impl<W: Write> DecoratedOutput<W> {
    #[must_use]
    pub fn is_shipping(&self) -> bool {
        matches!(self, Self::Shipping(_))
    }

    /// Shuts shipping down (when active) and releases the wrapped stream.
    pub fn close(self) -> io::Result<()> {
        match self {
            Self::Shipping(mut decorator) => decorator.close(),
            Self::Passthrough(mut output) => output.flush(),
        }
    }
}

impl<W: Write> Write for DecoratedOutput<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Shipping(decorator) => decorator.write(buf),
            Self::Passthrough(output) => output.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Shipping(decorator) => decorator.flush(),
            Self::Passthrough(output) => output.flush(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Region;
    use std::net::TcpListener;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn closed_local_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    #[traced_test]
    fn test_invalid_config_passes_through() {
        let config = ShipperConfig::default();
        let mut output = decorate_output(&config, Vec::new());
        assert!(!output.is_shipping());

        output.write_all(b"line1\n").unwrap();
        match &output {
            DecoratedOutput::Passthrough(bytes) => assert_eq!(bytes, b"line1\n"),
            DecoratedOutput::Shipping(_) => panic!("expected passthrough"),
        }
        output.close().unwrap();
        assert!(logs_contain("Log shipping disabled"));
    }

    #[test]
    fn test_connect_rejects_invalid_config_before_connecting() {
        let config = ShipperConfig {
            region: None,
            endpoint: None,
            ..ShipperConfig::new("token", Region::Us)
        };
        assert!(matches!(
            connect(&config),
            Err(ShipError::InvalidConfig(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_unreachable_endpoint_passes_through() {
        let config = ShipperConfig {
            endpoint: Some("127.0.0.1".to_string()),
            port: closed_local_port(),
            connect_timeout: Duration::from_secs(2),
            ..ShipperConfig::new("token", Region::Eu)
        };

        let err = connect(&config).err().unwrap();
        assert!(matches!(err, ShipError::Connection { .. }));
        assert!(err.is_setup_failure());

        let mut output = decorate_output(&config, Vec::new());
        assert!(!output.is_shipping());
        output.write_all(b"still printed\n").unwrap();
        output.close().unwrap();
        assert!(logs_contain("Failed to connect to 127.0.0.1"));
    }
}
