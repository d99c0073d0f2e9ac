// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;
use std::time::Duration;

/// Errors raised by the log-shipping pipeline.
///
/// Only the setup variants (`InvalidConfig`, `Connection`, `Spawn`) are returned
/// across the construction boundary. Every other variant is absorbed by the
/// component that observes it and reported through `tracing`.
#[derive(Debug, thiserror::Error)]
pub enum ShipError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to connect to {endpoint}:{port}: {source}")]
    Connection {
        endpoint: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("Failed to transmit line: {0}")]
    Transmission(#[source] io::Error),

    #[error("Failed to close {target}: {source}")]
    Close {
        target: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Failed to capture line: {0}")]
    Capture(String),

    #[error("Shut down before the queue drained: {pending} line(s) discarded after {grace:?}")]
    DrainTimeout { pending: usize, grace: Duration },

    #[error("Failed to start dispatch worker: {0}")]
    Spawn(#[source] io::Error),
}

impl ShipError {
    pub(crate) fn connection(endpoint: &str, port: u16, source: io::Error) -> Self {
        Self::Connection {
            endpoint: endpoint.to_string(),
            port,
            source,
        }
    }

    /// Whether this error must be surfaced to whoever asked for log shipping.
    #[must_use]
    pub fn is_setup_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig(_) | Self::Connection { .. } | Self::Spawn(_)
        )
    }
}
