// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mirrors a process's textual output, line by line, to a remote log-ingestion
//! endpoint without blocking or altering the original stream.
//!
//! The pipeline has three parts, built leaf first and torn down in reverse:
//! - [`transport::TransportWriter`]: one TLS connection, one `token || line || '\n'`
//!   record per line.
//! - [`dispatcher::Dispatcher`]: queues lines and ships them from a single worker
//!   thread so producers never wait on the network.
//! - [`decorator::LineDecorator`]: taps an existing [`std::io::Write`], splitting
//!   what passes through into lines.
//!
//! Hosts normally only need [`output::decorate_output`].

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod config;
pub mod decorator;
pub mod dispatcher;
pub mod encoding;
pub mod error;
pub mod output;
pub mod sink;
pub mod transport;

pub use config::{Region, ShipperConfig};
pub use decorator::LineDecorator;
pub use dispatcher::{DispatchHandle, Dispatcher};
pub use encoding::LineEncoding;
pub use error::ShipError;
pub use output::{connect, decorate_output, DecoratedOutput};
pub use sink::LineSink;
pub use transport::TransportWriter;
