// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::error::ShipError;

/// Tears a sink's connection down from a thread other than the one writing to it.
pub type Interrupter = Box<dyn FnOnce() + Send>;

/// Anything that accepts whole lines of text for shipping.
///
/// Implemented by [`crate::transport::TransportWriter`] (ships synchronously) and
/// [`crate::dispatcher::Dispatcher`] (queues for a background worker), so either
/// can sit behind a [`crate::decorator::LineDecorator`].
pub trait LineSink: Send {
    /// Ships one line. `line` carries no terminator.
    fn write_line(&mut self, line: &str) -> Result<(), ShipError>;

    /// Releases the sink's resources. Calling it more than once is a no-op.
    fn close(&mut self) -> Result<(), ShipError>;

    /// Returns a handle able to abort an in-flight `write_line` stuck on I/O.
    fn interrupter(&self) -> Option<Interrupter> {
        None
    }
}

impl<S: LineSink + ?Sized> LineSink for Box<S> {
    fn write_line(&mut self, line: &str) -> Result<(), ShipError> {
        (**self).write_line(line)
    }

    fn close(&mut self) -> Result<(), ShipError> {
        (**self).close()
    }

    fn interrupter(&self) -> Option<Interrupter> {
        (**self).interrupter()
    }
}
