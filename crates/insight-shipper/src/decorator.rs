// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Line-splitting output decorator.
//!
//! [`LineDecorator`] sits in front of an existing output stream. Every byte
//! written to it is forwarded to the wrapped stream untouched and immediately.
//! On the side, bytes are accumulated until a terminator (`\n` or `\r`) and the
//! completed line is handed to a [`LineSink`]. A run of terminators ends a single
//! line: empty lines are never emitted, which also makes `\r\n` split across two
//! writes behave like one terminator.
//!
//! Nothing that goes wrong on the shipping side reaches the caller. The only
//! errors `write` returns are the wrapped stream's own.

use std::io::{self, Write};

use tracing::{debug, warn};

use crate::encoding::LineEncoding;
use crate::sink::LineSink;

fn is_terminator(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

fn closed_stream() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "output stream is closed")
}

pub struct LineDecorator<W: Write, S: LineSink> {
    inner: Option<W>,
    sink: Option<S>,
    pending: Vec<u8>,
    encoding: LineEncoding,
}

impl<W: Write, S: LineSink> LineDecorator<W, S> {
    pub fn new(inner: W, sink: S) -> Self {
        Self::with_encoding(inner, sink, LineEncoding::default())
    }

    pub fn with_encoding(inner: W, sink: S, encoding: LineEncoding) -> Self {
        Self {
            inner: Some(inner),
            sink: Some(sink),
            pending: Vec::new(),
            encoding,
        }
    }

    /// Bytes buffered since the last terminator.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.is_none()
    }

    fn capture(&mut self, buf: &[u8]) {
        let mut rest = buf;
        while let Some(pos) = rest.iter().position(|&b| is_terminator(b)) {
            self.pending.extend_from_slice(&rest[..pos]);
            self.emit_line();
            rest = &rest[pos + 1..];
        }
        self.pending.extend_from_slice(rest);
    }

    fn emit_line(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        if let Some(sink) = self.sink.as_mut() {
            let line = self.encoding.decode(&self.pending);
            if let Err(e) = sink.write_line(&line) {
                warn!("Failed to ship line: {e}");
            }
        }
        self.pending.clear();
    }

    /// Closes the line sink, drops any partial line, then flushes and releases
    /// the wrapped stream. Every step runs even if an earlier one failed; the
    /// only error returned is the wrapped stream's.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut sink) = self.sink.take() {
            if let Err(e) = sink.close() {
                warn!("Failed to close line sink: {e}");
            }
        }

        if !self.pending.is_empty() {
            debug!(
                "Discarding {} bytes of unterminated output",
                self.pending.len()
            );
            self.pending.clear();
        }

        match self.inner.take() {
            Some(mut inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write, S: LineSink> Write for LineDecorator<W, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.inner.is_none() {
            return Err(closed_stream());
        }

        // Line capture first; forwarding happens whatever it did
        self.capture(buf);

        let inner = self.inner.as_mut().ok_or_else(closed_stream)?;
        inner.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write, S: LineSink> Drop for LineDecorator<W, S> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            debug!("Failed to close output stream on drop: {e}");
        }
    }
}
