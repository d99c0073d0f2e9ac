// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Tracing formatter for the shipper's own diagnostics.
//!
//! Diagnostics go to stderr next to whatever the wrapped process prints there,
//! so every record is prefixed for easy filtering:
//!
//! ```text
//! INSIGHT_SHIPPER | LEVEL | [outer{fields}:inner{fields}: ] message {event_fields}
//! ```

use std::fmt::{self, Write as _};
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;

pub const PREFIX: &str = "INSIGHT_SHIPPER";

#[derive(Debug, Clone, Copy)]
pub struct Formatter;

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(writer, "{PREFIX} | {} | ", event.metadata().level())?;
        write_scope(ctx, &mut writer)?;
        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Writes the spans around the event, outermost first, as `outer:inner{a=1}: `.
fn write_scope<S, N>(ctx: &FmtContext<'_, S, N>, writer: &mut format::Writer<'_>) -> fmt::Result
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    let Some(scope) = ctx.event_scope() else {
        return Ok(());
    };

    let mut nested = false;
    for span in scope.from_root() {
        if nested {
            writer.write_char(':')?;
        }
        writer.write_str(span.name())?;
        if let Some(fields) = span
            .extensions()
            .get::<FormattedFields<N>>()
            .filter(|fields| !fields.is_empty())
        {
            write!(writer, "{{{fields}}}")?;
        }
        nested = true;
    }
    if nested {
        writer.write_str(": ")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing::{info, info_span, warn};

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn render(emit: impl FnOnce()) -> String {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_writer(move || writer.clone())
            .event_format(Formatter)
            .finish();
        tracing::subscriber::with_default(subscriber, emit);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_event_is_prefixed_with_level() {
        let rendered = render(|| info!("Logging subsystem enabled"));
        assert_eq!(rendered, "INSIGHT_SHIPPER | INFO | Logging subsystem enabled\n");
    }

    #[test]
    fn test_nested_spans_are_joined_outermost_first() {
        let rendered = render(|| {
            let outer = info_span!("pipeline");
            let _outer = outer.enter();
            let inner = info_span!("dispatch", port = 443);
            let _inner = inner.enter();
            warn!("Dropping line");
        });
        assert_eq!(
            rendered,
            "INSIGHT_SHIPPER | WARN | pipeline:dispatch{port=443}: Dropping line\n"
        );
    }
}
