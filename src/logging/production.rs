//! Plain log lines for log aggregation: UTC timestamp, level, target, message and the
//! span chain (outermost first), no ANSI colors.

use chrono::{SecondsFormat, Utc};
use tracing::{Event, Subscriber};
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;

pub struct ProductionLogFormat;

impl<S, N> FormatEvent<S, N> for ProductionLogFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> std::fmt::Result {
        let metadata = event.metadata();

        write!(
            writer,
            "{} {:<5} {}: ",
            Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            metadata.level(),
            metadata.target()
        )?;

        ctx.field_format().format_fields(writer.by_ref(), event)?;

        if let Some(scope) = ctx.event_scope() {
            let mut first = true;
            for span in scope.from_root() {
                if first {
                    write!(writer, " ")?;
                    first = false;
                }

                write!(writer, "[{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>()
                    && !fields.is_empty()
                {
                    write!(writer, "{{{}}}", fields)?;
                }
                write!(writer, "]")?;
            }
        }

        writeln!(writer)
    }
}
